//! Domain layer: record types, matching, chunking and run-state types.
//!
//! No remote I/O happens here; everything operates on records already
//! fetched by the infrastructure layer.

pub mod chunking;
pub mod disposition;
pub mod events;
pub mod index;
pub mod records;
pub mod resolver;

pub use chunking::{split_into_chunks, Chunk, DateRange, RangeError};
pub use disposition::{DispositionCatalog, LabelResolver, StaticLabelResolver};
pub use events::{BackfillEvent, RunCounters, RunStatus, RunSummary};
pub use index::{ActivityIndex, IndexKeyPolicy, IndexedActivity};
pub use records::{ActivityRecord, CallRecord, Direction, RecordError};
pub use resolver::{resolve, CandidateSummary, MatchResult, MatchSource};

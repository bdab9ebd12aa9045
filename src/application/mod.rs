//! Application layer: run context and the backfill orchestrator.

pub mod context;
pub mod orchestrator;

pub use context::RunContext;
pub use orchestrator::{BackfillMode, BackfillOrchestrator};

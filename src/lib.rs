//! callsync — telephony call / CRM activity reconciliation engine
//!
//! Reconciles two remote record streams from a CRM platform — telephony
//! call logs and CRM activity records — and writes the merged result
//! idempotently into a custom entity store. For each call (or each target
//! row missing a link) the engine finds the activity that most plausibly
//! corresponds to it, using the responsible-user identity and a short time
//! window, then persists the match exactly once per source record,
//! tolerating an unreliable, paginated, rate-limited remote API.
//!
//! The transport is an injected capability
//! ([`infrastructure::RemoteInvoker`]); a REST webhook adapter ships in
//! [`infrastructure::RestInvoker`]. Host-platform authentication and any
//! on-screen surface stay outside this crate.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::{BackfillMode, BackfillOrchestrator, RunContext};
pub use domain::{
    BackfillEvent, DateRange, IndexKeyPolicy, RunCounters, RunStatus, RunSummary,
};
pub use infrastructure::{
    FetchClient, FetchError, FetchPolicy, RemoteError, RemoteInvoker, RestInvoker, SyncConfig,
};

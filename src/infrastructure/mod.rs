//! Infrastructure layer: remote transport, paginated fetch, providers,
//! the target-entity store, configuration and logging.

pub mod activities;
pub mod config;
pub mod fetch_client;
pub mod logging;
pub mod remote;
pub mod response;
pub mod rest_invoker;
pub mod target_store;
pub mod telephony;

pub use activities::{ActivityProvider, WriteBackPolicy};
pub use config::{FieldCodes, SyncConfig};
pub use fetch_client::{FetchClient, FetchError, FetchPolicy};
pub use logging::{init_logging, init_logging_with_file};
pub use remote::{invoke_with_timeout, RemoteError, RemoteInvoker};
pub use response::{normalize_page, NormalizedPage};
pub use rest_invoker::RestInvoker;
pub use target_store::{TargetRow, TargetStore, UpsertMode, UpsertOutcome};
pub use telephony::TelephonyProvider;

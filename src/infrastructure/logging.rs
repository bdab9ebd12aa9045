//! Logging bootstrap
//!
//! Console output through an `EnvFilter` (overridable via `RUST_LOG`),
//! with optional non-blocking file output. The file writer guard must
//! outlive the process, so it is parked in a global.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

static LOG_GUARDS: Lazy<Mutex<Vec<WorkerGuard>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// Console-only logging at `level` unless `RUST_LOG` overrides it.
pub fn init_logging(level: &str) -> Result<()> {
    init_logging_with_file(level, None)
}

/// Console logging plus, when `log_dir` is given, a daily-rolling
/// `callsync.log` written through a non-blocking appender.
pub fn init_logging_with_file(level: &str, log_dir: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_layer = log_dir.map(|dir| {
        let appender = rolling::daily(dir, "callsync.log");
        let (writer, guard) = non_blocking(appender);
        if let Ok(mut guards) = LOG_GUARDS.lock() {
            guards.push(guard);
        }
        fmt::layer().with_writer(writer).with_ansi(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()
        .map_err(|err| anyhow!("failed to initialize logging: {err}"))
}

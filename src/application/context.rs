//! Per-run context: identity, configuration, cancellation and events
//!
//! One `RunContext` is passed explicitly into every component call for a
//! run. Cancellation is a context-derived flag checked at yield points —
//! never ambient shared state — and progress flows out through a broadcast
//! channel the caller subscribes to.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::events::BackfillEvent;
use crate::infrastructure::config::SyncConfig;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub config: Arc<SyncConfig>,
    pub cancellation_token: CancellationToken,
    event_tx: broadcast::Sender<BackfillEvent>,
}

impl RunContext {
    pub fn new(config: Arc<SyncConfig>) -> (Self, broadcast::Receiver<BackfillEvent>) {
        let (event_tx, event_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        (
            Self {
                run_id: Uuid::new_v4().to_string(),
                config,
                cancellation_token: CancellationToken::new(),
                event_tx,
            },
            event_rx,
        )
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Requests a cooperative stop; in-flight remote calls are not aborted,
    /// only the loop continuation.
    pub fn cancel(&self) {
        self.cancellation_token.cancel();
    }

    /// Emits a progress event. A send with no live receivers is fine — the
    /// driving surface may have detached.
    pub fn emit(&self, event: BackfillEvent) {
        let _ = self.event_tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BackfillEvent> {
        self.event_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::RunCounters;

    #[tokio::test]
    async fn cancellation_is_visible_through_the_context() {
        let (ctx, _rx) = RunContext::new(Arc::new(SyncConfig::default()));
        assert!(!ctx.is_cancelled());
        ctx.cancel();
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn emitted_events_reach_subscribers() {
        let (ctx, mut rx) = RunContext::new(Arc::new(SyncConfig::default()));
        ctx.emit(BackfillEvent::Progress {
            counters: RunCounters::default(),
            percentage: 0.0,
            message: "warming up".to_string(),
        });
        match rx.recv().await.unwrap() {
            BackfillEvent::Progress { message, .. } => assert_eq!(message, "warming up"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn emit_without_receivers_does_not_panic() {
        let (ctx, rx) = RunContext::new(Arc::new(SyncConfig::default()));
        drop(rx);
        ctx.emit(BackfillEvent::RunStarted { run_id: ctx.run_id.clone(), chunk_count: 0 });
    }
}

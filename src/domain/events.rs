//! Run-state, counters and progress events emitted during a backfill run

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal-state machine of a backfill run:
/// `Idle → Running → (Completed | Canceled | Failed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Idle,
    Running,
    Completed,
    Canceled,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "Idle",
            Self::Running => "Running",
            Self::Completed => "Completed",
            Self::Canceled => "Canceled",
            Self::Failed => "Failed",
        };
        write!(f, "{s}")
    }
}

/// Running counters, updated per item and reported in every progress event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub total: u64,
    pub done: u64,
    pub created: u64,
    pub updated: u64,
    pub no_match: u64,
    pub ambiguous: u64,
    pub errors: u64,
}

impl RunCounters {
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.done as f64 / self.total as f64) * 100.0
        }
    }
}

/// Final report of a run, emitted with the terminal event and returned to
/// the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    pub counters: RunCounters,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Human-readable failure reason; None unless `status == Failed`.
    pub reason: Option<String>,
}

/// Progress feed consumed by whatever surface drives the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BackfillEvent {
    RunStarted {
        run_id: String,
        chunk_count: usize,
    },
    ChunkStarted {
        index: usize,
        total: usize,
        from: NaiveDateTime,
        to: NaiveDateTime,
    },
    Progress {
        counters: RunCounters,
        percentage: f64,
        message: String,
    },
    RunCompleted { summary: RunSummary },
    RunCanceled { summary: RunSummary },
    RunFailed { summary: RunSummary },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_handles_empty_and_partial_totals() {
        let zero = RunCounters::default();
        assert_eq!(zero.percentage(), 0.0);

        let half = RunCounters { total: 10, done: 5, ..Default::default() };
        assert!((half.percentage() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn events_serialize_round_trip() {
        let event = BackfillEvent::Progress {
            counters: RunCounters { total: 3, done: 1, created: 1, ..Default::default() },
            percentage: 33.3,
            message: "chunk 1/2".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: BackfillEvent = serde_json::from_str(&json).unwrap();
        match back {
            BackfillEvent::Progress { counters, .. } => assert_eq!(counters.created, 1),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}

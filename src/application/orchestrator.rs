//! Chunked backfill orchestrator
//!
//! Drives fetch → index → resolve → upsert over a date range split into
//! day-aligned chunks, strictly in chronological order and with exactly one
//! run active at a time. Item-level failures are counted and logged inside
//! the per-item loop; chunk-level fetch failures abort the whole run.
//! Cancellation is cooperative, checked at the start of every chunk and
//! every item — already-written records stay committed.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::domain::chunking::{split_into_chunks, Chunk, DateRange};
use crate::domain::disposition::{DispositionCatalog, LabelResolver};
use crate::domain::events::{BackfillEvent, RunCounters, RunStatus, RunSummary};
use crate::domain::index::ActivityIndex;
use crate::domain::records::{first_str, CallRecord, Direction};
use crate::domain::resolver::{resolve, MatchResult, MatchSource};
use crate::infrastructure::activities::{ActivityProvider, WriteBackPolicy};
use crate::infrastructure::config::{FieldCodes, SyncConfig};
use crate::infrastructure::fetch_client::FetchClient;
use crate::infrastructure::remote::RemoteInvoker;
use crate::infrastructure::target_store::{TargetRow, TargetStore, UpsertMode};
use crate::infrastructure::telephony::TelephonyProvider;

use super::context::RunContext;

/// What a backfill run does per chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BackfillMode {
    /// Upsert telephony calls into the target store; optionally resolve
    /// each call against the activity stream and persist the link.
    SyncCalls { resolve_activities: bool },
    /// Re-link existing target rows (optionally only those still missing
    /// an activity link) against the activity stream.
    LinkActivities { only_missing: bool },
}

enum RunEnd {
    Completed,
    Canceled,
    Fatal(String),
}

pub struct BackfillOrchestrator {
    telephony: TelephonyProvider,
    activities: ActivityProvider,
    store: TargetStore,
    config: Arc<SyncConfig>,
    status: RwLock<RunStatus>,
}

impl BackfillOrchestrator {
    /// Wires every component onto one injected transport.
    pub fn new(invoker: Arc<dyn RemoteInvoker>, config: Arc<SyncConfig>) -> Self {
        let fetch = FetchClient::new(invoker.clone(), config.fetch.clone());
        let write_back = WriteBackPolicy {
            result_prefix: config.result_prefix.clone(),
            prepend_to_description: config.prepend_to_description,
        };
        Self {
            telephony: TelephonyProvider::new(fetch.clone()),
            activities: ActivityProvider::new(fetch.clone(), invoker.clone(), write_back),
            store: TargetStore::new(invoker, fetch, &config),
            config,
            status: RwLock::new(RunStatus::Idle),
        }
    }

    pub fn with_label_resolvers(
        mut self,
        direction: Option<Arc<dyn LabelResolver>>,
        disposition: Option<Arc<dyn LabelResolver>>,
    ) -> Self {
        self.store = self.store.with_label_resolvers(direction, disposition);
        self
    }

    pub async fn status(&self) -> RunStatus {
        *self.status.read().await
    }

    /// Runs a whole backfill to its terminal state and returns the summary.
    /// Refuses to start while another run is `Running`; a terminal failure
    /// is reported through the summary, not as an `Err`.
    pub async fn start(
        &self,
        range: DateRange,
        chunk_days: u32,
        mode: BackfillMode,
        ctx: &RunContext,
    ) -> Result<RunSummary> {
        {
            let mut status = self.status.write().await;
            if *status == RunStatus::Running {
                anyhow::bail!("a backfill run is already in progress");
            }
            *status = RunStatus::Running;
        }

        let started_at = Utc::now();
        let chunks = split_into_chunks(range, chunk_days);
        info!(
            "🚀 run {}: {:?} over {} .. {} in {} chunk(s)",
            ctx.run_id,
            mode,
            range.from,
            range.to,
            chunks.len()
        );
        ctx.emit(BackfillEvent::RunStarted {
            run_id: ctx.run_id.clone(),
            chunk_count: chunks.len(),
        });

        let mut counters = RunCounters::default();
        let end = match mode {
            BackfillMode::SyncCalls { resolve_activities } => {
                self.run_call_chunks(&chunks, resolve_activities, ctx, &mut counters)
                    .await
            }
            BackfillMode::LinkActivities { only_missing } => {
                self.run_link_chunks(&chunks, only_missing, ctx, &mut counters)
                    .await
            }
        };

        let (status, reason) = match end {
            RunEnd::Completed => (RunStatus::Completed, None),
            RunEnd::Canceled => (RunStatus::Canceled, None),
            RunEnd::Fatal(message) => (RunStatus::Failed, Some(message)),
        };
        *self.status.write().await = status;

        let summary = RunSummary {
            run_id: ctx.run_id.clone(),
            status,
            counters,
            started_at,
            finished_at: Utc::now(),
            reason,
        };
        match status {
            RunStatus::Completed => {
                info!("✅ run {} completed: {:?}", summary.run_id, summary.counters);
                ctx.emit(BackfillEvent::RunCompleted { summary: summary.clone() });
            }
            RunStatus::Canceled => {
                warn!("⛔ run {} canceled: {:?}", summary.run_id, summary.counters);
                ctx.emit(BackfillEvent::RunCanceled { summary: summary.clone() });
            }
            RunStatus::Failed => {
                error!(
                    "💥 run {} failed: {}",
                    summary.run_id,
                    summary.reason.as_deref().unwrap_or("unknown")
                );
                ctx.emit(BackfillEvent::RunFailed { summary: summary.clone() });
            }
            RunStatus::Idle | RunStatus::Running => {}
        }
        Ok(summary)
    }

    // ===== calls mode =====

    async fn run_call_chunks(
        &self,
        chunks: &[Chunk],
        resolve_activities: bool,
        ctx: &RunContext,
        counters: &mut RunCounters,
    ) -> RunEnd {
        let catalog = self.config.catalog();
        let window_ms = self.config.window_ms();

        for (ci, chunk) in chunks.iter().enumerate() {
            if ctx.is_cancelled() {
                return RunEnd::Canceled;
            }
            self.announce_chunk(ctx, ci, chunks.len(), chunk);

            let rows = match self.telephony.get_calls(chunk.from, chunk.to).await {
                Ok(rows) => rows,
                Err(err) => {
                    return RunEnd::Fatal(format!(
                        "call fetch failed for chunk {}/{}: {err}",
                        ci + 1,
                        chunks.len()
                    ));
                }
            };
            counters.total += rows.len() as u64;
            info!("chunk {}/{}: {} call(s)", ci + 1, chunks.len(), rows.len());

            let index = if resolve_activities && !rows.is_empty() {
                let user_ids = distinct_values(&rows, "PORTAL_USER_ID");
                match self.fetch_index(chunk, &user_ids).await {
                    Ok(index) => Some(index),
                    Err(message) => return RunEnd::Fatal(message),
                }
            } else {
                None
            };

            for (i, raw) in rows.iter().enumerate() {
                if ctx.is_cancelled() {
                    return RunEnd::Canceled;
                }
                self.sync_one_call(raw, index.as_ref(), &catalog, window_ms, counters)
                    .await;
                counters.done += 1;
                if self.should_report(i, rows.len()) {
                    self.report_progress(ctx, counters, ci + 1, chunks.len());
                }
            }
        }
        RunEnd::Completed
    }

    async fn sync_one_call(
        &self,
        raw: &Value,
        index: Option<&ActivityIndex>,
        catalog: &DispositionCatalog,
        window_ms: i64,
        counters: &mut RunCounters,
    ) {
        let call = match CallRecord::from_raw(raw) {
            Ok(call) => call,
            Err(err) => {
                counters.errors += 1;
                warn!("skipping call row: {err}");
                return;
            }
        };

        let resolved =
            index.map(|idx| resolve(&MatchSource::from_call(&call), idx, window_ms, catalog));
        if let Some(result) = &resolved {
            if result.ambiguous {
                counters.ambiguous += 1;
                warn!(
                    "🔀 call {}: {} in-window candidate(s), keeping {:?}",
                    call.call_id,
                    result.candidates.len(),
                    result.activity_id
                );
            }
            if !result.is_match() {
                counters.no_match += 1;
            }
        }

        let patch = self.store.call_patch(&call, resolved.as_ref());
        match self.store.upsert(&call.call_id, patch).await {
            Ok(outcome) => {
                match outcome.mode {
                    UpsertMode::Created => counters.created += 1,
                    UpsertMode::Updated => counters.updated += 1,
                }
                if let Some(result) = &resolved {
                    self.maybe_write_disposition(result).await;
                }
            }
            Err(err) => {
                counters.errors += 1;
                error!("upsert failed for call {}: {err}", call.call_id);
            }
        }
    }

    // ===== activities mode =====

    async fn run_link_chunks(
        &self,
        chunks: &[Chunk],
        only_missing: bool,
        ctx: &RunContext,
        counters: &mut RunCounters,
    ) -> RunEnd {
        let catalog = self.config.catalog();
        let window_ms = self.config.window_ms();
        let fields = self.store.field_codes().clone();

        for (ci, chunk) in chunks.iter().enumerate() {
            if ctx.is_cancelled() {
                return RunEnd::Canceled;
            }
            self.announce_chunk(ctx, ci, chunks.len(), chunk);

            let rows = match self.store.list_targets(chunk.from, chunk.to, only_missing).await {
                Ok(rows) => rows,
                Err(err) => {
                    return RunEnd::Fatal(format!(
                        "target fetch failed for chunk {}/{}: {err}",
                        ci + 1,
                        chunks.len()
                    ));
                }
            };
            counters.total += rows.len() as u64;
            info!("chunk {}/{}: {} target row(s)", ci + 1, chunks.len(), rows.len());
            if rows.is_empty() {
                self.report_progress(ctx, counters, ci + 1, chunks.len());
                continue;
            }

            let user_ids = distinct_values(&rows, &fields.user_id);
            let index = match self.fetch_index(chunk, &user_ids).await {
                Ok(index) => index,
                Err(message) => return RunEnd::Fatal(message),
            };

            for (i, raw) in rows.iter().enumerate() {
                if ctx.is_cancelled() {
                    return RunEnd::Canceled;
                }
                self.link_one_target(raw, &fields, &index, &catalog, window_ms, counters)
                    .await;
                counters.done += 1;
                if self.should_report(i, rows.len()) {
                    self.report_progress(ctx, counters, ci + 1, chunks.len());
                }
            }
        }
        RunEnd::Completed
    }

    async fn link_one_target(
        &self,
        raw: &Value,
        fields: &FieldCodes,
        index: &ActivityIndex,
        catalog: &DispositionCatalog,
        window_ms: i64,
        counters: &mut RunCounters,
    ) {
        let Some(target) = TargetRow::from_raw(raw, fields) else {
            counters.errors += 1;
            warn!("skipping target row without a usable id");
            return;
        };

        // Target rows carry no direction; Unknown matches everything.
        let source = MatchSource {
            ts: target.call_start,
            user_id: target.user_id.clone(),
            phone: target.phone.clone(),
            direction: Direction::Unknown,
        };
        let resolved = resolve(&source, index, window_ms, catalog);

        if resolved.ambiguous {
            counters.ambiguous += 1;
            warn!(
                "🔀 target {}: {} in-window candidate(s), keeping {:?}",
                target.id,
                resolved.candidates.len(),
                resolved.activity_id
            );
        }
        if !resolved.is_match() {
            counters.no_match += 1;
            return;
        }

        let patch = self.store.link_patch(&resolved);
        match self.store.apply_links(target.id, patch).await {
            Ok(_) => {
                counters.updated += 1;
                info!(
                    "🔗 target {} linked to activity {}",
                    target.id,
                    resolved.activity_id.as_deref().unwrap_or("?")
                );
                self.maybe_write_disposition(&resolved).await;
            }
            Err(err) => {
                counters.errors += 1;
                error!("link update failed for target {}: {err}", target.id);
            }
        }
    }

    // ===== shared plumbing =====

    /// Activities are fetched in a window padded by the match window on
    /// both sides, so edge-of-chunk sources still see their candidates.
    async fn fetch_index(&self, chunk: &Chunk, user_ids: &[String]) -> Result<ActivityIndex, String> {
        let pad = ChronoDuration::minutes(self.config.window_minutes());
        match self
            .activities
            .get_call_activities(chunk.from - pad, chunk.to + pad, user_ids)
            .await
        {
            Ok(activities) => {
                let index = ActivityIndex::build(&activities, self.config.index_key);
                info!(
                    "indexed {} activity record(s) across {} bucket(s)",
                    index.len(),
                    index.bucket_count()
                );
                Ok(index)
            }
            Err(err) => Err(format!("activity fetch failed: {err}")),
        }
    }

    async fn maybe_write_disposition(&self, resolved: &MatchResult) {
        if !self.config.write_disposition_to_activity {
            return;
        }
        if let (Some(activity_id), Some(label)) = (&resolved.activity_id, &resolved.disposition) {
            self.activities.write_disposition(activity_id, label).await;
        }
    }

    fn announce_chunk(&self, ctx: &RunContext, index: usize, total: usize, chunk: &Chunk) {
        info!("📅 chunk {}/{}: {} .. {}", index + 1, total, chunk.from, chunk.to);
        ctx.emit(BackfillEvent::ChunkStarted {
            index: index + 1,
            total,
            from: chunk.from,
            to: chunk.to,
        });
    }

    fn should_report(&self, i: usize, len: usize) -> bool {
        let every = self.config.progress_every.max(1) as usize;
        (i + 1) % every == 0 || i + 1 == len
    }

    fn report_progress(&self, ctx: &RunContext, counters: &RunCounters, chunk: usize, chunk_total: usize) {
        ctx.emit(BackfillEvent::Progress {
            counters: *counters,
            percentage: counters.percentage(),
            message: format!(
                "chunk {chunk}/{chunk_total} • {}/{} processed",
                counters.done, counters.total
            ),
        });
    }
}

/// Distinct non-empty values of `key` across raw rows, in first-seen order.
fn distinct_values(rows: &[Value], key: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    rows.iter()
        .filter_map(|row| first_str(row, &[key]))
        .filter(|value| seen.insert(value.clone()))
        .collect()
}

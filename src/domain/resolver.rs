//! Temporal resolver: best-activity selection inside a symmetric time window
//!
//! Given a source record (a call, or a target row missing its link) and a
//! built [`ActivityIndex`], picks the single best candidate activity:
//! in-window and direction-compatible, ranked by exact phone match first and
//! absolute time delta second. More than one in-window candidate flags the
//! result ambiguous; the pick still happens.

use chrono::NaiveDateTime;
use serde::Serialize;

use super::disposition::DispositionCatalog;
use super::index::{ActivityIndex, IndexKeyPolicy, IndexedActivity};
use super::records::{ts_millis, CallRecord, Direction};

/// Windows below one minute degenerate into empty scans; clamp.
pub const MIN_WINDOW_MS: i64 = 60_000;

/// How many candidate summaries are retained for audit logging.
const MAX_CANDIDATE_SUMMARIES: usize = 5;

pub fn clamp_window_ms(window_ms: i64) -> i64 {
    window_ms.max(MIN_WINDOW_MS)
}

/// Resolver-facing view of a source record.
#[derive(Debug, Clone)]
pub struct MatchSource {
    pub ts: Option<NaiveDateTime>,
    pub user_id: Option<String>,
    pub phone: String,
    pub direction: Direction,
}

impl MatchSource {
    pub fn from_call(call: &CallRecord) -> Self {
        Self {
            ts: call.started_at,
            user_id: call.user_id.clone(),
            phone: call.phone.clone(),
            direction: call.direction,
        }
    }
}

/// Compact candidate line kept on the result for audit logging.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateSummary {
    pub activity_id: String,
    pub ts_ms: i64,
    pub delta_ms: i64,
    pub direction: Direction,
    pub phone_match: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MatchResult {
    pub activity_id: Option<String>,
    pub disposition: Option<String>,
    pub disposition_raw: Option<String>,
    pub entity_type_id: Option<String>,
    pub entity_id: Option<String>,
    pub ambiguous: bool,
    pub candidates: Vec<CandidateSummary>,
}

impl MatchResult {
    pub fn no_match() -> Self {
        Self::default()
    }

    pub fn is_match(&self) -> bool {
        self.activity_id.is_some()
    }
}

/// Resolves `source` against `index`. A source without a timestamp or
/// bucket key is a plain no-match, never an error.
pub fn resolve(
    source: &MatchSource,
    index: &ActivityIndex,
    window_ms: i64,
    catalog: &DispositionCatalog,
) -> MatchResult {
    let window_ms = clamp_window_ms(window_ms);

    let Some(ts) = source.ts else {
        return MatchResult::no_match();
    };
    let key = match index.policy() {
        IndexKeyPolicy::OwnerUser => source.user_id.as_deref().filter(|u| !u.is_empty()),
        IndexKeyPolicy::Phone => (!source.phone.is_empty()).then_some(source.phone.as_str()),
    };
    let Some(key) = key else {
        return MatchResult::no_match();
    };

    let bucket = index.bucket(key);
    if bucket.is_empty() {
        return MatchResult::no_match();
    }

    let ts_ms = ts_millis(ts);
    let lo = ts_ms - window_ms;
    let hi = ts_ms + window_ms;

    // Window bounds are inclusive on both ends.
    let mut candidates: Vec<&IndexedActivity> = bucket
        .iter()
        .filter(|a| a.ts_ms >= lo && a.ts_ms <= hi)
        .filter(|a| source.direction.compatible(a.direction))
        .collect();

    if candidates.is_empty() {
        return MatchResult::no_match();
    }

    let phone_match = |a: &IndexedActivity| {
        !source.phone.is_empty() && !a.phone.is_empty() && a.phone == source.phone
    };

    // Stable sort: equal-ranked candidates keep the bucket's
    // (timestamp, fetch-order) ordering.
    candidates.sort_by(|a, b| {
        phone_match(b)
            .cmp(&phone_match(a))
            .then_with(|| (a.ts_ms - ts_ms).abs().cmp(&(b.ts_ms - ts_ms).abs()))
    });

    let ambiguous = candidates.len() > 1;
    let best = candidates[0];
    let extracted = catalog.extract(&best.text);

    let summaries = candidates
        .iter()
        .take(MAX_CANDIDATE_SUMMARIES)
        .map(|a| CandidateSummary {
            activity_id: a.id.clone(),
            ts_ms: a.ts_ms,
            delta_ms: (a.ts_ms - ts_ms).abs(),
            direction: a.direction,
            phone_match: phone_match(a),
        })
        .collect();

    MatchResult {
        activity_id: Some(best.id.clone()),
        disposition: extracted.disposition,
        disposition_raw: (!extracted.raw.is_empty()).then_some(extracted.raw),
        entity_type_id: best.owner_type_id.clone(),
        entity_id: best.owner_id.clone(),
        ambiguous,
        candidates: summaries,
    }
}

//! Telephony collaborator: paginated call-log fetch
//!
//! Thin wrapper over the statistics endpoint; rows stay raw so the
//! orchestrator can account parse failures per item.

use chrono::NaiveDateTime;
use serde_json::{json, Value};
use tracing::debug;

use crate::domain::records::fmt_space;

use super::fetch_client::{FetchClient, FetchError};

pub const CALL_LIST_METHOD: &str = "voximplant.statistic.get";

#[derive(Clone)]
pub struct TelephonyProvider {
    fetch: FetchClient,
}

impl TelephonyProvider {
    pub fn new(fetch: FetchClient) -> Self {
        Self { fetch }
    }

    /// All call rows whose start date falls inside `[from, to]`, in
    /// chronological order.
    pub async fn get_calls(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<Value>, FetchError> {
        let params = json!({
            "FILTER": {
                ">=CALL_START_DATE": fmt_space(from),
                "<=CALL_START_DATE": fmt_space(to),
            },
            "SORT": "CALL_START_DATE",
            "ORDER": "ASC",
        });

        let rows = self.fetch.fetch_all(CALL_LIST_METHOD, &params).await?;
        debug!("📞 fetched {} call row(s) for {} .. {}", rows.len(), from, to);
        Ok(rows)
    }
}

//! CRM activity collaborator: call-activity fetch and best-effort
//! disposition write-back

use std::sync::Arc;

use chrono::NaiveDateTime;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::domain::records::{fmt_space, ActivityRecord};

use super::fetch_client::{FetchClient, FetchError};
use super::remote::{invoke_with_timeout, RemoteInvoker};

pub const ACTIVITY_LIST_METHOD: &str = "crm.activity.list";
pub const ACTIVITY_GET_METHOD: &str = "crm.activity.get";
pub const ACTIVITY_UPDATE_METHOD: &str = "crm.activity.update";

/// Call-type activities only.
const ACTIVITY_TYPE_CALL: u32 = 2;

#[derive(Debug, Clone)]
pub struct WriteBackPolicy {
    /// Literal marker prepended to the written disposition.
    pub result_prefix: String,
    /// When set, the disposition is prepended to DESCRIPTION instead of
    /// replacing RESULT.
    pub prepend_to_description: bool,
}

impl Default for WriteBackPolicy {
    fn default() -> Self {
        Self {
            result_prefix: "[DISPOSITION]".to_string(),
            prepend_to_description: false,
        }
    }
}

#[derive(Clone)]
pub struct ActivityProvider {
    fetch: FetchClient,
    invoker: Arc<dyn RemoteInvoker>,
    write_back: WriteBackPolicy,
}

impl ActivityProvider {
    pub fn new(fetch: FetchClient, invoker: Arc<dyn RemoteInvoker>, write_back: WriteBackPolicy) -> Self {
        Self { fetch, invoker, write_back }
    }

    /// Call activities inside `[from, to]`, optionally narrowed to a set of
    /// responsible users. Rows without an id are dropped here; rows with an
    /// unusable timestamp survive into the batch and are skipped by the
    /// index instead.
    pub async fn get_call_activities(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
        responsible_ids: &[String],
    ) -> Result<Vec<ActivityRecord>, FetchError> {
        let mut filter = json!({
            ">=START_TIME": fmt_space(from),
            "<=START_TIME": fmt_space(to),
            "TYPE_ID": ACTIVITY_TYPE_CALL,
        });
        if !responsible_ids.is_empty() {
            filter["RESPONSIBLE_ID"] = json!(responsible_ids);
        }

        let params = json!({
            "filter": filter,
            "select": [
                "ID",
                "TYPE_ID",
                "DIRECTION",
                "START_TIME",
                "END_TIME",
                "CREATED",
                "LAST_UPDATED",
                "DESCRIPTION",
                "RESULT",
                "RESPONSIBLE_ID",
                "OWNER_TYPE_ID",
                "OWNER_ID",
                "PROVIDER_ID",
                "COMMUNICATIONS",
            ],
            "order": { "START_TIME": "ASC" },
        });

        let rows = self.fetch.fetch_all(ACTIVITY_LIST_METHOD, &params).await?;
        let total = rows.len();
        let activities: Vec<ActivityRecord> =
            rows.iter().filter_map(ActivityRecord::from_raw).collect();
        if activities.len() < total {
            debug!(
                "dropped {} activity row(s) without an id",
                total - activities.len()
            );
        }
        debug!(
            "🗂️ fetched {} activity row(s) for {} .. {}",
            activities.len(),
            from,
            to
        );
        Ok(activities)
    }

    /// Best-effort side channel: stamps the resolved disposition back onto
    /// the source activity. Returns whether the write went through; failure
    /// is logged and never propagated.
    pub async fn write_disposition(&self, activity_id: &str, label: &str) -> bool {
        let stamped = format!("{} {}", self.write_back.result_prefix, label);
        let timeout = std::time::Duration::from_millis(self.fetch.policy().page_timeout_ms);

        let fields = if self.write_back.prepend_to_description {
            let current = match invoke_with_timeout(
                self.invoker.as_ref(),
                ACTIVITY_GET_METHOD,
                json!({ "id": activity_id }),
                timeout,
            )
            .await
            {
                Ok(body) => body
                    .pointer("/result/DESCRIPTION")
                    .or_else(|| body.get("DESCRIPTION"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                Err(err) => {
                    warn!("disposition write-back: could not read activity {}: {}", activity_id, err);
                    String::new()
                }
            };
            json!({ "DESCRIPTION": format!("{stamped}\n{current}") })
        } else {
            json!({ "RESULT": stamped })
        };

        match invoke_with_timeout(
            self.invoker.as_ref(),
            ACTIVITY_UPDATE_METHOD,
            json!({ "id": activity_id, "fields": fields }),
            timeout,
        )
        .await
        {
            Ok(_) => {
                debug!("✍️ stamped disposition onto activity {}", activity_id);
                true
            }
            Err(err) => {
                warn!("disposition write-back failed for activity {}: {}", activity_id, err);
                false
            }
        }
    }
}

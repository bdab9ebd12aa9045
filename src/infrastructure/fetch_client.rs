//! Resilient paginated fetch client
//!
//! Drives offset-based pagination over a single remote method: per-page
//! timeout, bounded same-page retries with linear backoff for transient
//! failures, an overall operation deadline, a polite inter-page delay, and
//! two anti-spin guards on the cursor (no explicit offset, repeated offset).

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::remote::{invoke_with_timeout, RemoteError, RemoteInvoker};
use super::response::normalize_page;

/// Timeout/retry/pacing knobs for one paginated fetch operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchPolicy {
    /// Deadline for a single page call.
    pub page_timeout_ms: u64,
    /// Deadline for the whole fetch operation, retries included.
    pub total_timeout_ms: u64,
    /// Pause between consecutive pages, out of respect for rate limits.
    pub page_delay_ms: u64,
    /// Same-page retries for transient failures.
    pub max_retries: u32,
    /// Linear backoff base: attempt N sleeps `N * retry_base_delay_ms`.
    pub retry_base_delay_ms: u64,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            page_timeout_ms: 120_000,
            total_timeout_ms: 900_000,
            page_delay_ms: 150,
            max_retries: 3,
            retry_base_delay_ms: 400,
        }
    }
}

impl FetchPolicy {
    fn page_timeout(&self) -> Duration {
        Duration::from_millis(self.page_timeout_ms)
    }

    fn total_timeout(&self) -> Duration {
        Duration::from_millis(self.total_timeout_ms)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The aggregate deadline elapsed, regardless of per-page retry state.
    #[error("fetch of '{method}' exceeded its overall deadline after {elapsed_ms}ms")]
    Deadline { method: String, elapsed_ms: u64 },

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Materializes a full result set from repeated single-page calls.
/// Purely functional given a method and params; the only side effects are
/// the remote calls themselves.
#[derive(Clone)]
pub struct FetchClient {
    invoker: Arc<dyn RemoteInvoker>,
    policy: FetchPolicy,
}

impl FetchClient {
    pub fn new(invoker: Arc<dyn RemoteInvoker>, policy: FetchPolicy) -> Self {
        Self { invoker, policy }
    }

    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    /// Fetches every page of `method`, injecting `start = cursor` into
    /// `base_params` on each call, and returns the concatenated items.
    pub async fn fetch_all(&self, method: &str, base_params: &Value) -> Result<Vec<Value>, FetchError> {
        let started = Instant::now();
        let mut items = Vec::new();
        let mut cursor = base_params
            .get("start")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let mut pages = 0usize;

        loop {
            self.check_deadline(method, started)?;

            let raw = self.fetch_page(method, base_params, cursor, started).await?;
            let page = normalize_page(method, &raw)?;
            pages += 1;
            debug!(
                "📄 {}: page {} at offset {} returned {} item(s)",
                method,
                pages,
                cursor,
                page.items.len()
            );
            items.extend(page.items);

            match page.next {
                Some(next) if next == cursor => {
                    // Inconsistent API: a cursor that does not advance
                    // would loop forever.
                    warn!("{}: next cursor {} equals current offset, terminating fetch", method, next);
                    break;
                }
                Some(next) => cursor = next,
                None => {
                    if page.more {
                        warn!(
                            "{}: response flags more items but carries no explicit offset, terminating fetch",
                            method
                        );
                    }
                    break;
                }
            }

            if self.policy.page_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.policy.page_delay_ms)).await;
            }
        }

        debug!("📦 {}: fetched {} item(s) over {} page(s)", method, items.len(), pages);
        Ok(items)
    }

    /// One page, retried in place on transient failures with linear backoff.
    async fn fetch_page(
        &self,
        method: &str,
        base_params: &Value,
        cursor: u64,
        started: Instant,
    ) -> Result<Value, FetchError> {
        let mut attempt = 0u32;
        loop {
            let mut params = base_params.clone();
            let obj = params.as_object_mut().ok_or_else(|| RemoteError::Shape {
                method: method.to_string(),
                message: "base params must be a JSON object".to_string(),
            })?;
            obj.insert("start".to_string(), json!(cursor));

            match invoke_with_timeout(self.invoker.as_ref(), method, params, self.policy.page_timeout())
                .await
            {
                Ok(raw) => return Ok(raw),
                Err(err) if err.is_transient() && attempt < self.policy.max_retries => {
                    attempt += 1;
                    warn!(
                        "⏳ {}: transient failure at offset {} (attempt {}/{}): {}",
                        method, cursor, attempt, self.policy.max_retries, err
                    );
                    tokio::time::sleep(Duration::from_millis(
                        self.policy.retry_base_delay_ms * u64::from(attempt),
                    ))
                    .await;
                    self.check_deadline(method, started)?;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn check_deadline(&self, method: &str, started: Instant) -> Result<(), FetchError> {
        let elapsed = started.elapsed();
        if elapsed > self.policy.total_timeout() {
            return Err(FetchError::Deadline {
                method: method.to_string(),
                elapsed_ms: elapsed.as_millis() as u64,
            });
        }
        Ok(())
    }
}

//! REST transport adapter for the platform webhook API
//!
//! Implements [`RemoteInvoker`] over the portal's REST endpoint
//! (`POST {base}/{method}.json`), so the engine runs server-side without
//! the embedded-widget SDK. Error payloads and gateway statuses are mapped
//! into the typed error taxonomy at this boundary.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::remote::{RemoteError, RemoteInvoker};

/// Platform error codes that behave like gateway timeouts and are worth
/// retrying.
const TRANSIENT_ERROR_CODES: &[&str] = &["OPERATION_TIME_LIMIT", "GATEWAY_TIMEOUT"];

pub struct RestInvoker {
    http: reqwest::Client,
    base_url: String,
}

impl RestInvoker {
    /// `base_url` is the webhook root, e.g.
    /// `https://portal.example.com/rest/1/abc123`.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("callsync/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl RemoteInvoker for RestInvoker {
    async fn invoke(&self, method: &str, params: Value) -> Result<Value, RemoteError> {
        let url = format!("{}/{}.json", self.base_url, method);
        debug!("→ {}", method);

        let response = self
            .http
            .post(&url)
            .json(&params)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    RemoteError::Timeout { method: method.to_string(), timeout_ms: 0 }
                } else {
                    RemoteError::Transport {
                        method: method.to_string(),
                        message: err.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if matches!(status.as_u16(), 502 | 503 | 504) {
            return Err(RemoteError::GatewayTimeout {
                method: method.to_string(),
                message: format!("HTTP {status}"),
            });
        }

        let body: Value = response.json().await.map_err(|err| RemoteError::Shape {
            method: method.to_string(),
            message: format!("response body is not JSON: {err}"),
        })?;

        if let Some(code) = body.get("error").and_then(Value::as_str) {
            let description = body
                .get("error_description")
                .and_then(Value::as_str)
                .unwrap_or(code);
            if TRANSIENT_ERROR_CODES.contains(&code) {
                return Err(RemoteError::GatewayTimeout {
                    method: method.to_string(),
                    message: description.to_string(),
                });
            }
            return Err(RemoteError::Business {
                method: method.to_string(),
                message: format!("{code}: {description}"),
            });
        }

        if !status.is_success() {
            return Err(RemoteError::Business {
                method: method.to_string(),
                message: format!("HTTP {status}"),
            });
        }

        Ok(body)
    }
}

//! Remote invocation boundary
//!
//! A single injected capability, `RemoteInvoker`, stands in for the
//! platform transport. Errors are typed at this boundary so retry
//! classification is a pattern match; nothing downstream sniffs message
//! strings.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

/// Error produced at the remote-call boundary.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RemoteError {
    /// The call itself exceeded its deadline.
    #[error("remote call '{method}' timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    /// Gateway-timeout-class failure reported by the platform edge.
    #[error("gateway timeout on '{method}': {message}")]
    GatewayTimeout { method: String, message: String },

    /// Business-level rejection (invalid field, permission denied, ...).
    #[error("remote error on '{method}': {message}")]
    Business { method: String, message: String },

    /// Network-level transport failure before any response arrived.
    #[error("transport failure on '{method}': {message}")]
    Transport { method: String, message: String },

    /// The response could not be interpreted at all.
    #[error("unparseable response from '{method}': {message}")]
    Shape { method: String, message: String },
}

impl RemoteError {
    /// Only timeout-class failures are retried; everything else propagates.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::GatewayTimeout { .. })
    }

    pub fn method(&self) -> &str {
        match self {
            Self::Timeout { method, .. }
            | Self::GatewayTimeout { method, .. }
            | Self::Business { method, .. }
            | Self::Transport { method, .. }
            | Self::Shape { method, .. } => method,
        }
    }
}

/// Injected single-call transport: `invoke(method, params) -> result`.
#[async_trait]
pub trait RemoteInvoker: Send + Sync {
    async fn invoke(&self, method: &str, params: Value) -> Result<Value, RemoteError>;
}

/// Wraps one invocation with an explicit deadline; exceeding it becomes a
/// typed `RemoteError::Timeout`, indistinguishable at the call site from a
/// transport-reported timeout.
pub async fn invoke_with_timeout(
    invoker: &dyn RemoteInvoker,
    method: &str,
    params: Value,
    timeout: Duration,
) -> Result<Value, RemoteError> {
    match tokio::time::timeout(timeout, invoker.invoke(method, params)).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::Timeout {
            method: method.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowInvoker;

    #[async_trait]
    impl RemoteInvoker for SlowInvoker {
        async fn invoke(&self, _method: &str, _params: Value) -> Result<Value, RemoteError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Value::Null)
        }
    }

    #[test]
    fn transient_classification_is_a_type_property() {
        let timeout = RemoteError::Timeout { method: "m".into(), timeout_ms: 1 };
        let gateway = RemoteError::GatewayTimeout { method: "m".into(), message: "504".into() };
        let business = RemoteError::Business { method: "m".into(), message: "denied".into() };
        assert!(timeout.is_transient());
        assert!(gateway.is_transient());
        assert!(!business.is_transient());
    }

    #[tokio::test]
    async fn deadline_converts_to_typed_timeout() {
        let err = invoke_with_timeout(
            &SlowInvoker,
            "crm.item.list",
            Value::Null,
            Duration::from_millis(10),
        )
        .await
        .unwrap_err();
        match err {
            RemoteError::Timeout { method, .. } => assert_eq!(method, "crm.item.list"),
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}

//! Async utilities
//!
//! Deadlines for outbound calls made while a request is being authorized.

use crate::error::{ConveyorError, ConveyorResult, ErrorContext};
use tokio::time::{timeout, Duration};
use tracing::warn;

/// Timeout wrapper for async operations
pub async fn with_timeout<F, T>(
    future: F,
    timeout_ms: u64,
    operation_name: &str,
) -> ConveyorResult<T>
where
    F: std::future::Future<Output = T>,
{
    match timeout(Duration::from_millis(timeout_ms), future).await {
        Ok(result) => Ok(result),
        Err(_) => {
            warn!(
                operation = operation_name,
                timeout_ms = timeout_ms,
                "Operation timed out"
            );
            Err(ConveyorError::Timeout {
                operation: operation_name.to_string(),
                duration_ms: timeout_ms,
                context: ErrorContext::new("async_utils")
                    .with_operation("timeout")
                    .with_metadata("timeout_ms", &timeout_ms.to_string()),
            })
        }
    }
}

/// Run a fallible future under a deadline, flattening the timeout into the
/// same error channel as the call itself.
pub async fn try_with_timeout<F, T>(
    future: F,
    timeout_ms: u64,
    operation_name: &str,
) -> ConveyorResult<T>
where
    F: std::future::Future<Output = ConveyorResult<T>>,
{
    with_timeout(future, timeout_ms, operation_name).await?
}

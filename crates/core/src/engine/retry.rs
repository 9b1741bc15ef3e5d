//! Bounded retry of transient failures.

use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::config::RetryConfig;
use super::types::JobId;
use crate::transcoder::TranscodeError;

/// Runs `op` until it succeeds, fails with a non-retryable error, or the
/// attempt budget is spent. The backoff sleep is a cancellation checkpoint.
///
/// `op` receives the 1-based attempt number.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: &RetryConfig,
    cancel: &CancellationToken,
    job_id: JobId,
    operation: &str,
    mut op: F,
) -> Result<T, TranscodeError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, TranscodeError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    job_id = %job_id,
                    operation,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(TranscodeError::Cancelled),
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

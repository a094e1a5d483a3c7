//! Retry policies for control-plane and metrics calls.
//!
//! Two kinds of retry live here:
//!
//! - Named [`backon`] policies for ordinary transient failures
//!   ([`metrics_policy`], [`throttle_policy`]). Use with
//!   `.retry(policy).when(|e| e.is_retryable())`.
//! - [`run_stream_op`], the retry loop for stream mutations and listings,
//!   which distinguishes the two transient conditions the service reports:
//!   a mutation already in flight (fixed 1 s wait) and API throttling
//!   (exponential backoff). Argument errors are never retried.
//!
//! # Policies
//!
//! | Policy | Min Delay | Max Delay | Retries | Use Case |
//! |--------|-----------|-----------|---------|----------|
//! | `throttle_policy` | 100ms | 2s | 20 | throttled control-plane calls |
//! | `metrics_policy` | 100ms | 10s | 5 | metric backend queries |

use std::future::Future;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use tracing::{debug, warn};

use crate::constants::{
    MODIFY_RETRIES, RESOURCE_IN_USE_DELAY_MS, THROTTLE_ATTEMPT_CAP, THROTTLE_BASE_DELAY_MS,
    THROTTLE_MAX_DELAY_MS,
};
use crate::error::{Result, ScalingError};
use crate::metrics;

/// Backoff for throttled control-plane calls.
///
/// Doubles from the base delay and is capped per sleep, matching the
/// service's guidance for "limit exceeded" responses.
pub fn throttle_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(THROTTLE_BASE_DELAY_MS))
        .with_max_delay(Duration::from_millis(THROTTLE_MAX_DELAY_MS))
        .with_max_times(THROTTLE_ATTEMPT_CAP as usize)
        .with_jitter()
}

/// Backoff for metric backend queries.
///
/// The metrics backend throttles less aggressively than the control plane
/// but recovers slower, so fewer attempts with a longer ceiling.
pub fn metrics_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(10))
        .with_max_times(5)
        .with_jitter()
}

/// Run a stream control-plane operation with the mutation retry policy.
///
/// Up to [`MODIFY_RETRIES`] attempts. Between attempts:
/// - [`ScalingError::ResourceInUse`] waits a fixed 1 s - the stream is
///   mid-mutation and will settle on its own schedule;
/// - [`ScalingError::Throttled`] and [`ScalingError::Backend`] sleep on the
///   [`throttle_policy`] backoff schedule;
/// - anything else surfaces immediately.
///
/// When the budget is spent the last error is wrapped in
/// [`ScalingError::RetriesExhausted`].
pub async fn run_stream_op<T, F, Fut>(op_name: &'static str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut throttle_delays = throttle_policy().build();
    let mut last_err: Option<ScalingError> = None;

    for attempt in 1..=MODIFY_RETRIES {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    metrics::record_retry_success(op_name);
                }
                return Ok(value);
            }
            Err(e) if e.is_retryable() => {
                metrics::record_retry_attempt(op_name, attempt);

                let delay = if e.is_throttle() {
                    throttle_delays
                        .next()
                        .unwrap_or(Duration::from_millis(THROTTLE_MAX_DELAY_MS))
                } else {
                    Duration::from_millis(RESOURCE_IN_USE_DELAY_MS)
                };

                debug!(
                    operation = op_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying stream operation"
                );

                tokio::time::sleep(delay).await;
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    metrics::record_retry_exhausted(op_name);
    warn!(
        operation = op_name,
        retries = MODIFY_RETRIES,
        "Stream operation did not complete within retry budget"
    );

    Err(ScalingError::RetriesExhausted {
        attempts: MODIFY_RETRIES,
        last: last_err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown".to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_run_stream_op_succeeds_after_in_use() {
        let attempts = AtomicU32::new(0);

        let result = run_stream_op("split", || {
            let attempts = &attempts;
            async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(ScalingError::ResourceInUse("stream mutating".into()))
                } else {
                    Ok(7u32)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stream_op_backs_off_on_throttle() {
        let attempts = AtomicU32::new(0);
        let start = tokio::time::Instant::now();

        let result = run_stream_op("merge", || {
            let attempts = &attempts;
            async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    Err(ScalingError::Throttled("limit exceeded".into()))
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert!(result.is_ok());
        // The first throttle sleep starts at the base delay.
        assert!(start.elapsed() >= Duration::from_millis(THROTTLE_BASE_DELAY_MS));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stream_op_fatal_error_surfaces_immediately() {
        let attempts = AtomicU32::new(0);

        let result: Result<()> = run_stream_op("split", || {
            let attempts = &attempts;
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(ScalingError::InvalidArgument("hash out of range".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(ScalingError::InvalidArgument(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stream_op_exhausts_budget() {
        let attempts = AtomicU32::new(0);

        let result: Result<()> = run_stream_op("update_shard_count", || {
            let attempts = &attempts;
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(ScalingError::ResourceInUse("still mutating".into()))
            }
        })
        .await;

        assert_eq!(attempts.load(Ordering::SeqCst), MODIFY_RETRIES);
        match result {
            Err(ScalingError::RetriesExhausted { attempts, .. }) => {
                assert_eq!(attempts, MODIFY_RETRIES)
            }
            other => panic!("expected RetriesExhausted, got {:?}", other),
        }
    }

    #[test]
    fn test_policies_construct() {
        let _ = throttle_policy();
        let _ = metrics_policy();
    }
}

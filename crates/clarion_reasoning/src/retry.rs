//! Retry logic with exponential backoff for collaborator calls.
//!
//! Retries on transient errors (429 rate limit, 5xx server errors, network
//! failures, per-attempt timeouts). Does NOT retry errors classified as
//! permanent (bad requests, authentication failures, rejected answers).

use anyhow::Result;
use clarion_core::{ClarionError, RetryPolicy};
use rand::Rng;
use reqwest::StatusCode;
use std::future::Future;
use std::time::Duration;

/// Determine if an HTTP status code is retryable.
pub fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS         // 429
        || status == StatusCode::INTERNAL_SERVER_ERROR // 500
        || status == StatusCode::BAD_GATEWAY           // 502
        || status == StatusCode::SERVICE_UNAVAILABLE   // 503
        || status == StatusCode::GATEWAY_TIMEOUT       // 504
        || status == StatusCode::REQUEST_TIMEOUT // 408
}

/// Errors are retryable unless they carry a non-retryable [`ClarionError`].
pub fn is_retryable(error: &anyhow::Error) -> bool {
    match error.downcast_ref::<ClarionError>() {
        Some(e) => e.is_retryable(),
        None => true,
    }
}

/// Execute an async collaborator operation with retry logic.
///
/// `operation` is called until it succeeds, fails with a non-retryable
/// error, or `max_attempts` is exhausted. `attempt_timeout` bounds each
/// attempt; an attempt that times out counts as a retryable failure.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    attempt_timeout: Option<Duration>,
    operation: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut delay = Duration::from_millis(policy.initial_delay_ms);
    let max_delay = Duration::from_millis(policy.max_delay_ms);
    let mut last_error: Option<anyhow::Error> = None;

    for attempt in 1..=max_attempts {
        let result = match attempt_timeout {
            Some(limit) => match tokio::time::timeout(limit, operation()).await {
                Ok(result) => result,
                Err(_) => Err(ClarionError::Timeout(format!("{} attempt {}", label, attempt)).into()),
            },
            None => operation().await,
        };

        match result {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!("{} succeeded on attempt {}", label, attempt);
                }
                return Ok(value);
            }
            Err(e) if !is_retryable(&e) => {
                tracing::warn!("{} failed permanently: {:#}", label, e);
                return Err(e);
            }
            Err(e) => {
                tracing::warn!("{} failed on attempt {}/{}: {:#}", label, attempt, max_attempts, e);
                last_error = Some(e);
            }
        }

        if attempt < max_attempts {
            let sleep_time = delay + Duration::from_millis(jitter_ms(delay));
            tracing::info!(
                "{} retrying in {:.1}s (attempt {}/{})",
                label,
                sleep_time.as_secs_f64(),
                attempt + 1,
                max_attempts
            );
            tokio::time::sleep(sleep_time).await;
            delay = Duration::from_secs_f64((delay.as_secs_f64() * policy.backoff_factor).min(max_delay.as_secs_f64()));
        }
    }

    let last = last_error.map(|e| format!("{:#}", e)).unwrap_or_else(|| "unknown".to_string());
    Err(ClarionError::collaborator(
        label,
        format!("all {} attempts exhausted, last error: {}", max_attempts, last),
    )
    .into())
}

/// Up to a quarter of the current delay.
fn jitter_ms(delay: Duration) -> u64 {
    let cap = (delay.as_millis() as u64) / 4;
    if cap == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=cap)
    }
}

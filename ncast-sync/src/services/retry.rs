//! Bounded retry with exponential backoff for collaborator calls
//!
//! Each attempt takes a worker pool slot and runs under a per-call timeout; a
//! timeout counts as a retryable failure. The slot is given back before the
//! backoff sleep. Cancellation stops the loop between and during attempts.

use crate::services::worker_pool::WorkerPool;
use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Retry policy implementing exponential backoff
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    /// Cap for exponential growth
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// Timeout applied to every single attempt
    pub call_timeout: Duration,
}

impl RetryPolicy {
    /// Backoff after the given failed attempt (1-based):
    /// `initial_backoff * multiplier^(attempt - 1)`, capped at `max_backoff`
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        let millis = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            multiplier: 2.0,
            call_timeout: Duration::from_secs(20),
        }
    }
}

/// Why a retried operation gave up
#[derive(Debug)]
pub enum RetryFailure<E> {
    /// Operation returned a non-retryable error
    Permanent(E),
    /// Every attempt failed with a retryable error or timed out
    Exhausted { attempts: u32, last_error: String },
    Cancelled,
}

impl<E: Display> Display for RetryFailure<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryFailure::Permanent(e) => write!(f, "{}", e),
            RetryFailure::Exhausted {
                attempts,
                last_error,
            } => write!(f, "gave up after {} attempts: {}", attempts, last_error),
            RetryFailure::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Run `operation` until it succeeds, fails permanently, exhausts the
/// policy, or `cancel` fires. Every attempt holds one slot of `pool`.
pub async fn retry_transient<F, Fut, T, E, R>(
    operation_name: &str,
    policy: &RetryPolicy,
    pool: &WorkerPool,
    cancel: &CancellationToken,
    mut operation: F,
    is_retryable: R,
) -> Result<T, RetryFailure<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    R: Fn(&E) -> bool,
{
    let start_time = Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        if cancel.is_cancelled() {
            return Err(RetryFailure::Cancelled);
        }

        if attempt > 1 {
            tracing::debug!(operation = operation_name, attempt, "Retrying operation");
        }

        let result = {
            let _slot = tokio::select! {
                _ = cancel.cancelled() => return Err(RetryFailure::Cancelled),
                slot = pool.acquire() => slot,
            };
            tokio::select! {
                _ = cancel.cancelled() => return Err(RetryFailure::Cancelled),
                result = tokio::time::timeout(policy.call_timeout, operation()) => result,
            }
        };

        match result {
            Ok(Ok(value)) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Ok(Err(err)) if !is_retryable(&err) => return Err(RetryFailure::Permanent(err)),
            Ok(Err(err)) => last_error = err.to_string(),
            Err(_) => {
                last_error = format!("timed out after {:?}", policy.call_timeout);
            }
        }

        if attempt < max_attempts {
            let backoff = policy.backoff_for(attempt);
            tracing::warn!(
                operation = operation_name,
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                error = %last_error,
                "Transient failure, backing off"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(RetryFailure::Cancelled),
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }

    tracing::warn!(
        operation = operation_name,
        attempts = max_attempts,
        elapsed_ms = start_time.elapsed().as_millis() as u64,
        error = %last_error,
        "Retries exhausted"
    );
    Err(RetryFailure::Exhausted {
        attempts: max_attempts,
        last_error,
    })
}

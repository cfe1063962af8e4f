//! Exponential-backoff retry shared by every long-running fetch
//!
//! Attempts are retried unconditionally on any error; deciding that an error is
//! permanent is the caller's job (wrap the operation and stop early, or check
//! [`IndexerError::is_retryable`](crate::indexer::IndexerError::is_retryable)
//! before calling in).

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use crate::indexer::AbortSignal;
use crate::metrics::metrics;

/// Retry policy for indexer operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry, in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound on any single delay, in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Jitter factor (0.0 - 1.0); 0.0 gives the exact doubling schedule
    #[serde(default)]
    pub jitter_factor: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    10_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_factor: 0.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay_ms: base_delay.as_millis() as u64,
            ..Self::default()
        }
    }

    /// More attempts, shorter delays
    pub fn aggressive() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 50,
            max_delay_ms: 2000,
            jitter_factor: 0.15,
        }
    }

    /// Fewer attempts, longer delays
    pub fn conservative() -> Self {
        Self {
            max_attempts: 2,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            jitter_factor: 0.05,
        }
    }

    /// Sleep before attempt `attempt_index`: zero for the first attempt,
    /// `base * 2^(attempt_index - 1)` afterwards, capped at `max_delay_ms`
    pub fn delay_for(&self, attempt_index: u32) -> Duration {
        if attempt_index == 0 {
            return Duration::ZERO;
        }
        let exponent = (attempt_index - 1).min(32);
        let delay_ms = (self.base_delay_ms as f64) * 2_f64.powi(exponent as i32);
        let delay_ms = delay_ms.min(self.max_delay_ms as f64);

        let jitter = self.jitter_factor.clamp(0.0, 1.0);
        let jittered = if jitter > 0.0 {
            let spread = (fastrand::f64() - 0.5) * 2.0 * jitter;
            (delay_ms * (1.0 + spread)).max(0.0)
        } else {
            delay_ms
        };

        Duration::from_millis(jittered as u64)
    }
}

/// Failure of a cancellable retry loop
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RetryError<E> {
    #[error("all {attempts} attempts failed: {last}")]
    Exhausted { attempts: u32, last: E },

    #[error("retry cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

impl<E> RetryError<E> {
    /// The last underlying error, if the loop ran to exhaustion
    pub fn into_last(self) -> Option<E> {
        match self {
            RetryError::Exhausted { last, .. } => Some(last),
            RetryError::Cancelled { .. } => None,
        }
    }
}

/// Run `attempt(index)` up to `policy.max_attempts` times, surfacing the last
/// error if every attempt fails
pub async fn with_retry<F, Fut, T, E>(policy: &RetryPolicy, mut attempt: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let start = Instant::now();
    let mut index = 0;

    loop {
        match attempt(index).await {
            Ok(value) => {
                log_success(index, start);
                return Ok(value);
            }
            Err(err) => {
                log_failure(index, max_attempts, start, &err);
                index += 1;
                if index >= max_attempts {
                    return Err(err);
                }
            }
        }

        tokio::time::sleep(backoff(policy, index, max_attempts)).await;
        metrics().retry_attempts.inc();
    }
}

/// Same as [`with_retry`], but stops as soon as `signal` fires: checked before
/// every attempt and raced against each backoff sleep
pub async fn with_retry_until<F, Fut, T, E>(
    policy: &RetryPolicy,
    signal: &AbortSignal,
    mut attempt: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let start = Instant::now();
    let mut index = 0;

    loop {
        if signal.is_aborted() {
            return Err(RetryError::Cancelled { attempts: index });
        }

        match attempt(index).await {
            Ok(value) => {
                log_success(index, start);
                return Ok(value);
            }
            Err(err) => {
                log_failure(index, max_attempts, start, &err);
                index += 1;
                if index >= max_attempts {
                    return Err(RetryError::Exhausted {
                        attempts: max_attempts,
                        last: err,
                    });
                }
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(backoff(policy, index, max_attempts)) => {}
            _ = signal.aborted() => {
                debug!(attempts = index, "Retry loop cancelled during backoff");
                return Err(RetryError::Cancelled { attempts: index });
            }
        }
        metrics().retry_attempts.inc();
    }
}

fn backoff(policy: &RetryPolicy, index: u32, max_attempts: u32) -> Duration {
    let delay = policy.delay_for(index);
    debug!(
        attempt = index + 1,
        max_attempts = max_attempts,
        backoff_ms = delay.as_millis() as u64,
        "Backing off before retry"
    );
    delay
}

fn log_success(index: u32, start: Instant) {
    if index > 0 {
        debug!(
            attempts = index + 1,
            duration_ms = start.elapsed().as_millis() as u64,
            "Operation succeeded after retry"
        );
    }
}

fn log_failure<E: std::fmt::Display>(index: u32, max_attempts: u32, start: Instant, err: &E) {
    if index + 1 < max_attempts {
        debug!(attempt = index + 1, error = %err, "Attempt failed");
    } else {
        warn!(
            attempts = index + 1,
            duration_ms = start.elapsed().as_millis() as u64,
            error = %err,
            "All retry attempts exhausted"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::AbortController;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_delay_schedule_doubles() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100));
        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay_ms: 1000,
            max_delay_ms: 3000,
            jitter_factor: 0.0,
        };
        assert_eq!(policy.delay_for(6), Duration::from_millis(3000));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = RetryPolicy {
            jitter_factor: 0.2,
            ..RetryPolicy::new(3, Duration::from_millis(1000))
        };
        for _ in 0..100 {
            let d = policy.delay_for(1).as_millis();
            assert!((800..=1200).contains(&d), "delay {d} out of band");
        }
    }

    #[test]
    fn test_policy_variants() {
        assert_eq!(RetryPolicy::aggressive().max_attempts, 5);
        assert_eq!(RetryPolicy::conservative().max_attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        let started = tokio::time::Instant::now();

        let c = calls.clone();
        let result: Result<u32, String> = with_retry(&policy, move |index| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                if index < 2 {
                    Err(format!("attempt {index} failed"))
                } else {
                    Ok(index)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 100ms + 200ms of backoff
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_surfaces_last_error() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        let result: Result<(), String> =
            with_retry(&policy, |index| async move { Err(format!("boom {index}")) }).await;
        assert_eq!(result, Err("boom 2".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_retrying() {
        let controller = AbortController::new();
        let signal = controller.signal();
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(5, Duration::from_secs(10));

        let c = calls.clone();
        let ctl = controller.clone();
        let result: Result<(), RetryError<String>> = with_retry_until(&policy, &signal, move |_| {
            let c = c.clone();
            let ctl = ctl.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                // Caller goes away while the first attempt is failing
                ctl.abort();
                Err("unavailable".to_string())
            }
        })
        .await;

        assert_eq!(result, Err(RetryError::Cancelled { attempts: 1 }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_policy_does_not_sleep() {
        let policy = RetryPolicy::new(0, Duration::from_secs(60));
        let started = tokio::time::Instant::now();
        let result: Result<(), String> = with_retry(&policy, |_| async { Err("down".to_string()) }).await;
        assert_eq!(result, Err("down".to_string()));
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_until_reports_exhaustion() {
        let policy = RetryPolicy::new(2, Duration::from_millis(5));
        let result: Result<(), RetryError<String>> =
            with_retry_until(&policy, &AbortSignal::never(), |index| async move { Err(format!("boom {index}")) })
                .await;
        assert_eq!(
            result,
            Err(RetryError::Exhausted {
                attempts: 2,
                last: "boom 1".to_string()
            })
        );
    }
}

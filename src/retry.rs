//! Retry executor for remote calls.
//!
//! Wraps a fallible async operation with retries. Each failure is first
//! classified into a [`FailureClass`] and the class alone decides what
//! happens next, keeping the policy out of the retry loop:
//!
//! - `Transient`: exponential backoff (base 2, capped), consumes the
//!   attempt budget.
//! - `RateLimited`: sleep until the advertised reset window (with a
//!   floor), then retry. Rate-limit waits do not consume the attempt
//!   budget: the quota is expected to clear, so giving up early would
//!   turn a recoverable condition into a lost subtree.
//! - `Permanent`: no retry, fail immediately.

use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::time::sleep;
use tracing::warn;

use crate::client::ClientError;

/// Tuning knobs for [`execute`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum invocations of the operation for transient failures.
    pub max_attempts: u32,

    /// First backoff delay; doubles per attempt.
    pub backoff_base: Duration,

    /// Upper bound on any single backoff delay.
    pub backoff_cap: Duration,

    /// Minimum wait on a rate-limit failure, even when the reset time is
    /// already in the past.
    pub rate_limit_floor: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(2),
            backoff_cap: Duration::from_secs(120),
            rate_limit_floor: Duration::from_secs(30),
        }
    }
}

/// Terminal outcome of a retried operation.
#[derive(Debug, Error)]
pub enum RetryError {
    /// Transient failures used up the attempt budget.
    #[error("'{desc}' failed after {attempts} attempts: {last}")]
    Exhausted {
        desc: String,
        attempts: u32,
        #[source]
        last: ClientError,
    },

    /// The failure was classified as permanent; retrying would not help.
    #[error("'{desc}' failed permanently: {source}")]
    Permanent {
        desc: String,
        #[source]
        source: ClientError,
    },
}

/// How a single failure should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Quota exceeded; retry once the window resets.
    RateLimited {
        /// Epoch seconds at which the quota resets.
        reset_epoch: u64,
    },

    /// Worth retrying with backoff.
    Transient,

    /// Retrying cannot succeed.
    Permanent,
}

/// Classifies a [`ClientError`] for the retry loop.
///
/// Rate limiting requires both signals the remote sends together: a 403
/// or 429 status and a reset header. A 429 without the header is still
/// retried (transient); a 403 without it is a real permission denial.
/// Server errors, network failures and timeouts are transient; any other
/// status is permanent.
pub fn classify(err: &ClientError) -> FailureClass {
    match err {
        ClientError::Status {
            status: 403 | 429,
            rate_limit_reset: Some(reset_epoch),
            ..
        } => FailureClass::RateLimited {
            reset_epoch: *reset_epoch,
        },
        ClientError::Status { status: 429, .. } => FailureClass::Transient,
        ClientError::Status { status, .. } if *status >= 500 => FailureClass::Transient,
        ClientError::Status { .. } => FailureClass::Permanent,
        ClientError::Network(_) | ClientError::Timeout(_) => FailureClass::Transient,
    }
}

/// Invokes `operation` until it succeeds or retries are no longer useful.
///
/// `desc` identifies the call in logs; every failed attempt is logged
/// with the computed delay so incomplete harvests can be diagnosed
/// afterwards.
///
/// # Errors
///
/// [`RetryError::Exhausted`] after `max_attempts` transient failures,
/// or [`RetryError::Permanent`] on the first permanent failure.
pub async fn execute<T, F, Fut>(
    policy: &RetryPolicy,
    desc: &str,
    mut operation: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    // The operation is always invoked at least once.
    let budget = policy.max_attempts.max(1);
    let mut attempt: u32 = 0;

    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        match classify(&err) {
            FailureClass::Permanent => {
                warn!(call = %desc, error = %err, "permanent failure, not retrying");
                return Err(RetryError::Permanent {
                    desc: desc.to_string(),
                    source: err,
                });
            }
            FailureClass::RateLimited { reset_epoch } => {
                let delay = rate_limit_delay(reset_epoch, policy.rate_limit_floor);
                warn!(
                    call = %desc,
                    wait_secs = delay.as_secs(),
                    "rate limited, waiting for reset window"
                );
                // Does not count against the attempt budget.
                sleep(delay).await;
            }
            FailureClass::Transient => {
                attempt += 1;
                if attempt >= budget {
                    warn!(call = %desc, attempts = attempt, error = %err, "retries exhausted");
                    return Err(RetryError::Exhausted {
                        desc: desc.to_string(),
                        attempts: attempt,
                        last: err,
                    });
                }
                let delay = backoff_delay(attempt, policy);
                warn!(
                    call = %desc,
                    attempt,
                    max_attempts = budget,
                    wait_secs = delay.as_secs(),
                    error = %err,
                    "transient failure, backing off"
                );
                sleep(delay).await;
            }
        }
    }
}

/// Exponential backoff: `base * 2^(attempt-1)`, capped.
fn backoff_delay(attempt: u32, policy: &RetryPolicy) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    policy
        .backoff_base
        .saturating_mul(factor)
        .min(policy.backoff_cap)
}

/// Time until the reset window, but never less than the floor.
fn rate_limit_delay(reset_epoch: u64, floor: Duration) -> Duration {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs();
    Duration::from_secs(reset_epoch.saturating_sub(now)).max(floor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn epoch_now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    /// Fails with `errors` in order, then succeeds returning the call count.
    struct Script {
        errors: std::sync::Mutex<Vec<ClientError>>,
        calls: AtomicU32,
    }

    impl Script {
        fn new(errors: Vec<ClientError>) -> Self {
            Self {
                errors: std::sync::Mutex::new(errors),
                calls: AtomicU32::new(0),
            }
        }

        async fn call(&self) -> Result<u32, ClientError> {
            let calls = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let next = {
                let mut errors = self.errors.lock().unwrap();
                if errors.is_empty() {
                    None
                } else {
                    Some(errors.remove(0))
                }
            };
            match next {
                Some(err) => Err(err),
                None => Ok(calls),
            }
        }
    }

    #[tokio::test]
    async fn test_success_short_circuits() {
        let script = Script::new(vec![]);
        let result = execute(&RetryPolicy::default(), "op", || script.call())
            .await
            .unwrap();
        assert_eq!(result, 1);
        assert_eq!(script.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_then_success() {
        let script = Script::new(vec![
            ClientError::Network("reset by peer".into()),
            ClientError::status(502, "bad gateway"),
        ]);
        let result = execute(&RetryPolicy::default(), "op", || script.call())
            .await
            .unwrap();
        // Two failures, success on the third and final attempt.
        assert_eq!(result, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_reports_last_error() {
        let script = Script::new(vec![
            ClientError::Network("a".into()),
            ClientError::Network("b".into()),
            ClientError::Network("c".into()),
        ]);
        let err = execute(&RetryPolicy::default(), "op", || script.call())
            .await
            .unwrap_err();
        match err {
            RetryError::Exhausted { attempts, last, .. } => {
                assert_eq!(attempts, 3);
                assert!(matches!(last, ClientError::Network(msg) if msg == "c"));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
        assert_eq!(script.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(backoff_delay(1, &policy), Duration::from_secs(2));
        assert_eq!(backoff_delay(2, &policy), Duration::from_secs(4));
        assert_eq!(backoff_delay(3, &policy), Duration::from_secs(8));
        assert_eq!(backoff_delay(10, &policy), Duration::from_secs(120));
    }

    #[tokio::test]
    async fn test_permanent_failure_stops_immediately() {
        let script = Script::new(vec![ClientError::status(404, "not found")]);
        let err = execute(&RetryPolicy::default(), "op", || script.call())
            .await
            .unwrap_err();
        assert!(matches!(err, RetryError::Permanent { .. }));
        assert_eq!(script.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_waits_for_reset_window() {
        let reset = epoch_now() + 90;
        let script = Script::new(vec![ClientError::rate_limited(429, reset)]);

        let started = Instant::now();
        let result = execute(&RetryPolicy::default(), "op", || script.call())
            .await
            .unwrap();

        assert_eq!(result, 2);
        // The retry must not fire before the reset window (small tolerance
        // for the wall-clock second boundary).
        assert!(started.elapsed() >= Duration::from_secs(85));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_wait_has_floor() {
        // Reset already in the past: still waits the 30s floor.
        let script = Script::new(vec![ClientError::rate_limited(403, epoch_now() - 100)]);

        let started = Instant::now();
        execute(&RetryPolicy::default(), "op", || script.call())
            .await
            .unwrap();

        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_does_not_consume_attempt_budget() {
        // One transient attempt allowed; a transient failure would exhaust
        // the budget right away, but rate-limit failures keep retrying.
        let policy = RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        };
        let reset = epoch_now() + 5;
        let script = Script::new(vec![
            ClientError::rate_limited(429, reset),
            ClientError::rate_limited(429, reset),
        ]);

        let result = execute(&policy, "op", || script.call()).await.unwrap();
        assert_eq!(result, 3);
    }

    #[test]
    fn test_classification_table() {
        assert_eq!(
            classify(&ClientError::rate_limited(403, 1)),
            FailureClass::RateLimited { reset_epoch: 1 }
        );
        assert_eq!(
            classify(&ClientError::rate_limited(429, 7)),
            FailureClass::RateLimited { reset_epoch: 7 }
        );
        // 429 without a reset header: retry with backoff.
        assert_eq!(
            classify(&ClientError::status(429, "slow down")),
            FailureClass::Transient
        );
        // 403 without a reset header is a permission denial.
        assert_eq!(
            classify(&ClientError::status(403, "forbidden")),
            FailureClass::Permanent
        );
        assert_eq!(
            classify(&ClientError::status(503, "unavailable")),
            FailureClass::Transient
        );
        assert_eq!(
            classify(&ClientError::status(404, "missing")),
            FailureClass::Permanent
        );
        assert_eq!(
            classify(&ClientError::Network("dns".into())),
            FailureClass::Transient
        );
        assert_eq!(
            classify(&ClientError::Timeout(Duration::from_secs(30))),
            FailureClass::Transient
        );
    }
}

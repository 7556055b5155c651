//! Fixed-interval retry for connect operations.
//!
//! Both the link connect and the session connect are retried with the same
//! shape: up to `max_attempts` attempts, sleeping `interval` after each failed
//! attempt except the last. A policy of three attempts with interval `T`
//! therefore gives up after two waits, roughly `2T` after it started.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use telelink_core::{Error, RetryPolicy, with_retry};
//!
//! # async fn example() {
//! let policy = RetryPolicy::new(3, Duration::from_millis(10));
//!
//! let address = with_retry(&policy, "link connect", |_attempt| async {
//!     Ok::<_, Error>("192.168.1.20")
//! })
//! .await;
//! assert!(address.is_ok());
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// How often and how patiently an operation is retried.
///
/// Stateless: one value per retried operation, nothing carried between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay between a failed attempt and the next one.
    #[serde(rename = "interval_ms", with = "crate::util::serde_millis")]
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            interval: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Create a policy.
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// Single attempt, no waiting.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            interval: Duration::ZERO,
        }
    }

    /// Patient retries for joining a wireless network.
    ///
    /// Association can take several seconds while the access point is busy,
    /// so attempts are spaced widely.
    pub fn for_link() -> Self {
        Self {
            max_attempts: 10,
            interval: Duration::from_secs(5),
        }
    }

    /// Retries for reaching the broker once the link is up.
    pub fn for_session() -> Self {
        Self {
            max_attempts: 5,
            interval: Duration::from_secs(2),
        }
    }

    /// Set maximum number of attempts.
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the delay between attempts.
    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Worst-case time spent waiting between attempts.
    pub fn total_wait(&self) -> Duration {
        self.interval * self.max_attempts.saturating_sub(1)
    }

    /// Validate the policy.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::invalid_config("max_attempts must be >= 1"));
        }
        Ok(())
    }
}

/// Why a retried operation gave up.
#[derive(Debug)]
pub enum RetryError {
    /// Every allowed attempt failed with a retryable error.
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// Error of the final attempt.
        last: Error,
    },
    /// An attempt failed with an error that must not be retried.
    Aborted(Error),
}

impl RetryError {
    /// Collapse into a single error, wrapping exhaustion with `exhausted`.
    pub fn into_error(self, exhausted: impl FnOnce(u32, Box<Error>) -> Error) -> Error {
        match self {
            RetryError::Exhausted { attempts, last } => exhausted(attempts, Box::new(last)),
            RetryError::Aborted(e) => e,
        }
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the policy runs out of attempts.
///
/// The closure receives the 1-based attempt number. A policy with
/// `max_attempts == 0` still makes one attempt.
pub async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> std::result::Result<T, RetryError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", operation_name, attempt);
                }
                return Ok(value);
            }
            Err(e) if !e.is_retryable() => return Err(RetryError::Aborted(e)),
            Err(e) => {
                let remaining = max_attempts - attempt;
                if remaining == 0 {
                    warn!(
                        "{} failed on final attempt {}/{}: {}",
                        operation_name, attempt, max_attempts, e
                    );
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: e,
                    });
                }
                warn!(
                    "{} failed ({}). Retrying in {:?}. Attempts left: {}",
                    operation_name, e, policy.interval, remaining
                );
                sleep(policy.interval).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_retry_policy_validate() {
        assert!(RetryPolicy::new(0, Duration::ZERO).validate().is_err());
        assert!(RetryPolicy::once().validate().is_ok());
    }

    #[test]
    fn test_total_wait() {
        let policy = RetryPolicy::new(3, Duration::from_millis(500));
        assert_eq!(policy.total_wait(), Duration::from_secs(1));
        assert_eq!(RetryPolicy::once().total_wait(), Duration::ZERO);
    }

    #[test]
    fn test_serde_uses_milliseconds() {
        let policy: RetryPolicy =
            serde_json::from_str(r#"{"max_attempts":4,"interval_ms":250}"#).unwrap();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.interval, Duration::from_millis(250));

        let json = serde_json::to_string(&policy).unwrap();
        assert!(json.contains("\"interval_ms\":250"));
    }

    #[tokio::test]
    async fn test_with_retry_immediate_success() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let result = with_retry(&policy, "test", |_| async { Ok::<_, Error>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_eventual_success() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let attempts = Arc::new(AtomicU32::new(0));

        let result = with_retry(&policy, "test", |attempt| {
            let attempts = Arc::clone(&attempts);
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                if attempt < 2 {
                    Err(Error::link("transient"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_all_fail_waits_between_attempts_only() {
        let interval = Duration::from_secs(3);
        let policy = RetryPolicy::new(3, interval);
        let attempts = Arc::new(AtomicU32::new(0));
        let started = tokio::time::Instant::now();

        let result: std::result::Result<(), _> = with_retry(&policy, "test", |_| {
            let attempts = Arc::clone(&attempts);
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(Error::link("down"))
            }
        })
        .await;

        assert!(matches!(
            result,
            Err(RetryError::Exhausted { attempts: 3, .. })
        ));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), interval * 2);
    }

    #[tokio::test]
    async fn test_with_retry_non_retryable_error() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1));
        let attempts = Arc::new(AtomicU32::new(0));

        let result: std::result::Result<(), _> = with_retry(&policy, "test", |_| {
            let attempts = Arc::clone(&attempts);
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(Error::invalid_config("bad broker"))
            }
        })
        .await;

        assert!(matches!(result, Err(RetryError::Aborted(Error::InvalidConfig(_)))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_tries_once() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        let result = with_retry(&policy, "test", |attempt| async move {
            Ok::<_, Error>(attempt)
        })
        .await;
        assert_eq!(result.unwrap(), 1);
    }

    #[test]
    fn test_into_error_wraps_exhaustion() {
        let err = RetryError::Exhausted {
            attempts: 2,
            last: Error::link("gone"),
        }
        .into_error(|attempts, last| Error::TransportExhausted { attempts, last });
        assert!(matches!(err, Error::TransportExhausted { attempts: 2, .. }));

        let err = RetryError::Aborted(Error::Cancelled)
            .into_error(|attempts, last| Error::TransportExhausted { attempts, last });
        assert!(matches!(err, Error::Cancelled));
    }
}

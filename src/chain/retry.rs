use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::LedgerError;

/// Bounded exponential backoff for ledger calls.
///
/// Only transient failures (`Unavailable`, `Timeout`) are retried. The whole
/// loop, sleeps included, must finish within `call_deadline`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub call_deadline: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
            call_deadline: Duration::from_secs(20),
        }
    }
}

impl RetryPolicy {
    /// Backoff before attempt `attempt + 1`, without jitter
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    fn jittered(&self, attempt: u32) -> Duration {
        let base = self.backoff_for_attempt(attempt);
        let spread = (base.as_millis() as u64) / 4;
        if spread == 0 {
            return base;
        }
        base + Duration::from_millis(rand::rng().random_range(0..=spread))
    }

    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, LedgerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let attempts = async {
            let mut attempt = 0u32;
            loop {
                attempt += 1;
                match call().await {
                    Ok(value) => return Ok(value),
                    Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                        let backoff = self.jittered(attempt);
                        warn!(
                            operation,
                            attempt,
                            max_attempts = self.max_attempts,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e,
                            "Ledger call failed, retrying"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                    Err(e) => {
                        debug!(operation, attempt, error = %e, "Ledger call gave up");
                        return Err(e);
                    }
                }
            }
        };

        match tokio::time::timeout(self.call_deadline, attempts).await {
            Ok(result) => result,
            Err(_) => Err(LedgerError::Timeout(format!(
                "{} exceeded deadline of {}ms",
                operation,
                self.call_deadline.as_millis()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            call_deadline: Duration::from_secs(2),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for_attempt(3), Duration::from_millis(350));
        assert_eq!(policy.backoff_for_attempt(30), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried_until_success() {
        let calls = &AtomicU32::new(0);
        let result = fast_policy()
            .run("exists", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(LedgerError::Unavailable("connection refused".into()))
                } else {
                    Ok(true)
                }
            })
            .await;

        assert_eq!(result, Ok(true));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rejections_are_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = fast_policy()
            .run("submit", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(LedgerError::Rejected("execution reverted".into()))
            })
            .await;

        assert!(matches!(result, Err(LedgerError::Rejected(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = fast_policy()
            .run("stats", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(LedgerError::Timeout("slow node".into()))
            })
            .await;

        assert!(matches!(result, Err(LedgerError::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_deadline_turns_a_hang_into_timeout() {
        let policy = RetryPolicy {
            call_deadline: Duration::from_millis(50),
            ..fast_policy()
        };
        let result: Result<(), _> = policy
            .run("exists", || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(LedgerError::Timeout(_))));
    }
}

//! Retry policy for the remote deploy call

use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::RetryConfig;
use crate::error::{Error, Result};

/// Fixed attempt count with optional bounded exponential backoff
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    multiplier: f64,
    jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: config.initial_backoff,
            max_backoff: config.max_backoff,
            multiplier: config.multiplier.max(1.0),
            jitter: config.jitter,
        }
    }
}

impl RetryPolicy {
    /// Retry up to `max_attempts` times without waiting
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
            jitter: false,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay after the failed `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        if self.initial_backoff.is_zero() {
            return Duration::ZERO;
        }

        let exponent = attempt.saturating_sub(1).min(16) as i32;
        let base = (self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exponent))
            .min(self.max_backoff.as_millis() as f64);

        // ±25% of the delay, never above the cap
        let millis = if self.jitter {
            let jitter = base * (rand::random::<f64>() * 0.5 - 0.25);
            (base + jitter).clamp(0.0, self.max_backoff.as_millis() as f64)
        } else {
            base
        };
        Duration::from_millis(millis as u64)
    }

    /// Run `operation` until it succeeds or attempts run out.
    ///
    /// `on_attempt` observes every attempt's number and outcome.
    pub async fn run<T, F, Fut>(
        &self,
        label: &str,
        mut operation: F,
        mut on_attempt: impl FnMut(u32, bool),
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            match operation(attempt).await {
                Ok(value) => {
                    on_attempt(attempt, true);
                    info!(operation = label, attempt, "Attempt succeeded");
                    return Ok(value);
                }
                Err(e) => {
                    on_attempt(attempt, false);
                    warn!(
                        operation = label,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Attempt failed"
                    );
                    last_error = e.to_string();

                    if attempt < self.max_attempts {
                        let delay = self.backoff(attempt);
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
        }

        Err(Error::DeployRetriesExhausted {
            attempts: self.max_attempts,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_exhaustion_counts_attempts() {
        let calls = AtomicU32::new(0);
        let mut seen = Vec::new();

        let err = RetryPolicy::immediate(3)
            .run(
                "deploy",
                |attempt| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move { Err::<(), _>(Error::Deploy(format!("boom {}", attempt))) }
                },
                |attempt, ok| seen.push((attempt, ok)),
            )
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(seen, vec![(1, false), (2, false), (3, false)]);
        match err {
            Error::DeployRetriesExhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("boom 3"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_stops_at_first_success() {
        let calls = AtomicU32::new(0);

        let value = RetryPolicy::immediate(3)
            .run(
                "deploy",
                |attempt| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if attempt < 2 {
                            Err(Error::Deploy("transient".to_string()))
                        } else {
                            Ok(attempt)
                        }
                    }
                },
                |_, _| {},
            )
            .await
            .unwrap();

        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_backoff_is_bounded_exponential() {
        let policy = RetryPolicy::from(&RetryConfig {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            multiplier: 2.0,
            jitter: false,
        });
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
        assert_eq!(policy.backoff(10), Duration::from_millis(350));
    }

    #[test]
    fn test_jitter_stays_under_cap() {
        let policy = RetryPolicy::from(&RetryConfig {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_millis(200),
            multiplier: 2.0,
            jitter: true,
        });
        for attempt in 1..5 {
            assert!(policy.backoff(attempt) <= Duration::from_millis(200));
        }
    }

    #[test]
    fn test_immediate_has_no_delay_and_at_least_one_attempt() {
        let policy = RetryPolicy::immediate(0);
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.backoff(1), Duration::ZERO);
    }
}

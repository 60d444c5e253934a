//! Exponential backoff around single HTTP attempts.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::config::BfdConfig;
use crate::error::BfdError;

/// Deterministic doubling backoff with a ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_tries: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &BfdConfig) -> Self {
        Self {
            max_tries: config.max_tries.max(1),
            initial_interval: Duration::from_millis(config.initial_interval_ms),
            max_interval: Duration::from_millis(config.max_interval_ms),
        }
    }

    /// Delay slept after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.initial_interval
            .saturating_mul(1u32 << exp)
            .min(self.max_interval)
    }

    /// All delays a fully failing request sleeps through, in order.
    pub fn delays(&self) -> Vec<Duration> {
        (1..self.max_tries).map(|n| self.delay_after(n)).collect()
    }

    /// Runs `attempt` until it succeeds or `max_tries` attempts have failed.
    ///
    /// Only transient errors are retried; anything else is returned as-is.
    pub async fn run<T, F, Fut>(&self, what: &str, mut attempt: F) -> Result<T, BfdError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BfdError>>,
    {
        let mut tries = 0;
        loop {
            tries += 1;
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_transient() => return Err(err),
                Err(err) if tries >= self.max_tries => {
                    return Err(BfdError::Exhausted {
                        attempts: tries,
                        source: Box::new(err),
                    });
                }
                Err(err) => {
                    let delay = self.delay_after(tries);
                    warn!(
                        request = what,
                        attempt = tries,
                        max_tries = self.max_tries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "claims source request failed, retrying"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_tries: u32) -> RetryPolicy {
        RetryPolicy {
            max_tries,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(8),
        }
    }

    #[test]
    fn delays_double_and_cap() {
        let delays = RetryPolicy {
            max_tries: 7,
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_millis(1000),
        }
        .delays();
        let ms: Vec<u128> = delays.iter().map(Duration::as_millis).collect();
        assert_eq!(ms, vec![100, 200, 400, 800, 1000, 1000]);
    }

    #[test]
    fn delays_never_decrease() {
        for max_tries in 2..40 {
            let delays = policy(max_tries).delays();
            assert_eq!(delays.len() as u32, max_tries - 1);
            assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[tokio::test]
    async fn stops_after_max_tries() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy(4)
            .run("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(BfdError::Parse("boom".into())) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let err = result.unwrap_err();
        assert!(matches!(err, BfdError::Exhausted { attempts: 4, .. }));
        assert!(err.to_string().contains('4'));
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let value = policy(3)
            .run("test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(BfdError::Parse("not yet".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 2);
    }

    #[tokio::test]
    async fn does_not_retry_permanent_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy(5)
            .run("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(BfdError::Config("bad".into())) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(BfdError::Config(_))));
    }
}

//! Retry policy for remote calls
//!
//! Each call category (approval, burn, confirmation, completion) carries its own
//! [`RetryPolicy`]. Retries apply to the call attempt, never to the logical action:
//! callers decide what an attempt means (submit vs. re-query).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;

use crate::transfer::clock::Clock;
use crate::transfer::error::LedgerError;

/// Backoff shape between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    Fixed,
    /// Delay doubles after every failed attempt, capped at `max_delay`
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff: Backoff,
    /// Optional wall-clock budget across all attempts
    pub max_elapsed: Option<Duration>,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            max_delay: delay,
            backoff: Backoff::Fixed,
            max_elapsed: None,
        }
    }

    pub fn exponential(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
            backoff: Backoff::Exponential,
            max_elapsed: None,
        }
    }

    pub fn with_max_elapsed(mut self, budget: Duration) -> Self {
        self.max_elapsed = Some(budget);
        self
    }

    /// Delay to wait after the `failed_attempts`-th failure (1-based)
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.initial_delay,
            Backoff::Exponential => {
                let factor = 1u32
                    .checked_shl(failed_attempts.saturating_sub(1))
                    .unwrap_or(u32::MAX);
                self.initial_delay.saturating_mul(factor).min(self.max_delay)
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(5, Duration::from_secs(1), Duration::from_secs(30))
    }
}

/// Errors that know whether another attempt can help
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for LedgerError {
    fn is_retryable(&self) -> bool {
        LedgerError::is_retryable(self)
    }
}

/// Execute an async operation with backoff retry
///
/// `operation` receives the 1-based attempt number. Non-retryable errors are
/// returned immediately; retryable ones are retried until the policy's attempt
/// or time budget is spent, and the last error is returned.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    clock: &dyn Clock,
    label: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + fmt::Display,
{
    let started = clock.now();
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    log::info!("{} succeeded on attempt {}", label, attempt);
                }
                return Ok(value);
            }
            Err(e) if !e.is_retryable() => {
                log::warn!("{} failed permanently on attempt {}: {}", label, attempt, e);
                return Err(e);
            }
            Err(e) => {
                if attempt >= max_attempts {
                    log::warn!("{} failed after {} attempts: {}", label, attempt, e);
                    return Err(e);
                }

                let delay = policy.delay_for(attempt);
                if let Some(budget) = policy.max_elapsed {
                    if clock.now().duration_since(started) + delay > budget {
                        log::warn!("{} gave up after {:?} ({} attempts): {}", label, budget, attempt, e);
                        return Err(e);
                    }
                }

                log::debug!("{} attempt {} failed: {} (retrying in {:?})", label, attempt, e, delay);
                clock.sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::clock::ManualClock;
    use crate::transfer::types::{DomainId, TxRef};
    use ethers::types::TxHash;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_fixed_delay() {
        let policy = RetryPolicy::fixed(3, Duration::from_secs(2));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(7), Duration::from_secs(2));
    }

    #[test]
    fn test_exponential_delay_is_capped() {
        let policy = RetryPolicy::exponential(10, Duration::from_millis(500), Duration::from_secs(3));
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for(3), Duration::from_secs(2));
        assert_eq!(policy.delay_for(4), Duration::from_secs(3));
        assert_eq!(policy.delay_for(64), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_retry_logic() {
        let clock = ManualClock::new();
        let policy = RetryPolicy::exponential(4, Duration::from_millis(100), Duration::from_secs(1));

        // Succeeds immediately
        let result: Result<(), LedgerError> =
            retry_with_backoff(&policy, &clock, "noop", |_| async { Ok(()) }).await;
        assert!(result.is_ok());
        assert!(clock.sleeps().is_empty());

        // Fails twice then succeeds
        let counter = AtomicU32::new(0);
        let result = retry_with_backoff(&policy, &clock, "flaky", |_| {
            let count = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if count < 2 {
                    Err(LedgerError::Network("connection reset".to_string()))
                } else {
                    Ok(count)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(100), Duration::from_millis(200)]);
    }

    #[tokio::test]
    async fn test_retry_exhausts_budget() {
        let clock = ManualClock::new();
        let policy = RetryPolicy::fixed(3, Duration::from_secs(1));
        let counter = AtomicU32::new(0);

        let result: Result<(), _> = retry_with_backoff(&policy, &clock, "down", |attempt| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Err(LedgerError::Network(format!("attempt {}", attempt))) }
        })
        .await;

        assert_eq!(result.unwrap_err(), LedgerError::Network("attempt 3".to_string()));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(clock.sleeps().len(), 2);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let clock = ManualClock::new();
        let policy = RetryPolicy::fixed(5, Duration::from_secs(1));
        let counter = AtomicU32::new(0);
        let tx = TxRef::new(DomainId::ETHEREUM, TxHash::repeat_byte(9));

        let result: Result<(), _> = retry_with_backoff(&policy, &clock, "revert", |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Err(LedgerError::Reverted(tx)) }
        })
        .await;

        assert_eq!(result.unwrap_err(), LedgerError::Reverted(tx));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_max_elapsed_budget() {
        let clock = ManualClock::new();
        let policy = RetryPolicy::fixed(100, Duration::from_secs(10)).with_max_elapsed(Duration::from_secs(25));
        let counter = AtomicU32::new(0);

        let result: Result<(), _> = retry_with_backoff(&policy, &clock, "slow", |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(LedgerError::Network("timeout".to_string())) }
        })
        .await;

        assert!(result.is_err());
        // Attempts at t=0, 10, 20; the next sleep would cross 25s
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(clock.elapsed(), Duration::from_secs(20));
    }
}

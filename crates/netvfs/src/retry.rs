//! Bounded retry with exponential backoff.

use std::time::Duration;

pub const DEFAULT_ATTEMPTS: u32 = 4;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(50);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(5000);

/// How often and how patiently a command is retried over fresh connections.
///
/// The wait before retry `n` (counting from zero) is zero for the first retry,
/// then `base_delay` doubling per retry, never more than `max_delay`:
/// `0, 50, 100, 200, ... 5000` milliseconds with the defaults.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total tries, including the first. Zero behaves like one.
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: DEFAULT_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn once() -> RetryPolicy {
        RetryPolicy {
            attempts: 1,
            ..RetryPolicy::default()
        }
    }

    pub fn with_attempts(self, attempts: u32) -> RetryPolicy {
        RetryPolicy { attempts, ..self }
    }

    /// Wait before the retry following failed attempt `failed` (zero based).
    pub fn delay(&self, failed: u32) -> Duration {
        if failed == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(failed - 1).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// True if another try is allowed after attempt `failed` (zero based) failed.
    pub fn should_retry(&self, failed: u32) -> bool {
        failed + 1 < self.attempts
    }

    /// Every wait this policy can incur, in order.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.attempts.saturating_sub(1)).map(|n| self.delay(n))
    }
}

#[test]
fn default_schedule() {
    let policy = RetryPolicy::default();
    let ms: Vec<u128> = policy.delays().map(|d| d.as_millis()).collect();
    assert_eq!(ms, vec![0, 50, 100]);
}

#[test]
fn schedule_is_capped_and_monotonic() {
    let policy = RetryPolicy::default().with_attempts(12);
    let ms: Vec<u128> = policy.delays().map(|d| d.as_millis()).collect();
    assert_eq!(ms, vec![0, 50, 100, 200, 400, 800, 1600, 3200, 5000, 5000, 5000]);
    assert!(ms.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(policy.delay(40), DEFAULT_MAX_DELAY);
}

#[test]
fn attempts_bound_retries() {
    let policy = RetryPolicy::default();
    assert!(policy.should_retry(0));
    assert!(policy.should_retry(2));
    assert!(!policy.should_retry(3));
    assert!(!RetryPolicy::once().should_retry(0));
    assert_eq!(RetryPolicy::once().delays().count(), 0);
}

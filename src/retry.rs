// src/retry.rs

//! Per-task retry policy.
//!
//! `max_attempts` counts total executions, not retries: a policy with
//! `max_attempts = 3` runs the task at most three times before the instance
//! goes terminally failed.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Policy for retrying failed task attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// No retries: a single failed attempt fails the instance.
    None,

    /// Fixed delay between attempts.
    Fixed {
        max_attempts: u32,
        delay: Duration,
    },

    /// Exponential backoff: the delay doubles after each failed attempt,
    /// capped at `max_delay`.
    Exponential {
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::None
    }
}

impl RetryPolicy {
    /// Fixed-delay policy with `max_attempts` total executions.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::Fixed {
            max_attempts,
            delay,
        }
    }

    /// Exponential backoff with sensible defaults: 1s initial delay,
    /// capped at 5 minutes.
    pub fn exponential(max_attempts: u32) -> Self {
        Self::Exponential {
            max_attempts,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
        }
    }

    /// Total number of executions this policy allows (always >= 1).
    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::None => 1,
            Self::Fixed { max_attempts, .. } | Self::Exponential { max_attempts, .. } => {
                (*max_attempts).max(1)
            }
        }
    }

    /// Backoff to wait after `completed_attempts` failed executions before
    /// the next one, or `None` when the attempt budget is exhausted.
    pub fn delay_after_attempt(&self, completed_attempts: u32) -> Option<Duration> {
        if completed_attempts >= self.max_attempts() {
            return None;
        }
        match self {
            Self::None => None,
            Self::Fixed { delay, .. } => Some(*delay),
            Self::Exponential {
                initial_delay,
                max_delay,
                ..
            } => {
                // initial_delay * 2^(n-1), capped at max_delay.
                let multiplier = 2u64.saturating_pow(completed_attempts.saturating_sub(1));
                let delay_ms = (initial_delay.as_millis() as u64).saturating_mul(multiplier);
                Some(Duration::from_millis(
                    delay_ms.min(max_delay.as_millis() as u64),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_policy_allows_single_attempt() {
        let policy = RetryPolicy::None;
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.delay_after_attempt(1), None);
    }

    #[test]
    fn fixed_policy_delays_until_budget_exhausted() {
        let policy = RetryPolicy::fixed(3, Duration::from_secs(5));
        assert_eq!(policy.delay_after_attempt(1), Some(Duration::from_secs(5)));
        assert_eq!(policy.delay_after_attempt(2), Some(Duration::from_secs(5)));
        assert_eq!(policy.delay_after_attempt(3), None);
    }

    #[test]
    fn exponential_policy_doubles() {
        let policy = RetryPolicy::Exponential {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        };

        assert_eq!(policy.delay_after_attempt(1), Some(Duration::from_secs(1)));
        assert_eq!(policy.delay_after_attempt(2), Some(Duration::from_secs(2)));
        assert_eq!(policy.delay_after_attempt(3), Some(Duration::from_secs(4)));
        assert_eq!(policy.delay_after_attempt(4), Some(Duration::from_secs(8)));
        assert_eq!(policy.delay_after_attempt(5), None);
    }

    #[test]
    fn exponential_caps_at_max_delay() {
        let policy = RetryPolicy::Exponential {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        };

        // 2^6 = 64 seconds, but capped at 10.
        assert_eq!(policy.delay_after_attempt(7), Some(Duration::from_secs(10)));
    }

    #[test]
    fn zero_max_attempts_is_clamped_to_one() {
        let policy = RetryPolicy::fixed(0, Duration::from_secs(1));
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.delay_after_attempt(1), None);
    }
}

//! Reconnect backoff for the overview service connection.
//!
//! Pure and deterministic: the caller owns the clock and the timers, this
//! module only decides how long to wait.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Delay before the first reconnect attempt.
pub const DEFAULT_BACKOFF_MS: u64 = 1_000;

/// Ceiling for the reconnect delay (10 minutes).
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 600_000;

/// How long a successful bind may wait for its connection callback.
pub const DEFAULT_DEFERRED_CONNECTION_MS: u64 = 5_000;

/// Exponential backoff with a ceiling: `min(base * 2^attempts, max)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub base_ms: u64,
    pub max_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: DEFAULT_BACKOFF_MS,
            max_ms: DEFAULT_MAX_BACKOFF_MS,
        }
    }
}

impl BackoffPolicy {
    /// Delay in milliseconds after `attempts` consecutive failures.
    pub fn delay_ms(&self, attempts: u32) -> u64 {
        let factor = 1u64.checked_shl(attempts).unwrap_or(u64::MAX);
        self.base_ms.saturating_mul(factor).min(self.max_ms)
    }

    /// Smallest attempt count whose delay already sits at the ceiling.
    ///
    /// Counting past this point changes nothing, so trackers stop there.
    pub fn ceiling_attempts(&self) -> u32 {
        let mut attempts = 0;
        while attempts < 63 && self.delay_ms(attempts) < self.max_ms {
            attempts += 1;
        }
        attempts
    }
}

/// Consecutive-failure counter driving [`BackoffPolicy`].
#[derive(Debug, Clone)]
pub struct ConnectionBackoff {
    policy: BackoffPolicy,
    ceiling: u32,
    attempts: u32,
}

impl ConnectionBackoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        let ceiling = policy.ceiling_attempts();
        Self {
            policy,
            ceiling,
            attempts: 0,
        }
    }

    /// Delay for the next retry. Advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.policy.delay_ms(self.attempts);
        self.attempts = self.attempts.saturating_add(1).min(self.ceiling);
        Duration::from_millis(delay)
    }

    /// Delay the next call to [`next_delay`](Self::next_delay) would return.
    pub fn peek_delay(&self) -> Duration {
        Duration::from_millis(self.policy.delay_ms(self.attempts))
    }

    /// Back to the first attempt. Only a successful connection or an
    /// explicit user switch should call this.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }
}

impl Default for ConnectionBackoff {
    fn default() -> Self {
        Self::new(BackoffPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn default_policy_values() {
        let p = BackoffPolicy::default();
        assert_eq!(p.base_ms, 1_000);
        assert_eq!(p.max_ms, 600_000);
    }

    #[test]
    fn three_failures_double_from_base() {
        let mut backoff = ConnectionBackoff::default();
        assert_eq!(backoff.next_delay(), Duration::from_millis(1_000));
        assert_eq!(backoff.next_delay(), Duration::from_millis(2_000));
        assert_eq!(backoff.next_delay(), Duration::from_millis(4_000));
        assert_eq!(backoff.attempts(), 3);
    }

    #[test]
    fn delay_capped_at_max() {
        let mut backoff = ConnectionBackoff::default();
        let delays: Vec<u64> = (0..14).map(|_| backoff.next_delay().as_millis() as u64).collect();
        // 1000 * 2^9 = 512_000 is the last uncapped step
        assert_eq!(delays[9], 512_000);
        assert_eq!(delays[10], 600_000);
        assert_eq!(delays[13], 600_000);
    }

    #[test]
    fn counter_saturates_at_ceiling() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.ceiling_attempts(), 10);
        let mut backoff = ConnectionBackoff::new(policy);
        for _ in 0..50 {
            backoff.next_delay();
        }
        assert_eq!(backoff.attempts(), 10);
    }

    #[test]
    fn reset_restarts_from_base() {
        let mut backoff = ConnectionBackoff::default();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.peek_delay(), Duration::from_millis(1_000));
    }

    #[test]
    fn huge_attempt_counts_do_not_overflow() {
        let p = BackoffPolicy::default();
        assert_eq!(p.delay_ms(63), 600_000);
        assert_eq!(p.delay_ms(64), 600_000);
        assert_eq!(p.delay_ms(u32::MAX), 600_000);
    }

    #[test]
    fn max_below_base_caps_immediately() {
        let p = BackoffPolicy {
            base_ms: 5_000,
            max_ms: 2_000,
        };
        assert_eq!(p.ceiling_attempts(), 0);
        assert_eq!(p.delay_ms(0), 2_000);
    }

    proptest! {
        /// The counter never grows past the point where the delay is capped.
        #[test]
        fn attempts_bounded_by_ceiling(ops in proptest::collection::vec(any::<bool>(), 0..200)) {
            let mut backoff = ConnectionBackoff::default();
            let ceiling = backoff.policy().ceiling_attempts();
            for fail in ops {
                if fail {
                    let delay = backoff.next_delay();
                    prop_assert!(delay <= Duration::from_millis(DEFAULT_MAX_BACKOFF_MS));
                } else {
                    backoff.reset();
                }
                prop_assert!(backoff.attempts() <= ceiling);
            }
        }

        /// Delays never decrease between resets.
        #[test]
        fn delays_monotonic(base in 1u64..10_000, max in 1u64..1_000_000, n in 1usize..80) {
            let mut backoff = ConnectionBackoff::new(BackoffPolicy { base_ms: base, max_ms: max });
            let mut prev = Duration::ZERO;
            for _ in 0..n {
                let d = backoff.next_delay();
                prop_assert!(d >= prev);
                prop_assert!(d <= Duration::from_millis(max));
                prev = d;
            }
        }
    }
}

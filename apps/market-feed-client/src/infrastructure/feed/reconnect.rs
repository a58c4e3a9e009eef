//! Reconnection Policy
//!
//! Exponential backoff with additive jitter:
//!
//! ```text
//! delay(n) = min(max_delay, base_delay * 2^(n-1)) + uniform[0, max_jitter)
//! ```
//!
//! `n` is the 1-based attempt number. The counter is incremented before
//! the delay is computed and reset after a successful open.

use std::time::Duration;

use rand::Rng;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first attempt (before jitter).
    pub base_delay: Duration,
    /// Cap on the exponential part of the delay.
    pub max_delay: Duration,
    /// Upper bound (exclusive) of the random jitter added to every delay.
    pub max_jitter: Duration,
    /// Attempts allowed before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_jitter: Duration::from_secs(1),
            max_attempts: 5,
        }
    }
}

/// Exponential part of the delay for a 1-based attempt number.
#[must_use]
pub fn backoff_delay(config: &ReconnectConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    config
        .base_delay
        .checked_mul(1_u32 << exponent)
        .map_or(config.max_delay, |d| d.min(config.max_delay))
}

/// Reconnection policy implementing exponential backoff with jitter.
///
/// # Example
///
/// ```rust
/// use market_feed_client::infrastructure::feed::reconnect::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
///
/// // First attempt waits between 1s and 2s
/// let delay = policy.next_delay().unwrap();
/// assert!(delay >= Duration::from_secs(1) && delay < Duration::from_secs(2));
///
/// // Simulate successful connection
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Count the next attempt and return its delay.
    ///
    /// Returns `None` once `max_attempts` attempts have been scheduled.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }

        self.attempt_count += 1;
        Some(backoff_delay(&self.config, self.attempt_count) + self.jitter())
    }

    /// Reset the policy after a successful connection.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Attempts scheduled since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Whether another attempt may be scheduled.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    fn jitter(&self) -> Duration {
        let max = u64::try_from(self.config.max_jitter.as_millis()).unwrap_or(u64::MAX);
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn no_jitter(max_attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            max_jitter: Duration::ZERO,
            max_attempts,
            ..ReconnectConfig::default()
        }
    }

    #[test]
    fn default_config_values() {
        let config = ReconnectConfig::default();
        assert_eq!(config.base_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert_eq!(config.max_jitter, Duration::from_secs(1));
        assert_eq!(config.max_attempts, 5);
    }

    #[test]
    fn policy_exponential_backoff() {
        let mut policy = ReconnectPolicy::new(no_jitter(0));

        let delays: Vec<_> = (0..7).map(|_| policy.next_delay().unwrap()).collect();

        assert_eq!(
            delays,
            [1, 2, 4, 8, 16, 30, 30].map(Duration::from_secs).to_vec()
        );
    }

    #[test]
    fn policy_max_attempts() {
        let mut policy = ReconnectPolicy::new(no_jitter(3));

        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert_eq!(policy.attempt_count(), 3);

        assert!(policy.next_delay().is_none());
        assert!(!policy.should_retry());
        assert_eq!(policy.attempt_count(), 3);
    }

    #[test]
    fn policy_reset() {
        let mut policy = ReconnectPolicy::new(no_jitter(3));
        let _ = policy.next_delay();
        let _ = policy.next_delay();

        policy.reset();

        assert_eq!(policy.attempt_count(), 0);
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn huge_attempt_numbers_saturate() {
        let config = no_jitter(0);
        assert_eq!(backoff_delay(&config, u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn unlimited_attempts() {
        let mut policy = ReconnectPolicy::new(no_jitter(0));
        for _ in 0..1000 {
            assert!(policy.next_delay().is_some());
        }
    }

    proptest! {
        #[test]
        fn delay_stays_within_bounds(attempts in 1_u32..40) {
            let config = ReconnectConfig { max_attempts: 0, ..ReconnectConfig::default() };
            let mut policy = ReconnectPolicy::new(config);

            for n in 1..=attempts {
                let delay = policy.next_delay().unwrap();
                let floor = backoff_delay(&config, n);
                prop_assert!(delay >= floor);
                prop_assert!(delay < floor + config.max_jitter);
                prop_assert!(delay < config.max_delay + config.max_jitter);
            }
        }

        #[test]
        fn exponential_part_is_monotonic(n in 1_u32..60) {
            let config = ReconnectConfig::default();
            prop_assert!(backoff_delay(&config, n) <= backoff_delay(&config, n + 1));
        }
    }
}

//! # Exponential Backoff
//!
//! Spaces out drain attempts. Evictions are usually refused for a while by
//! PodDisruptionBudgets or slow terminations, so each wait doubles.
//!
//! Default sequence for drains: 15s, 30s, 60s, 120s between five attempts.

use std::time::Duration;

/// Exponential backoff with a bounded number of attempts
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Wait after the first failure
    initial: Duration,
    /// Multiplier applied after every wait
    factor: u32,
    /// Total attempts allowed, including the first
    max_attempts: u32,
    /// Failed attempts seen so far
    failures: u32,
}

impl ExponentialBackoff {
    /// Create a backoff allowing `max_attempts` tries
    ///
    /// # Arguments
    ///
    /// * `initial` - Wait after the first failed attempt
    /// * `factor` - Growth factor between consecutive waits (typically 2)
    /// * `max_attempts` - Attempts before giving up, counting the first
    #[must_use]
    pub fn new(initial: Duration, factor: u32, max_attempts: u32) -> Self {
        Self {
            initial,
            factor,
            max_attempts,
            failures: 0,
        }
    }

    /// Record a failed attempt and get the wait before the next one
    ///
    /// Returns `None` once the attempts are exhausted.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        self.failures += 1;
        if self.failures >= self.max_attempts {
            return None;
        }
        Some(Self::calculate_for_failure_count(
            self.failures - 1,
            self.initial,
            self.factor,
        ))
    }

    /// Attempts made so far that failed
    #[must_use]
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Wait after `failure_count` previous waits (stateless)
    ///
    /// `initial * factor^failure_count`, saturating instead of overflowing.
    #[must_use]
    pub fn calculate_for_failure_count(failure_count: u32, initial: Duration, factor: u32) -> Duration {
        let multiplier = factor.saturating_pow(failure_count);
        initial.saturating_mul(multiplier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_sequence() {
        let mut backoff = ExponentialBackoff::new(Duration::from_secs(15), 2, 5);

        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(15)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(30)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(60)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(120)));
        // fifth failure exhausts the attempts
        assert_eq!(backoff.next_backoff(), None);
        assert_eq!(backoff.failures(), 5);
    }

    #[test]
    fn test_exponential_backoff_reset() {
        let mut backoff = ExponentialBackoff::new(Duration::from_secs(15), 2, 5);

        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(15)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(30)));

        backoff.reset();

        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(15)));
    }

    #[test]
    fn test_single_attempt_never_waits() {
        let mut backoff = ExponentialBackoff::new(Duration::from_secs(15), 2, 1);
        assert_eq!(backoff.next_backoff(), None);
    }

    #[test]
    fn test_calculate_saturates() {
        assert_eq!(
            ExponentialBackoff::calculate_for_failure_count(3, Duration::from_secs(15), 2),
            Duration::from_secs(120)
        );
        assert_eq!(
            ExponentialBackoff::calculate_for_failure_count(200, Duration::from_secs(15), 2),
            Duration::MAX
        );
    }
}

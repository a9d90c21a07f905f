//! Linear reconnect backoff.

use std::time::Duration;

/// How many reconnects to attempt and how long to wait before each.
///
/// The delay before attempt `n` (1-based) is `n * base_delay`, with no ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl ReconnectPolicy {
    /// Create a policy.
    #[must_use]
    pub const fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Maximum number of consecutive attempts.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decide the next attempt after `attempts_made` consecutive failures.
    ///
    /// Returns the 1-based attempt number and its delay, or `None` once the
    /// budget is spent.
    #[must_use]
    pub fn next_attempt(&self, attempts_made: u32) -> Option<(u32, Duration)> {
        if attempts_made >= self.max_attempts {
            return None;
        }
        let attempt = attempts_made + 1;
        Some((attempt, self.base_delay.saturating_mul(attempt)))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_linearly() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<_> = (0..5)
            .map(|made| policy.next_attempt(made).unwrap())
            .collect();
        assert_eq!(
            delays,
            vec![
                (1, Duration::from_millis(1000)),
                (2, Duration::from_millis(2000)),
                (3, Duration::from_millis(3000)),
                (4, Duration::from_millis(4000)),
                (5, Duration::from_millis(5000)),
            ]
        );
    }

    #[test]
    fn budget_is_exhausted_after_max_attempts() {
        let policy = ReconnectPolicy::new(2, Duration::from_millis(10));
        assert!(policy.next_attempt(1).is_some());
        assert_eq!(policy.next_attempt(2), None);
        assert_eq!(policy.next_attempt(7), None);
    }

    #[test]
    fn zero_budget_never_retries() {
        let policy = ReconnectPolicy::new(0, Duration::from_secs(1));
        assert_eq!(policy.next_attempt(0), None);
    }
}

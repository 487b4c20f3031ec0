//! Retry schedule for batch delivery, with exponential backoff

use std::time::Duration;

/// How a failed push is retried.
///
/// `max_attempts = None` retries forever: a batch is delayed, never dropped,
/// while the peer is down.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Upper bound for any single delay
    pub max_backoff: Duration,
    /// Backoff multiplier
    pub multiplier: f64,
    /// Total attempts per batch (None = unlimited)
    pub max_attempts: Option<usize>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// Retry forever without waiting between attempts
    pub fn immediate() -> Self {
        Self {
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
            max_attempts: None,
        }
    }

    /// Delay to wait after `failed` consecutive failed attempts, or `None`
    /// once the attempt budget is spent.
    pub fn delay_for(&self, failed: usize) -> Option<Duration> {
        if let Some(max_attempts) = self.max_attempts {
            if failed >= max_attempts {
                return None;
            }
        }

        let exponent = failed.saturating_sub(1).min(i32::MAX as usize) as i32;
        let delay = self.initial_backoff.as_nanos() as f64 * self.multiplier.max(1.0).powi(exponent);
        if !delay.is_finite() || delay >= self.max_backoff.as_nanos() as f64 {
            return Some(self.max_backoff);
        }
        Some(Duration::from_nanos(delay as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy {
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
            multiplier: 2.0,
            max_attempts: None,
        };

        assert_eq!(policy.delay_for(1), Some(Duration::from_millis(10)));
        assert_eq!(policy.delay_for(2), Some(Duration::from_millis(20)));
        assert_eq!(policy.delay_for(3), Some(Duration::from_millis(40)));
        assert_eq!(policy.delay_for(4), Some(Duration::from_millis(80)));
        // Should cap at max_backoff
        assert_eq!(policy.delay_for(5), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_for(10_000), Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: Some(3),
            ..Default::default()
        };

        assert!(policy.delay_for(1).is_some());
        assert!(policy.delay_for(2).is_some());
        assert_eq!(policy.delay_for(3), None);
        assert_eq!(policy.delay_for(4), None);
    }

    #[test]
    fn test_unbounded_by_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, None);
        assert_eq!(policy.delay_for(usize::MAX), Some(policy.max_backoff));
    }

    #[test]
    fn test_immediate() {
        let policy = RetryPolicy::immediate();
        assert_eq!(policy.delay_for(1), Some(Duration::ZERO));
        assert_eq!(policy.delay_for(50), Some(Duration::ZERO));
    }
}

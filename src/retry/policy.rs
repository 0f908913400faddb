use crate::config::RetryConfig;
use rand::Rng;
use std::time::Duration;

/// Exponential backoff with proportional jitter
///
/// After failure number n (1-based) the job waits `base * 2^n`, scaled by a random factor
/// in `[1 - jitter, 1 + jitter]` and capped at `max`. A server-provided
/// `Retry-After` is a floor, never shortened by jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub max: Duration,
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base: Duration::from_millis(config.base_backoff_ms),
            max: Duration::from_millis(config.max_backoff_ms),
            jitter: config.jitter,
        }
    }

    /// Returns true if a job that has failed `attempts` times may run again
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts <= self.max_attempts
    }

    /// Backoff before the retry that follows failure number `attempts`
    pub fn backoff(&self, attempts: u32, retry_after: Option<Duration>) -> Duration {
        let factor = if self.jitter > 0.0 {
            rand::thread_rng().gen_range((1.0 - self.jitter)..=(1.0 + self.jitter))
        } else {
            1.0
        };
        self.backoff_with_factor(attempts, factor, retry_after)
    }

    fn backoff_with_factor(
        &self,
        attempts: u32,
        factor: f64,
        retry_after: Option<Duration>,
    ) -> Duration {
        let exponent = attempts.min(31);
        let base_ms = self.base.as_millis() as f64;
        let max_ms = self.max.as_millis() as f64;

        let raw = base_ms * 2f64.powi(exponent as i32) * factor;
        let delay = Duration::from_millis(raw.clamp(0.0, max_ms) as u64);

        match retry_after {
            Some(floor) if floor > delay => floor,
            _ => delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base: Duration::from_millis(1000),
            max: Duration::from_millis(10_000),
            jitter: 0.25,
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = create_test_policy();
        assert_eq!(
            policy.backoff_with_factor(1, 1.0, None),
            Duration::from_millis(2000)
        );
        assert_eq!(
            policy.backoff_with_factor(2, 1.0, None),
            Duration::from_millis(4000)
        );
        assert_eq!(
            policy.backoff_with_factor(3, 1.0, None),
            Duration::from_millis(8000)
        );
    }

    #[test]
    fn test_backoff_capped() {
        let policy = create_test_policy();
        assert_eq!(
            policy.backoff_with_factor(8, 1.0, None),
            Duration::from_millis(10_000)
        );
        assert_eq!(
            policy.backoff_with_factor(u32::MAX, 1.25, None),
            Duration::from_millis(10_000)
        );
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = create_test_policy();
        for _ in 0..100 {
            let delay = policy.backoff(2, None);
            assert!(delay >= Duration::from_millis(3000), "{:?}", delay);
            assert!(delay <= Duration::from_millis(5000), "{:?}", delay);
        }
    }

    #[test]
    fn test_zero_jitter_is_deterministic() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..create_test_policy()
        };
        assert_eq!(policy.backoff(2, None), Duration::from_millis(4000));
    }

    #[test]
    fn test_retry_after_is_floor() {
        let policy = create_test_policy();
        assert_eq!(
            policy.backoff_with_factor(1, 0.75, Some(Duration::from_secs(30))),
            Duration::from_secs(30)
        );
        // A short Retry-After does not shorten the computed backoff
        assert_eq!(
            policy.backoff_with_factor(3, 1.0, Some(Duration::from_secs(1))),
            Duration::from_millis(8000)
        );
    }

    #[test]
    fn test_allows_retry() {
        let policy = create_test_policy();
        assert!(policy.allows_retry(1));
        assert!(policy.allows_retry(3));
        assert!(!policy.allows_retry(4));
    }
}

use crate::fetch::{FailureKind, FetchFailure};
use crate::retry::RetryPolicy;
use crate::storage::DeadLetterReason;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// What happens to a job after a failed attempt
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Return the job to pending after a backoff
    Retry {
        attempts: u32,
        backoff: Duration,
        next_eligible_at: DateTime<Utc>,
    },

    /// Move the job to the dead-letter set
    DeadLetter {
        attempts: u32,
        reason: DeadLetterReason,
    },

    /// Hand the job back untouched; the attempt does not count
    Release,
}

impl RetryDecision {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Retry { .. } => "retry",
            Self::DeadLetter { .. } => "dead-letter",
            Self::Release => "release",
        }
    }
}

/// The single authority on retry versus dead-letter
///
/// Transient and rate-limited failures count against the attempt ceiling;
/// permanent failures dead-letter at once; a cancelled attempt (shutdown) is
/// released without counting.
#[derive(Debug, Clone, Default)]
pub struct RetryCoordinator {
    policy: RetryPolicy,
}

impl RetryCoordinator {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Decides the fate of a job that has failed `previous_attempts` times
    /// before and has just failed again with `failure`
    pub fn decide(
        &self,
        previous_attempts: u32,
        failure: &FetchFailure,
        now: DateTime<Utc>,
    ) -> RetryDecision {
        let attempts = previous_attempts.saturating_add(1);

        match failure.kind {
            FailureKind::Cancelled => RetryDecision::Release,
            FailureKind::Permanent => RetryDecision::DeadLetter {
                attempts,
                reason: DeadLetterReason::NonRetryable,
            },
            FailureKind::Transient | FailureKind::RateLimited => {
                if !self.policy.allows_retry(attempts) {
                    return RetryDecision::DeadLetter {
                        attempts,
                        reason: DeadLetterReason::AttemptsExhausted,
                    };
                }

                let backoff = self.policy.backoff(attempts, failure.retry_after);
                let next_eligible_at = now
                    + chrono::Duration::from_std(backoff)
                        .unwrap_or_else(|_| chrono::Duration::seconds(0));

                RetryDecision::Retry {
                    attempts,
                    backoff,
                    next_eligible_at,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_coordinator() -> RetryCoordinator {
        RetryCoordinator::new(RetryPolicy {
            max_attempts: 3,
            base: Duration::from_millis(100),
            max: Duration::from_secs(60),
            jitter: 0.0,
        })
    }

    #[test]
    fn test_transient_failures_retry_then_dead_letter() {
        let coordinator = create_test_coordinator();
        let failure = FetchFailure::transient("HTTP 503");
        let now = Utc::now();

        for previous in 0..3 {
            match coordinator.decide(previous, &failure, now) {
                RetryDecision::Retry {
                    attempts,
                    next_eligible_at,
                    ..
                } => {
                    assert_eq!(attempts, previous + 1);
                    assert!(next_eligible_at > now);
                }
                other => panic!("expected retry, got {:?}", other),
            }
        }

        // Fourth failure crosses the ceiling
        assert_eq!(
            coordinator.decide(3, &failure, now),
            RetryDecision::DeadLetter {
                attempts: 4,
                reason: DeadLetterReason::AttemptsExhausted,
            }
        );
    }

    #[test]
    fn test_permanent_failure_dead_letters_immediately() {
        let coordinator = create_test_coordinator();
        let decision = coordinator.decide(0, &FetchFailure::permanent("HTTP 404"), Utc::now());
        assert_eq!(
            decision,
            RetryDecision::DeadLetter {
                attempts: 1,
                reason: DeadLetterReason::NonRetryable,
            }
        );
    }

    #[test]
    fn test_cancelled_is_released() {
        let coordinator = create_test_coordinator();
        let decision = coordinator.decide(2, &FetchFailure::cancelled("shutdown"), Utc::now());
        assert_eq!(decision, RetryDecision::Release);
    }

    #[test]
    fn test_rate_limited_honours_retry_after() {
        let coordinator = create_test_coordinator();
        let mut failure = FetchFailure::transient("HTTP 429");
        failure.kind = FailureKind::RateLimited;
        failure.retry_after = Some(Duration::from_secs(20));

        match coordinator.decide(0, &failure, Utc::now()) {
            RetryDecision::Retry { backoff, .. } => {
                assert_eq!(backoff, Duration::from_secs(20));
            }
            other => panic!("expected retry, got {:?}", other),
        }
    }

    #[test]
    fn test_backoff_grows_per_attempt() {
        let coordinator = create_test_coordinator();
        let failure = FetchFailure::transient("timeout");
        let backoffs: Vec<_> = (0..3)
            .map(|previous| match coordinator.decide(previous, &failure, Utc::now()) {
                RetryDecision::Retry { backoff, .. } => backoff,
                other => panic!("expected retry, got {:?}", other),
            })
            .collect();

        assert_eq!(
            backoffs,
            vec![
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800)
            ]
        );
    }

    #[test]
    fn test_decision_labels() {
        assert_eq!(RetryDecision::Release.label(), "release");
    }
}

//! Retry policy for transient failures
//!
//! The decision to retry is separated from the code that performs the call:
//! call sites ask [`RetryPolicy::decide`] after each failed attempt and either
//! sleep for the returned delay or give up. Only [`ErrorClass::Transient`]
//! failures are ever retried.

use sdk::errors::ErrorClass;
use std::time::Duration;

use crate::config::RetryConfig;

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `delay` and try again
    Retry { delay: Duration },
    /// Stop and surface the last error
    GiveUp,
}

/// Exponential backoff with a bounded number of attempts
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier,
        }
    }

    /// A policy that never waits, for tests and local loaders
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decide whether to retry after attempt number `attempt` (1-based)
    /// failed with an error of class `class`.
    pub fn decide(&self, class: ErrorClass, attempt: u32) -> RetryDecision {
        if class != ErrorClass::Transient || attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry {
            delay: self.delay_for(attempt),
        }
    }

    /// Backoff before attempt `attempt + 1`
    fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as i32;
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        Duration::from_millis(millis as u64).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::from_config(&RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 250,
            multiplier: 2.0,
        })
    }

    #[test]
    fn test_transient_retries_with_backoff() {
        let policy = policy();
        assert_eq!(
            policy.decide(ErrorClass::Transient, 1),
            RetryDecision::Retry {
                delay: Duration::from_millis(100)
            }
        );
        assert_eq!(
            policy.decide(ErrorClass::Transient, 2),
            RetryDecision::Retry {
                delay: Duration::from_millis(200)
            }
        );
        assert_eq!(policy.decide(ErrorClass::Transient, 3), RetryDecision::GiveUp);
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy::from_config(&RetryConfig {
            max_attempts: 10,
            initial_delay_ms: 100,
            max_delay_ms: 250,
            multiplier: 2.0,
        });
        assert_eq!(
            policy.decide(ErrorClass::Transient, 5),
            RetryDecision::Retry {
                delay: Duration::from_millis(250)
            }
        );
    }

    #[test]
    fn test_other_classes_never_retry() {
        let policy = policy();
        for class in [ErrorClass::Validation, ErrorClass::Permanent, ErrorClass::Fatal] {
            assert_eq!(policy.decide(class, 1), RetryDecision::GiveUp);
        }
    }
}

//! Processor retry and timeout configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::definition::{NodeRow, RetryPolicy};
use crate::processor::ProcessorError;

/// Retry schedule for transient processing failures.
///
/// Backoff grows exponentially from `initial_delay` by `multiplier` per
/// retry, capped at `max_delay`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries after the initial attempt.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Backoff growth factor.
    pub multiplier: f64,
    /// Ceiling on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    /// Returns the delay to sleep before retry number `retry` (zero-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(retry as i32);
        Duration::from_millis(millis as u64).min(self.max_delay)
    }
}

impl From<&RetryPolicy> for RetryConfig {
    fn from(policy: &RetryPolicy) -> Self {
        Self {
            max_attempts: policy.max_retries,
            initial_delay: Duration::from_millis((policy.delay_seconds * 1000.0) as u64),
            multiplier: policy.multiplier,
            max_delay: Duration::from_millis((policy.max_delay_seconds * 1000.0) as u64),
        }
    }
}

/// Effective per-invocation processor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Budget for a single `process` attempt.
    pub timeout: Duration,
    /// Retry schedule for transient failures.
    pub retry: RetryConfig,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }
}

impl ProcessorConfig {
    /// Derives the effective config from a node row: the node's timeout and
    /// retry policy override the defaults.
    pub fn for_node(node: &NodeRow) -> Self {
        Self {
            timeout: Duration::from_secs(node.timeout_seconds),
            retry: RetryConfig::from(&node.retry_policy),
        }
    }

    /// Returns whether the given error should be retried under this config.
    pub fn should_retry(&self, error: &ProcessorError) -> bool {
        self.retry.max_attempts > 0 && error.is_retryable()
    }
}

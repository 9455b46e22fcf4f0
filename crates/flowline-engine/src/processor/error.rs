//! Processor error taxonomy.

use std::time::Duration;

use thiserror::Error;

use crate::definition::NodeKind;

/// Errors raised by a processor during any lifecycle phase.
///
/// The taxonomy decides retry behavior: only [`ProcessorError::Execution`]
/// with `retryable: true` is eligible for retry. Validation, configuration,
/// and timeout failures are definitive and fail the invocation immediately.
#[derive(Debug, Error)]
pub enum ProcessorError {
    /// The input failed pre-process validation.
    #[error("input validation failed: {0}")]
    Validation(String),

    /// The node configuration is unusable.
    #[error("invalid processor configuration: {0}")]
    Configuration(String),

    /// The core logic failed. `retryable` marks transient faults.
    #[error("processing failed: {message}")]
    Execution {
        /// What went wrong.
        message: String,
        /// Whether another attempt could reasonably succeed.
        retryable: bool,
    },

    /// A process attempt exceeded its time budget.
    #[error("processing timed out after {timeout:?}")]
    Timeout {
        /// The budget that was exceeded.
        timeout: Duration,
    },

    /// No processor is registered for the node kind.
    #[error("no processor registered for node kind {kind}")]
    NotFound {
        /// The unhandled kind.
        kind: NodeKind,
    },

    /// Input or output could not be (de)serialized.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProcessorError {
    /// Creates a retryable execution error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable execution error.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns whether another attempt could reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Execution { retryable: true, .. })
    }

    /// Stable lowercase label for metrics and logs.
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Configuration(_) => "configuration",
            Self::Execution { .. } => "execution",
            Self::Timeout { .. } => "timeout",
            Self::NotFound { .. } => "not_found",
            Self::Serialization(_) => "serialization",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_execution_is_retryable() {
        assert!(ProcessorError::transient("reset").is_retryable());
        assert!(!ProcessorError::permanent("bad state").is_retryable());
        assert!(!ProcessorError::Validation("nope".into()).is_retryable());
        assert!(
            !ProcessorError::Timeout {
                timeout: Duration::from_secs(1)
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(ProcessorError::transient("x").kind_label(), "execution");
        assert_eq!(
            ProcessorError::NotFound {
                kind: NodeKind::Tool
            }
            .kind_label(),
            "not_found"
        );
    }
}

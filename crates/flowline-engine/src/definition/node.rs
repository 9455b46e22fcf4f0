//! Node rows, node kinds, positions, and retry policies.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumIter, EnumString};
use uuid::Uuid;

use super::{NodeId, WorkflowId};

/// Defines the behavioral kind of a workflow node.
///
/// The executor resolves a processor for each kind through the
/// [`ProcessorRegistry`](crate::processor::ProcessorRegistry).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[derive(Serialize, Deserialize, Display, EnumIter, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NodeKind {
    /// Entry point of a workflow; receives the run input.
    Trigger,
    /// Invokes an external tool referenced by `tool_id`.
    Tool,
    /// Invokes an agent referenced by `agent_id`.
    Agent,
    /// Routes execution by evaluating its outgoing edge conditions.
    Condition,
    /// Reshapes data between incompatible node outputs and inputs.
    Adapter,
    /// Fan-out marker; successors execute concurrently.
    Parallel,
    /// Merges the outputs of its predecessors.
    Aggregator,
}

impl NodeKind {
    /// Returns whether this kind is a trigger.
    #[inline]
    pub fn is_trigger(self) -> bool {
        matches!(self, NodeKind::Trigger)
    }

    /// Returns whether this kind is a condition.
    #[inline]
    pub fn is_condition(self) -> bool {
        matches!(self, NodeKind::Condition)
    }

    /// Returns whether this kind may legitimately end a branch.
    ///
    /// Terminal kinds are exempt from dead-end warnings during connectivity
    /// validation: an adapter or aggregator with no outgoing edge is a valid
    /// sink for its branch.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, NodeKind::Adapter | NodeKind::Aggregator)
    }
}

/// UI canvas coordinates of a node.
///
/// Ignored by engine logic, but echoed into validation error details so the
/// UI can point at the implicated nodes.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// Horizontal coordinate.
    pub x: f64,
    /// Vertical coordinate.
    pub y: f64,
}

impl Position {
    /// Creates a new position.
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Retry policy for a node's execution attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt (0 = no retries).
    pub max_retries: u32,
    /// Initial delay before the first retry, in seconds.
    pub delay_seconds: f64,
    /// Exponential backoff multiplier applied per attempt.
    pub multiplier: f64,
    /// Upper bound on any single backoff delay, in seconds.
    pub max_delay_seconds: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay_seconds: 1.0,
            multiplier: 2.0,
            max_delay_seconds: 60.0,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with no retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            delay_seconds: 0.0,
            multiplier: 1.0,
            max_delay_seconds: 0.0,
        }
    }

    /// Calculates the backoff delay for a given zero-based attempt number.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let millis = (self.delay_seconds * 1000.0) * self.multiplier.powi(attempt as i32);
        let capped = millis.min(self.max_delay_seconds * 1000.0);
        Duration::from_millis(capped.max(0.0) as u64)
    }
}

/// A persisted workflow node, consumed read-only by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRow {
    /// Node identifier.
    pub id: NodeId,
    /// Owning workflow.
    pub workflow_id: WorkflowId,
    /// Behavioral kind of this node.
    pub kind: NodeKind,
    /// Display name.
    pub name: String,
    /// Free-form node configuration.
    #[serde(default)]
    pub config: Value,
    /// Declared input schema, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    /// Declared output schema, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    /// Referenced tool, for tool nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<Uuid>,
    /// Referenced agent, for agent nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<Uuid>,
    /// Per-attempt execution timeout, in seconds.
    pub timeout_seconds: u64,
    /// Retry policy for failed attempts.
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    /// UI canvas position.
    #[serde(default)]
    pub position: Position,
}

impl NodeRow {
    /// Creates a node row with defaults suitable for construction in code.
    pub fn new(workflow_id: WorkflowId, kind: NodeKind, name: impl Into<String>) -> Self {
        Self {
            id: NodeId::new(),
            workflow_id,
            kind,
            name: name.into(),
            config: Value::Null,
            input_schema: None,
            output_schema: None,
            tool_id: None,
            agent_id: None,
            timeout_seconds: 30,
            retry_policy: RetryPolicy::default(),
            position: Position::default(),
        }
    }

    /// Sets the node configuration.
    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    /// Sets the UI position.
    pub fn with_position(mut self, x: f64, y: f64) -> Self {
        self.position = Position::new(x, y);
        self
    }

    /// Sets the retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Sets the per-attempt timeout.
    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Returns the per-attempt timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_serde_snake_case() {
        let json = serde_json::to_string(&NodeKind::Aggregator).unwrap();
        assert_eq!(json, "\"aggregator\"");

        let kind: NodeKind = serde_json::from_str("\"trigger\"").unwrap();
        assert_eq!(kind, NodeKind::Trigger);
    }

    #[test]
    fn test_terminal_kinds() {
        assert!(NodeKind::Adapter.is_terminal());
        assert!(NodeKind::Aggregator.is_terminal());
        assert!(!NodeKind::Tool.is_terminal());
        assert!(!NodeKind::Trigger.is_terminal());
    }

    #[test]
    fn test_backoff_progression() {
        let policy = RetryPolicy {
            max_retries: 3,
            delay_seconds: 1.0,
            multiplier: 2.0,
            max_delay_seconds: 60.0,
        };

        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
    }

    #[test]
    fn test_backoff_capped() {
        let policy = RetryPolicy {
            max_retries: 10,
            delay_seconds: 1.0,
            multiplier: 10.0,
            max_delay_seconds: 5.0,
        };

        assert_eq!(policy.backoff(3), Duration::from_secs(5));
    }
}

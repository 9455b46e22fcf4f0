//! Edge rows connecting workflow nodes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{EdgeId, NodeId, WorkflowId};

/// A persisted workflow edge, consumed read-only by the engine.
///
/// Handles distinguish multiple outputs or inputs on the same node (e.g. a
/// condition node's `true`/`false` branches). The validator enforces
/// uniqueness of `(source, target, source_handle, target_handle)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeRow {
    /// Edge identifier.
    pub id: EdgeId,
    /// Owning workflow.
    pub workflow_id: WorkflowId,
    /// Source node.
    pub source_node_id: NodeId,
    /// Target node.
    pub target_node_id: NodeId,
    /// Output handle on the source node, if routed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    /// Input handle on the target node, if routed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
    /// Condition payload evaluated when the source is a condition node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Value>,
    /// Relative priority among sibling edges.
    #[serde(default)]
    pub priority: i32,
    /// Display label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl EdgeRow {
    /// Creates an edge between two nodes with defaults.
    pub fn new(workflow_id: WorkflowId, source: NodeId, target: NodeId) -> Self {
        Self {
            id: EdgeId::new(),
            workflow_id,
            source_node_id: source,
            target_node_id: target,
            source_handle: None,
            target_handle: None,
            condition: None,
            priority: 0,
            label: None,
        }
    }

    /// Sets the source handle.
    pub fn with_source_handle(mut self, handle: impl Into<String>) -> Self {
        self.source_handle = Some(handle.into());
        self
    }

    /// Sets the target handle.
    pub fn with_target_handle(mut self, handle: impl Into<String>) -> Self {
        self.target_handle = Some(handle.into());
        self
    }

    /// Sets the condition payload.
    pub fn with_condition(mut self, condition: Value) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Returns the deduplication key for this edge.
    ///
    /// Two edges with the same key are duplicates from the validator's
    /// perspective, regardless of id, priority, or label.
    pub fn dedup_key(&self) -> (NodeId, NodeId, Option<&str>, Option<&str>) {
        (
            self.source_node_id,
            self.target_node_id,
            self.source_handle.as_deref(),
            self.target_handle.as_deref(),
        )
    }

    /// Returns whether this edge loops a node back onto itself.
    pub fn is_self_loop(&self) -> bool {
        self.source_node_id == self.target_node_id
    }
}

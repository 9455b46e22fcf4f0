//! Validation result model.
//!
//! Results are immutable once produced and cached by `(workflow id, version)`.
//! The error detail contract is stable and consumed by the workflow editor
//! UI: every issue implicating nodes carries a `node_positions` detail map so
//! the editor can point at them.

use std::collections::HashMap;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use strum::{Display, EnumString};

use crate::definition::{EdgeId, NodeId, Position, WorkflowId};

/// Error codes emitted by the validator.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[derive(Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    /// The graph contains a cycle.
    CycleDetected,
    /// An edge connects a node to itself.
    SelfLoop,
    /// Two or more edges share source, target, and handles.
    DuplicateEdge,
    /// A node has no edges at all.
    DanglingNode,
    /// A node cannot be reached from any trigger.
    UnreachableNode,
    /// The workflow has no trigger node.
    MissingTrigger,
    /// Node or edge count exceeds the configured ceiling.
    GraphTooLarge,
    /// An edge references a node that does not exist.
    MissingNode,
    /// A tool node does not reference a tool.
    MissingToolReference,
    /// An agent node does not reference an agent.
    MissingAgentReference,
    /// A config placeholder references an undeclared variable.
    UndefinedVariable,
    /// Adjacent node schemas are incompatible.
    SchemaMismatch,
    /// Validation exceeded its timeout budget.
    ValidationTimeout,
}

/// Warning codes emitted by the validator.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[derive(Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum WarningCode {
    /// A non-terminal node has no outgoing edges.
    DeadEnd,
}

/// A single validation finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue<C> {
    /// Typed issue code.
    pub code: C,
    /// Human-readable message.
    pub message: String,
    /// Implicated nodes, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_ids: Vec<NodeId>,
    /// Implicated edges, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edge_ids: Vec<EdgeId>,
    /// Additional structured details. Contains `node_positions` whenever
    /// `node_ids` is non-empty.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
}

impl<C> ValidationIssue<C> {
    /// Creates an issue with no implicated nodes or edges.
    pub fn new(code: C, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            node_ids: Vec::new(),
            edge_ids: Vec::new(),
            details: Map::new(),
        }
    }

    /// Implicates nodes and records their canvas positions.
    ///
    /// Positions are looked up per node; nodes absent from the map are still
    /// implicated but get no position hint.
    pub fn with_nodes(mut self, nodes: &[NodeId], positions: &HashMap<NodeId, Position>) -> Self {
        let hints: Map<String, Value> = nodes
            .iter()
            .filter_map(|id| {
                positions
                    .get(id)
                    .map(|p| (id.to_string(), json!({ "x": p.x, "y": p.y })))
            })
            .collect();

        self.node_ids = nodes.to_vec();
        self.details.insert("node_positions".into(), hints.into());
        self
    }

    /// Implicates edges.
    pub fn with_edges(mut self, edges: Vec<EdgeId>) -> Self {
        self.edge_ids = edges;
        self
    }

    /// Adds a structured detail entry.
    pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }
}

/// Topology summary of a valid workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologySummary {
    /// Nodes grouped by topological level; each level may run concurrently.
    pub levels: Vec<Vec<NodeId>>,
    /// Number of levels.
    pub level_count: usize,
    /// Width of the widest level.
    pub max_parallelism: usize,
    /// Longest dependency chain, in order.
    pub critical_path: Vec<NodeId>,
    /// Length of the critical path, in nodes.
    pub critical_path_length: usize,
}

impl TopologySummary {
    /// Builds a summary from precomputed levels and critical path.
    pub fn new(levels: Vec<Vec<NodeId>>, critical_path: Vec<NodeId>) -> Self {
        let level_count = levels.len();
        let max_parallelism = levels.iter().map(Vec::len).max().unwrap_or(0);
        let critical_path_length = critical_path.len();
        Self {
            levels,
            level_count,
            max_parallelism,
            critical_path,
            critical_path_length,
        }
    }
}

/// The outcome of validating one workflow version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Whether the workflow passed all configured checks.
    pub valid: bool,
    /// Validated workflow.
    pub workflow_id: WorkflowId,
    /// Validated definition version.
    pub version: i64,
    /// Fatal findings.
    pub errors: Vec<ValidationIssue<ValidationCode>>,
    /// Non-fatal findings.
    pub warnings: Vec<ValidationIssue<WarningCode>>,
    /// Topology summary, present when the graph is acyclic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topology: Option<TopologySummary>,
    /// Number of nodes validated.
    pub node_count: usize,
    /// Number of edges validated.
    pub edge_count: usize,
    /// Wall-clock validation duration in milliseconds.
    pub duration_ms: u64,
    /// Whether this result was served from the cache.
    pub cached: bool,
    /// When validation ran.
    pub validated_at: Timestamp,
}

impl ValidationResult {
    /// Creates an empty, valid result for the given workflow version.
    pub fn new(workflow_id: WorkflowId, version: i64) -> Self {
        Self {
            valid: true,
            workflow_id,
            version,
            errors: Vec::new(),
            warnings: Vec::new(),
            topology: None,
            node_count: 0,
            edge_count: 0,
            duration_ms: 0,
            cached: false,
            validated_at: Timestamp::now(),
        }
    }

    /// Appends an error and marks the result invalid.
    pub fn push_error(&mut self, issue: ValidationIssue<ValidationCode>) {
        self.valid = false;
        self.errors.push(issue);
    }

    /// Appends a warning; warnings do not affect validity.
    pub fn push_warning(&mut self, issue: ValidationIssue<WarningCode>) {
        self.warnings.push(issue);
    }

    /// Returns whether any error carries the given code.
    pub fn has_error(&self, code: ValidationCode) -> bool {
        self.errors.iter().any(|issue| issue.code == code)
    }
}

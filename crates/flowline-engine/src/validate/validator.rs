//! Multi-level DAG validator.
//!
//! Validation runs as a pipeline of checks over a materialized
//! [`Graph`](crate::graph::Graph): structural (always), connectivity
//! ([`ValidationLevel::Standard`] and up), node compatibility and data flow
//! ([`ValidationLevel::Strict`]). Checks append to shared error/warning lists
//! and never short-circuit, with one exception: a detected cycle ends the run
//! immediately, since no further check is meaningful on a cyclic graph.

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use derive_builder::Builder;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use strum::{Display, EnumString};

use crate::definition::{EdgeRow, NodeId, NodeKind, NodeRow, Position, WorkflowRow};
use crate::error::{EngineError, EngineResult};
use crate::graph::{Graph, algo};
use crate::validate::{
    TopologySummary, ValidationCache, ValidationCode, ValidationIssue, ValidationResult,
    WarningCode,
};

/// Tracing target for validator operations.
const TRACING_TARGET: &str = "flowline_engine::validate";

/// How deep validation goes.
///
/// Levels are cumulative: each one runs everything the previous level runs.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
#[derive(Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ValidationLevel {
    /// Structural checks only (sizes, cycles, duplicates, self-loops).
    Basic,
    /// Basic plus connectivity (triggers, reachability, dead ends).
    Standard,
    /// Standard plus node compatibility and data-flow checks.
    Strict,
}

/// Configuration for the [`DagValidator`].
#[derive(Debug, Clone, Builder)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct ValidatorConfig {
    /// Maximum number of nodes accepted in a single workflow.
    #[builder(default = "500")]
    pub max_nodes: usize,

    /// Maximum number of edges accepted in a single workflow.
    #[builder(default = "2000")]
    pub max_edges: usize,

    /// Overall validation timeout budget.
    #[builder(default = "Duration::from_secs(30)")]
    pub timeout: Duration,

    /// Validation depth.
    #[builder(default = "ValidationLevel::Strict")]
    pub level: ValidationLevel,
}

impl ValidatorConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(max) = self.max_nodes {
            if max == 0 {
                return Err("max_nodes must be at least 1".into());
            }
        }
        Ok(())
    }
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_nodes: 500,
            max_edges: 2000,
            timeout: Duration::from_secs(30),
            level: ValidationLevel::Strict,
        }
    }
}

/// Validates workflow definitions before execution.
#[derive(Debug)]
pub struct DagValidator {
    config: ValidatorConfig,
    cache: ValidationCache,
}

impl DagValidator {
    /// Creates a validator with the given configuration and result cache.
    pub fn new(config: ValidatorConfig, cache: ValidationCache) -> Self {
        Self { config, cache }
    }

    /// Creates a validator with default configuration and an in-process cache.
    pub fn with_defaults() -> Self {
        Self::new(ValidatorConfig::default(), ValidationCache::in_memory())
    }

    /// Returns the validator configuration.
    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Validates a workflow definition.
    ///
    /// Consults the result cache by `(workflow id, version)` first; on a miss
    /// runs all configured checks under the timeout budget and caches the
    /// completed result. A budget overrun yields an uncached result carrying
    /// a single [`ValidationCode::ValidationTimeout`] error; it is never an
    /// `Err` and never cached.
    pub async fn validate(
        &self,
        workflow: &WorkflowRow,
        nodes: &[NodeRow],
        edges: &[EdgeRow],
    ) -> ValidationResult {
        let started = std::time::Instant::now();

        if let Some(hit) = self.cache.get(workflow.id, workflow.version).await {
            tracing::debug!(
                target: TRACING_TARGET,
                workflow_id = %workflow.id,
                version = workflow.version,
                "Serving validation result from cache"
            );
            return hit;
        }

        let outcome = tokio::time::timeout(
            self.config.timeout,
            self.run_checks(workflow, nodes, edges),
        )
        .await;

        // The async timeout only fires at an await point, so a pipeline that
        // finishes its final stretch past the deadline still comes back
        // `Ok`. The elapsed check makes the budget bind either way.
        let mut result = match outcome {
            Ok(result) if started.elapsed() < self.config.timeout => result,
            _ => {
                tracing::warn!(
                    target: TRACING_TARGET,
                    workflow_id = %workflow.id,
                    version = workflow.version,
                    budget_ms = self.config.timeout.as_millis() as u64,
                    "Validation exceeded its timeout budget"
                );
                let mut result = ValidationResult::new(workflow.id, workflow.version);
                result.push_error(ValidationIssue::new(
                    ValidationCode::ValidationTimeout,
                    format!(
                        "validation exceeded its {}ms budget",
                        self.config.timeout.as_millis()
                    ),
                ));
                result.node_count = nodes.len();
                result.edge_count = edges.len();
                result.duration_ms = started.elapsed().as_millis() as u64;
                return result;
            }
        };

        result.duration_ms = started.elapsed().as_millis() as u64;

        tracing::debug!(
            target: TRACING_TARGET,
            workflow_id = %workflow.id,
            version = workflow.version,
            valid = result.valid,
            errors = result.errors.len(),
            warnings = result.warnings.len(),
            duration_ms = result.duration_ms,
            "Validation completed"
        );

        // Completed results are deterministic for a given version, so both
        // valid and invalid outcomes are cacheable.
        self.cache.set(&result).await;
        result
    }

    /// Runs the check pipeline without cache or timeout handling.
    async fn run_checks(
        &self,
        workflow: &WorkflowRow,
        nodes: &[NodeRow],
        edges: &[EdgeRow],
    ) -> ValidationResult {
        let mut result = ValidationResult::new(workflow.id, workflow.version);
        result.node_count = nodes.len();
        result.edge_count = edges.len();

        let positions: HashMap<NodeId, Position> =
            nodes.iter().map(|node| (node.id, node.position)).collect();
        let by_id: HashMap<NodeId, &NodeRow> =
            nodes.iter().map(|node| (node.id, node)).collect();

        self.check_size_limits(nodes, edges, &mut result);

        // Structural pass also materializes the graph, excluding edges that
        // cannot participate (missing endpoints, self-loops).
        let graph = self.check_structure(nodes, edges, &positions, &mut result);

        let Some(graph) = graph else {
            // Cycle detected; no further check is meaningful.
            return result;
        };

        self.check_duplicate_edges(edges, &positions, &mut result);
        tokio::task::yield_now().await;

        if self.config.level >= ValidationLevel::Standard {
            self.check_connectivity(nodes, &graph, &positions, &mut result);
            tokio::task::yield_now().await;
        }

        if self.config.level >= ValidationLevel::Strict {
            self.check_node_compatibility(nodes, &positions, &mut result);
            self.check_data_flow(workflow, nodes, edges, &by_id, &positions, &mut result);
            tokio::task::yield_now().await;
        }

        if let Some(levels) = algo::topological_levels(&graph) {
            let (critical_path, _) = algo::critical_path(&graph);
            result.topology = Some(TopologySummary::new(levels, critical_path));
        }

        result
    }

    fn check_size_limits(
        &self,
        nodes: &[NodeRow],
        edges: &[EdgeRow],
        result: &mut ValidationResult,
    ) {
        if nodes.len() > self.config.max_nodes {
            result.push_error(
                ValidationIssue::new(
                    ValidationCode::GraphTooLarge,
                    format!(
                        "workflow has {} nodes, limit is {}",
                        nodes.len(),
                        self.config.max_nodes
                    ),
                )
                .with_detail("node_count", json!(nodes.len()))
                .with_detail("max_nodes", json!(self.config.max_nodes)),
            );
        }

        if edges.len() > self.config.max_edges {
            result.push_error(
                ValidationIssue::new(
                    ValidationCode::GraphTooLarge,
                    format!(
                        "workflow has {} edges, limit is {}",
                        edges.len(),
                        self.config.max_edges
                    ),
                )
                .with_detail("edge_count", json!(edges.len()))
                .with_detail("max_edges", json!(self.config.max_edges)),
            );
        }
    }

    /// Structural checks: missing endpoints, self-loops, cycles.
    ///
    /// Returns the materialized graph, or `None` when a cycle was found and
    /// validation should stop.
    fn check_structure(
        &self,
        nodes: &[NodeRow],
        edges: &[EdgeRow],
        positions: &HashMap<NodeId, Position>,
        result: &mut ValidationResult,
    ) -> Option<Graph<NodeId>> {
        let mut graph = Graph::new();
        for node in nodes {
            graph.add_node(node.id);
        }

        for edge in edges {
            let mut endpoints_ok = true;
            for endpoint in [edge.source_node_id, edge.target_node_id] {
                if !graph.has_node(endpoint) {
                    endpoints_ok = false;
                    result.push_error(
                        ValidationIssue::new(
                            ValidationCode::MissingNode,
                            format!("edge {} references missing node {endpoint}", edge.id),
                        )
                        .with_edges(vec![edge.id])
                        .with_detail("missing_node_id", json!(endpoint)),
                    );
                }
            }
            if !endpoints_ok {
                continue;
            }

            if edge.is_self_loop() {
                result.push_error(
                    ValidationIssue::new(
                        ValidationCode::SelfLoop,
                        format!("edge {} connects node {} to itself", edge.id, edge.source_node_id),
                    )
                    .with_nodes(&[edge.source_node_id], positions)
                    .with_edges(vec![edge.id]),
                );
                continue;
            }

            graph.add_edge(edge.source_node_id, edge.target_node_id);
        }

        if let Some(cycle) = algo::detect_cycle(&graph) {
            let rendered = cycle
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(" -> ");
            result.push_error(
                ValidationIssue::new(
                    ValidationCode::CycleDetected,
                    format!("workflow graph contains a cycle: {rendered}"),
                )
                .with_nodes(&cycle, positions)
                .with_detail("cycle", json!(cycle)),
            );
            return None;
        }

        Some(graph)
    }

    fn check_duplicate_edges(
        &self,
        edges: &[EdgeRow],
        positions: &HashMap<NodeId, Position>,
        result: &mut ValidationResult,
    ) {
        let mut groups: HashMap<_, Vec<&EdgeRow>> = HashMap::new();
        for edge in edges {
            groups.entry(edge.dedup_key()).or_default().push(edge);
        }

        let mut duplicates: Vec<_> = groups
            .into_values()
            .filter(|group| group.len() > 1)
            .collect();
        // Deterministic output ordering regardless of hash state.
        duplicates.sort_by_key(|group| group[0].id);

        for group in duplicates {
            let first = group[0];
            result.push_error(
                ValidationIssue::new(
                    ValidationCode::DuplicateEdge,
                    format!(
                        "{} edges duplicate the connection {} -> {}",
                        group.len(),
                        first.source_node_id,
                        first.target_node_id
                    ),
                )
                .with_nodes(&[first.source_node_id, first.target_node_id], positions)
                .with_edges(group.iter().map(|edge| edge.id).collect()),
            );
        }
    }

    fn check_connectivity(
        &self,
        nodes: &[NodeRow],
        graph: &Graph<NodeId>,
        positions: &HashMap<NodeId, Position>,
        result: &mut ValidationResult,
    ) {
        let triggers: Vec<NodeId> = nodes
            .iter()
            .filter(|node| node.kind.is_trigger())
            .map(|node| node.id)
            .collect();

        if triggers.is_empty() {
            result.push_error(ValidationIssue::new(
                ValidationCode::MissingTrigger,
                "workflow has no trigger node",
            ));
        }

        let dangling = algo::dangling_nodes(graph);
        for node in nodes.iter().filter(|node| dangling.contains(&node.id)) {
            result.push_error(
                ValidationIssue::new(
                    ValidationCode::DanglingNode,
                    format!("node '{}' has no connections", node.name),
                )
                .with_nodes(&[node.id], positions),
            );
        }

        let unreachable = algo::unreachable_from(graph, &triggers);
        for node in nodes.iter().filter(|node| {
            unreachable.contains(&node.id)
                && !dangling.contains(&node.id)
                && !node.kind.is_trigger()
        }) {
            result.push_error(
                ValidationIssue::new(
                    ValidationCode::UnreachableNode,
                    format!("node '{}' is not reachable from any trigger", node.name),
                )
                .with_nodes(&[node.id], positions),
            );
        }

        // Dead ends are advisory: a branch that stops at a non-terminal node
        // is suspicious but executable. Single-node workflows are exempt.
        if graph.node_count() > 1 {
            let dead_ends = algo::dead_end_nodes(graph);
            for node in nodes.iter().filter(|node| {
                dead_ends.contains(&node.id)
                    && !node.kind.is_terminal()
                    && !dangling.contains(&node.id)
            }) {
                result.push_warning(
                    ValidationIssue::new(
                        WarningCode::DeadEnd,
                        format!("node '{}' has no outgoing edges", node.name),
                    )
                    .with_nodes(&[node.id], positions),
                );
            }
        }
    }

    fn check_node_compatibility(
        &self,
        nodes: &[NodeRow],
        positions: &HashMap<NodeId, Position>,
        result: &mut ValidationResult,
    ) {
        for node in nodes {
            match node.kind {
                NodeKind::Tool if node.tool_id.is_none() => {
                    result.push_error(
                        ValidationIssue::new(
                            ValidationCode::MissingToolReference,
                            format!("tool node '{}' does not reference a tool", node.name),
                        )
                        .with_nodes(&[node.id], positions),
                    );
                }
                NodeKind::Agent if node.agent_id.is_none() => {
                    result.push_error(
                        ValidationIssue::new(
                            ValidationCode::MissingAgentReference,
                            format!("agent node '{}' does not reference an agent", node.name),
                        )
                        .with_nodes(&[node.id], positions),
                    );
                }
                _ => {}
            }
        }
    }

    fn check_data_flow(
        &self,
        workflow: &WorkflowRow,
        nodes: &[NodeRow],
        edges: &[EdgeRow],
        by_id: &HashMap<NodeId, &NodeRow>,
        positions: &HashMap<NodeId, Position>,
        result: &mut ValidationResult,
    ) {
        // Placeholder roots resolved by the runtime context itself; anything
        // else must be a declared workflow variable.
        const IMPLICIT_ROOTS: [&str; 3] = ["input", "nodes", "variables"];

        for node in nodes {
            let mut placeholders = Vec::new();
            collect_placeholders(&node.config, &mut placeholders);

            for root in placeholders {
                if IMPLICIT_ROOTS.contains(&root.as_str()) || workflow.variables.contains_key(&root)
                {
                    continue;
                }
                result.push_error(
                    ValidationIssue::new(
                        ValidationCode::UndefinedVariable,
                        format!(
                            "node '{}' references undeclared variable '{}'",
                            node.name, root
                        ),
                    )
                    .with_nodes(&[node.id], positions)
                    .with_detail("variable", json!(root)),
                );
            }
        }

        for edge in edges {
            let (Some(source), Some(target)) = (
                by_id.get(&edge.source_node_id),
                by_id.get(&edge.target_node_id),
            ) else {
                continue;
            };
            let (Some(output), Some(input)) = (&source.output_schema, &target.input_schema) else {
                continue;
            };

            if let Some((expected, actual)) = schema_mismatch(output, input) {
                result.push_error(
                    ValidationIssue::new(
                        ValidationCode::SchemaMismatch,
                        format!(
                            "output of '{}' ({expected}) is incompatible with input of '{}' ({actual})",
                            source.name, target.name
                        ),
                    )
                    .with_nodes(&[source.id, target.id], positions)
                    .with_edges(vec![edge.id])
                    .with_detail("output_type", json!(expected))
                    .with_detail("input_type", json!(actual)),
                );
            }
        }
    }

    /// Pre-commit check for a single candidate edge.
    ///
    /// Covers self-loop, missing endpoints, duplication against existing
    /// edges, and the cycle the candidate would close. Pure over its inputs,
    /// so repeated calls with the same candidate yield the same verdict.
    pub fn validate_edge_addition(
        &self,
        nodes: &[NodeRow],
        edges: &[EdgeRow],
        candidate: &EdgeRow,
    ) -> Vec<ValidationIssue<ValidationCode>> {
        let positions: HashMap<NodeId, Position> =
            nodes.iter().map(|node| (node.id, node.position)).collect();
        let graph = build_graph(nodes, edges);

        let mut issues = Vec::new();
        edge_addition_checks(&graph, edges, candidate, &positions, &mut issues);
        issues
    }

    /// Pre-commit check for a batch of candidate edges.
    ///
    /// Candidates are applied one at a time to a deep copy of the graph, so
    /// each candidate is checked against everything accepted before it
    /// (including earlier candidates in the same batch).
    pub fn validate_batch_edges(
        &self,
        nodes: &[NodeRow],
        edges: &[EdgeRow],
        candidates: &[EdgeRow],
    ) -> Vec<ValidationIssue<ValidationCode>> {
        let positions: HashMap<NodeId, Position> =
            nodes.iter().map(|node| (node.id, node.position)).collect();

        // Deep copy of the persisted graph; candidates mutate only the copy.
        let base = build_graph(nodes, edges);
        let mut speculative = base.clone();
        let mut accepted: Vec<EdgeRow> = edges.to_vec();
        let mut issues = Vec::new();

        for candidate in candidates {
            let before = issues.len();
            edge_addition_checks(&speculative, &accepted, candidate, &positions, &mut issues);

            if issues.len() == before {
                speculative.add_edge(candidate.source_node_id, candidate.target_node_id);
                accepted.push(candidate.clone());
            }
        }

        issues
    }

    /// Read-only cycle probe, optionally with speculative extra edges.
    pub fn check_cycle(
        &self,
        nodes: &[NodeRow],
        edges: &[EdgeRow],
        proposed: &[(NodeId, NodeId)],
    ) -> Option<Vec<NodeId>> {
        let mut graph = build_graph(nodes, edges);
        for &(source, target) in proposed {
            graph.add_edge(source, target);
        }
        algo::detect_cycle(&graph)
    }

    /// Computes the topology of a workflow definition.
    ///
    /// Fails with [`EngineError::CycleDetected`] when the graph is not a DAG.
    pub fn topology(&self, nodes: &[NodeRow], edges: &[EdgeRow]) -> EngineResult<TopologySummary> {
        let graph = build_graph(nodes, edges);

        let Some(levels) = algo::topological_levels(&graph) else {
            let path = algo::detect_cycle(&graph).unwrap_or_default();
            return Err(EngineError::CycleDetected { path });
        };

        let (critical_path, _) = algo::critical_path(&graph);
        Ok(TopologySummary::new(levels, critical_path))
    }
}

/// Builds a graph from rows, skipping edges whose endpoints are missing.
pub(crate) fn build_graph(nodes: &[NodeRow], edges: &[EdgeRow]) -> Graph<NodeId> {
    let mut graph = Graph::new();
    for node in nodes {
        graph.add_node(node.id);
    }
    for edge in edges {
        if graph.has_node(edge.source_node_id) && graph.has_node(edge.target_node_id) {
            graph.add_edge(edge.source_node_id, edge.target_node_id);
        }
    }
    graph
}

fn edge_addition_checks(
    graph: &Graph<NodeId>,
    existing: &[EdgeRow],
    candidate: &EdgeRow,
    positions: &HashMap<NodeId, Position>,
    issues: &mut Vec<ValidationIssue<ValidationCode>>,
) {
    if candidate.is_self_loop() {
        issues.push(
            ValidationIssue::new(
                ValidationCode::SelfLoop,
                format!("edge would connect node {} to itself", candidate.source_node_id),
            )
            .with_nodes(&[candidate.source_node_id], positions),
        );
        return;
    }

    let mut endpoints_ok = true;
    for endpoint in [candidate.source_node_id, candidate.target_node_id] {
        if !graph.has_node(endpoint) {
            endpoints_ok = false;
            issues.push(
                ValidationIssue::new(
                    ValidationCode::MissingNode,
                    format!("edge references missing node {endpoint}"),
                )
                .with_detail("missing_node_id", json!(endpoint)),
            );
        }
    }
    if !endpoints_ok {
        return;
    }

    if existing
        .iter()
        .any(|edge| edge.dedup_key() == candidate.dedup_key())
    {
        issues.push(
            ValidationIssue::new(
                ValidationCode::DuplicateEdge,
                format!(
                    "an identical edge {} -> {} already exists",
                    candidate.source_node_id, candidate.target_node_id
                ),
            )
            .with_nodes(
                &[candidate.source_node_id, candidate.target_node_id],
                positions,
            ),
        );
    }

    if let Some(cycle) =
        algo::detect_cycle_with_edge(graph, candidate.source_node_id, candidate.target_node_id)
    {
        issues.push(
            ValidationIssue::new(
                ValidationCode::CycleDetected,
                "adding this edge would create a cycle",
            )
            .with_nodes(&cycle, positions)
            .with_detail("cycle", json!(cycle)),
        );
    }
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // {{root.rest.of.path}} — only the root segment is checked here.
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)(?:\.[A-Za-z0-9_.\[\]]+)?\s*\}\}")
            .unwrap_or_else(|_| unreachable!("placeholder regex is valid"))
    })
}

/// Collects the root segment of every `{{variable.path}}` placeholder found
/// in string values of a config tree.
fn collect_placeholders(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(text) => {
            for capture in placeholder_regex().captures_iter(text) {
                if let Some(root) = capture.get(1) {
                    out.push(root.as_str().to_string());
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_placeholders(item, out);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_placeholders(item, out);
            }
        }
        _ => {}
    }
}

fn type_compatible(output: &str, input: &str) -> bool {
    output == "any"
        || input == "any"
        || output == input
        || matches!((output, input), ("number", "integer") | ("integer", "number"))
}

/// Returns the first incompatible `(output type, input type)` pair between
/// two schemas, or `None` when compatible.
fn schema_mismatch(output: &Value, input: &Value) -> Option<(String, String)> {
    let output_type = output.get("type").and_then(Value::as_str)?;
    let input_type = input.get("type").and_then(Value::as_str)?;

    if !type_compatible(output_type, input_type) {
        return Some((output_type.to_string(), input_type.to_string()));
    }

    // Objects with declared properties are compared field by field; fields
    // present on only one side are treated as compatible.
    if output_type == "object" {
        let output_props = output.get("properties").and_then(Value::as_object);
        let input_props = input.get("properties").and_then(Value::as_object);
        if let (Some(output_props), Some(input_props)) = (output_props, input_props) {
            for (name, output_prop) in output_props {
                let Some(input_prop) = input_props.get(name) else {
                    continue;
                };
                let out_type = output_prop.get("type").and_then(Value::as_str);
                let in_type = input_prop.get("type").and_then(Value::as_str);
                if let (Some(out_type), Some(in_type)) = (out_type, in_type) {
                    if !type_compatible(out_type, in_type) {
                        return Some((
                            format!("{output_type}.{name}: {out_type}"),
                            format!("{input_type}.{name}: {in_type}"),
                        ));
                    }
                }
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::WorkflowId;

    fn workflow() -> WorkflowRow {
        WorkflowRow::new("test workflow")
    }

    fn node(workflow_id: WorkflowId, kind: NodeKind, name: &str) -> NodeRow {
        NodeRow::new(workflow_id, kind, name)
    }

    fn edge(workflow_id: WorkflowId, source: &NodeRow, target: &NodeRow) -> EdgeRow {
        EdgeRow::new(workflow_id, source.id, target.id)
    }

    #[tokio::test]
    async fn test_valid_linear_workflow() {
        let wf = workflow();
        let trigger = node(wf.id, NodeKind::Trigger, "start");
        let tool = node(wf.id, NodeKind::Tool, "fetch");
        let sink = node(wf.id, NodeKind::Aggregator, "merge");
        let mut tool = tool;
        tool.tool_id = Some(uuid::Uuid::now_v7());

        let nodes = vec![trigger.clone(), tool.clone(), sink.clone()];
        let edges = vec![edge(wf.id, &trigger, &tool), edge(wf.id, &tool, &sink)];

        let validator = DagValidator::with_defaults();
        let result = validator.validate(&wf, &nodes, &edges).await;

        assert!(result.valid, "errors: {:?}", result.errors);
        assert!(result.warnings.is_empty());
        assert!(!result.cached);

        let topology = result.topology.unwrap();
        assert_eq!(topology.level_count, 3);
        assert_eq!(topology.critical_path_length, 3);
    }

    #[tokio::test]
    async fn test_cycle_reported_with_positions_and_short_circuits() {
        let wf = workflow();
        let a = node(wf.id, NodeKind::Trigger, "a").with_position(1.0, 2.0);
        let b = node(wf.id, NodeKind::Adapter, "b").with_position(3.0, 4.0);
        let c = node(wf.id, NodeKind::Adapter, "c").with_position(5.0, 6.0);

        let nodes = vec![a.clone(), b.clone(), c.clone()];
        let edges = vec![
            edge(wf.id, &a, &b),
            edge(wf.id, &b, &c),
            edge(wf.id, &c, &a),
        ];

        let validator = DagValidator::with_defaults();
        let result = validator.validate(&wf, &nodes, &edges).await;

        assert!(!result.valid);
        let cycle_errors: Vec<_> = result
            .errors
            .iter()
            .filter(|issue| issue.code == ValidationCode::CycleDetected)
            .collect();
        assert_eq!(cycle_errors.len(), 1);

        let issue = cycle_errors[0];
        assert_eq!(issue.node_ids, vec![a.id, b.id, c.id, a.id]);
        let hints = issue.details["node_positions"].as_object().unwrap();
        assert_eq!(hints.len(), 3);
        assert_eq!(hints[&a.id.to_string()]["x"], 1.0);

        // Cycle short-circuits connectivity: no dead-end warning on c.
        assert!(result.warnings.is_empty());
        assert!(result.topology.is_none());
    }

    #[tokio::test]
    async fn test_dead_end_is_warning_not_error() {
        let wf = workflow();
        let trigger = node(wf.id, NodeKind::Trigger, "t");
        let mut a = node(wf.id, NodeKind::Tool, "a");
        a.tool_id = Some(uuid::Uuid::now_v7());
        let mut b = node(wf.id, NodeKind::Tool, "b").with_position(7.0, 8.0);
        b.tool_id = Some(uuid::Uuid::now_v7());

        let nodes = vec![trigger.clone(), a.clone(), b.clone()];
        let edges = vec![edge(wf.id, &trigger, &a), edge(wf.id, &a, &b)];

        let validator = DagValidator::with_defaults();
        let result = validator.validate(&wf, &nodes, &edges).await;

        assert!(result.valid);
        assert_eq!(result.warnings.len(), 1);

        let warning = &result.warnings[0];
        assert_eq!(warning.code, WarningCode::DeadEnd);
        assert_eq!(warning.node_ids, vec![b.id]);
        let hints = warning.details["node_positions"].as_object().unwrap();
        assert_eq!(hints[&b.id.to_string()]["x"], 7.0);
    }

    #[tokio::test]
    async fn test_terminal_kinds_exempt_from_dead_end() {
        let wf = workflow();
        let trigger = node(wf.id, NodeKind::Trigger, "t");
        let sink = node(wf.id, NodeKind::Aggregator, "sink");

        let nodes = vec![trigger.clone(), sink.clone()];
        let edges = vec![edge(wf.id, &trigger, &sink)];

        let validator = DagValidator::with_defaults();
        let result = validator.validate(&wf, &nodes, &edges).await;

        assert!(result.valid);
        assert!(result.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_dangling_and_unreachable() {
        let wf = workflow();
        let trigger = node(wf.id, NodeKind::Trigger, "t");
        let reached = node(wf.id, NodeKind::Aggregator, "reached");
        let island_a = node(wf.id, NodeKind::Adapter, "island-a");
        let island_b = node(wf.id, NodeKind::Aggregator, "island-b");
        let loner = node(wf.id, NodeKind::Adapter, "loner");

        let nodes = vec![
            trigger.clone(),
            reached.clone(),
            island_a.clone(),
            island_b.clone(),
            loner.clone(),
        ];
        let edges = vec![
            edge(wf.id, &trigger, &reached),
            edge(wf.id, &island_a, &island_b),
        ];

        let validator = DagValidator::with_defaults();
        let result = validator.validate(&wf, &nodes, &edges).await;

        assert!(!result.valid);
        assert!(result.has_error(ValidationCode::DanglingNode));

        let unreachable: Vec<_> = result
            .errors
            .iter()
            .filter(|issue| issue.code == ValidationCode::UnreachableNode)
            .flat_map(|issue| issue.node_ids.clone())
            .collect();
        assert!(unreachable.contains(&island_a.id));
        assert!(unreachable.contains(&island_b.id));
        assert!(!unreachable.contains(&loner.id), "dangling not double-flagged");
    }

    #[tokio::test]
    async fn test_missing_trigger() {
        let wf = workflow();
        let a = node(wf.id, NodeKind::Adapter, "a");
        let b = node(wf.id, NodeKind::Aggregator, "b");
        let nodes = vec![a.clone(), b.clone()];
        let edges = vec![edge(wf.id, &a, &b)];

        let validator = DagValidator::with_defaults();
        let result = validator.validate(&wf, &nodes, &edges).await;

        assert!(result.has_error(ValidationCode::MissingTrigger));
    }

    #[tokio::test]
    async fn test_missing_tool_and_agent_references_at_strict() {
        let wf = workflow();
        let trigger = node(wf.id, NodeKind::Trigger, "t");
        let tool = node(wf.id, NodeKind::Tool, "tool");
        let agent = node(wf.id, NodeKind::Agent, "agent");
        let sink = node(wf.id, NodeKind::Aggregator, "sink");

        let nodes = vec![trigger.clone(), tool.clone(), agent.clone(), sink.clone()];
        let edges = vec![
            edge(wf.id, &trigger, &tool),
            edge(wf.id, &tool, &agent),
            edge(wf.id, &agent, &sink),
        ];

        let strict = DagValidator::with_defaults();
        let result = strict.validate(&wf, &nodes, &edges).await;
        assert!(result.has_error(ValidationCode::MissingToolReference));
        assert!(result.has_error(ValidationCode::MissingAgentReference));

        // Standard level skips compatibility checks.
        let config = ValidatorConfigBuilder::default()
            .level(ValidationLevel::Standard)
            .build()
            .unwrap();
        let standard = DagValidator::new(config, ValidationCache::in_memory());
        let result = standard.validate(&wf, &nodes, &edges).await;
        assert!(!result.has_error(ValidationCode::MissingToolReference));
    }

    #[tokio::test]
    async fn test_undefined_variable() {
        let wf = workflow().with_variable("api_key", serde_json::json!("secret"));
        let trigger = node(wf.id, NodeKind::Trigger, "t");
        let sink = node(wf.id, NodeKind::Aggregator, "sink").with_config(serde_json::json!({
            "url": "{{base_url}}/items",
            "token": "{{api_key}}",
            "body": "{{input.payload}}",
        }));

        let nodes = vec![trigger.clone(), sink.clone()];
        let edges = vec![edge(wf.id, &trigger, &sink)];

        let validator = DagValidator::with_defaults();
        let result = validator.validate(&wf, &nodes, &edges).await;

        let undefined: Vec<_> = result
            .errors
            .iter()
            .filter(|issue| issue.code == ValidationCode::UndefinedVariable)
            .collect();
        assert_eq!(undefined.len(), 1);
        assert_eq!(undefined[0].details["variable"], "base_url");
    }

    #[tokio::test]
    async fn test_schema_compatibility() {
        let wf = workflow();
        let trigger = node(wf.id, NodeKind::Trigger, "t");
        let mut producer = node(wf.id, NodeKind::Adapter, "producer");
        producer.output_schema = Some(serde_json::json!({ "type": "string" }));
        let mut consumer = node(wf.id, NodeKind::Aggregator, "consumer");
        consumer.input_schema = Some(serde_json::json!({ "type": "object" }));

        let nodes = vec![trigger.clone(), producer.clone(), consumer.clone()];
        let edges = vec![
            edge(wf.id, &trigger, &producer),
            edge(wf.id, &producer, &consumer),
        ];

        let validator = DagValidator::with_defaults();
        let result = validator.validate(&wf, &nodes, &edges).await;
        assert!(result.has_error(ValidationCode::SchemaMismatch));

        // number vs integer coerces.
        assert!(type_compatible("number", "integer"));
        assert!(type_compatible("any", "object"));
        assert!(!type_compatible("string", "object"));
    }

    #[tokio::test]
    async fn test_duplicate_edges_grouped_by_handles() {
        let wf = workflow();
        let trigger = node(wf.id, NodeKind::Trigger, "t");
        let sink = node(wf.id, NodeKind::Aggregator, "sink");

        let plain_a = edge(wf.id, &trigger, &sink);
        let plain_b = edge(wf.id, &trigger, &sink);
        let handled = edge(wf.id, &trigger, &sink).with_source_handle("alt");

        let nodes = vec![trigger.clone(), sink.clone()];
        let edges = vec![plain_a.clone(), plain_b.clone(), handled];

        let validator = DagValidator::with_defaults();
        let result = validator.validate(&wf, &nodes, &edges).await;

        let duplicates: Vec<_> = result
            .errors
            .iter()
            .filter(|issue| issue.code == ValidationCode::DuplicateEdge)
            .collect();
        assert_eq!(duplicates.len(), 1);
        assert_eq!(duplicates[0].edge_ids, vec![plain_a.id, plain_b.id]);
    }

    #[tokio::test]
    async fn test_cached_second_call() {
        let wf = workflow();
        let trigger = node(wf.id, NodeKind::Trigger, "t");
        let nodes = vec![trigger];
        let edges = vec![];

        let validator = DagValidator::with_defaults();
        let first = validator.validate(&wf, &nodes, &edges).await;
        let second = validator.validate(&wf, &nodes, &edges).await;

        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(first.errors.len(), second.errors.len());
        assert_eq!(first.warnings.len(), second.warnings.len());
    }

    #[tokio::test]
    async fn test_timeout_returns_uncached_result() {
        let wf = workflow();
        let trigger = node(wf.id, NodeKind::Trigger, "t");
        let sink = node(wf.id, NodeKind::Aggregator, "sink");
        let nodes = vec![trigger.clone(), sink.clone()];
        let edges = vec![edge(wf.id, &trigger, &sink)];

        // A zero budget is always overrun, whether or not the check pipeline
        // reaches an await point before the deadline.
        let config = ValidatorConfigBuilder::default()
            .timeout(Duration::ZERO)
            .build()
            .unwrap();
        let validator = DagValidator::new(config, ValidationCache::in_memory());

        let result = validator.validate(&wf, &nodes, &edges).await;
        assert!(result.has_error(ValidationCode::ValidationTimeout));
        assert!(!result.cached);

        // A second call must recompute rather than serve a cached timeout.
        let again = validator.validate(&wf, &nodes, &edges).await;
        assert!(!again.cached);
    }

    #[tokio::test]
    async fn test_graph_too_large() {
        let wf = workflow();
        let trigger = node(wf.id, NodeKind::Trigger, "t");
        let sink = node(wf.id, NodeKind::Aggregator, "sink");
        let nodes = vec![trigger.clone(), sink.clone()];
        let edges = vec![edge(wf.id, &trigger, &sink)];

        let config = ValidatorConfigBuilder::default()
            .max_nodes(1usize)
            .build()
            .unwrap();
        let validator = DagValidator::new(config, ValidationCache::in_memory());

        let result = validator.validate(&wf, &nodes, &edges).await;
        assert!(result.has_error(ValidationCode::GraphTooLarge));
    }

    #[test]
    fn test_edge_addition_is_idempotent() {
        let wf = workflow();
        let a = node(wf.id, NodeKind::Trigger, "a");
        let b = node(wf.id, NodeKind::Adapter, "b");
        let nodes = vec![a.clone(), b.clone()];
        let existing = vec![edge(wf.id, &a, &b)];
        let candidate = edge(wf.id, &b, &a);

        let validator = DagValidator::with_defaults();
        let first = validator.validate_edge_addition(&nodes, &existing, &candidate);
        let second = validator.validate_edge_addition(&nodes, &existing, &candidate);

        assert_eq!(first.len(), 1);
        assert_eq!(first[0].code, ValidationCode::CycleDetected);
        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].code, second[0].code);
    }

    #[test]
    fn test_edge_addition_self_loop_and_duplicate() {
        let wf = workflow();
        let a = node(wf.id, NodeKind::Trigger, "a");
        let b = node(wf.id, NodeKind::Adapter, "b");
        let nodes = vec![a.clone(), b.clone()];
        let existing = vec![edge(wf.id, &a, &b)];

        let validator = DagValidator::with_defaults();

        let self_loop = edge(wf.id, &a, &a);
        let issues = validator.validate_edge_addition(&nodes, &existing, &self_loop);
        assert_eq!(issues[0].code, ValidationCode::SelfLoop);

        let duplicate = edge(wf.id, &a, &b);
        let issues = validator.validate_edge_addition(&nodes, &existing, &duplicate);
        assert_eq!(issues[0].code, ValidationCode::DuplicateEdge);
    }

    #[test]
    fn test_batch_edges_see_earlier_candidates() {
        let wf = workflow();
        let a = node(wf.id, NodeKind::Trigger, "a");
        let b = node(wf.id, NodeKind::Adapter, "b");
        let c = node(wf.id, NodeKind::Adapter, "c");
        let nodes = vec![a.clone(), b.clone(), c.clone()];

        // a->b accepted, then b->c accepted, then c->a must close the cycle
        // formed by the two candidates accepted before it.
        let candidates = vec![
            edge(wf.id, &a, &b),
            edge(wf.id, &b, &c),
            edge(wf.id, &c, &a),
        ];

        let validator = DagValidator::with_defaults();
        let issues = validator.validate_batch_edges(&nodes, &[], &candidates);

        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].code, ValidationCode::CycleDetected);
    }

    #[test]
    fn test_check_cycle_with_proposed_edges() {
        let wf = workflow();
        let a = node(wf.id, NodeKind::Trigger, "a");
        let b = node(wf.id, NodeKind::Adapter, "b");
        let nodes = vec![a.clone(), b.clone()];
        let edges = vec![edge(wf.id, &a, &b)];

        let validator = DagValidator::with_defaults();
        assert!(validator.check_cycle(&nodes, &edges, &[]).is_none());
        assert!(
            validator
                .check_cycle(&nodes, &edges, &[(b.id, a.id)])
                .is_some()
        );
    }

    #[test]
    fn test_topology_errors_on_cycle() {
        let wf = workflow();
        let a = node(wf.id, NodeKind::Trigger, "a");
        let b = node(wf.id, NodeKind::Adapter, "b");
        let nodes = vec![a.clone(), b.clone()];
        let edges = vec![edge(wf.id, &a, &b), edge(wf.id, &b, &a)];

        let validator = DagValidator::with_defaults();
        let error = validator.topology(&nodes, &edges).unwrap_err();
        assert!(matches!(error, EngineError::CycleDetected { .. }));
    }
}

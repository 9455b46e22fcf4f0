//! Per-run execution state.
//!
//! The context is owned by the executor task. Concurrent node tasks never
//! touch it directly: inputs are resolved before a node is dispatched and
//! outputs are written back after its task joins, so reads and writes are
//! serialized on the executor without locking.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value, json};

use crate::definition::{ExecutionId, NodeId, NodeRow, WorkflowId};

/// Mutable state of one workflow run.
#[derive(Debug)]
pub struct ExecutionContext {
    /// Run identifier.
    pub execution_id: ExecutionId,
    /// Workflow being executed.
    pub workflow_id: WorkflowId,
    input: Value,
    variables: Map<String, Value>,
    outputs: HashMap<NodeId, Value>,
    outputs_by_name: Map<String, Value>,
    errors: Vec<(NodeId, String)>,
}

impl ExecutionContext {
    /// Creates the context for a run.
    pub fn new(
        execution_id: ExecutionId,
        workflow_id: WorkflowId,
        input: Value,
        variables: Map<String, Value>,
    ) -> Self {
        Self {
            execution_id,
            workflow_id,
            input,
            variables,
            outputs: HashMap::new(),
            outputs_by_name: Map::new(),
            errors: Vec::new(),
        }
    }

    /// The payload the run started with.
    pub fn input(&self) -> &Value {
        &self.input
    }

    /// Workflow-scope variables.
    pub fn variables(&self) -> &Map<String, Value> {
        &self.variables
    }

    /// Records a completed node's output under its id and name.
    pub fn set_output(&mut self, node_id: NodeId, node_name: &str, output: Value) {
        self.outputs_by_name
            .insert(node_name.to_string(), output.clone());
        self.outputs.insert(node_id, output);
    }

    /// Returns a node's recorded output.
    pub fn output(&self, node_id: NodeId) -> Option<&Value> {
        self.outputs.get(&node_id)
    }

    /// Records a node failure.
    pub fn record_error(&mut self, node_id: NodeId, message: impl Into<String>) {
        self.errors.push((node_id, message.into()));
    }

    /// Failures recorded so far, in occurrence order.
    pub fn errors(&self) -> &[(NodeId, String)] {
        &self.errors
    }

    /// Builds the `{"data": ..., "config": ...}` input for a node.
    ///
    /// `data` is the run input for root nodes, a single predecessor's output
    /// directly, or an object keyed by predecessor node id when there are
    /// several. `config` is the node configuration with `{{...}}` templates
    /// resolved against the run input, variables, and named node outputs.
    pub fn resolve_input(&self, node: &NodeRow, predecessors: &[NodeId]) -> Value {
        let data = match predecessors {
            [] => self.input.clone(),
            [only] => self.outputs.get(only).cloned().unwrap_or(Value::Null),
            many => {
                let mut merged = Map::new();
                for id in many {
                    if let Some(output) = self.outputs.get(id) {
                        merged.insert(id.to_string(), output.clone());
                    }
                }
                Value::Object(merged)
            }
        };

        let scope = json!({
            "input": self.input,
            "variables": self.variables,
            "nodes": self.outputs_by_name,
        });
        let config = resolve_templates(&node.config, &scope);

        json!({ "data": data, "config": config })
    }

    /// Merges the outputs of the given nodes into one object keyed by node
    /// name. Nodes without a recorded output are omitted.
    pub fn merged_output(&self, nodes: &[(NodeId, &str)]) -> Value {
        let mut merged = Map::new();
        for (id, name) in nodes {
            if let Some(output) = self.outputs.get(id) {
                merged.insert((*name).to_string(), output.clone());
            }
        }
        Value::Object(merged)
    }
}

fn template_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // {{root.rest.of.path}} — the full path is captured for resolution.
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_.\[\]]+)?)\s*\}\}")
            .unwrap_or_else(|_| unreachable!("template regex is valid"))
    })
}

/// Resolves `{{path}}` templates in every string of a config tree.
///
/// A string that is exactly one placeholder resolves to the referenced value
/// with its type preserved; placeholders embedded in longer strings are
/// interpolated as text. Paths that do not resolve are left in place.
pub(crate) fn resolve_templates(value: &Value, scope: &Value) -> Value {
    match value {
        Value::String(text) => resolve_string(text, scope),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| resolve_templates(item, scope))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| (key.clone(), resolve_templates(item, scope)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn resolve_string(text: &str, scope: &Value) -> Value {
    let re = template_regex();

    // Whole-string placeholder keeps the referenced value's type.
    if let Some(capture) = re.captures(text) {
        if let (Some(whole), Some(path)) = (capture.get(0), capture.get(1)) {
            if whole.as_str() == text {
                return match lookup_path(scope, path.as_str()) {
                    Some(value) => value.clone(),
                    None => Value::String(text.to_string()),
                };
            }
        }
    }

    let replaced = re.replace_all(text, |capture: &regex::Captures<'_>| {
        let path = capture
            .get(1)
            .map(|m| m.as_str())
            .unwrap_or_default();
        match lookup_path(scope, path) {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Null) => String::new(),
            Some(value) => value.to_string(),
            None => capture
                .get(0)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
        }
    });
    Value::String(replaced.into_owned())
}

/// Resolves a dotted path (with optional `[index]` segments) inside a value.
pub(crate) fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let normalized = path.replace('[', ".").replace(']', "");
    let mut current = value;
    for segment in normalized.split('.').filter(|s| !s.is_empty()) {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{NodeKind, WorkflowRow};

    fn ctx_with(input: Value, variables: Map<String, Value>) -> ExecutionContext {
        ExecutionContext::new(ExecutionId::new(), WorkflowId::new(), input, variables)
    }

    #[test]
    fn test_lookup_path_objects_arrays_and_brackets() {
        let value = json!({"a": {"b": [{"c": 42}]}});

        assert_eq!(lookup_path(&value, "a.b.0.c"), Some(&json!(42)));
        assert_eq!(lookup_path(&value, "a.b[0].c"), Some(&json!(42)));
        assert_eq!(lookup_path(&value, "a.missing"), None);
        assert_eq!(lookup_path(&value, "a.b.7"), None);
    }

    #[test]
    fn test_whole_string_placeholder_keeps_type() {
        let scope = json!({"variables": {"limit": 25}});
        let resolved = resolve_templates(&json!({"max": "{{ variables.limit }}"}), &scope);
        assert_eq!(resolved, json!({"max": 25}));
    }

    #[test]
    fn test_embedded_placeholder_interpolates() {
        let scope = json!({"input": {"user": "ada"}, "variables": {"n": 3}});
        let resolved = resolve_templates(
            &json!("hello {{input.user}}, retry {{ variables.n }} times"),
            &scope,
        );
        assert_eq!(resolved, json!("hello ada, retry 3 times"));
    }

    #[test]
    fn test_unresolved_placeholder_left_in_place() {
        let scope = json!({"variables": {}});
        let resolved = resolve_templates(&json!("{{ variables.absent }}"), &scope);
        assert_eq!(resolved, json!("{{ variables.absent }}"));
    }

    #[test]
    fn test_resolve_input_shapes() {
        let workflow = WorkflowRow::new("wf");
        let mut ctx = ctx_with(json!({"seed": 1}), workflow.variables.clone());
        let node = NodeRow::new(workflow.id, NodeKind::Tool, "consumer");

        // No predecessors: run input.
        let input = ctx.resolve_input(&node, &[]);
        assert_eq!(input["data"], json!({"seed": 1}));

        // One predecessor: its output directly.
        let a = NodeId::new();
        ctx.set_output(a, "a", json!({"x": 1}));
        let input = ctx.resolve_input(&node, &[a]);
        assert_eq!(input["data"], json!({"x": 1}));

        // Several predecessors: keyed by node id.
        let b = NodeId::new();
        ctx.set_output(b, "b", json!({"y": 2}));
        let input = ctx.resolve_input(&node, &[a, b]);
        assert_eq!(input["data"][a.to_string()], json!({"x": 1}));
        assert_eq!(input["data"][b.to_string()], json!({"y": 2}));
    }

    #[test]
    fn test_resolve_input_resolves_config_against_node_outputs() {
        let workflow = WorkflowRow::new("wf").with_variable("region", json!("eu"));
        let mut ctx = ctx_with(json!({}), workflow.variables.clone());
        let upstream = NodeId::new();
        ctx.set_output(upstream, "fetch", json!({"count": 9}));

        let node = NodeRow::new(workflow.id, NodeKind::Tool, "report").with_config(json!({
            "region": "{{ variables.region }}",
            "total": "{{ nodes.fetch.count }}",
        }));

        let input = ctx.resolve_input(&node, &[upstream]);
        assert_eq!(input["config"], json!({"region": "eu", "total": 9}));
    }

    #[test]
    fn test_merged_output_keyed_by_name() {
        let mut ctx = ctx_with(Value::Null, Map::new());
        let a = NodeId::new();
        let b = NodeId::new();
        ctx.set_output(a, "first", json!(1));
        ctx.set_output(b, "second", json!(2));

        let merged = ctx.merged_output(&[(a, "first"), (b, "second"), (NodeId::new(), "gone")]);
        assert_eq!(merged, json!({"first": 1, "second": 2}));
    }
}

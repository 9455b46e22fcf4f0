//! Built-in processors for the standard node kinds.
//!
//! Node inputs arrive as `{"data": ..., "config": ...}`: `data` is the
//! merged predecessor output (or the run input for root nodes) and `config`
//! is the node configuration with templates already resolved.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use uuid::Uuid;

use crate::definition::NodeKind;
use crate::execute::lookup_path;
use crate::processor::{NodeContext, Processor, ProcessorError};

/// Capability for calling out to registered tools and agents.
///
/// The engine does not know how tools and agents are hosted; callers inject
/// an implementation when building the registry.
#[async_trait]
pub trait Invoker: Send + Sync {
    /// Invokes a tool with the given input.
    async fn invoke_tool(&self, tool_id: Uuid, input: Value) -> Result<Value, ProcessorError>;

    /// Invokes an agent with the given input.
    async fn invoke_agent(&self, agent_id: Uuid, input: Value) -> Result<Value, ProcessorError>;
}

/// Invoker that echoes its input back, tagged with the invoked id.
///
/// Default wiring for environments without a tool or agent host.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoInvoker;

#[async_trait]
impl Invoker for EchoInvoker {
    async fn invoke_tool(&self, tool_id: Uuid, input: Value) -> Result<Value, ProcessorError> {
        Ok(json!({ "tool_id": tool_id, "echo": input }))
    }

    async fn invoke_agent(&self, agent_id: Uuid, input: Value) -> Result<Value, ProcessorError> {
        Ok(json!({ "agent_id": agent_id, "echo": input }))
    }
}

fn take_data(input: &Value) -> Value {
    input.get("data").cloned().unwrap_or(Value::Null)
}

fn config_object(input: &Value) -> Map<String, Value> {
    input
        .get("config")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

/// Entry point of a run; passes the trigger payload through.
#[derive(Debug, Default)]
pub struct TriggerProcessor;

#[async_trait]
impl Processor for TriggerProcessor {
    fn kind(&self) -> NodeKind {
        NodeKind::Trigger
    }

    async fn process(&self, input: Value, _ctx: &NodeContext) -> Result<Value, ProcessorError> {
        Ok(take_data(&input))
    }
}

/// Invokes the tool the node references.
pub struct ToolProcessor {
    invoker: Arc<dyn Invoker>,
}

impl ToolProcessor {
    /// Creates a tool processor over the given invoker.
    pub fn new(invoker: Arc<dyn Invoker>) -> Self {
        Self { invoker }
    }
}

#[async_trait]
impl Processor for ToolProcessor {
    fn kind(&self) -> NodeKind {
        NodeKind::Tool
    }

    async fn pre_process(&self, raw: Value, ctx: &NodeContext) -> Result<Value, ProcessorError> {
        if ctx.node.tool_id.is_none() {
            return Err(ProcessorError::Configuration(format!(
                "tool node '{}' references no tool",
                ctx.node.name
            )));
        }
        Ok(raw)
    }

    async fn process(&self, input: Value, ctx: &NodeContext) -> Result<Value, ProcessorError> {
        let tool_id = ctx
            .node
            .tool_id
            .ok_or_else(|| ProcessorError::Configuration("missing tool reference".into()))?;
        self.invoker.invoke_tool(tool_id, take_data(&input)).await
    }
}

/// Invokes the agent the node references.
pub struct AgentProcessor {
    invoker: Arc<dyn Invoker>,
}

impl AgentProcessor {
    /// Creates an agent processor over the given invoker.
    pub fn new(invoker: Arc<dyn Invoker>) -> Self {
        Self { invoker }
    }
}

#[async_trait]
impl Processor for AgentProcessor {
    fn kind(&self) -> NodeKind {
        NodeKind::Agent
    }

    async fn pre_process(&self, raw: Value, ctx: &NodeContext) -> Result<Value, ProcessorError> {
        if ctx.node.agent_id.is_none() {
            return Err(ProcessorError::Configuration(format!(
                "agent node '{}' references no agent",
                ctx.node.name
            )));
        }
        Ok(raw)
    }

    async fn process(&self, input: Value, ctx: &NodeContext) -> Result<Value, ProcessorError> {
        let agent_id = ctx
            .node
            .agent_id
            .ok_or_else(|| ProcessorError::Configuration("missing agent reference".into()))?;
        self.invoker.invoke_agent(agent_id, take_data(&input)).await
    }
}

/// Branch point; passes its input through unchanged.
///
/// Branch selection happens on the outgoing edges, evaluated by the executor
/// before the rest of the level is dispatched.
#[derive(Debug, Default)]
pub struct ConditionProcessor;

#[async_trait]
impl Processor for ConditionProcessor {
    fn kind(&self) -> NodeKind {
        NodeKind::Condition
    }

    async fn process(&self, input: Value, _ctx: &NodeContext) -> Result<Value, ProcessorError> {
        Ok(take_data(&input))
    }
}

/// Reshapes its input per a `mapping` of output keys to input paths.
///
/// With an empty mapping the input passes through unchanged. A mapped path
/// that resolves to nothing yields `null` for that key.
#[derive(Debug, Default)]
pub struct AdapterProcessor;

#[async_trait]
impl Processor for AdapterProcessor {
    fn kind(&self) -> NodeKind {
        NodeKind::Adapter
    }

    async fn pre_process(&self, raw: Value, _ctx: &NodeContext) -> Result<Value, ProcessorError> {
        if let Some(mapping) = raw.get("config").and_then(|c| c.get("mapping")) {
            if !mapping.is_object() {
                return Err(ProcessorError::Configuration(
                    "adapter mapping must be an object of key to path".into(),
                ));
            }
        }
        Ok(raw)
    }

    async fn process(&self, input: Value, _ctx: &NodeContext) -> Result<Value, ProcessorError> {
        let data = take_data(&input);
        let config = config_object(&input);
        let Some(mapping) = config.get("mapping").and_then(Value::as_object) else {
            return Ok(data);
        };
        if mapping.is_empty() {
            return Ok(data);
        }

        let mut shaped = Map::new();
        for (key, path) in mapping {
            let value = path
                .as_str()
                .and_then(|path| lookup_path(&data, path))
                .cloned()
                .unwrap_or(Value::Null);
            shaped.insert(key.clone(), value);
        }
        Ok(Value::Object(shaped))
    }
}

/// Fan-out marker; passes its input through to every successor.
#[derive(Debug, Default)]
pub struct ParallelProcessor;

#[async_trait]
impl Processor for ParallelProcessor {
    fn kind(&self) -> NodeKind {
        NodeKind::Parallel
    }

    async fn process(&self, input: Value, _ctx: &NodeContext) -> Result<Value, ProcessorError> {
        Ok(take_data(&input))
    }
}

/// Fan-in combinator over the outputs of multiple predecessors.
///
/// Strategies: `merge` (deep-merge of object outputs, later predecessors
/// win), `collect` (array of outputs in predecessor order), `first` (first
/// predecessor's output). Defaults to `merge`.
#[derive(Debug, Default)]
pub struct AggregatorProcessor;

fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => deep_merge(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[async_trait]
impl Processor for AggregatorProcessor {
    fn kind(&self) -> NodeKind {
        NodeKind::Aggregator
    }

    async fn pre_process(&self, raw: Value, _ctx: &NodeContext) -> Result<Value, ProcessorError> {
        let strategy = raw
            .get("config")
            .and_then(|c| c.get("strategy"))
            .and_then(Value::as_str);
        match strategy {
            None | Some("merge" | "collect" | "first") => Ok(raw),
            Some(other) => Err(ProcessorError::Configuration(format!(
                "unknown aggregation strategy '{other}'"
            ))),
        }
    }

    async fn process(&self, input: Value, _ctx: &NodeContext) -> Result<Value, ProcessorError> {
        let data = take_data(&input);
        let config = config_object(&input);
        let strategy = config
            .get("strategy")
            .and_then(Value::as_str)
            .unwrap_or("merge");

        // A single predecessor arrives as a bare value; normalize to the
        // multi-predecessor shape of one entry.
        let parts: Vec<Value> = match data {
            Value::Object(map) => map.into_iter().map(|(_, value)| value).collect(),
            other => vec![other],
        };

        let output = match strategy {
            "collect" => Value::Array(parts),
            "first" => parts.into_iter().next().unwrap_or(Value::Null),
            _ => {
                let mut merged = Value::Object(Map::new());
                for part in parts {
                    deep_merge(&mut merged, part);
                }
                merged
            }
        };
        Ok(output)
    }
}

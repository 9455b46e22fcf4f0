//! Execution records and the persistence sink.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};
use tokio::sync::Mutex;

use crate::definition::{ExecutionId, NodeId, WorkflowId};
use crate::error::EngineResult;

/// Lifecycle of a workflow run.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[derive(Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
    /// Created but not yet started.
    Pending,
    /// Levels are being processed.
    Running,
    /// Every executed node succeeded.
    Completed,
    /// At least one node failed.
    Failed,
    /// Stopped at a level boundary by a cancellation request.
    Cancelled,
}

impl RunStatus {
    /// Returns whether the run has reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns whether the run completed successfully.
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Returns whether the run failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

/// Lifecycle of a single node within a run.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[derive(Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NodeRunStatus {
    /// Not yet dispatched.
    Pending,
    /// Currently executing.
    Running,
    /// Produced an output.
    Completed,
    /// Exhausted its attempts or hit a definitive error.
    Failed,
    /// Excluded from the run by condition pruning or upstream failure.
    Skipped,
}

impl NodeRunStatus {
    /// Returns whether the node reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

/// What started a run.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[derive(Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TriggerKind {
    /// Started by a user action.
    Manual,
    /// Started by a schedule.
    Schedule,
    /// Started by an inbound webhook.
    Webhook,
}

/// One workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    /// Run identifier.
    pub id: ExecutionId,
    /// Workflow that ran.
    pub workflow_id: WorkflowId,
    /// Current status.
    pub status: RunStatus,
    /// What started the run.
    pub trigger: TriggerKind,
    /// Payload the run started with.
    pub input_data: Value,
    /// Merged leaf outputs, present once the run completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_data: Option<Value>,
    /// Failure summary, present when the run failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// When processing started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    /// When the run reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<Timestamp>,
}

impl WorkflowExecution {
    /// Creates a pending run.
    pub fn new(workflow_id: WorkflowId, trigger: TriggerKind, input_data: Value) -> Self {
        Self {
            id: ExecutionId::new(),
            workflow_id,
            status: RunStatus::Pending,
            trigger,
            input_data,
            output_data: None,
            error_message: None,
            started_at: None,
            ended_at: None,
        }
    }
}

/// One node's participation in a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExecution {
    /// Run this row belongs to.
    pub execution_id: ExecutionId,
    /// Node that ran.
    pub node_id: NodeId,
    /// Current status.
    pub status: NodeRunStatus,
    /// Resolved input handed to the processor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_data: Option<Value>,
    /// Processor output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_data: Option<Value>,
    /// Failure message, present when the node failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Number of retries performed.
    pub retry_count: u32,
    /// Dispatch position within the run, starting at 0.
    pub execution_order: u32,
    /// When the node started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    /// When the node reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<Timestamp>,
}

impl NodeExecution {
    /// Creates a pending node row.
    pub fn new(execution_id: ExecutionId, node_id: NodeId, execution_order: u32) -> Self {
        Self {
            execution_id,
            node_id,
            status: NodeRunStatus::Pending,
            input_data: None,
            output_data: None,
            error_message: None,
            retry_count: 0,
            execution_order,
            started_at: None,
            ended_at: None,
        }
    }
}

/// Severity of an execution log line.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[derive(Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LogLevel {
    /// Diagnostic detail.
    Debug,
    /// Normal progress.
    Info,
    /// Degraded but continuing.
    Warn,
    /// A failure.
    Error,
}

/// A structured log line attached to a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLog {
    /// Run the line belongs to.
    pub execution_id: ExecutionId,
    /// Node the line refers to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    /// Severity.
    pub level: LogLevel,
    /// Message text.
    pub message: String,
    /// Structured payload.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    /// When the line was written.
    pub timestamp: Timestamp,
}

impl ExecutionLog {
    /// Creates a log line stamped with the current time.
    pub fn new(execution_id: ExecutionId, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            execution_id,
            node_id: None,
            level,
            message: message.into(),
            data: Value::Null,
            timestamp: Timestamp::now(),
        }
    }

    /// Attaches the node the line refers to.
    pub fn with_node(mut self, node_id: NodeId) -> Self {
        self.node_id = Some(node_id);
        self
    }

    /// Attaches a structured payload.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// Persistence capability for execution records.
///
/// `record_run` and `record_node` are upserts keyed by run id and
/// `(run id, node id)` respectively; the executor calls them on every status
/// transition with the full row.
#[async_trait]
pub trait ExecutionSink: Send + Sync {
    /// Upserts a run row.
    async fn record_run(&self, run: &WorkflowExecution) -> EngineResult<()>;

    /// Upserts a node row.
    async fn record_node(&self, node: &NodeExecution) -> EngineResult<()>;

    /// Appends a log line.
    async fn append_log(&self, log: &ExecutionLog) -> EngineResult<()>;
}

/// In-process sink that keeps all records in memory.
///
/// Used in tests and in deployments without a persistence layer.
#[derive(Debug, Default)]
pub struct MemorySink {
    runs: Mutex<HashMap<ExecutionId, WorkflowExecution>>,
    nodes: Mutex<HashMap<(ExecutionId, NodeId), NodeExecution>>,
    logs: Mutex<Vec<ExecutionLog>>,
}

impl MemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty shared sink.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Returns the run row, if recorded.
    pub async fn run(&self, execution_id: ExecutionId) -> Option<WorkflowExecution> {
        self.runs.lock().await.get(&execution_id).cloned()
    }

    /// Returns one node row, if recorded.
    pub async fn node(&self, execution_id: ExecutionId, node_id: NodeId) -> Option<NodeExecution> {
        self.nodes
            .lock()
            .await
            .get(&(execution_id, node_id))
            .cloned()
    }

    /// Returns every node row of a run, ordered by dispatch position.
    pub async fn nodes(&self, execution_id: ExecutionId) -> Vec<NodeExecution> {
        let mut rows: Vec<NodeExecution> = self
            .nodes
            .lock()
            .await
            .values()
            .filter(|row| row.execution_id == execution_id)
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.execution_order);
        rows
    }

    /// Returns every log line of a run, in append order.
    pub async fn logs(&self, execution_id: ExecutionId) -> Vec<ExecutionLog> {
        self.logs
            .lock()
            .await
            .iter()
            .filter(|line| line.execution_id == execution_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ExecutionSink for MemorySink {
    async fn record_run(&self, run: &WorkflowExecution) -> EngineResult<()> {
        self.runs.lock().await.insert(run.id, run.clone());
        Ok(())
    }

    async fn record_node(&self, node: &NodeExecution) -> EngineResult<()> {
        self.nodes
            .lock()
            .await
            .insert((node.execution_id, node.node_id), node.clone());
        Ok(())
    }

    async fn append_log(&self, log: &ExecutionLog) -> EngineResult<()> {
        self.logs.lock().await.push(log.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serde_snake_case() {
        assert_eq!(
            serde_json::to_string(&RunStatus::Running).unwrap(),
            "\"running\""
        );
        let status: NodeRunStatus = serde_json::from_str("\"skipped\"").unwrap();
        assert_eq!(status, NodeRunStatus::Skipped);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(NodeRunStatus::Skipped.is_terminal());
        assert!(!NodeRunStatus::Pending.is_terminal());
    }

    #[tokio::test]
    async fn test_memory_sink_upserts_by_key() {
        let sink = MemorySink::new();
        let mut run = WorkflowExecution::new(
            WorkflowId::new(),
            TriggerKind::Manual,
            Value::Null,
        );

        sink.record_run(&run).await.unwrap();
        run.status = RunStatus::Running;
        sink.record_run(&run).await.unwrap();

        let stored = sink.run(run.id).await.unwrap();
        assert_eq!(stored.status, RunStatus::Running);
    }

    #[tokio::test]
    async fn test_memory_sink_orders_nodes_by_dispatch() {
        let sink = MemorySink::new();
        let execution_id = ExecutionId::new();
        let first = NodeId::new();
        let second = NodeId::new();

        sink.record_node(&NodeExecution::new(execution_id, second, 1))
            .await
            .unwrap();
        sink.record_node(&NodeExecution::new(execution_id, first, 0))
            .await
            .unwrap();

        let rows = sink.nodes(execution_id).await;
        assert_eq!(rows[0].node_id, first);
        assert_eq!(rows[1].node_id, second);
    }
}

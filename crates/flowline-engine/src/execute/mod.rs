//! Workflow execution: the level-by-level executor, its run/node records and
//! persistence sink, per-run context, and edge condition evaluation.

mod condition;
mod config;
mod context;
mod executor;
mod record;

pub use condition::{ConditionEvaluator, DefaultConditionEvaluator};
pub use config::{ExecutorConfig, ExecutorConfigBuilder};
pub use context::ExecutionContext;
pub(crate) use context::lookup_path;
pub use executor::WorkflowExecutor;
pub use record::{
    ExecutionLog, ExecutionSink, LogLevel, MemorySink, NodeExecution, NodeRunStatus, RunStatus,
    TriggerKind, WorkflowExecution,
};

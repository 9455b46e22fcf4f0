//! Convenient re-exports for common use.

pub use crate::definition::{
    EdgeId, EdgeRow, ExecutionId, NodeId, NodeKind, NodeRow, Position, RetryPolicy, WorkflowId,
    WorkflowRow,
};
pub use crate::error::{EngineError, EngineResult};
pub use crate::execute::{
    ExecutionSink, ExecutorConfig, RunStatus, TriggerKind, WorkflowExecution, WorkflowExecutor,
};
pub use crate::processor::{Processor, ProcessorError, ProcessorRegistry};
pub use crate::validate::{DagValidator, ValidationLevel, ValidationResult, ValidatorConfig};

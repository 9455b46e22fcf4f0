//! Per-node-type processor framework.
//!
//! Every node kind is handled by a [`Processor`] with a fixed three-phase
//! lifecycle: `pre_process` (validation and input shaping, never retried),
//! `process` (core logic, retried per [`ProcessorConfig`]), and
//! `post_process` (output serialization). The [`execute`] driver invokes the
//! phases in order, times each one, applies the retry/timeout layer, and
//! records a [`ProcessorMetrics`] row into the shared collector.

mod builtin;
mod config;
mod error;
mod metrics;
mod registry;

pub use builtin::{
    AdapterProcessor, AgentProcessor, AggregatorProcessor, ConditionProcessor, EchoInvoker,
    Invoker, ParallelProcessor, ToolProcessor, TriggerProcessor,
};
pub use config::{ProcessorConfig, RetryConfig};
pub use error::ProcessorError;
pub use metrics::{MetricsCollector, ProcessorMetrics};
pub use registry::ProcessorRegistry;

use async_trait::async_trait;
use jiff::Timestamp;
use serde_json::{Map, Value};

use crate::definition::{ExecutionId, NodeKind, NodeRow, WorkflowId};

/// Tracing target for processor operations.
const TRACING_TARGET: &str = "flowline_engine::processor";

/// Per-invocation context handed to a processor.
///
/// Carries the node row being executed plus run-scoped identifiers and
/// variables. Cheap to clone; one scope exists per node invocation.
#[derive(Debug, Clone)]
pub struct NodeContext {
    /// The run this invocation belongs to.
    pub execution_id: ExecutionId,
    /// The workflow being executed.
    pub workflow_id: WorkflowId,
    /// The node being executed.
    pub node: NodeRow,
    /// Workflow-scope variables.
    pub variables: Map<String, Value>,
}

/// Execution contract for one node kind.
///
/// Implementations must be stateless across invocations; any per-run state
/// lives in the execution context owned by the executor.
#[async_trait]
pub trait Processor: Send + Sync {
    /// The node kind this processor handles.
    fn kind(&self) -> NodeKind;

    /// Validates and shapes the raw input. Failures here are never retried.
    async fn pre_process(&self, raw: Value, ctx: &NodeContext) -> Result<Value, ProcessorError> {
        let _ = ctx;
        Ok(raw)
    }

    /// Runs the core logic. Retried per the effective [`ProcessorConfig`]
    /// when the returned error is transient.
    async fn process(&self, input: Value, ctx: &NodeContext) -> Result<Value, ProcessorError>;

    /// Serializes the typed output for storage and downstream consumption.
    async fn post_process(&self, output: Value, ctx: &NodeContext) -> Result<Value, ProcessorError> {
        let _ = ctx;
        Ok(output)
    }
}

/// Outcome of driving a processor through its lifecycle.
#[derive(Debug)]
pub struct ProcessorOutcome {
    /// Final output, or the error that ended the invocation.
    pub result: Result<Value, ProcessorError>,
    /// Number of retries performed (0 = succeeded or failed on the first
    /// attempt).
    pub retry_count: u32,
    /// Message of each error that triggered a retry, in attempt order.
    pub retry_errors: Vec<String>,
}

/// Drives a processor through pre-process, process (with retry/timeout), and
/// post-process, recording a metrics row for the invocation.
///
/// Retry policy: only errors the config considers transient are retried,
/// with exponential backoff between attempts. A per-attempt timeout converts
/// a stuck `process` into [`ProcessorError::Timeout`], which fails the
/// invocation immediately: timeouts signal a policy violation, not a
/// transient fault.
pub async fn execute(
    processor: &dyn Processor,
    raw: Value,
    ctx: &NodeContext,
    config: &ProcessorConfig,
    collector: &MetricsCollector,
) -> ProcessorOutcome {
    let started_at = Timestamp::now();
    let clock = std::time::Instant::now();
    let mut metrics = ProcessorMetrics::new(
        processor.kind(),
        ctx.node.id,
        ctx.execution_id,
        started_at,
    );

    let pre_started = clock.elapsed();
    let input = match processor.pre_process(raw, ctx).await {
        Ok(input) => input,
        Err(error) => {
            metrics.pre_process_ms = (clock.elapsed() - pre_started).as_millis() as u64;
            metrics.finish_err(&error);
            collector.record(metrics);
            return ProcessorOutcome {
                result: Err(error),
                retry_count: 0,
                retry_errors: Vec::new(),
            };
        }
    };
    metrics.pre_process_ms = (clock.elapsed() - pre_started).as_millis() as u64;

    let mut retry_count = 0;
    let mut retry_errors = Vec::new();
    let process_started = clock.elapsed();
    let outcome = loop {
        let attempt_result =
            tokio::time::timeout(config.timeout, processor.process(input.clone(), ctx)).await;

        let error = match attempt_result {
            Ok(Ok(output)) => break Ok(output),
            Ok(Err(error)) => error,
            Err(_) => {
                // Per-attempt timeout: fail immediately, no retry.
                break Err(ProcessorError::Timeout {
                    timeout: config.timeout,
                });
            }
        };

        if !config.should_retry(&error) || retry_count >= config.retry.max_attempts {
            break Err(error);
        }

        let backoff = config.retry.backoff(retry_count);
        retry_count += 1;
        retry_errors.push(error.to_string());
        tracing::debug!(
            target: TRACING_TARGET,
            node_id = %ctx.node.id,
            execution_id = %ctx.execution_id,
            attempt = retry_count,
            max_attempts = config.retry.max_attempts,
            backoff_ms = backoff.as_millis() as u64,
            error = %error,
            "Retrying node processing after backoff"
        );
        tokio::time::sleep(backoff).await;
    };
    metrics.process_ms = (clock.elapsed() - process_started).as_millis() as u64;
    metrics.retry_count = retry_count;

    let output = match outcome {
        Ok(output) => output,
        Err(error) => {
            metrics.finish_err(&error);
            collector.record(metrics);
            return ProcessorOutcome {
                result: Err(error),
                retry_count,
                retry_errors,
            };
        }
    };

    let post_started = clock.elapsed();
    let result = processor.post_process(output, ctx).await;
    metrics.post_process_ms = (clock.elapsed() - post_started).as_millis() as u64;

    match &result {
        Ok(_) => metrics.finish_ok(),
        Err(error) => metrics.finish_err(error),
    }
    collector.record(metrics);

    ProcessorOutcome {
        result,
        retry_count,
        retry_errors,
    }
}

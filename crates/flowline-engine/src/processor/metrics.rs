//! Per-invocation processor metrics.

use std::sync::{Arc, Mutex};

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::definition::{ExecutionId, NodeId, NodeKind};
use crate::processor::ProcessorError;

/// Timing and outcome of one processor invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorMetrics {
    /// Node kind that ran.
    pub kind: NodeKind,
    /// Node that ran.
    pub node_id: NodeId,
    /// Run the invocation belonged to.
    pub execution_id: ExecutionId,
    /// Pre-process phase duration in milliseconds.
    pub pre_process_ms: u64,
    /// Process phase duration (all attempts and backoffs) in milliseconds.
    pub process_ms: u64,
    /// Post-process phase duration in milliseconds.
    pub post_process_ms: u64,
    /// Number of retries performed.
    pub retry_count: u32,
    /// Whether the invocation produced an output.
    pub success: bool,
    /// Error kind label when the invocation failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    /// When the invocation started.
    pub started_at: Timestamp,
    /// When the invocation ended.
    pub ended_at: Option<Timestamp>,
}

impl ProcessorMetrics {
    /// Creates a zeroed metrics row for an invocation that just started.
    pub fn new(
        kind: NodeKind,
        node_id: NodeId,
        execution_id: ExecutionId,
        started_at: Timestamp,
    ) -> Self {
        Self {
            kind,
            node_id,
            execution_id,
            pre_process_ms: 0,
            process_ms: 0,
            post_process_ms: 0,
            retry_count: 0,
            success: false,
            error_kind: None,
            started_at,
            ended_at: None,
        }
    }

    /// Marks the invocation successful.
    pub fn finish_ok(&mut self) {
        self.success = true;
        self.ended_at = Some(Timestamp::now());
    }

    /// Marks the invocation failed with the error's kind label.
    pub fn finish_err(&mut self, error: &ProcessorError) {
        self.success = false;
        self.error_kind = Some(error.kind_label().to_string());
        self.ended_at = Some(Timestamp::now());
    }

    /// Total invocation duration across all phases in milliseconds.
    pub fn total_ms(&self) -> u64 {
        self.pre_process_ms + self.process_ms + self.post_process_ms
    }
}

/// Thread-safe accumulator for metrics rows.
///
/// Clones share the underlying buffer, so the executor can hand one collector
/// to every concurrent node task.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector {
    rows: Arc<Mutex<Vec<ProcessorMetrics>>>,
}

impl MetricsCollector {
    /// Creates an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a metrics row.
    pub fn record(&self, metrics: ProcessorMetrics) {
        self.lock().push(metrics);
    }

    /// Returns a copy of all recorded rows.
    pub fn snapshot(&self) -> Vec<ProcessorMetrics> {
        self.lock().clone()
    }

    /// Removes and returns all recorded rows.
    pub fn drain(&self) -> Vec<ProcessorMetrics> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ProcessorMetrics>> {
        // Rows are plain data; a poisoned lock still holds usable state.
        self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

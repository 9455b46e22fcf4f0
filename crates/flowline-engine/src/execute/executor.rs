//! Level-by-level concurrent workflow executor.
//!
//! A run processes the graph's topological levels in order. Within a level,
//! condition nodes are evaluated first and may close outgoing edges; nodes
//! left reachable are then dispatched concurrently under a semaphore bound.
//! Failures never abort the run: downstream nodes of a failed node are
//! skipped while independent branches keep executing. Cancellation is
//! observed at level boundaries.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use jiff::Timestamp;
use serde_json::{Value, json};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;

use crate::definition::{EdgeId, EdgeRow, ExecutionId, NodeId, NodeKind, NodeRow, WorkflowRow};
use crate::error::EngineResult;
use crate::execute::condition::{ConditionEvaluator, DefaultConditionEvaluator};
use crate::execute::config::ExecutorConfig;
use crate::execute::context::ExecutionContext;
use crate::execute::record::{
    ExecutionLog, ExecutionSink, LogLevel, MemorySink, NodeExecution, NodeRunStatus, RunStatus,
    TriggerKind, WorkflowExecution,
};
use crate::graph::{Graph, algo};
use crate::processor::{
    MetricsCollector, NodeContext, ProcessorConfig, ProcessorRegistry,
};

/// Tracing target for executor operations.
const TRACING_TARGET: &str = "flowline_engine::execute";

/// Executes validated workflow definitions.
pub struct WorkflowExecutor {
    config: ExecutorConfig,
    registry: Arc<ProcessorRegistry>,
    sink: Arc<dyn ExecutionSink>,
    evaluator: Arc<dyn ConditionEvaluator>,
    metrics: MetricsCollector,
    cancellations: Mutex<HashMap<ExecutionId, Arc<AtomicBool>>>,
}

impl WorkflowExecutor {
    /// Creates an executor with the default condition evaluator.
    pub fn new(
        config: ExecutorConfig,
        registry: Arc<ProcessorRegistry>,
        sink: Arc<dyn ExecutionSink>,
    ) -> Self {
        Self {
            config,
            registry,
            sink,
            evaluator: Arc::new(DefaultConditionEvaluator),
            metrics: MetricsCollector::new(),
            cancellations: Mutex::new(HashMap::new()),
        }
    }

    /// Creates an executor with builtin processors and an in-memory sink.
    pub fn with_defaults() -> Self {
        Self::new(
            ExecutorConfig::default(),
            Arc::new(ProcessorRegistry::echo()),
            MemorySink::shared(),
        )
    }

    /// Replaces the edge condition evaluator.
    pub fn with_evaluator(mut self, evaluator: Arc<dyn ConditionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Processor metrics accumulated across runs.
    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Requests cancellation of an in-flight run.
    ///
    /// Takes effect at the next level boundary. Returns `false` when no run
    /// with the given id is in flight.
    pub async fn cancel(&self, execution_id: ExecutionId) -> bool {
        match self.cancellations.lock().await.get(&execution_id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                tracing::info!(
                    target: TRACING_TARGET,
                    execution_id = %execution_id,
                    "Cancellation requested"
                );
                true
            }
            None => false,
        }
    }

    /// Executes a workflow definition and returns the terminal run record.
    ///
    /// The run itself never surfaces as `Err`: node failures, cycles, and
    /// cancellation all end in a terminal [`RunStatus`] on the returned
    /// record. Every status transition is recorded through the sink.
    pub async fn execute(
        &self,
        workflow: &WorkflowRow,
        nodes: &[NodeRow],
        edges: &[EdgeRow],
        trigger: TriggerKind,
        input: Value,
    ) -> EngineResult<WorkflowExecution> {
        let mut run = WorkflowExecution::new(workflow.id, trigger, input);
        self.persist_run(&run).await;

        let flag = Arc::new(AtomicBool::new(false));
        self.cancellations.lock().await.insert(run.id, flag.clone());

        self.drive(workflow, nodes, edges, &mut run, &flag).await;

        self.cancellations.lock().await.remove(&run.id);
        Ok(run)
    }

    async fn drive(
        &self,
        workflow: &WorkflowRow,
        nodes: &[NodeRow],
        edges: &[EdgeRow],
        run: &mut WorkflowExecution,
        flag: &AtomicBool,
    ) {
        run.status = RunStatus::Running;
        run.started_at = Some(Timestamp::now());
        self.persist_run(run).await;
        self.log_line(ExecutionLog::new(run.id, LogLevel::Info, "Run started").with_data(
            json!({ "workflow_id": workflow.id, "trigger": run.trigger }),
        ))
        .await;
        tracing::info!(
            target: TRACING_TARGET,
            execution_id = %run.id,
            workflow_id = %workflow.id,
            trigger = %run.trigger,
            node_count = nodes.len(),
            "Starting workflow run"
        );

        let node_index: HashMap<NodeId, &NodeRow> =
            nodes.iter().map(|node| (node.id, node)).collect();
        let valid_edges: Vec<&EdgeRow> = edges
            .iter()
            .filter(|edge| {
                !edge.is_self_loop()
                    && node_index.contains_key(&edge.source_node_id)
                    && node_index.contains_key(&edge.target_node_id)
            })
            .collect();
        let mut edges_by_source: HashMap<NodeId, Vec<&EdgeRow>> = HashMap::new();
        for &edge in &valid_edges {
            edges_by_source
                .entry(edge.source_node_id)
                .or_default()
                .push(edge);
        }

        let mut graph = Graph::new();
        for node in nodes {
            graph.add_node(node.id);
        }
        for edge in &valid_edges {
            graph.add_edge(edge.source_node_id, edge.target_node_id);
        }

        let Some(levels) = algo::topological_levels(&graph) else {
            self.finish_run(run, RunStatus::Failed, Some("workflow graph contains a cycle".into()))
                .await;
            return;
        };

        let mut ctx = ExecutionContext::new(
            run.id,
            workflow.id,
            run.input_data.clone(),
            workflow.variables.clone(),
        );
        let mut completed: HashSet<NodeId> = HashSet::new();
        let mut failed: HashSet<NodeId> = HashSet::new();
        // Condition pruning and failure propagation skip nodes for different
        // reasons: a pruned predecessor only matters when every path to the
        // node is pruned, while one failed predecessor is always fatal.
        let mut pruned: HashSet<NodeId> = HashSet::new();
        let mut failure_skipped: HashSet<NodeId> = HashSet::new();
        let mut closed_edges: HashSet<EdgeId> = HashSet::new();
        let mut order: u32 = 0;

        for (level_index, level) in levels.iter().enumerate() {
            if flag.load(Ordering::SeqCst) {
                self.log_line(ExecutionLog::new(
                    run.id,
                    LogLevel::Warn,
                    "Run cancelled at level boundary",
                ))
                .await;
                self.finish_run(run, RunStatus::Cancelled, None).await;
                return;
            }
            tracing::debug!(
                target: TRACING_TARGET,
                execution_id = %run.id,
                level = level_index,
                size = level.len(),
                "Dispatching level"
            );

            // Nodes downstream of an earlier failure never dispatch.
            for &id in level {
                if pruned.contains(&id) || failure_skipped.contains(&id) {
                    continue;
                }
                let upstream_failed = graph
                    .predecessors(id)
                    .iter()
                    .any(|pred| failed.contains(pred) || failure_skipped.contains(pred));
                if upstream_failed {
                    if let Some(&node) = node_index.get(&id) {
                        self.mark_skipped(run.id, node, &mut order, "upstream node failed")
                            .await;
                    }
                    failure_skipped.insert(id);
                }
            }

            // Condition nodes go first; their edge verdicts prune the rest
            // of the level and everything below it.
            let mut evaluated_conditions = false;
            for &id in level {
                let Some(&node) = node_index.get(&id) else {
                    continue;
                };
                if node.kind != NodeKind::Condition
                    || pruned.contains(&id)
                    || failure_skipped.contains(&id)
                {
                    continue;
                }
                evaluated_conditions = true;

                let resolved = ctx.resolve_input(node, &unique_predecessors(&graph, id));
                let mut row = NodeExecution::new(run.id, id, order);
                order += 1;
                row.status = NodeRunStatus::Running;
                row.started_at = Some(Timestamp::now());
                if self.config.record_node_io {
                    row.input_data = Some(resolved.clone());
                }
                self.persist_node(&row).await;
                self.log_line(
                    ExecutionLog::new(
                        run.id,
                        LogLevel::Info,
                        format!("Node '{}' started", node.name),
                    )
                    .with_node(id),
                )
                .await;

                let outcome = match self.registry.resolve(node.kind) {
                    Ok(processor) => {
                        let node_ctx = NodeContext {
                            execution_id: run.id,
                            workflow_id: workflow.id,
                            node: node.clone(),
                            variables: ctx.variables().clone(),
                        };
                        let outcome = crate::processor::execute(
                            processor.as_ref(),
                            resolved,
                            &node_ctx,
                            &ProcessorConfig::for_node(node),
                            &self.metrics,
                        )
                        .await;
                        row.retry_count = outcome.retry_count;
                        self.log_retries(run.id, node, &outcome.retry_errors).await;
                        outcome.result
                    }
                    Err(error) => Err(error),
                };

                row.ended_at = Some(Timestamp::now());
                match outcome {
                    Ok(output) => {
                        for edge in edges_by_source.get(&id).into_iter().flatten() {
                            if !self.evaluator.matches(edge.condition.as_ref(), &output) {
                                closed_edges.insert(edge.id);
                                tracing::debug!(
                                    target: TRACING_TARGET,
                                    execution_id = %run.id,
                                    edge_id = %edge.id,
                                    source = %edge.source_node_id,
                                    target = %edge.target_node_id,
                                    "Edge condition did not match, closing branch"
                                );
                            }
                        }
                        row.status = NodeRunStatus::Completed;
                        if self.config.record_node_io {
                            row.output_data = Some(output.clone());
                        }
                        self.persist_node(&row).await;
                        self.log_line(
                            ExecutionLog::new(
                                run.id,
                                LogLevel::Info,
                                format!("Node '{}' completed", node.name),
                            )
                            .with_node(id),
                        )
                        .await;
                        ctx.set_output(id, &node.name, output);
                        completed.insert(id);
                    }
                    Err(error) => {
                        row.status = NodeRunStatus::Failed;
                        row.error_message = Some(error.to_string());
                        self.persist_node(&row).await;
                        self.record_failure(run.id, node, &error.to_string(), &mut ctx, &mut failed)
                            .await;
                    }
                }
            }

            // Close off branches that are now reachable only through
            // unmatched edges.
            if evaluated_conditions && !closed_edges.is_empty() {
                let reachable = live_reachable(&valid_edges, &graph, &closed_edges);
                for id in graph.nodes() {
                    if reachable.contains(&id)
                        || completed.contains(&id)
                        || failed.contains(&id)
                        || pruned.contains(&id)
                        || failure_skipped.contains(&id)
                    {
                        continue;
                    }
                    if let Some(&node) = node_index.get(&id) {
                        self.mark_skipped(run.id, node, &mut order, "branch condition not met")
                            .await;
                    }
                    pruned.insert(id);
                }
            }

            // Everything left in the level runs concurrently, bounded by the
            // semaphore.
            let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_nodes));
            let mut join_set: JoinSet<(NodeExecution, NodeRow, crate::processor::ProcessorOutcome)> =
                JoinSet::new();

            for &id in level {
                let Some(&node) = node_index.get(&id) else {
                    continue;
                };
                if node.kind == NodeKind::Condition
                    || pruned.contains(&id)
                    || failure_skipped.contains(&id)
                    || completed.contains(&id)
                    || failed.contains(&id)
                {
                    continue;
                }

                let processor = match self.registry.resolve(node.kind) {
                    Ok(processor) => processor,
                    Err(error) => {
                        let mut row = NodeExecution::new(run.id, id, order);
                        order += 1;
                        row.status = NodeRunStatus::Failed;
                        row.error_message = Some(error.to_string());
                        row.ended_at = Some(Timestamp::now());
                        self.persist_node(&row).await;
                        self.record_failure(run.id, node, &error.to_string(), &mut ctx, &mut failed)
                            .await;
                        continue;
                    }
                };

                let resolved = ctx.resolve_input(node, &unique_predecessors(&graph, id));
                let mut row = NodeExecution::new(run.id, id, order);
                order += 1;
                if self.config.record_node_io {
                    row.input_data = Some(resolved.clone());
                }
                let node_ctx = NodeContext {
                    execution_id: run.id,
                    workflow_id: workflow.id,
                    node: node.clone(),
                    variables: ctx.variables().clone(),
                };
                let proc_config = ProcessorConfig::for_node(node);
                let sink = self.sink.clone();
                let metrics = self.metrics.clone();
                let semaphore = semaphore.clone();

                join_set.spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    row.status = NodeRunStatus::Running;
                    row.started_at = Some(Timestamp::now());
                    if let Err(error) = sink.record_node(&row).await {
                        tracing::warn!(
                            target: TRACING_TARGET,
                            node_id = %row.node_id,
                            error = %error,
                            "Failed to record node start"
                        );
                    }
                    let started = ExecutionLog::new(
                        row.execution_id,
                        LogLevel::Info,
                        format!("Node '{}' started", node_ctx.node.name),
                    )
                    .with_node(row.node_id);
                    if let Err(error) = sink.append_log(&started).await {
                        tracing::warn!(
                            target: TRACING_TARGET,
                            node_id = %row.node_id,
                            error = %error,
                            "Failed to append execution log"
                        );
                    }
                    let outcome = crate::processor::execute(
                        processor.as_ref(),
                        resolved,
                        &node_ctx,
                        &proc_config,
                        &metrics,
                    )
                    .await;
                    (row, node_ctx.node, outcome)
                });
            }

            while let Some(joined) = join_set.join_next().await {
                let (mut row, node, outcome) = match joined {
                    Ok(joined) => joined,
                    Err(error) => {
                        tracing::error!(
                            target: TRACING_TARGET,
                            execution_id = %run.id,
                            error = %error,
                            "Node task aborted"
                        );
                        continue;
                    }
                };
                row.retry_count = outcome.retry_count;
                row.ended_at = Some(Timestamp::now());
                self.log_retries(run.id, &node, &outcome.retry_errors).await;
                match outcome.result {
                    Ok(output) => {
                        row.status = NodeRunStatus::Completed;
                        if self.config.record_node_io {
                            row.output_data = Some(output.clone());
                        }
                        self.persist_node(&row).await;
                        self.log_line(
                            ExecutionLog::new(
                                run.id,
                                LogLevel::Info,
                                format!("Node '{}' completed", node.name),
                            )
                            .with_node(node.id),
                        )
                        .await;
                        ctx.set_output(node.id, &node.name, output);
                        completed.insert(node.id);
                    }
                    Err(error) => {
                        row.status = NodeRunStatus::Failed;
                        row.error_message = Some(error.to_string());
                        self.persist_node(&row).await;
                        self.record_failure(run.id, &node, &error.to_string(), &mut ctx, &mut failed)
                            .await;
                    }
                }
            }
        }

        // Completed leaves contribute to the run output even when other
        // branches failed.
        let leaves: Vec<(NodeId, &str)> = graph
            .nodes()
            .filter(|&id| graph.out_degree(id) == 0 && completed.contains(&id))
            .filter_map(|id| node_index.get(&id).map(|node| (id, node.name.as_str())))
            .collect();
        run.output_data = Some(ctx.merged_output(&leaves));

        // Sweep any failure descendants the level loop never reached, e.g.
        // when the failure happened in the last level.
        if !failed.is_empty() {
            let mut queue: VecDeque<NodeId> = failed.iter().copied().collect();
            let mut seen: HashSet<NodeId> = failed.clone();
            while let Some(current) = queue.pop_front() {
                for &succ in graph.successors(current) {
                    if seen.insert(succ) {
                        queue.push_back(succ);
                        if !completed.contains(&succ)
                            && !pruned.contains(&succ)
                            && !failure_skipped.contains(&succ)
                        {
                            if let Some(&node) = node_index.get(&succ) {
                                self.mark_skipped(run.id, node, &mut order, "upstream node failed")
                                    .await;
                            }
                            failure_skipped.insert(succ);
                        }
                    }
                }
            }

            let mut names: Vec<&str> = failed
                .iter()
                .filter_map(|id| node_index.get(id).map(|node| node.name.as_str()))
                .collect();
            names.sort_unstable();
            self.finish_run(
                run,
                RunStatus::Failed,
                Some(format!("nodes failed: {}", names.join(", "))),
            )
            .await;
            return;
        }

        self.finish_run(run, RunStatus::Completed, None).await;
    }

    async fn mark_skipped(
        &self,
        execution_id: ExecutionId,
        node: &NodeRow,
        order: &mut u32,
        reason: &str,
    ) {
        let mut row = NodeExecution::new(execution_id, node.id, *order);
        *order += 1;
        row.status = NodeRunStatus::Skipped;
        row.ended_at = Some(Timestamp::now());
        self.persist_node(&row).await;
        self.log_line(
            ExecutionLog::new(
                execution_id,
                LogLevel::Debug,
                format!("Node '{}' skipped: {reason}", node.name),
            )
            .with_node(node.id),
        )
        .await;
        tracing::debug!(
            target: TRACING_TARGET,
            execution_id = %execution_id,
            node_id = %node.id,
            node_name = %node.name,
            reason,
            "Node skipped"
        );
    }

    async fn log_retries(
        &self,
        execution_id: ExecutionId,
        node: &NodeRow,
        retry_errors: &[String],
    ) {
        for (attempt, message) in retry_errors.iter().enumerate() {
            self.log_line(
                ExecutionLog::new(
                    execution_id,
                    LogLevel::Warn,
                    format!(
                        "Node '{}' retry {} after error: {message}",
                        node.name,
                        attempt + 1
                    ),
                )
                .with_node(node.id),
            )
            .await;
        }
    }

    async fn record_failure(
        &self,
        execution_id: ExecutionId,
        node: &NodeRow,
        message: &str,
        ctx: &mut ExecutionContext,
        failed: &mut HashSet<NodeId>,
    ) {
        failed.insert(node.id);
        ctx.record_error(node.id, message);
        self.log_line(
            ExecutionLog::new(
                execution_id,
                LogLevel::Error,
                format!("Node '{}' failed: {message}", node.name),
            )
            .with_node(node.id),
        )
        .await;
        tracing::error!(
            target: TRACING_TARGET,
            execution_id = %execution_id,
            node_id = %node.id,
            node_name = %node.name,
            error = message,
            "Node failed"
        );
    }

    async fn finish_run(
        &self,
        run: &mut WorkflowExecution,
        status: RunStatus,
        error_message: Option<String>,
    ) {
        run.status = status;
        run.error_message = error_message;
        run.ended_at = Some(Timestamp::now());
        self.persist_run(run).await;
        let level = match status {
            RunStatus::Failed => LogLevel::Error,
            RunStatus::Cancelled => LogLevel::Warn,
            _ => LogLevel::Info,
        };
        self.log_line(
            ExecutionLog::new(run.id, level, format!("Run {status}"))
                .with_data(json!({ "error": run.error_message })),
        )
        .await;
        tracing::info!(
            target: TRACING_TARGET,
            execution_id = %run.id,
            status = %status,
            "Run finished"
        );
    }

    async fn persist_run(&self, run: &WorkflowExecution) {
        if let Err(error) = self.sink.record_run(run).await {
            tracing::warn!(
                target: TRACING_TARGET,
                execution_id = %run.id,
                error = %error,
                "Failed to record run"
            );
        }
    }

    async fn persist_node(&self, node: &NodeExecution) {
        if let Err(error) = self.sink.record_node(node).await {
            tracing::warn!(
                target: TRACING_TARGET,
                execution_id = %node.execution_id,
                node_id = %node.node_id,
                error = %error,
                "Failed to record node"
            );
        }
    }

    async fn log_line(&self, log: ExecutionLog) {
        if let Err(error) = self.sink.append_log(&log).await {
            tracing::warn!(
                target: TRACING_TARGET,
                execution_id = %log.execution_id,
                error = %error,
                "Failed to append execution log"
            );
        }
    }
}

impl std::fmt::Debug for WorkflowExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowExecutor")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Predecessors of a node with multigraph duplicates removed, in insertion
/// order.
fn unique_predecessors(graph: &Graph<NodeId>, id: NodeId) -> Vec<NodeId> {
    let mut seen = HashSet::new();
    graph
        .predecessors(id)
        .iter()
        .copied()
        .filter(|pred| seen.insert(*pred))
        .collect()
}

/// Nodes still reachable from the graph roots when the closed edges are
/// removed. Roots are the nodes with no incoming edges at all.
fn live_reachable(
    edges: &[&EdgeRow],
    graph: &Graph<NodeId>,
    closed: &HashSet<EdgeId>,
) -> HashSet<NodeId> {
    let mut open_adjacency: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    for edge in edges {
        if !closed.contains(&edge.id) {
            open_adjacency
                .entry(edge.source_node_id)
                .or_default()
                .push(edge.target_node_id);
        }
    }

    let mut reachable: HashSet<NodeId> = graph
        .nodes()
        .filter(|&id| graph.in_degree(id) == 0)
        .collect();
    let mut queue: VecDeque<NodeId> = reachable.iter().copied().collect();
    while let Some(current) = queue.pop_front() {
        for &next in open_adjacency.get(&current).into_iter().flatten() {
            if reachable.insert(next) {
                queue.push_back(next);
            }
        }
    }
    reachable
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{EdgeRow, NodeKind, NodeRow, WorkflowRow};

    async fn node_status(
        sink: &MemorySink,
        execution_id: ExecutionId,
        node_id: NodeId,
    ) -> NodeRunStatus {
        sink.node(execution_id, node_id).await.unwrap().status
    }

    fn linear_fixture() -> (WorkflowRow, Vec<NodeRow>, Vec<EdgeRow>) {
        let workflow = WorkflowRow::new("linear");
        let trigger = NodeRow::new(workflow.id, NodeKind::Trigger, "start");
        let step = NodeRow::new(workflow.id, NodeKind::Parallel, "step");
        let finish = NodeRow::new(workflow.id, NodeKind::Adapter, "finish");
        let edges = vec![
            EdgeRow::new(workflow.id, trigger.id, step.id),
            EdgeRow::new(workflow.id, step.id, finish.id),
        ];
        (workflow, vec![trigger, step, finish], edges)
    }

    #[tokio::test]
    async fn test_linear_run_completes_with_leaf_output() {
        let sink = MemorySink::shared();
        let executor = WorkflowExecutor::new(
            ExecutorConfig::default(),
            Arc::new(ProcessorRegistry::echo()),
            sink.clone(),
        );
        let (workflow, nodes, edges) = linear_fixture();

        let run = executor
            .execute(
                &workflow,
                &nodes,
                &edges,
                TriggerKind::Manual,
                json!({"payload": 1}),
            )
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        // Pass-through chain: the leaf output is the trigger payload, keyed
        // by the leaf node's name.
        assert_eq!(
            run.output_data,
            Some(json!({"finish": {"payload": 1}}))
        );

        let rows = sink.nodes(run.id).await;
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|row| row.status == NodeRunStatus::Completed));
        assert_eq!(
            rows.iter().map(|row| row.execution_order).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[tokio::test]
    async fn test_run_logs_cover_node_lifecycle() {
        let sink = MemorySink::shared();
        let executor = WorkflowExecutor::new(
            ExecutorConfig::default(),
            Arc::new(ProcessorRegistry::echo()),
            sink.clone(),
        );
        let (workflow, nodes, edges) = linear_fixture();
        let node_ids: Vec<NodeId> = nodes.iter().map(|node| node.id).collect();

        let run = executor
            .execute(&workflow, &nodes, &edges, TriggerKind::Manual, json!({}))
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Completed);

        let logs = sink.logs(run.id).await;
        assert_eq!(logs.first().map(|log| log.message.as_str()), Some("Run started"));
        assert_eq!(logs.last().map(|log| log.message.as_str()), Some("Run completed"));

        // Every node contributes a started and a completed line, in that
        // order, attributed to its id.
        for id in node_ids {
            let messages: Vec<&str> = logs
                .iter()
                .filter(|log| log.node_id == Some(id))
                .map(|log| log.message.as_str())
                .collect();
            assert_eq!(messages.len(), 2, "expected two lines for node {id}");
            assert!(messages[0].ends_with("started"));
            assert!(messages[1].ends_with("completed"));
        }
    }

    #[tokio::test]
    async fn test_cyclic_graph_fails_the_run() {
        let sink = MemorySink::shared();
        let executor = WorkflowExecutor::new(
            ExecutorConfig::default(),
            Arc::new(ProcessorRegistry::echo()),
            sink.clone(),
        );
        let workflow = WorkflowRow::new("cyclic");
        let a = NodeRow::new(workflow.id, NodeKind::Trigger, "a");
        let b = NodeRow::new(workflow.id, NodeKind::Parallel, "b");
        let edges = vec![
            EdgeRow::new(workflow.id, a.id, b.id),
            EdgeRow::new(workflow.id, b.id, a.id),
        ];

        let run = executor
            .execute(&workflow, &[a, b], &edges, TriggerKind::Manual, json!({}))
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.error_message.as_deref().unwrap().contains("cycle"));
        assert!(sink.nodes(run.id).await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_processor_fails_node_and_run() {
        let sink = MemorySink::shared();
        let mut registry = ProcessorRegistry::new();
        registry.register(Arc::new(crate::processor::TriggerProcessor));
        let executor = WorkflowExecutor::new(
            ExecutorConfig::default(),
            Arc::new(registry),
            sink.clone(),
        );

        let workflow = WorkflowRow::new("partial");
        let trigger = NodeRow::new(workflow.id, NodeKind::Trigger, "start");
        let orphan_kind = NodeRow::new(workflow.id, NodeKind::Aggregator, "agg");
        let edges = vec![EdgeRow::new(workflow.id, trigger.id, orphan_kind.id)];
        let agg_id = orphan_kind.id;

        let run = executor
            .execute(
                &workflow,
                &[trigger, orphan_kind],
                &edges,
                TriggerKind::Webhook,
                json!({}),
            )
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        let row = sink.node(run.id, agg_id).await.unwrap();
        assert_eq!(row.status, NodeRunStatus::Failed);
        assert!(row.error_message.unwrap().contains("no processor registered"));
    }

    #[tokio::test]
    async fn test_cancel_unknown_run_is_a_no_op() {
        let executor = WorkflowExecutor::with_defaults();
        assert!(!executor.cancel(ExecutionId::new()).await);
    }

    #[tokio::test]
    async fn test_condition_prunes_unmatched_branch_transitively() {
        let sink = MemorySink::shared();
        let executor = WorkflowExecutor::new(
            ExecutorConfig::default(),
            Arc::new(ProcessorRegistry::echo()),
            sink.clone(),
        );

        // start -> route; route -> x (matched), route -> y (unmatched); y -> z.
        let workflow = WorkflowRow::new("routing");
        let start = NodeRow::new(workflow.id, NodeKind::Trigger, "start");
        let route = NodeRow::new(workflow.id, NodeKind::Condition, "route");
        let x = NodeRow::new(workflow.id, NodeKind::Parallel, "x");
        let y = NodeRow::new(workflow.id, NodeKind::Parallel, "y");
        let z = NodeRow::new(workflow.id, NodeKind::Adapter, "z");
        let edges = vec![
            EdgeRow::new(workflow.id, start.id, route.id),
            EdgeRow::new(workflow.id, route.id, x.id)
                .with_condition(json!({"field": "route", "op": "eq", "value": "x"})),
            EdgeRow::new(workflow.id, route.id, y.id)
                .with_condition(json!({"field": "route", "op": "eq", "value": "y"})),
            EdgeRow::new(workflow.id, y.id, z.id),
        ];
        let (x_id, y_id, z_id) = (x.id, y.id, z.id);

        let run = executor
            .execute(
                &workflow,
                &[start, route, x, y, z],
                &edges,
                TriggerKind::Manual,
                json!({"route": "x"}),
            )
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(node_status(&sink, run.id, x_id).await, NodeRunStatus::Completed);
        assert_eq!(node_status(&sink, run.id, y_id).await, NodeRunStatus::Skipped);
        assert_eq!(node_status(&sink, run.id, z_id).await, NodeRunStatus::Skipped);
        // The matched branch's leaf carries the run output.
        assert_eq!(run.output_data.unwrap(), json!({"x": {"route": "x"}}));
    }

    struct FlakyNode {
        calls: Arc<std::sync::atomic::AtomicU32>,
        succeed_on: u32,
    }

    #[async_trait::async_trait]
    impl crate::processor::Processor for FlakyNode {
        fn kind(&self) -> NodeKind {
            NodeKind::Tool
        }

        async fn process(
            &self,
            input: Value,
            _ctx: &NodeContext,
        ) -> Result<Value, crate::processor::ProcessorError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call < self.succeed_on {
                Err(crate::processor::ProcessorError::transient("flaky"))
            } else {
                Ok(input["data"].clone())
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_node_retry_policy_drives_backoff() {
        let sink = MemorySink::shared();
        let calls = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let mut registry = ProcessorRegistry::echo();
        registry.register(Arc::new(FlakyNode {
            calls: calls.clone(),
            succeed_on: 100,
        }));
        let executor = WorkflowExecutor::new(
            ExecutorConfig::default(),
            Arc::new(registry),
            sink.clone(),
        );

        let workflow = WorkflowRow::new("retrying");
        let start = NodeRow::new(workflow.id, NodeKind::Trigger, "start");
        let mut fetch = NodeRow::new(workflow.id, NodeKind::Tool, "fetch");
        fetch.retry_policy.max_retries = 2;
        fetch.retry_policy.delay_seconds = 1.0;
        fetch.retry_policy.multiplier = 2.0;
        let edges = vec![EdgeRow::new(workflow.id, start.id, fetch.id)];
        let fetch_id = fetch.id;

        let started = tokio::time::Instant::now();
        let run = executor
            .execute(&workflow, &[start, fetch], &edges, TriggerKind::Schedule, json!({}))
            .await
            .unwrap();

        // Initial attempt plus two retries, with 1s and 2s backoffs.
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= std::time::Duration::from_secs(3));

        let row = sink.node(run.id, fetch_id).await.unwrap();
        assert_eq!(row.status, NodeRunStatus::Failed);
        assert_eq!(row.retry_count, 2);

        // One log line per retry, attributed to the retried node.
        let retries: Vec<ExecutionLog> = sink
            .logs(run.id)
            .await
            .into_iter()
            .filter(|log| log.node_id == Some(fetch_id) && log.message.contains("retry"))
            .collect();
        assert_eq!(retries.len(), 2);
        assert!(retries.iter().all(|log| log.level == LogLevel::Warn));
        assert!(retries[0].message.contains("flaky"));
    }

    struct FailingNode;

    #[async_trait::async_trait]
    impl crate::processor::Processor for FailingNode {
        fn kind(&self) -> NodeKind {
            NodeKind::Tool
        }

        async fn process(
            &self,
            _input: Value,
            _ctx: &NodeContext,
        ) -> Result<Value, crate::processor::ProcessorError> {
            Err(crate::processor::ProcessorError::permanent("broken"))
        }
    }

    #[tokio::test]
    async fn test_failure_skips_descendants_but_not_siblings() {
        let sink = MemorySink::shared();
        let mut registry = ProcessorRegistry::echo();
        registry.register(Arc::new(FailingNode));
        let executor = WorkflowExecutor::new(
            ExecutorConfig::default(),
            Arc::new(registry),
            sink.clone(),
        );

        // start fans out to a failing branch (broken -> after) and a healthy
        // branch (healthy).
        let workflow = WorkflowRow::new("isolation");
        let start = NodeRow::new(workflow.id, NodeKind::Trigger, "start");
        let broken = NodeRow::new(workflow.id, NodeKind::Tool, "broken");
        let after = NodeRow::new(workflow.id, NodeKind::Adapter, "after");
        let healthy = NodeRow::new(workflow.id, NodeKind::Parallel, "healthy");
        let edges = vec![
            EdgeRow::new(workflow.id, start.id, broken.id),
            EdgeRow::new(workflow.id, broken.id, after.id),
            EdgeRow::new(workflow.id, start.id, healthy.id),
        ];
        let (broken_id, after_id, healthy_id) = (broken.id, after.id, healthy.id);

        let run = executor
            .execute(
                &workflow,
                &[start, broken, after, healthy],
                &edges,
                TriggerKind::Manual,
                json!({"n": 1}),
            )
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error_message.as_deref(), Some("nodes failed: broken"));

        assert_eq!(node_status(&sink, run.id, broken_id).await, NodeRunStatus::Failed);
        assert_eq!(node_status(&sink, run.id, after_id).await, NodeRunStatus::Skipped);
        assert_eq!(node_status(&sink, run.id, healthy_id).await, NodeRunStatus::Completed);
        // The healthy leaf still contributes to the run output.
        assert_eq!(run.output_data.unwrap(), json!({"healthy": {"n": 1}}));
    }

    struct GateNode {
        ids: tokio::sync::mpsc::UnboundedSender<ExecutionId>,
        release: Arc<tokio::sync::Notify>,
    }

    #[async_trait::async_trait]
    impl crate::processor::Processor for GateNode {
        fn kind(&self) -> NodeKind {
            NodeKind::Tool
        }

        async fn process(
            &self,
            input: Value,
            ctx: &NodeContext,
        ) -> Result<Value, crate::processor::ProcessorError> {
            let _ = self.ids.send(ctx.execution_id);
            self.release.notified().await;
            Ok(input["data"].clone())
        }
    }

    #[tokio::test]
    async fn test_cancellation_observed_at_level_boundary() {
        let sink = MemorySink::shared();
        let (ids_tx, mut ids_rx) = tokio::sync::mpsc::unbounded_channel();
        let release = Arc::new(tokio::sync::Notify::new());
        let mut registry = ProcessorRegistry::echo();
        registry.register(Arc::new(GateNode {
            ids: ids_tx,
            release: release.clone(),
        }));
        let executor = Arc::new(WorkflowExecutor::new(
            ExecutorConfig::default(),
            Arc::new(registry),
            sink.clone(),
        ));

        let workflow = WorkflowRow::new("cancellable");
        let start = NodeRow::new(workflow.id, NodeKind::Trigger, "start");
        let mut gate = NodeRow::new(workflow.id, NodeKind::Tool, "gate");
        gate.timeout_seconds = 3600;
        let after = NodeRow::new(workflow.id, NodeKind::Adapter, "after");
        let edges = vec![
            EdgeRow::new(workflow.id, start.id, gate.id),
            EdgeRow::new(workflow.id, gate.id, after.id),
        ];
        let (gate_id, after_id) = (gate.id, after.id);

        let handle = {
            let executor = executor.clone();
            let nodes = vec![start, gate, after];
            tokio::spawn(async move {
                executor
                    .execute(&workflow, &nodes, &edges, TriggerKind::Manual, json!({}))
                    .await
            })
        };

        // Cancel while the gate node holds its level open, then release it.
        let execution_id = ids_rx.recv().await.unwrap();
        assert!(executor.cancel(execution_id).await);
        release.notify_one();

        let run = handle.await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);
        assert_eq!(
            sink.node(run.id, gate_id).await.unwrap().status,
            NodeRunStatus::Completed
        );
        // The level after the boundary never dispatched.
        assert!(sink.node(run.id, after_id).await.is_none());
    }
}

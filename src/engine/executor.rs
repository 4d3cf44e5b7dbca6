//! Execution driver
//!
//! Drives one execution of one [`ExecutableGraph`] to a terminal status.
//! Scheduling is a tick loop over ready nodes: a node is ready when every
//! activating predecessor is completed. The resource pool bounds how many
//! dispatches are in flight; pause, resume, cancel, and the overall timeout
//! are observed at loop checkpoints, so in-flight handlers always run to
//! completion.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{EngineError, ErrorKind};
use crate::graph::{expr, Edge, EdgeKind, ExecutableGraph, Node, RetryPolicy};
use crate::state::{
    Checkpoint, CheckpointFrequency, ExecutionStatus, NodeResult, PerformanceMetrics,
    ResourceUsage, StateManager,
};
use crate::stream::{ExecutionStep, StepEmitter};
use crate::Result;

use super::context::ExecutionContext;
use super::handlers::{HandlerRegistry, GLOBAL_INPUT_KEY, NODE_INPUT_KEY};
use super::metrics::MetricsCollector;
use super::pool::{PooledResource, ResourcePool};
use super::retry;
use super::{ErrorHandling, ExecutionStrategy, ExecutorConfig};

/// Caller-supplied inputs for one execution.
#[derive(Debug, Clone, Default)]
pub struct ExecutionInput {
    /// Input surfaced to `input` nodes as `_globalInput`.
    pub global_input: Option<Value>,

    /// Per-node input overrides, surfaced as `_nodeInput`.
    pub node_inputs: HashMap<String, Value>,
}

/// Summary block of one finished (or terminal) execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub execution_id: String,
    pub graph_id: String,
    pub graph_name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub status: ExecutionStatus,
    pub node_count: usize,
    pub completed_nodes: usize,
    pub failed_nodes: usize,
    pub strategy: ExecutionStrategy,
    pub checkpoints_count: usize,
}

/// Full outcome of one execution.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub success: bool,

    /// `node id -> output` for every node that produced one.
    pub result: HashMap<String, Value>,

    pub execution: ExecutionSummary,
    pub node_results: HashMap<String, NodeResult>,

    /// Node ids in completion order.
    pub execution_path: Vec<String>,

    pub performance: PerformanceMetrics,
    pub checkpoints: Vec<Checkpoint>,
    pub warnings: Vec<String>,

    /// Present when the execution did not complete cleanly.
    pub error: Option<EngineError>,
}

/// Cooperative lifecycle flags for one execution.
struct ExecutionControls {
    paused: AtomicBool,
    cancelled: AtomicBool,
    notify: Notify,
}

impl ExecutionControls {
    fn new() -> Self {
        Self {
            paused: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Resolve when cancellation is requested.
    async fn cancelled_wait(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Resolve on any control change.
    async fn changed_wait(&self) {
        self.notify.notified().await;
    }
}

/// Outcome of one node dispatch task.
struct NodeOutcome {
    node_id: String,
    result: DispatchResult,
}

enum DispatchResult {
    Completed { output: Option<Value> },
    Failed { error: EngineError },
}

/// Bookkeeping local to one scheduling run. Mirrors the authoritative sets
/// in the state manager so readiness checks need no locking.
struct RunState {
    pending: HashSet<String>,
    dispatched: HashSet<String>,
    completed: HashSet<String>,
    failed: HashSet<String>,
    skipped: HashSet<String>,

    /// Outputs harvested from completions, for input assembly.
    outputs: HashMap<String, Value>,

    /// Errors of failed nodes, for error-edge targets.
    failure_of: HashMap<String, EngineError>,

    /// Edge ids of conditional edges whose condition evaluated false.
    deactivated_edges: HashSet<String>,

    /// Failures that abort or bundle (error-edge-consumed ones excluded).
    failures: Vec<EngineError>,

    /// Node ids whose failure was consumed by an error edge.
    consumed_failures: Vec<String>,

    completion_order: Vec<String>,
    timed_out: bool,
    aborting: bool,
}

impl RunState {
    fn new(node_ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            pending: node_ids.into_iter().collect(),
            dispatched: HashSet::new(),
            completed: HashSet::new(),
            failed: HashSet::new(),
            skipped: HashSet::new(),
            outputs: HashMap::new(),
            failure_of: HashMap::new(),
            deactivated_edges: HashSet::new(),
            failures: Vec::new(),
            consumed_failures: Vec::new(),
            completion_order: Vec::new(),
            timed_out: false,
            aborting: false,
        }
    }

    fn settled(&self, node_id: &str) -> bool {
        self.completed.contains(node_id)
            || self.failed.contains(node_id)
            || self.skipped.contains(node_id)
    }
}

/// Drives executions against a shared state manager and handler table.
pub struct Executor {
    state: StateManager,
    handlers: Arc<HandlerRegistry>,
    controls: Arc<DashMap<String, Arc<ExecutionControls>>>,
    history: Arc<parking_lot::RwLock<Vec<ExecutionSummary>>>,
}

impl Executor {
    /// Create an executor reporting into `state` and dispatching through
    /// `handlers`.
    pub fn new(state: StateManager, handlers: Arc<HandlerRegistry>) -> Self {
        Self {
            state,
            handlers,
            controls: Arc::new(DashMap::new()),
            history: Arc::new(parking_lot::RwLock::new(Vec::new())),
        }
    }

    /// The state manager this executor reports into.
    pub fn state(&self) -> &StateManager {
        &self.state
    }

    /// Run an execution to a terminal status without streaming.
    pub async fn execute(
        &self,
        graph: &ExecutableGraph,
        input: ExecutionInput,
        ctx: ExecutionContext,
    ) -> Result<ExecutionReport> {
        self.execute_with_steps(graph, input, ctx, StepEmitter::disabled())
            .await
    }

    /// Run an execution, emitting [`ExecutionStep`] events as it goes.
    ///
    /// Returns `Ok` with `success == false` when nodes failed or the run was
    /// cancelled; `Err` is reserved for pre-flight problems (invalid config,
    /// double initialization).
    pub async fn execute_with_steps(
        &self,
        graph: &ExecutableGraph,
        input: ExecutionInput,
        mut ctx: ExecutionContext,
        emitter: StepEmitter,
    ) -> Result<ExecutionReport> {
        let config = &graph.runtime_config;
        config.validate()?;

        let execution_id = if ctx.execution_id.is_empty() {
            format!("exec-{}", Uuid::new_v4())
        } else {
            ctx.execution_id.clone()
        };
        ctx.execution_id = execution_id.clone();

        self.state
            .initialize(&execution_id, &graph.definition, Some(ctx.variables.clone()))
            .await?;

        let controls = Arc::new(ExecutionControls::new());
        self.controls
            .insert(execution_id.clone(), Arc::clone(&controls));

        let metrics = Arc::new(MetricsCollector::new(graph.definition.name.clone()));
        metrics.record_execution_start();
        let started_at = Utc::now();

        self.state
            .update_execution_status(&execution_id, ExecutionStatus::Running)
            .await?;
        info!(
            execution_id,
            graph = %graph.definition.name,
            strategy = %config.strategy,
            nodes = graph.definition.node_count(),
            "execution started"
        );

        let deadline = (config.timeout_ms > 0)
            .then(|| Instant::now() + Duration::from_millis(config.timeout_ms));
        let pool = Arc::new(ResourcePool::new(config.max_concurrency));

        let mut run = RunState::new(graph.definition.node_ids().map(str::to_string));
        self.run_loop(
            graph, config, &ctx, &emitter, &execution_id, &input, deadline, &pool, &controls,
            &metrics, &mut run,
        )
        .await;

        let report = self
            .finish(graph, config, &execution_id, started_at, &controls, &metrics, run)
            .await;
        self.controls.remove(&execution_id);
        report
    }

    /// Pause an execution: in-flight nodes finish, nothing new dispatches.
    /// Returns false when the execution is unknown.
    pub async fn pause(&self, execution_id: &str) -> bool {
        let Some(controls) = self.controls.get(execution_id).map(|c| c.clone()) else {
            return false;
        };
        if controls.is_cancelled() {
            // Pause after cancel is a no-op.
            return true;
        }
        controls.paused.store(true, Ordering::SeqCst);
        controls.notify.notify_waiters();
        let _ = self
            .state
            .update_execution_status(execution_id, ExecutionStatus::Paused)
            .await;
        info!(execution_id, "execution paused");
        true
    }

    /// Resume a paused execution.
    pub async fn resume(&self, execution_id: &str) -> bool {
        let Some(controls) = self.controls.get(execution_id).map(|c| c.clone()) else {
            return false;
        };
        controls.paused.store(false, Ordering::SeqCst);
        controls.notify.notify_waiters();
        let _ = self
            .state
            .update_execution_status(execution_id, ExecutionStatus::Running)
            .await;
        info!(execution_id, "execution resumed");
        true
    }

    /// Request cancellation. The scheduling loop exits at its next
    /// checkpoint; in-flight nodes are allowed to finish.
    pub async fn cancel(&self, execution_id: &str) -> bool {
        let Some(controls) = self.controls.get(execution_id).map(|c| c.clone()) else {
            return false;
        };
        controls.cancel();
        info!(execution_id, "execution cancellation requested");
        true
    }

    /// Cancel every active execution.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.controls.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.cancel(&id).await;
        }
    }

    /// Ids of executions currently under this executor's control.
    pub fn active_executions(&self) -> Vec<String> {
        self.controls.iter().map(|e| e.key().clone()).collect()
    }

    /// Summaries of past executions, oldest first.
    pub fn history(&self) -> Vec<ExecutionSummary> {
        self.history.read().clone()
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_loop(
        &self,
        graph: &ExecutableGraph,
        config: &ExecutorConfig,
        ctx: &ExecutionContext,
        emitter: &StepEmitter,
        execution_id: &str,
        input: &ExecutionInput,
        deadline: Option<Instant>,
        pool: &Arc<ResourcePool>,
        controls: &Arc<ExecutionControls>,
        metrics: &Arc<MetricsCollector>,
        run: &mut RunState,
    ) {
        let mut running: FuturesUnordered<JoinHandle<NodeOutcome>> = FuturesUnordered::new();
        let mut last_checkpoint = Instant::now();
        let serial = config.strategy == ExecutionStrategy::Sequential;

        loop {
            if Self::deadline_passed(deadline) {
                run.timed_out = true;
                controls.cancel();
            }
            if controls.is_cancelled() {
                break;
            }

            // Pause parking: in-flight nodes keep running and their results
            // are harvested after resume.
            while controls.is_paused() && !controls.is_cancelled() {
                if let Some(deadline) = deadline {
                    tokio::select! {
                        _ = controls.changed_wait() => {}
                        _ = tokio::time::sleep_until(deadline) => {
                            run.timed_out = true;
                            controls.cancel();
                        }
                    }
                } else {
                    controls.changed_wait().await;
                }
            }
            if controls.is_cancelled() {
                break;
            }

            if !run.aborting {
                let ready = self.sweep_ready(graph, run, serial);
                for node_id in ready {
                    if serial && !running.is_empty() {
                        break;
                    }
                    let Some(resource) = pool.try_acquire() else {
                        break;
                    };
                    match self.assemble_input(graph, run, input, &node_id) {
                        Ok(assembled) => {
                            run.pending.remove(&node_id);
                            run.dispatched.insert(node_id.clone());
                            let node = graph
                                .definition
                                .node(&node_id)
                                .expect("ready node exists in definition")
                                .clone();
                            running.push(self.spawn_dispatch(
                                node,
                                assembled,
                                config.retry.clone(),
                                ctx.clone(),
                                emitter.clone(),
                                Arc::clone(pool),
                                Arc::clone(controls),
                                Arc::clone(metrics),
                                resource,
                            ));
                        }
                        Err(err) => {
                            // Edge condition/transform evaluation failed
                            // before the node ever started.
                            warn!(execution_id, node_id = %node_id, error = %err, "input assembly failed");
                            run.pending.remove(&node_id);
                            run.skipped.insert(node_id.clone());
                            metrics.record_error(err.code());
                            run.failures.push(err);
                            if config.error_handling == ErrorHandling::FailFast {
                                run.aborting = true;
                                break;
                            }
                        }
                    }
                }
            }

            if running.is_empty() {
                if run.aborting || controls.is_cancelled() {
                    break;
                }
                // Quiescent: either done, or a skip cascade just unblocked
                // more nodes. One more sweep decides.
                if self.sweep_ready(graph, run, serial).is_empty() {
                    break;
                }
                continue;
            }

            tokio::select! {
                Some(joined) = running.next() => {
                    self.harvest(graph, config, execution_id, emitter, run, joined, &mut last_checkpoint).await;
                }
                _ = Self::deadline_sleep(deadline) => {
                    run.timed_out = true;
                    controls.cancel();
                }
                _ = controls.changed_wait() => {}
            }
        }

        // Cancellation and fail-fast both let in-flight handlers finish.
        while let Some(joined) = running.next().await {
            self.harvest(graph, config, execution_id, emitter, run, joined, &mut last_checkpoint)
                .await;
        }
    }

    /// Process one finished dispatch: update local mirrors, evaluate
    /// conditional edges, and take time-based checkpoints.
    async fn harvest(
        &self,
        graph: &ExecutableGraph,
        config: &ExecutorConfig,
        execution_id: &str,
        emitter: &StepEmitter,
        run: &mut RunState,
        joined: std::result::Result<NodeOutcome, tokio::task::JoinError>,
        last_checkpoint: &mut Instant,
    ) {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(join_err) => {
                error!(execution_id, error = %join_err, "dispatch task panicked");
                run.aborting = true;
                run.failures.push(
                    EngineError::new(ErrorKind::NodeExecutionFailed, "dispatch task panicked")
                        .with_cause(join_err),
                );
                return;
            }
        };

        run.dispatched.remove(&outcome.node_id);
        match outcome.result {
            DispatchResult::Completed { output } => {
                run.completed.insert(outcome.node_id.clone());
                run.completion_order.push(outcome.node_id.clone());
                let output_value = output.unwrap_or(Value::Null);

                // A false condition deactivates its edge for this run.
                for edge in graph.definition.outgoing(&outcome.node_id) {
                    if edge.kind == EdgeKind::Conditional {
                        let expression = edge
                            .condition
                            .as_ref()
                            .map(|c| c.expression.as_str())
                            .unwrap_or("");
                        if !expr::evaluate_condition(expression, &output_value) {
                            debug!(
                                execution_id,
                                edge = %edge.id,
                                "conditional edge deactivated"
                            );
                            run.deactivated_edges.insert(edge.id.clone());
                        }
                    }
                }
                if !output_value.is_null() {
                    run.outputs.insert(outcome.node_id.clone(), output_value);
                }
            }
            DispatchResult::Failed { error } => {
                run.failed.insert(outcome.node_id.clone());
                let has_error_edge = graph
                    .definition
                    .outgoing(&outcome.node_id)
                    .any(|e| e.kind == EdgeKind::Error);
                run.failure_of.insert(outcome.node_id.clone(), error.clone());

                if has_error_edge {
                    // An error edge consumes the failure: the target handles
                    // it and the run can still complete.
                    run.consumed_failures.push(outcome.node_id.clone());
                } else {
                    run.failures.push(error);
                    if config.error_handling == ErrorHandling::FailFast {
                        run.aborting = true;
                    }
                }
            }
        }

        if config.checkpointing.enabled
            && config.checkpointing.frequency == CheckpointFrequency::Time
            && last_checkpoint.elapsed() >= Duration::from_millis(config.checkpointing.interval_ms)
        {
            match self.state.create_checkpoint(execution_id, None).await {
                Ok(checkpoint) => {
                    emitter
                        .emit(ExecutionStep::checkpoint(&outcome.node_id, &checkpoint.id))
                        .await;
                    *last_checkpoint = Instant::now();
                }
                Err(err) => warn!(execution_id, error = %err, "periodic checkpoint failed"),
            }
        }
    }

    /// Mark forever-blocked nodes as skipped (to a fixpoint), then return
    /// the ready set: sequential mode returns at most the first ready node
    /// in topological order, parallel mode all of them ordered by
    /// (priority, id).
    fn sweep_ready(
        &self,
        graph: &ExecutableGraph,
        run: &mut RunState,
        serial: bool,
    ) -> Vec<String> {
        loop {
            let mut newly_skipped = Vec::new();
            for node_id in &run.pending {
                if Self::readiness(graph, run, node_id) == Readiness::Blocked {
                    newly_skipped.push(node_id.clone());
                }
            }
            if newly_skipped.is_empty() {
                break;
            }
            for node_id in newly_skipped {
                debug!(node_id = %node_id, "node skipped: upstream path never activates");
                run.pending.remove(&node_id);
                run.skipped.insert(node_id);
            }
        }

        if serial {
            return graph
                .sorted_nodes
                .iter()
                .find(|id| {
                    run.pending.contains(*id)
                        && Self::readiness(graph, run, id) == Readiness::Ready
                })
                .map(|id| vec![id.clone()])
                .unwrap_or_default();
        }

        let mut ready: Vec<String> = run
            .pending
            .iter()
            .filter(|id| Self::readiness(graph, run, id) == Readiness::Ready)
            .cloned()
            .collect();
        ready.sort_by_key(|id| {
            let priority = graph.definition.node(id).map(|n| n.priority).unwrap_or(0);
            (priority, id.clone())
        });
        ready
    }

    /// Classify a pending node against the current run state.
    fn readiness(graph: &ExecutableGraph, run: &RunState, node_id: &str) -> Readiness {
        let mut active_normal = 0usize;
        let mut normal_total = 0usize;
        let mut normal_waiting = false;
        let mut normal_blocked = false;
        let mut error_edges = 0usize;
        let mut error_unsettled = false;
        let mut error_activated = false;

        for edge in graph.definition.incoming(node_id) {
            if edge.kind == EdgeKind::Error {
                error_edges += 1;
                if !run.settled(&edge.from) {
                    error_unsettled = true;
                } else if run.failed.contains(&edge.from) {
                    error_activated = true;
                }
                continue;
            }
            normal_total += 1;
            if run.deactivated_edges.contains(&edge.id) {
                continue;
            }
            active_normal += 1;
            if run.completed.contains(&edge.from) {
                // Satisfied.
            } else if run.failed.contains(&edge.from) || run.skipped.contains(&edge.from) {
                normal_blocked = true;
            } else {
                normal_waiting = true;
            }
        }

        let all_deactivated = normal_total > 0 && active_normal == 0;

        if error_edges > 0 && error_unsettled {
            return Readiness::Waiting;
        }
        if normal_blocked {
            // A normal predecessor failed or was skipped; this subtree never
            // activates, error edges notwithstanding.
            return Readiness::Blocked;
        }
        if all_deactivated && !error_activated {
            return Readiness::Blocked;
        }
        if error_edges > 0 && active_normal == 0 && normal_total == 0 && !error_activated {
            // Pure error handler whose sources all succeeded.
            return Readiness::Blocked;
        }
        if normal_waiting {
            return Readiness::Waiting;
        }
        Readiness::Ready
    }

    /// Assemble the input object for a ready node from predecessor outputs,
    /// edge transforms, error payloads, and caller-supplied inputs.
    fn assemble_input(
        &self,
        graph: &ExecutableGraph,
        run: &RunState,
        input: &ExecutionInput,
        node_id: &str,
    ) -> Result<Value> {
        let mut assembled = Map::new();

        for edge in graph.definition.incoming(node_id) {
            match edge.kind {
                EdgeKind::Error => {
                    if let Some(error) = run.failure_of.get(&edge.from) {
                        let mut payload = Map::new();
                        payload.insert(
                            "error".to_string(),
                            Value::String(error.message.clone()),
                        );
                        payload.insert(
                            "errorType".to_string(),
                            Value::String(error.code().to_string()),
                        );
                        assembled.insert(edge.from.clone(), Value::Object(payload));
                    }
                }
                EdgeKind::Control => {
                    // Ordering only; no data crosses a control edge.
                }
                EdgeKind::Data | EdgeKind::Conditional | EdgeKind::Loop => {
                    if run.deactivated_edges.contains(&edge.id) {
                        continue;
                    }
                    let Some(output) = run.outputs.get(&edge.from) else {
                        continue;
                    };
                    let value = Self::apply_edge_transform(edge, output.clone())?;
                    assembled.insert(edge.from.clone(), value);
                }
            }
        }

        if let Some(explicit) = input.node_inputs.get(node_id) {
            assembled.insert(NODE_INPUT_KEY.to_string(), explicit.clone());
        }
        if let Some(global) = &input.global_input {
            assembled.insert(GLOBAL_INPUT_KEY.to_string(), global.clone());
        }
        Ok(Value::Object(assembled))
    }

    fn apply_edge_transform(edge: &Edge, value: Value) -> Result<Value> {
        let Some(transform) = &edge.transform else {
            return Ok(value);
        };
        let transformed = if let Some(function) = &transform.function {
            function(value, &Value::Null)
        } else if let Some(expression) = &transform.expression {
            expr::apply_transform(expression, value)
        } else {
            Ok(value)
        };
        transformed.map_err(|err| {
            let mut wrapped = EngineError::edge_traversal_failed(format!(
                "transform on edge {} failed: {}",
                edge.id, err.message
            ));
            wrapped.context.edge_id = Some(edge.id.clone());
            wrapped
        })
    }

    /// Spawn the dispatch task for one node: record the start, run the
    /// handler under its timeout, retry with backoff, and report the
    /// terminal transition.
    #[allow(clippy::too_many_arguments)]
    fn spawn_dispatch(
        &self,
        node: Node,
        input: Value,
        default_retry: RetryPolicy,
        ctx: ExecutionContext,
        emitter: StepEmitter,
        pool: Arc<ResourcePool>,
        controls: Arc<ExecutionControls>,
        metrics: Arc<MetricsCollector>,
        resource: PooledResource,
    ) -> JoinHandle<NodeOutcome> {
        let state = self.state.clone();
        let handlers = Arc::clone(&self.handlers);

        tokio::spawn(async move {
            let node_id = node.id.clone();
            let execution_id = ctx.execution_id.clone();
            let policy = node.retry.clone().unwrap_or(default_retry);

            if let Err(error) = state
                .start_node(&execution_id, &node_id, Some(input.clone()))
                .await
            {
                return NodeOutcome {
                    node_id,
                    result: DispatchResult::Failed { error },
                };
            }
            emitter
                .emit(ExecutionStep::node_start(&node_id, Some(input.clone())))
                .await;

            let started_at = Utc::now();
            let mut lease = Some(resource);
            let mut attempt: u32 = 0;

            loop {
                let handler = match handlers.get(node.kind) {
                    Ok(handler) => handler,
                    Err(error) => {
                        return Self::report_failure(
                            &state, &emitter, &metrics, &execution_id, &node, error, attempt,
                        )
                        .await;
                    }
                };

                let timer = super::metrics::Timer::start();
                let invocation = handler.execute(&node, input.clone(), &ctx);
                let result = match node.timeout_ms {
                    Some(timeout_ms) => {
                        match tokio::time::timeout(
                            Duration::from_millis(timeout_ms),
                            invocation,
                        )
                        .await
                        {
                            Ok(result) => result,
                            Err(_) => Err(EngineError::node_execution_failed(
                                node_id.as_str(),
                                format!("handler exceeded {} ms timeout", timeout_ms),
                            )),
                        }
                    }
                    None => invocation.await,
                };
                let elapsed_secs = timer.elapsed_secs();

                match result {
                    Ok(output) => {
                        if let Some(lease) = lease.as_mut() {
                            lease.nodes_executed += 1;
                            lease.busy_ms += (elapsed_secs * 1000.0) as u64;
                        }
                        let output_opt = (!output.is_null()).then_some(output);
                        let usage = ResourceUsage {
                            memory_bytes: 0,
                            cpu_time_ms: (elapsed_secs * 1000.0) as u64,
                        };
                        let node_result = NodeResult::completed(
                            node_id.as_str(),
                            output_opt.clone(),
                            started_at,
                            attempt,
                            usage,
                        );
                        let duration_ms = node_result.metadata.duration_ms;
                        if let Err(error) =
                            state.complete_node(&execution_id, &node_id, node_result).await
                        {
                            return NodeOutcome {
                                node_id,
                                result: DispatchResult::Failed { error },
                            };
                        }
                        metrics.record_node_execution(
                            node.kind.as_str(),
                            "completed",
                            elapsed_secs,
                        );
                        emitter
                            .emit(ExecutionStep::node_complete(
                                &node_id,
                                output_opt.clone(),
                                duration_ms,
                            ))
                            .await;
                        return NodeOutcome {
                            node_id,
                            result: DispatchResult::Completed { output: output_opt },
                        };
                    }
                    Err(err) => {
                        let mut error = EngineError::wrap_node_failure(&node_id, err);
                        attempt += 1;
                        error.context.retry_count = Some(attempt.saturating_sub(1));
                        error.context.max_retries = Some(policy.max_attempts);
                        error.context.node_kind = Some(node.kind.as_str().to_string());

                        let may_retry = attempt < policy.max_attempts
                            && retry::is_retryable(&policy, &error)
                            && !controls.is_cancelled();
                        if !may_retry {
                            if error.kind == ErrorKind::NodeExecutionFailed
                                && attempt >= policy.max_attempts
                            {
                                error.retryable = false;
                            }
                            return Self::report_failure(
                                &state, &emitter, &metrics, &execution_id, &node, error, attempt,
                            )
                            .await;
                        }

                        debug!(
                            execution_id,
                            node_id = %node_id,
                            attempt,
                            "node failed, retrying after backoff"
                        );
                        // The backoff sleep must not hold a resource slot.
                        drop(lease.take());
                        let delay = retry::backoff_delay(&policy, attempt);
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = controls.cancelled_wait() => {
                                return Self::report_failure(
                                    &state, &emitter, &metrics, &execution_id, &node, error,
                                    attempt,
                                )
                                .await;
                            }
                        }
                        match pool.acquire().await {
                            Ok(acquired) => lease = Some(acquired),
                            Err(pool_err) => {
                                return Self::report_failure(
                                    &state, &emitter, &metrics, &execution_id, &node, pool_err,
                                    attempt,
                                )
                                .await;
                            }
                        }
                    }
                }
            }
        })
    }

    async fn report_failure(
        state: &StateManager,
        emitter: &StepEmitter,
        metrics: &MetricsCollector,
        execution_id: &str,
        node: &Node,
        mut error: EngineError,
        attempts: u32,
    ) -> NodeOutcome {
        error.context.execution_id = Some(execution_id.to_string());
        error.context.retry_count = Some(attempts.saturating_sub(1));
        if let Err(state_err) = state.fail_node(execution_id, &node.id, &error).await {
            warn!(execution_id, node_id = %node.id, error = %state_err, "failed to record node failure");
        }
        metrics.record_node_execution(node.kind.as_str(), "failed", 0.0);
        metrics.record_error(error.code());
        emitter.emit(ExecutionStep::node_error(&node.id, &error)).await;
        error!(execution_id, node_id = %node.id, error = %error, "node failed");
        NodeOutcome {
            node_id: node.id.clone(),
            result: DispatchResult::Failed { error },
        }
    }

    /// Decide the terminal status, build the report, and record history.
    async fn finish(
        &self,
        graph: &ExecutableGraph,
        config: &ExecutorConfig,
        execution_id: &str,
        started_at: DateTime<Utc>,
        controls: &Arc<ExecutionControls>,
        metrics: &Arc<MetricsCollector>,
        run: RunState,
    ) -> Result<ExecutionReport> {
        let (final_status, error) = if run.timed_out {
            (
                ExecutionStatus::Cancelled,
                Some(EngineError::timeout(format!(
                    "execution exceeded {} ms",
                    config.timeout_ms
                ))),
            )
        } else if controls.is_cancelled() {
            (
                ExecutionStatus::Cancelled,
                Some(EngineError::cancelled("execution cancelled")),
            )
        } else if !run.failures.is_empty() {
            let error = if run.failures.len() == 1 {
                run.failures.into_iter().next().expect("one failure")
            } else {
                EngineError::multiple(run.failures)
            };
            (ExecutionStatus::Failed, Some(error))
        } else {
            (ExecutionStatus::Completed, None)
        };

        let mut error = error;
        if let Some(err) = &mut error {
            err.context.execution_id = Some(execution_id.to_string());
            err.context.graph_id = Some(graph.definition.id.clone());
            err.context.execution_status = Some(final_status.as_str().to_string());
            err.context.node_count = Some(graph.definition.node_count());
            err.context.completed_nodes = Some(run.completed.len());
            err.context.failed_nodes = Some(run.failed.len());
        }

        if let Err(status_err) = self
            .state
            .update_execution_status(execution_id, final_status)
            .await
        {
            warn!(execution_id, error = %status_err, "failed to record terminal status");
        }

        let state_snapshot = self
            .state
            .get_current_state(execution_id)
            .await
            .ok_or_else(|| {
                EngineError::state_inconsistent(format!(
                    "state for execution {} disappeared",
                    execution_id
                ))
            })?;
        let checkpoints = self.state.get_checkpoints(execution_id).await;
        let ended_at = Utc::now();
        let duration_ms = (ended_at - started_at).num_milliseconds().max(0) as u64;

        let mut warnings: Vec<String> = Vec::new();
        for node_id in &run.skipped {
            warnings.push(format!("node {} was skipped", node_id));
        }
        for node_id in &state_snapshot.pending {
            if !run.skipped.contains(node_id) {
                warnings.push(format!("node {} never became ready", node_id));
            }
        }
        for node_id in &run.consumed_failures {
            warnings.push(format!(
                "node {} failed; the failure was consumed by an error edge",
                node_id
            ));
        }

        let result: HashMap<String, Value> = state_snapshot
            .data_state
            .iter()
            .filter(|(key, _)| !key.ends_with("_input"))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let summary = ExecutionSummary {
            execution_id: execution_id.to_string(),
            graph_id: graph.definition.id.clone(),
            graph_name: graph.definition.name.clone(),
            started_at,
            ended_at,
            duration_ms,
            status: final_status,
            node_count: graph.definition.node_count(),
            completed_nodes: state_snapshot.completed.len(),
            failed_nodes: state_snapshot.failed.len(),
            strategy: config.strategy,
            checkpoints_count: checkpoints.len(),
        };

        metrics.record_execution_end(final_status.as_str(), duration_ms as f64 / 1000.0);
        self.history.write().push(summary.clone());
        info!(
            execution_id,
            status = %final_status,
            completed = summary.completed_nodes,
            failed = summary.failed_nodes,
            duration_ms,
            "execution finished"
        );

        Ok(ExecutionReport {
            success: final_status == ExecutionStatus::Completed,
            result,
            execution: summary,
            node_results: state_snapshot.node_results.clone(),
            execution_path: run.completion_order,
            performance: state_snapshot.performance_metrics(),
            checkpoints,
            warnings,
            error,
        })
    }

    fn deadline_passed(deadline: Option<Instant>) -> bool {
        deadline.map(|d| Instant::now() >= d).unwrap_or(false)
    }

    async fn deadline_sleep(deadline: Option<Instant>) {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    Ready,
    Waiting,
    /// Will never become ready in this run.
    Blocked,
}

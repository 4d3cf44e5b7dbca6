//! Workflow runtime facade
//!
//! Ties the builder, state manager, and executor together behind the
//! operations an embedder calls: execute, stream, validate, build, lifecycle
//! controls, history, and capabilities. Holds no process-wide state; every
//! collaborator is constructor-wired.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::engine::{
    AgentRegistry, ExecutionContext, ExecutionInput, ExecutionReport, ExecutionSummary, Executor,
    ExecutorConfig, HandlerRegistry, ToolRegistry,
};
use crate::error::EngineError;
use crate::graph::{
    EdgeKind, ExecutableGraph, GraphBuilder, GraphDefinition, NodeKind, ValidationReport,
};
use crate::state::{
    Checkpoint, ExecutionState, ExecutionStatus, NodeResult, PerformanceMetrics, StateManager,
    StateManagerConfig,
};
use crate::stream::{ExecutionStep, StepEmitter};
use crate::Result;

/// Install a process-wide `tracing` subscriber honoring `RUST_LOG`.
///
/// Idempotent: a subscriber installed earlier (by the embedder or another
/// test) wins silently. Called by [`WorkflowRuntime::initialize`]; also
/// handy directly in tests and binaries.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// Input shape for one workflow run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRequest {
    /// Workflow-level input, surfaced to `input` nodes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Correlation id for the caller's session. Required.
    pub session_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Inline graph definition; used when no compiled graph is supplied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph: Option<GraphDefinition>,

    /// Per-node input overrides.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub node_inputs: HashMap<String, Value>,

    /// Loose executor config overrides.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_config: Option<Value>,

    /// Whether the caller intends to consume the step stream.
    #[serde(default)]
    pub streaming: bool,
}

impl WorkflowRequest {
    /// A minimal request carrying workflow data.
    pub fn new(session_id: impl Into<String>, data: Value) -> Self {
        Self {
            data: Some(data),
            session_id: session_id.into(),
            ..Self::default()
        }
    }

    /// Reject requests missing a session or carrying no input at all.
    pub fn validate(&self) -> Result<()> {
        if self.session_id.is_empty() {
            return Err(EngineError::configuration_invalid(
                "sessionId is required",
            ));
        }
        if self.data.is_none() && self.node_inputs.is_empty() {
            return Err(EngineError::configuration_invalid(
                "request carries neither data nor nodeInputs",
            ));
        }
        Ok(())
    }
}

/// Output shape for one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowResponse {
    pub success: bool,

    /// `node id -> output`.
    pub result: HashMap<String, Value>,

    pub execution: ExecutionSummary,
    pub node_results: HashMap<String, NodeResult>,
    pub execution_path: Vec<String>,
    pub performance: PerformanceMetrics,
    pub checkpoints: Vec<Checkpoint>,
    pub warnings: Vec<String>,

    /// Sanitized error when the run did not complete cleanly.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EngineError>,
}

impl From<ExecutionReport> for WorkflowResponse {
    fn from(report: ExecutionReport) -> Self {
        Self {
            success: report.success,
            result: report.result,
            execution: report.execution,
            node_results: report.node_results,
            execution_path: report.execution_path,
            performance: report.performance,
            checkpoints: report.checkpoints,
            warnings: report.warnings,
            error: report.error.map(|e| e.sanitized()),
        }
    }
}

/// Filters for [`WorkflowRuntime::execution_history`].
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub graph_id: Option<String>,
    pub status: Option<ExecutionStatus>,
    pub limit: Option<usize>,
}

/// What this runtime supports; stable, introspectable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub strategies: Vec<String>,
    pub node_kinds: Vec<String>,
    pub edge_kinds: Vec<String>,
    pub checkpointing: bool,
    pub streaming: bool,
    pub pause_resume: bool,
}

/// The engine's embedder-facing surface.
pub struct WorkflowRuntime {
    state: StateManager,
    executor: Arc<Executor>,
    default_config: ExecutorConfig,
    initialized: AtomicBool,
    agents: Option<Arc<dyn AgentRegistry>>,
    tools: Option<Arc<dyn ToolRegistry>>,
}

impl WorkflowRuntime {
    /// Runtime over the in-memory backend with default config and handlers.
    pub fn new() -> Self {
        Self::with_config(ExecutorConfig::default(), StateManagerConfig::default())
    }

    /// Runtime with explicit executor defaults and state-manager tuning.
    pub fn with_config(
        default_config: ExecutorConfig,
        state_config: StateManagerConfig,
    ) -> Self {
        let state = StateManager::new(state_config);
        let executor = Arc::new(Executor::new(
            state.clone(),
            Arc::new(HandlerRegistry::with_defaults()),
        ));
        Self {
            state,
            executor,
            default_config,
            initialized: AtomicBool::new(false),
            agents: None,
            tools: None,
        }
    }

    /// Wire an agent registry.
    pub fn with_agents(mut self, agents: Arc<dyn AgentRegistry>) -> Self {
        self.agents = Some(agents);
        self
    }

    /// Wire a tool registry.
    pub fn with_tools(mut self, tools: Arc<dyn ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Replace the handler table, e.g. to implement `custom` nodes.
    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.executor = Arc::new(Executor::new(self.state.clone(), Arc::new(handlers)));
        self
    }

    /// The state manager, for event subscriptions and direct reads.
    pub fn state(&self) -> &StateManager {
        &self.state
    }

    /// Prepare the runtime. Idempotent.
    pub async fn initialize(&self) -> Result<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        init_tracing();
        info!("workflow runtime initialized");
        Ok(())
    }

    /// Validate a definition without building it.
    pub fn validate_graph(&self, definition: &GraphDefinition) -> ValidationReport {
        crate::graph::GraphValidator::validate(definition)
    }

    /// Compile a definition into an executable graph, merging the request
    /// config over the runtime defaults.
    pub fn build_graph(
        &self,
        definition: GraphDefinition,
        config: Option<ExecutorConfig>,
    ) -> Result<ExecutableGraph> {
        GraphBuilder::from_definition(definition)
            .build_executable(Some(config.unwrap_or_else(|| self.default_config.clone())))
    }

    /// Execute a compiled graph to completion.
    pub async fn execute_graph(
        &self,
        graph: &ExecutableGraph,
        request: WorkflowRequest,
    ) -> Result<WorkflowResponse> {
        request.validate()?;
        let (input, ctx) = self.prepare(&request);
        let report = self.executor.execute(graph, input, ctx).await?;
        Ok(report.into())
    }

    /// Execute a request carrying its own graph definition.
    pub async fn execute(&self, request: WorkflowRequest) -> Result<WorkflowResponse> {
        request.validate()?;
        let definition = request.graph.clone().ok_or_else(|| {
            EngineError::configuration_invalid("request carries no graph definition")
        })?;
        let config = match &request.execution_config {
            Some(value) => Some(ExecutorConfig::from_value(value.clone())?),
            None => None,
        };
        let graph = self.build_graph(definition, config)?;
        self.execute_graph(&graph, request).await
    }

    /// Execute a compiled graph, streaming steps as they happen.
    ///
    /// The returned stream is finite and non-restartable: it ends when the
    /// execution reaches a terminal status or the observer stops reading.
    pub async fn stream_graph(
        &self,
        graph: ExecutableGraph,
        request: WorkflowRequest,
    ) -> Result<(String, ReceiverStream<ExecutionStep>)> {
        request.validate()?;
        let (input, mut ctx) = self.prepare(&request);
        let execution_id = format!("exec-{}", uuid::Uuid::new_v4());
        ctx.execution_id = execution_id.clone();

        let (emitter, rx) = StepEmitter::channel();
        let executor = Arc::clone(&self.executor);
        tokio::spawn(async move {
            if let Err(err) = executor
                .execute_with_steps(&graph, input, ctx, emitter)
                .await
            {
                warn!(error = %err, "streamed execution failed before running");
            }
        });

        Ok((execution_id, ReceiverStream::new(rx)))
    }

    /// Current state snapshot of an execution, if it is still retained.
    pub async fn execution_state(&self, execution_id: &str) -> Option<ExecutionState> {
        self.state.get_current_state(execution_id).await
    }

    /// Pause an active execution. False when unknown.
    pub async fn pause_execution(&self, execution_id: &str) -> bool {
        self.executor.pause(execution_id).await
    }

    /// Resume a paused execution. False when unknown.
    pub async fn resume_execution(&self, execution_id: &str) -> bool {
        self.executor.resume(execution_id).await
    }

    /// Cancel an active execution. False when unknown.
    pub async fn cancel_execution(&self, execution_id: &str) -> bool {
        self.executor.cancel(execution_id).await
    }

    /// Past execution summaries, newest last, filtered.
    pub fn execution_history(&self, filter: HistoryFilter) -> Vec<ExecutionSummary> {
        let mut history: Vec<ExecutionSummary> = self
            .executor
            .history()
            .into_iter()
            .filter(|summary| {
                filter
                    .graph_id
                    .as_ref()
                    .map(|id| &summary.graph_id == id)
                    .unwrap_or(true)
                    && filter
                        .status
                        .map(|status| summary.status == status)
                        .unwrap_or(true)
            })
            .collect();
        if let Some(limit) = filter.limit {
            let excess = history.len().saturating_sub(limit);
            history.drain(..excess);
        }
        history
    }

    /// Static capability description.
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            strategies: ["sequential", "parallel", "hybrid", "adaptive"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            node_kinds: NodeKind::ALL.iter().map(|k| k.as_str().to_string()).collect(),
            edge_kinds: [
                EdgeKind::Data,
                EdgeKind::Control,
                EdgeKind::Conditional,
                EdgeKind::Error,
                EdgeKind::Loop,
            ]
            .iter()
            .map(|k| k.as_str().to_string())
            .collect(),
            checkpointing: true,
            streaming: true,
            pause_resume: true,
        }
    }

    /// Cancel every active execution and tear down state.
    pub async fn shutdown(&self) {
        self.executor.shutdown().await;
        self.state.shutdown().await;
        self.initialized.store(false, Ordering::SeqCst);
        info!("workflow runtime shut down");
    }

    fn prepare(&self, request: &WorkflowRequest) -> (ExecutionInput, ExecutionContext) {
        let input = ExecutionInput {
            global_input: request.data.clone(),
            node_inputs: request.node_inputs.clone(),
        };
        let mut ctx = ExecutionContext::new(request.session_id.clone());
        ctx.user_id = request.user_id.clone();
        ctx.agents = self.agents.clone();
        ctx.tools = self.tools.clone();
        (input, ctx)
    }
}

impl Default for WorkflowRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_validation() {
        let missing_session = WorkflowRequest {
            data: Some(json!(1)),
            ..WorkflowRequest::default()
        };
        assert!(missing_session.validate().is_err());

        let no_input = WorkflowRequest {
            session_id: "s".to_string(),
            ..WorkflowRequest::default()
        };
        assert!(no_input.validate().is_err());

        let node_inputs_only = WorkflowRequest {
            session_id: "s".to_string(),
            node_inputs: HashMap::from([("n".to_string(), json!(1))]),
            ..WorkflowRequest::default()
        };
        assert!(node_inputs_only.validate().is_ok());
    }

    #[test]
    fn test_capabilities_enumerate_closed_sets() {
        let runtime = WorkflowRuntime::new();
        let caps = runtime.capabilities();
        assert_eq!(caps.node_kinds.len(), 13);
        assert_eq!(caps.edge_kinds.len(), 5);
        assert!(caps.strategies.contains(&"adaptive".to_string()));
    }
}

//! Consumed capabilities: agents, tools, and the per-execution context
//!
//! The engine calls agents and tools only through these narrow traits;
//! their internals are opaque. In-memory registries are provided for tests
//! and embedding.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::EngineError;
use crate::Result;

/// An agent the engine can invoke. The returned value is the node output.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable agent id.
    fn id(&self) -> &str;

    /// Run the agent against the assembled node input.
    async fn execute(&self, input: Value, parameters: &Value) -> Result<Value>;
}

/// Lookup capability for agents.
pub trait AgentRegistry: Send + Sync {
    fn get(&self, agent_id: &str) -> Option<Arc<dyn Agent>>;
    fn list(&self) -> Vec<String>;
}

/// Invocation capability for tools.
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    /// Execute a tool; the returned value is the node output.
    async fn execute(&self, tool_name: &str, params: Value) -> Result<Value>;
    fn list(&self) -> Vec<String>;
}

/// Ambient context handed to every node handler.
#[derive(Clone, Default)]
pub struct ExecutionContext {
    pub execution_id: String,
    pub session_id: String,
    pub user_id: Option<String>,
    pub agents: Option<Arc<dyn AgentRegistry>>,
    pub tools: Option<Arc<dyn ToolRegistry>>,

    /// Caller-supplied context values, visible to handlers.
    pub variables: serde_json::Map<String, Value>,
}

impl ExecutionContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Self::default()
        }
    }

    pub fn with_agents(mut self, agents: Arc<dyn AgentRegistry>) -> Self {
        self.agents = Some(agents);
        self
    }

    pub fn with_tools(mut self, tools: Arc<dyn ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }
}

type AgentFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;
type AgentFn = Arc<dyn Fn(Value, Value) -> AgentFuture + Send + Sync>;

/// Closure-backed [`Agent`].
pub struct FnAgent {
    id: String,
    function: AgentFn,
}

impl FnAgent {
    pub fn new<F, Fut>(id: impl Into<String>, function: F) -> Self
    where
        F: Fn(Value, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            id: id.into(),
            function: Arc::new(move |input, params| Box::pin(function(input, params))),
        }
    }
}

#[async_trait]
impl Agent for FnAgent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, input: Value, parameters: &Value) -> Result<Value> {
        (self.function)(input, parameters.clone()).await
    }
}

/// Map-backed agent registry.
#[derive(Default)]
pub struct InMemoryAgentRegistry {
    agents: RwLock<HashMap<String, Arc<dyn Agent>>>,
}

impl InMemoryAgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent under its own id.
    pub fn register(&self, agent: Arc<dyn Agent>) {
        self.agents.write().insert(agent.id().to_string(), agent);
    }
}

impl AgentRegistry for InMemoryAgentRegistry {
    fn get(&self, agent_id: &str) -> Option<Arc<dyn Agent>> {
        self.agents.read().get(agent_id).cloned()
    }

    fn list(&self) -> Vec<String> {
        self.agents.read().keys().cloned().collect()
    }
}

type ToolFn = Arc<dyn Fn(Value) -> AgentFuture + Send + Sync>;

/// Map-backed tool registry over closures.
#[derive(Default)]
pub struct InMemoryToolRegistry {
    tools: RwLock<HashMap<String, ToolFn>>,
}

impl InMemoryToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool closure under `name`.
    pub fn register<F, Fut>(&self, name: impl Into<String>, function: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.tools.write().insert(
            name.into(),
            Arc::new(move |params| Box::pin(function(params))),
        );
    }
}

#[async_trait]
impl ToolRegistry for InMemoryToolRegistry {
    async fn execute(&self, tool_name: &str, params: Value) -> Result<Value> {
        let tool = self
            .tools
            .read()
            .get(tool_name)
            .cloned()
            .ok_or_else(|| {
                EngineError::node_execution_failed(
                    "",
                    format!("unknown tool: {}", tool_name),
                )
            })?;
        tool(params).await
    }

    fn list(&self) -> Vec<String> {
        self.tools.read().keys().cloned().collect()
    }
}

//! Typed node handlers
//!
//! One handler per node kind behind a uniform `(node, input, context) ->
//! output` contract. Dispatch is a closed mapping from [`NodeKind`] to
//! handler values, not a class hierarchy. Kinds without dedicated behavior
//! fall back to pass-through.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::EngineError;
use crate::graph::{expr, Node, NodeKind};
use crate::Result;

use super::context::ExecutionContext;

/// Key under which the caller's global input reaches `input` nodes.
pub const GLOBAL_INPUT_KEY: &str = "_globalInput";

/// Key under which a per-node input override reaches its node.
pub const NODE_INPUT_KEY: &str = "_nodeInput";

/// Default sleep for `delay` nodes without an explicit duration.
const DEFAULT_DELAY_MS: u64 = 1_000;

/// Uniform execution contract for one node kind.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// Run the node against its assembled input and return its output.
    async fn execute(&self, node: &Node, input: Value, ctx: &ExecutionContext) -> Result<Value>;
}

/// Closed mapping from node kind to handler.
pub struct HandlerRegistry {
    handlers: HashMap<NodeKind, Arc<dyn NodeHandler>>,
}

impl HandlerRegistry {
    /// Registry with the built-in handler for every kind.
    pub fn with_defaults() -> Self {
        let mut handlers: HashMap<NodeKind, Arc<dyn NodeHandler>> = HashMap::new();
        handlers.insert(NodeKind::Input, Arc::new(InputHandler));
        handlers.insert(NodeKind::Output, Arc::new(OutputHandler));
        handlers.insert(NodeKind::Agent, Arc::new(AgentHandler));
        handlers.insert(NodeKind::Tool, Arc::new(ToolHandler));
        handlers.insert(NodeKind::Transform, Arc::new(TransformHandler));
        handlers.insert(NodeKind::Condition, Arc::new(ConditionHandler));
        handlers.insert(NodeKind::Delay, Arc::new(DelayHandler));
        for kind in [
            NodeKind::Parallel,
            NodeKind::Sequential,
            NodeKind::Merge,
            NodeKind::Split,
            NodeKind::Loop,
            NodeKind::Custom,
        ] {
            handlers.insert(kind, Arc::new(PassthroughHandler));
        }
        Self { handlers }
    }

    /// Replace the handler for one kind, e.g. to give `custom` nodes real
    /// behavior.
    pub fn register(&mut self, kind: NodeKind, handler: Arc<dyn NodeHandler>) {
        self.handlers.insert(kind, handler);
    }

    /// Handler for a kind.
    pub fn get(&self, kind: NodeKind) -> Result<Arc<dyn NodeHandler>> {
        self.handlers.get(&kind).cloned().ok_or_else(|| {
            EngineError::initialization_failed(format!("no handler registered for kind {}", kind))
        })
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Strip the engine-internal keys from an assembled input object.
fn without_internal_keys(input: &Value) -> Value {
    match input {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| k.as_str() != GLOBAL_INPUT_KEY && k.as_str() != NODE_INPUT_KEY)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// `input` nodes surface the workflow input: the per-node override first,
/// then the global input, then the node's own parameters.
struct InputHandler;

#[async_trait]
impl NodeHandler for InputHandler {
    async fn execute(&self, node: &Node, input: Value, _ctx: &ExecutionContext) -> Result<Value> {
        if let Some(explicit) = input.get(NODE_INPUT_KEY) {
            return Ok(explicit.clone());
        }
        if let Some(global) = input.get(GLOBAL_INPUT_KEY) {
            return Ok(global.clone());
        }
        Ok(Value::Object(node.config.parameters.clone()))
    }
}

/// `output` nodes merge predecessor outputs into one object.
struct OutputHandler;

#[async_trait]
impl NodeHandler for OutputHandler {
    async fn execute(&self, _node: &Node, input: Value, _ctx: &ExecutionContext) -> Result<Value> {
        Ok(without_internal_keys(&input))
    }
}

/// `agent` nodes look up the agent by id and return its output.
struct AgentHandler;

#[async_trait]
impl NodeHandler for AgentHandler {
    async fn execute(&self, node: &Node, input: Value, ctx: &ExecutionContext) -> Result<Value> {
        let agent_id = node.config.agent_id.as_deref().filter(|s| !s.is_empty()).ok_or_else(
            || EngineError::node_execution_failed(node.id.as_str(), "agent node has no agent_id"),
        )?;
        let registry = ctx.agents.as_ref().ok_or_else(|| {
            EngineError::node_execution_failed(node.id.as_str(), "no agent registry available")
        })?;
        let agent = registry.get(agent_id).ok_or_else(|| {
            EngineError::node_execution_failed(node.id.as_str(), format!("agent not found: {}", agent_id))
        })?;

        let parameters = Value::Object(node.config.parameters.clone());
        agent
            .execute(without_internal_keys(&input), &parameters)
            .await
    }
}

/// `tool` nodes call the tool registry with input merged under the node's
/// parameters.
struct ToolHandler;

#[async_trait]
impl NodeHandler for ToolHandler {
    async fn execute(&self, node: &Node, input: Value, ctx: &ExecutionContext) -> Result<Value> {
        let tool_name = node.config.tool_name.as_deref().filter(|s| !s.is_empty()).ok_or_else(
            || EngineError::node_execution_failed(node.id.as_str(), "tool node has no tool_name"),
        )?;
        let registry = ctx.tools.as_ref().ok_or_else(|| {
            EngineError::node_execution_failed(node.id.as_str(), "no tool registry available")
        })?;

        let mut params = match without_internal_keys(&input) {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("input".to_string(), other);
                map
            }
        };
        for (key, value) in &node.config.parameters {
            params.insert(key.clone(), value.clone());
        }

        registry.execute(tool_name, Value::Object(params)).await
    }
}

/// `transform` nodes apply a closure, an expression, or a named transform.
struct TransformHandler;

#[async_trait]
impl NodeHandler for TransformHandler {
    async fn execute(&self, node: &Node, input: Value, _ctx: &ExecutionContext) -> Result<Value> {
        let transform = node.config.transform.as_ref().ok_or_else(|| {
            EngineError::node_execution_failed(node.id.as_str(), "transform node has no transform")
        })?;

        let input = without_internal_keys(&input);
        if let Some(function) = &transform.function {
            let parameters = Value::Object(node.config.parameters.clone());
            return function(input, &parameters);
        }
        if let Some(name) = &transform.name {
            return expr::apply_transform(name, input);
        }
        if let Some(expression) = &transform.expression {
            return expr::apply_transform(expression, input);
        }
        Ok(input)
    }
}

/// `condition` nodes evaluate their predicate and report it alongside the
/// input.
struct ConditionHandler;

#[async_trait]
impl NodeHandler for ConditionHandler {
    async fn execute(&self, node: &Node, input: Value, _ctx: &ExecutionContext) -> Result<Value> {
        let predicate = node
            .config
            .parameters
            .get("condition")
            .and_then(Value::as_str)
            .unwrap_or("");
        let input = without_internal_keys(&input);
        let outcome = expr::evaluate_condition(predicate, &input);

        let mut result = Map::new();
        result.insert("condition".to_string(), Value::Bool(outcome));
        result.insert("input".to_string(), input);
        Ok(Value::Object(result))
    }
}

/// `delay` nodes sleep and pass their input through.
struct DelayHandler;

#[async_trait]
impl NodeHandler for DelayHandler {
    async fn execute(&self, node: &Node, input: Value, _ctx: &ExecutionContext) -> Result<Value> {
        let delay_ms = node
            .config
            .parameters
            .get("delay")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_DELAY_MS);
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        Ok(input)
    }
}

/// Fallback for structural kinds: input passes through unchanged.
struct PassthroughHandler;

#[async_trait]
impl NodeHandler for PassthroughHandler {
    async fn execute(&self, _node: &Node, input: Value, _ctx: &ExecutionContext) -> Result<Value> {
        Ok(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::context::{FnAgent, InMemoryAgentRegistry, InMemoryToolRegistry};
    use crate::graph::Transform;
    use serde_json::json;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("session")
    }

    #[tokio::test]
    async fn test_input_handler_prefers_overrides() {
        let registry = HandlerRegistry::with_defaults();
        let handler = registry.get(NodeKind::Input).unwrap();
        let node = Node::new("in", NodeKind::Input).with_parameter("seed", json!(7));

        // Node override wins.
        let out = handler
            .execute(
                &node,
                json!({NODE_INPUT_KEY: "explicit", GLOBAL_INPUT_KEY: "global"}),
                &ctx(),
            )
            .await
            .unwrap();
        assert_eq!(out, json!("explicit"));

        // Then the global input.
        let out = handler
            .execute(&node, json!({GLOBAL_INPUT_KEY: "global"}), &ctx())
            .await
            .unwrap();
        assert_eq!(out, json!("global"));

        // Then the node's own parameters.
        let out = handler.execute(&node, json!({}), &ctx()).await.unwrap();
        assert_eq!(out, json!({"seed": 7}));
    }

    #[tokio::test]
    async fn test_output_handler_strips_internal_keys() {
        let registry = HandlerRegistry::with_defaults();
        let handler = registry.get(NodeKind::Output).unwrap();
        let node = Node::new("out", NodeKind::Output);

        let out = handler
            .execute(
                &node,
                json!({"p": "HELLO", GLOBAL_INPUT_KEY: "hello"}),
                &ctx(),
            )
            .await
            .unwrap();
        assert_eq!(out, json!({"p": "HELLO"}));
    }

    #[tokio::test]
    async fn test_agent_handler_requires_known_agent() {
        let registry = HandlerRegistry::with_defaults();
        let handler = registry.get(NodeKind::Agent).unwrap();
        let mut node = Node::new("a", NodeKind::Agent);
        node.config.agent_id = Some("missing".to_string());

        let agents = Arc::new(InMemoryAgentRegistry::new());
        let ctx = ExecutionContext::new("s").with_agents(agents.clone());

        let err = handler.execute(&node, json!({}), &ctx).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::NodeExecutionFailed);

        agents.register(Arc::new(FnAgent::new("missing", |input, _| async move {
            Ok(json!({"saw": input}))
        })));
        let out = handler.execute(&node, json!({"x": 1}), &ctx).await.unwrap();
        assert_eq!(out, json!({"saw": {"x": 1}}));
    }

    #[tokio::test]
    async fn test_tool_handler_merges_parameters() {
        let registry = HandlerRegistry::with_defaults();
        let handler = registry.get(NodeKind::Tool).unwrap();
        let mut node = Node::new("t", NodeKind::Tool).with_parameter("mode", json!("strict"));
        node.config.tool_name = Some("probe".to_string());

        let tools = Arc::new(InMemoryToolRegistry::new());
        tools.register("probe", |params: Value| async move { Ok(params) });
        let ctx = ExecutionContext::new("s").with_tools(tools);

        let out = handler
            .execute(&node, json!({"upstream": 1}), &ctx)
            .await
            .unwrap();
        assert_eq!(out, json!({"upstream": 1, "mode": "strict"}));
    }

    #[tokio::test]
    async fn test_transform_handler_function_and_named() {
        let registry = HandlerRegistry::with_defaults();
        let handler = registry.get(NodeKind::Transform).unwrap();

        let mut node = Node::new("t", NodeKind::Transform);
        node.config.transform = Some(Transform::function(|input, _| {
            Ok(json!({"wrapped": input}))
        }));
        let out = handler.execute(&node, json!(5), &ctx()).await.unwrap();
        assert_eq!(out, json!({"wrapped": 5}));

        node.config.transform = Some(Transform::named("uppercase"));
        let out = handler.execute(&node, json!("abc"), &ctx()).await.unwrap();
        assert_eq!(out, json!("ABC"));
    }

    #[tokio::test]
    async fn test_condition_handler_reports_predicate() {
        let registry = HandlerRegistry::with_defaults();
        let handler = registry.get(NodeKind::Condition).unwrap();
        let node = Node::new("c", NodeKind::Condition)
            .with_parameter("condition", json!("gt:score>10"));

        let out = handler
            .execute(&node, json!({"score": 50}), &ctx())
            .await
            .unwrap();
        assert_eq!(out["condition"], json!(true));
        assert_eq!(out["input"], json!({"score": 50}));
    }

    #[tokio::test]
    async fn test_delay_handler_sleeps_and_passes_through() {
        let registry = HandlerRegistry::with_defaults();
        let handler = registry.get(NodeKind::Delay).unwrap();
        let node = Node::new("d", NodeKind::Delay).with_parameter("delay", json!(10));

        let start = std::time::Instant::now();
        let out = handler.execute(&node, json!({"v": 1}), &ctx()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(10));
        assert_eq!(out, json!({"v": 1}));
    }

    #[tokio::test]
    async fn test_structural_kinds_pass_through() {
        let registry = HandlerRegistry::with_defaults();
        for kind in [NodeKind::Parallel, NodeKind::Merge, NodeKind::Custom] {
            let handler = registry.get(kind).unwrap();
            let node = Node::new("n", kind);
            let out = handler.execute(&node, json!({"v": 2}), &ctx()).await.unwrap();
            assert_eq!(out, json!({"v": 2}));
        }
    }
}

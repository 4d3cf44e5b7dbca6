//! Node types for workflow graphs

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

/// Kinds of nodes supported in a workflow graph. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Entry point that surfaces workflow input.
    Input,
    /// Terminal node that assembles the final output.
    Output,
    /// Invokes an agent by id.
    Agent,
    /// Invokes a registered tool by name.
    Tool,
    /// Applies a data transform.
    Transform,
    /// Evaluates a predicate over its input.
    Condition,
    /// Structural fan-out marker.
    Parallel,
    /// Structural in-order marker.
    Sequential,
    /// Joins multiple branches.
    Merge,
    /// Splits data across branches.
    Split,
    /// Loop anchor.
    Loop,
    /// Sleeps for a configured duration.
    Delay,
    /// User-defined behavior.
    Custom,
}

impl NodeKind {
    /// All node kinds, in declaration order.
    pub const ALL: [NodeKind; 13] = [
        NodeKind::Input,
        NodeKind::Output,
        NodeKind::Agent,
        NodeKind::Tool,
        NodeKind::Transform,
        NodeKind::Condition,
        NodeKind::Parallel,
        NodeKind::Sequential,
        NodeKind::Merge,
        NodeKind::Split,
        NodeKind::Loop,
        NodeKind::Delay,
        NodeKind::Custom,
    ];

    /// Wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Input => "input",
            NodeKind::Output => "output",
            NodeKind::Agent => "agent",
            NodeKind::Tool => "tool",
            NodeKind::Transform => "transform",
            NodeKind::Condition => "condition",
            NodeKind::Parallel => "parallel",
            NodeKind::Sequential => "sequential",
            NodeKind::Merge => "merge",
            NodeKind::Split => "split",
            NodeKind::Loop => "loop",
            NodeKind::Delay => "delay",
            NodeKind::Custom => "custom",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Function signature for programmatic transforms: `(input, parameters) -> output`.
pub type TransformFn = Arc<dyn Fn(Value, &Value) -> Result<Value> + Send + Sync>;

/// A data transform attached to a node or an edge.
///
/// A transform is one of: a registered name (see [`crate::graph::expr`]), a
/// string expression, or a Rust closure. Closures are skipped on
/// serialization; named and expression transforms survive a JSON round trip.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Transform {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,

    #[serde(skip, default)]
    pub function: Option<TransformFn>,
}

impl Transform {
    /// Reference a registered named transform.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            expression: None,
            function: None,
        }
    }

    /// A string expression evaluated by the expression engine.
    pub fn expression(expression: impl Into<String>) -> Self {
        Self {
            name: None,
            expression: Some(expression.into()),
            function: None,
        }
    }

    /// A programmatic transform.
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(Value, &Value) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: None,
            expression: None,
            function: Some(Arc::new(f)),
        }
    }

    /// Whether any behavior is attached.
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.expression.is_none() && self.function.is_none()
    }
}

impl std::fmt::Debug for Transform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transform")
            .field("name", &self.name)
            .field("expression", &self.expression)
            .field("function", &self.function.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl PartialEq for Transform {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.expression == other.expression
            && self.function.is_some() == other.function.is_some()
    }
}

/// Backoff strategies for node retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Every attempt waits `initial_delay_ms`.
    Fixed,
    /// Each attempt adds `initial_delay_ms` to the previous delay.
    Linear,
    /// Each attempt doubles the previous delay, capped at `max_delay_ms`.
    Exponential,
}

/// Retry policy for a node or an executor default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_strategy: BackoffStrategy,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,

    /// Error codes eligible for retry. Empty means "any retryable error".
    #[serde(default)]
    pub retryable_errors: Vec<String>,

    /// Add up to 10% random jitter to each delay.
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_strategy: BackoffStrategy::Exponential,
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
            retryable_errors: Vec::new(),
            jitter: false,
        }
    }
}

/// Per-node configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Agent id. Required for `agent` nodes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,

    /// Tool name. Required for `tool` nodes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,

    /// Transform. Required for `transform` nodes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transform: Option<Transform>,

    /// Free-form parameters passed to the node handler.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub parameters: serde_json::Map<String, Value>,

    /// Estimated execution duration in milliseconds, used for critical-path
    /// analysis.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_duration_ms: Option<u64>,
}

/// Canvas position, carried for round-tripping visual editors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// A unit of work inside a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier within the graph.
    pub id: String,

    /// Kind of the node.
    pub kind: NodeKind,

    /// Display name. Defaults to the id.
    pub name: String,

    #[serde(default)]
    pub config: NodeConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,

    /// Per-node handler timeout in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Scheduling tie-break. Lower runs first among equally ready nodes.
    #[serde(default)]
    pub priority: i32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

impl Node {
    /// Create a node with the default name (the id) and empty config.
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind,
            config: NodeConfig::default(),
            input_schema: None,
            output_schema: None,
            position: None,
            timeout_ms: None,
            priority: 0,
            retry: None,
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Replace the config.
    pub fn with_config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a single handler parameter.
    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.parameters.insert(key.into(), value);
        self
    }

    /// Set a handler timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Set the scheduling priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Attach a retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }
}

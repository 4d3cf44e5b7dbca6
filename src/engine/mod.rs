//! Execution engine: scheduling, dispatch, resources, and lifecycle
//!
//! The [`Executor`] drives one execution of one compiled graph to a terminal
//! status, honoring the configured strategy, the resource pool bound, the
//! overall timeout, and cooperative pause/resume/cancel.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::graph::RetryPolicy;
use crate::state::CheckpointConfig;
use crate::Result;

pub mod context;
pub mod executor;
pub mod handlers;
pub mod metrics;
pub mod pool;
pub mod retry;

pub use context::{
    Agent, AgentRegistry, ExecutionContext, FnAgent, InMemoryAgentRegistry, InMemoryToolRegistry,
    ToolRegistry,
};
pub use executor::{ExecutionInput, ExecutionReport, ExecutionSummary, Executor};
pub use handlers::{HandlerRegistry, NodeHandler};
pub use pool::{PooledResource, ResourcePool};

/// Scheduling strategies. `hybrid` and `adaptive` currently alias
/// `parallel`; they may specialize without reducing its guarantees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStrategy {
    Sequential,
    Parallel,
    Hybrid,
    Adaptive,
}

impl ExecutionStrategy {
    /// Wire name of this strategy.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStrategy::Sequential => "sequential",
            ExecutionStrategy::Parallel => "parallel",
            ExecutionStrategy::Hybrid => "hybrid",
            ExecutionStrategy::Adaptive => "adaptive",
        }
    }
}

impl std::fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStrategy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sequential" => Ok(ExecutionStrategy::Sequential),
            "parallel" => Ok(ExecutionStrategy::Parallel),
            "hybrid" => Ok(ExecutionStrategy::Hybrid),
            "adaptive" => Ok(ExecutionStrategy::Adaptive),
            other => Err(EngineError::state_inconsistent(format!(
                "unknown execution strategy: {}",
                other
            ))),
        }
    }
}

/// What a node failure does to the rest of the execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorHandling {
    /// First failure aborts the execution.
    FailFast,
    /// Failures are recorded; descendants are skipped but sibling subgraphs
    /// continue.
    Continue,
}

/// Optimization hints. The current engine treats them as advisory no-ops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationConfig {
    pub enabled: bool,

    #[serde(default)]
    pub strategies: Vec<String>,

    pub threshold: f64,
    pub adaptive: bool,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            strategies: Vec::new(),
            threshold: 0.8,
            adaptive: false,
        }
    }
}

/// Full executor configuration. Every field has a sensible default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub strategy: ExecutionStrategy,

    /// Size of the resource pool. Must be greater than zero.
    pub max_concurrency: usize,

    /// Overall wall-clock limit in milliseconds. Zero disables it.
    pub timeout_ms: u64,

    pub error_handling: ErrorHandling,

    /// Default retry policy for nodes without their own.
    pub retry: RetryPolicy,

    pub checkpointing: CheckpointConfig,

    pub optimization: OptimizationConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            strategy: ExecutionStrategy::Parallel,
            max_concurrency: num_cpus::get().max(1),
            timeout_ms: 0,
            error_handling: ErrorHandling::FailFast,
            retry: RetryPolicy::default(),
            checkpointing: CheckpointConfig::default(),
            optimization: OptimizationConfig::default(),
        }
    }
}

impl ExecutorConfig {
    /// Reject configurations the engine cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(EngineError::configuration_invalid(
                "max_concurrency must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Parse a config from loose JSON. An unknown strategy string maps to
    /// `STATE_INCONSISTENT`, everything else malformed to
    /// `CONFIGURATION_INVALID`.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        if let Some(strategy) = value.get("strategy").and_then(|s| s.as_str()) {
            ExecutionStrategy::from_str(strategy)?;
        }
        let config: ExecutorConfig = serde_json::from_value(value).map_err(|e| {
            EngineError::configuration_invalid(format!("invalid executor config: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }
}

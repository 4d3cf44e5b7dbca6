//! Graph data structures and algorithms for workflow definitions
//!
//! This module provides the immutable workflow model (nodes, edges, the
//! definition itself), the fluent builder, validation, the expression engine,
//! and the execution-plan compiler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::Result;

pub mod builder;
pub mod edge;
pub mod expr;
pub mod node;
pub mod plan;
pub mod validation;

pub use builder::GraphBuilder;
pub use edge::{Edge, EdgeCondition, EdgeKind, EdgeTransform};
pub use node::{
    BackoffStrategy, Node, NodeConfig, NodeKind, Position, RetryPolicy, Transform, TransformFn,
};
pub use plan::{ExecutableGraph, ExecutionPhase, ExecutionPlan};
pub use validation::{
    GraphValidator, ValidationIssue, ValidationMetadata, ValidationReport, ValidationSeverity,
};

/// Metadata attached to a graph definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphMetadata {
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Additional metadata as JSON.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, Value>,
}

impl Default for GraphMetadata {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            created: now,
            updated: now,
            description: None,
            extra: serde_json::Map::new(),
        }
    }
}

/// Immutable workflow specification: nodes, edges, schemas, and config.
///
/// Produced by [`GraphBuilder::build`]; shared read-only by every execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDefinition {
    pub id: String,
    pub name: String,
    pub version: String,

    #[serde(default)]
    pub metadata: GraphMetadata,

    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub global_config: serde_json::Map<String, Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl GraphDefinition {
    /// Generate a fresh graph id.
    pub(crate) fn generate_id() -> String {
        format!("graph-{}", Uuid::new_v4())
    }

    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Look up the edge connecting `from` to `to`, if any.
    pub fn edge_between(&self, from: &str, to: &str) -> Option<&Edge> {
        self.edges.iter().find(|e| e.from == from && e.to == to)
    }

    /// Edges entering `id`.
    pub fn incoming<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a Edge> + 'a {
        let id = id.to_string();
        self.edges.iter().filter(move |e| e.to == id)
    }

    /// Edges leaving `id`.
    pub fn outgoing<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a Edge> + 'a {
        let id = id.to_string();
        self.edges.iter().filter(move |e| e.from == id)
    }

    /// All node ids, in insertion order.
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.id.as_str())
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Serialize to canonical JSON. Closure-based transforms are dropped.
    pub fn to_json(&self, pretty: bool) -> Result<String> {
        let text = if pretty {
            serde_json::to_string_pretty(self)?
        } else {
            serde_json::to_string(self)?
        };
        Ok(text)
    }

    /// Deserialize from JSON produced by [`Self::to_json`].
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

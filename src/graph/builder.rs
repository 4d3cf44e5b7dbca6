//! Builder pattern for constructing workflow graphs

use std::collections::HashMap;

use chrono::Utc;
use serde_json::Value;

use crate::error::EngineError;
use crate::Result;

use super::edge::Edge;
use super::node::{Node, NodeConfig, NodeKind, Transform};
use super::plan::ExecutableGraph;
use super::validation::GraphValidator;
use super::{GraphDefinition, GraphMetadata};

/// Fluent builder for a [`GraphDefinition`].
///
/// Assembly-time misuse (duplicate ids, dangling endpoints) fails immediately
/// with `CONFIGURATION_INVALID`; semantic problems are reported by
/// validation at [`build`](Self::build) time.
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    id: String,
    name: String,
    version: String,
    metadata: GraphMetadata,
    nodes: Vec<Node>,
    node_index: HashMap<String, usize>,
    edges: Vec<Edge>,
    edge_index: HashMap<(String, String), usize>,
    global_config: serde_json::Map<String, Value>,
    input_schema: Option<Value>,
    output_schema: Option<Value>,
    tags: Vec<String>,
}

impl GraphBuilder {
    /// Create an empty builder.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: GraphDefinition::generate_id(),
            name: name.into(),
            version: "0.1.0".to_string(),
            metadata: GraphMetadata::default(),
            nodes: Vec::new(),
            node_index: HashMap::new(),
            edges: Vec::new(),
            edge_index: HashMap::new(),
            global_config: serde_json::Map::new(),
            input_schema: None,
            output_schema: None,
            tags: Vec::new(),
        }
    }

    /// Reconstruct a builder from an existing definition, e.g. one parsed
    /// from JSON.
    pub fn from_definition(definition: GraphDefinition) -> Self {
        let mut builder = Self::new(definition.name);
        builder.id = definition.id;
        builder.version = definition.version;
        builder.metadata = definition.metadata;
        builder.global_config = definition.global_config;
        builder.input_schema = definition.input_schema;
        builder.output_schema = definition.output_schema;
        builder.tags = definition.tags;
        for (i, node) in definition.nodes.iter().enumerate() {
            builder.node_index.insert(node.id.clone(), i);
        }
        for (i, edge) in definition.edges.iter().enumerate() {
            builder
                .edge_index
                .insert((edge.from.clone(), edge.to.clone()), i);
        }
        builder.nodes = definition.nodes;
        builder.edges = definition.edges;
        builder
    }

    /// Add a node. Fails when the id is empty or collides with an existing
    /// node.
    pub fn add_node(mut self, node: Node) -> Result<Self> {
        if node.id.is_empty() {
            return Err(EngineError::configuration_invalid("node id must not be empty"));
        }
        if self.node_index.contains_key(&node.id) {
            return Err(EngineError::configuration_invalid(format!(
                "duplicate node id: {}",
                node.id
            )));
        }
        self.node_index.insert(node.id.clone(), self.nodes.len());
        self.nodes.push(node);
        self.touch();
        Ok(self)
    }

    /// Add an edge. Fails when either endpoint is unknown or an edge with
    /// the same `from -> to` already exists.
    pub fn add_edge(mut self, edge: Edge) -> Result<Self> {
        if edge.from.is_empty() || edge.to.is_empty() {
            return Err(EngineError::configuration_invalid(
                "edge endpoints must not be empty",
            ));
        }
        if !self.node_index.contains_key(&edge.from) {
            return Err(EngineError::configuration_invalid(format!(
                "edge references unknown node: {}",
                edge.from
            )));
        }
        if !self.node_index.contains_key(&edge.to) {
            return Err(EngineError::configuration_invalid(format!(
                "edge references unknown node: {}",
                edge.to
            )));
        }
        let key = (edge.from.clone(), edge.to.clone());
        if self.edge_index.contains_key(&key) {
            return Err(EngineError::configuration_invalid(format!(
                "duplicate edge: {} -> {}",
                edge.from, edge.to
            )));
        }
        self.edge_index.insert(key, self.edges.len());
        self.edges.push(edge);
        self.touch();
        Ok(self)
    }

    /// Remove a node and every edge incident on it.
    pub fn remove_node(mut self, id: &str) -> Result<Self> {
        if !self.node_index.contains_key(id) {
            return Err(EngineError::configuration_invalid(format!(
                "unknown node: {}",
                id
            )));
        }
        self.nodes.retain(|n| n.id != id);
        self.edges.retain(|e| e.from != id && e.to != id);
        self.reindex();
        self.touch();
        Ok(self)
    }

    /// Remove the edge from `from` to `to`.
    pub fn remove_edge(mut self, from: &str, to: &str) -> Result<Self> {
        let key = (from.to_string(), to.to_string());
        if !self.edge_index.contains_key(&key) {
            return Err(EngineError::configuration_invalid(format!(
                "unknown edge: {} -> {}",
                from, to
            )));
        }
        self.edges.retain(|e| !(e.from == from && e.to == to));
        self.reindex();
        self.touch();
        Ok(self)
    }

    // Typed helpers, one per node kind that carries required config.

    /// Add an `input` node.
    pub fn add_input_node(self, id: impl Into<String>) -> Result<Self> {
        self.add_node(Node::new(id, NodeKind::Input))
    }

    /// Add an `output` node.
    pub fn add_output_node(self, id: impl Into<String>) -> Result<Self> {
        self.add_node(Node::new(id, NodeKind::Output))
    }

    /// Add an `agent` node. The agent id is required config.
    pub fn add_agent_node(self, id: impl Into<String>, agent_id: impl Into<String>) -> Result<Self> {
        let mut node = Node::new(id, NodeKind::Agent);
        node.config.agent_id = Some(agent_id.into());
        self.add_node(node)
    }

    /// Add a `tool` node. The tool name is required config.
    pub fn add_tool_node(self, id: impl Into<String>, tool_name: impl Into<String>) -> Result<Self> {
        let mut node = Node::new(id, NodeKind::Tool);
        node.config.tool_name = Some(tool_name.into());
        self.add_node(node)
    }

    /// Add a `transform` node. The transform is required config.
    pub fn add_transform_node(self, id: impl Into<String>, transform: Transform) -> Result<Self> {
        let mut node = Node::new(id, NodeKind::Transform);
        node.config.transform = Some(transform);
        self.add_node(node)
    }

    /// Add a `condition` node with its predicate expression.
    pub fn add_condition_node(
        self,
        id: impl Into<String>,
        condition: impl Into<String>,
    ) -> Result<Self> {
        let node = Node::new(id, NodeKind::Condition)
            .with_parameter("condition", Value::String(condition.into()));
        self.add_node(node)
    }

    /// Add a `delay` node sleeping for `delay_ms`.
    pub fn add_delay_node(self, id: impl Into<String>, delay_ms: u64) -> Result<Self> {
        let node =
            Node::new(id, NodeKind::Delay).with_parameter("delay", Value::from(delay_ms));
        self.add_node(node)
    }

    /// Add a `custom` node with free-form parameters.
    pub fn add_custom_node(self, id: impl Into<String>, config: NodeConfig) -> Result<Self> {
        self.add_node(Node::new(id, NodeKind::Custom).with_config(config))
    }

    /// Add a `parallel` fan-out marker node.
    pub fn add_parallel_node(self, id: impl Into<String>) -> Result<Self> {
        self.add_node(Node::new(id, NodeKind::Parallel))
    }

    /// Add a `sequential` ordering marker node.
    pub fn add_sequential_node(self, id: impl Into<String>) -> Result<Self> {
        self.add_node(Node::new(id, NodeKind::Sequential))
    }

    /// Add a `merge` join node.
    pub fn add_merge_node(self, id: impl Into<String>) -> Result<Self> {
        self.add_node(Node::new(id, NodeKind::Merge))
    }

    /// Add a `split` node.
    pub fn add_split_node(self, id: impl Into<String>) -> Result<Self> {
        self.add_node(Node::new(id, NodeKind::Split))
    }

    /// Add a `loop` anchor node.
    pub fn add_loop_node(self, id: impl Into<String>) -> Result<Self> {
        self.add_node(Node::new(id, NodeKind::Loop))
    }

    /// Shallow-merge graph metadata extras.
    pub fn set_metadata(mut self, extra: serde_json::Map<String, Value>) -> Self {
        for (key, value) in extra {
            self.metadata.extra.insert(key, value);
        }
        self.touch();
        self
    }

    /// Shallow-merge the global config.
    pub fn set_global_config(mut self, config: serde_json::Map<String, Value>) -> Self {
        for (key, value) in config {
            self.global_config.insert(key, value);
        }
        self.touch();
        self
    }

    /// Set the workflow input schema.
    pub fn set_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self.touch();
        self
    }

    /// Set the workflow output schema.
    pub fn set_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self.touch();
        self
    }

    /// Set the graph version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Set the graph description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.metadata.description = Some(description.into());
        self
    }

    /// Append tags.
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        self.tags.extend(tags);
        self
    }

    /// Deep copy of this builder under a suffixed graph id.
    pub fn duplicate(&self, suffix: &str) -> Self {
        let mut copy = self.clone();
        copy.id = format!("{}_{}", self.id, suffix);
        copy
    }

    /// Add every node and edge of `other` into this builder.
    ///
    /// With a prefix, every id (including edge endpoints) is rewritten to
    /// `"{prefix}_{id}"`. A surviving collision is resolved silently: the
    /// incoming copy wins its own id and replaces the existing node or edge.
    pub fn merge(mut self, other: &GraphDefinition, prefix: Option<&str>) -> Self {
        let rewrite = |id: &str| match prefix {
            Some(p) => format!("{}_{}", p, id),
            None => id.to_string(),
        };

        for node in &other.nodes {
            let mut node = node.clone();
            node.id = rewrite(&node.id);
            match self.node_index.get(&node.id) {
                Some(&i) => self.nodes[i] = node,
                None => {
                    self.node_index.insert(node.id.clone(), self.nodes.len());
                    self.nodes.push(node);
                }
            }
        }

        for edge in &other.edges {
            let mut edge = edge.clone();
            edge.from = rewrite(&edge.from);
            edge.to = rewrite(&edge.to);
            edge.id = rewrite(&edge.id);
            let key = (edge.from.clone(), edge.to.clone());
            match self.edge_index.get(&key) {
                Some(&i) => self.edges[i] = edge,
                None => {
                    self.edge_index.insert(key, self.edges.len());
                    self.edges.push(edge);
                }
            }
        }

        self.touch();
        self
    }

    /// The definition as currently assembled, without validation. Used by
    /// validation itself and by introspection.
    pub fn definition(&self) -> GraphDefinition {
        GraphDefinition {
            id: self.id.clone(),
            name: self.name.clone(),
            version: self.version.clone(),
            metadata: self.metadata.clone(),
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
            global_config: self.global_config.clone(),
            input_schema: self.input_schema.clone(),
            output_schema: self.output_schema.clone(),
            tags: self.tags.clone(),
        }
    }

    /// Validate and freeze the definition. Fails with `VALIDATION_FAILED`
    /// when any error-severity issue is present.
    pub fn build(self) -> Result<GraphDefinition> {
        let definition = self.definition();
        let report = GraphValidator::validate(&definition);
        if !report.valid {
            let summary = report
                .errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            let mut err =
                EngineError::validation_failed(format!("graph validation failed: {}", summary));
            err.context.graph_id = Some(definition.id.clone());
            return Err(err);
        }
        Ok(definition)
    }

    /// Validate, freeze, and compile an executable plan.
    pub fn build_executable(
        self,
        runtime_config: Option<crate::engine::ExecutorConfig>,
    ) -> Result<ExecutableGraph> {
        let definition = self.build()?;
        ExecutableGraph::compile(definition, runtime_config.unwrap_or_default())
    }

    fn touch(&mut self) {
        self.metadata.updated = Utc::now();
    }

    fn reindex(&mut self) {
        self.node_index.clear();
        for (i, node) in self.nodes.iter().enumerate() {
            self.node_index.insert(node.id.clone(), i);
        }
        self.edge_index.clear();
        for (i, edge) in self.edges.iter().enumerate() {
            self.edge_index
                .insert((edge.from.clone(), edge.to.clone()), i);
        }
    }
}

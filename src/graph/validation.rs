//! Structural, semantic, and performance validation for workflow graphs

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::algo::{connected_components, is_cyclic_directed};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use super::edge::EdgeKind;
use super::node::NodeKind;
use super::GraphDefinition;

/// Node/edge volume beyond which a complexity warning is raised.
const COMPLEXITY_THRESHOLD: usize = 50;

/// Fan-in or fan-out at which a node is flagged as a potential bottleneck.
const FAN_THRESHOLD: usize = 8;

/// Severity of a validation issue. `Error` fails the build; the others do
/// not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationSeverity {
    Info,
    Warning,
    Error,
}

/// One validation finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub code: String,
    pub severity: ValidationSeverity,
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub edge_id: Option<String>,
}

impl ValidationIssue {
    fn error(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            severity: ValidationSeverity::Error,
            message: message.into(),
            node_id: None,
            edge_id: None,
        }
    }

    fn warning(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            severity: ValidationSeverity::Warning,
            message: message.into(),
            node_id: None,
            edge_id: None,
        }
    }

    fn for_node(mut self, node_id: &str) -> Self {
        self.node_id = Some(node_id.to_string());
        self
    }

    fn for_edge(mut self, edge_id: &str) -> Self {
        self.edge_id = Some(edge_id.to_string());
        self
    }
}

/// Performance metadata gathered during validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationMetadata {
    pub node_count: usize,
    pub edge_count: usize,

    /// Longest path length from any source node. Zero for cyclic graphs.
    pub max_depth: usize,

    /// Minimal cyclic paths found. Empty on success.
    pub cyclic_paths: Vec<Vec<String>>,

    /// Nodes with no path from any input-kind node.
    pub unreachable: Vec<String>,

    /// Non-output nodes with no outgoing edges.
    pub dead_ends: Vec<String>,
}

/// Validation outcome: `valid` is false iff any error-severity issue exists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub suggestions: Vec<String>,
    pub metadata: ValidationMetadata,
}

impl Default for ValidationSeverity {
    fn default() -> Self {
        ValidationSeverity::Info
    }
}

/// Stateless validator over a [`GraphDefinition`].
pub struct GraphValidator;

impl GraphValidator {
    /// Run every check and produce a report.
    pub fn validate(definition: &GraphDefinition) -> ValidationReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut suggestions = Vec::new();

        Self::check_node_ids(definition, &mut errors);
        Self::check_edges(definition, &mut errors);
        Self::check_required_config(definition, &mut errors, &mut suggestions);

        let graph = Self::petgraph_of(definition);
        let cyclic_paths = if is_cyclic_directed(&graph) {
            let paths = Self::find_cycles(definition);
            for path in &paths {
                errors.push(ValidationIssue::error(
                    "CYCLE",
                    format!("cycle detected: {}", path.join(" -> ")),
                ));
            }
            paths
        } else {
            Vec::new()
        };

        let unreachable = Self::find_unreachable(definition);
        for id in &unreachable {
            warnings.push(
                ValidationIssue::warning("UNREACHABLE", format!("node {} is unreachable", id))
                    .for_node(id),
            );
        }

        let dead_ends = Self::find_dead_ends(definition);
        for id in &dead_ends {
            warnings.push(
                ValidationIssue::warning(
                    "DEAD_END",
                    format!("node {} has no outgoing edges and is not an output", id),
                )
                .for_node(id),
            );
        }

        if definition.node_count() > 1 && connected_components(&graph) > 1 {
            warnings.push(ValidationIssue::warning(
                "DISCONNECTED",
                "graph has more than one weakly connected component",
            ));
        }

        Self::check_shape_warnings(definition, &mut warnings, &mut suggestions);

        let max_depth = if cyclic_paths.is_empty() {
            Self::max_depth(&graph)
        } else {
            0
        };

        let valid = errors.is_empty();
        ValidationReport {
            valid,
            errors,
            warnings,
            suggestions,
            metadata: ValidationMetadata {
                node_count: definition.node_count(),
                edge_count: definition.edge_count(),
                max_depth,
                cyclic_paths,
                unreachable,
                dead_ends,
            },
        }
    }

    fn check_node_ids(definition: &GraphDefinition, errors: &mut Vec<ValidationIssue>) {
        let mut seen = HashSet::new();
        for node in &definition.nodes {
            if node.id.is_empty() {
                errors.push(ValidationIssue::error("EMPTY_NODE_ID", "node id must not be empty"));
            }
            if !seen.insert(node.id.as_str()) {
                errors.push(
                    ValidationIssue::error(
                        "DUPLICATE_NODE_ID",
                        format!("duplicate node id: {}", node.id),
                    )
                    .for_node(&node.id),
                );
            }
        }
    }

    fn check_edges(definition: &GraphDefinition, errors: &mut Vec<ValidationIssue>) {
        let ids: HashSet<&str> = definition.node_ids().collect();
        for edge in &definition.edges {
            if !ids.contains(edge.from.as_str()) {
                errors.push(
                    ValidationIssue::error(
                        "UNKNOWN_ENDPOINT",
                        format!("edge {} references unknown node {}", edge.id, edge.from),
                    )
                    .for_edge(&edge.id),
                );
            }
            if !ids.contains(edge.to.as_str()) {
                errors.push(
                    ValidationIssue::error(
                        "UNKNOWN_ENDPOINT",
                        format!("edge {} references unknown node {}", edge.id, edge.to),
                    )
                    .for_edge(&edge.id),
                );
            }
            if edge.kind == EdgeKind::Conditional && edge.condition.is_none() {
                errors.push(
                    ValidationIssue::error(
                        "MISSING_CONDITION",
                        format!("conditional edge {} carries no condition", edge.id),
                    )
                    .for_edge(&edge.id),
                );
            }
            if let Some(transform) = &edge.transform {
                let has_behavior = transform.function.is_some()
                    || transform
                        .expression
                        .as_deref()
                        .map(|e| !e.is_empty())
                        .unwrap_or(false);
                if !transform.transform_type.is_empty() && !has_behavior {
                    errors.push(
                        ValidationIssue::error(
                            "EMPTY_TRANSFORM",
                            format!(
                                "edge {} declares transform type {:?} without a function or expression",
                                edge.id, transform.transform_type
                            ),
                        )
                        .for_edge(&edge.id),
                    );
                }
            }
        }
    }

    fn check_required_config(
        definition: &GraphDefinition,
        errors: &mut Vec<ValidationIssue>,
        suggestions: &mut Vec<String>,
    ) {
        for node in &definition.nodes {
            match node.kind {
                NodeKind::Agent => {
                    if node
                        .config
                        .agent_id
                        .as_deref()
                        .map(str::is_empty)
                        .unwrap_or(true)
                    {
                        errors.push(
                            ValidationIssue::error(
                                "MISSING_AGENT_ID",
                                format!("agent node {} has no agent_id", node.id),
                            )
                            .for_node(&node.id),
                        );
                    }
                }
                NodeKind::Tool => {
                    if node
                        .config
                        .tool_name
                        .as_deref()
                        .map(str::is_empty)
                        .unwrap_or(true)
                    {
                        errors.push(
                            ValidationIssue::error(
                                "MISSING_TOOL_NAME",
                                format!("tool node {} has no tool_name", node.id),
                            )
                            .for_node(&node.id),
                        );
                    }
                }
                NodeKind::Transform => {
                    if node
                        .config
                        .transform
                        .as_ref()
                        .map(|t| t.is_empty())
                        .unwrap_or(true)
                    {
                        errors.push(
                            ValidationIssue::error(
                                "MISSING_TRANSFORM",
                                format!("transform node {} has no transform", node.id),
                            )
                            .for_node(&node.id),
                        );
                    }
                }
                _ => {}
            }

            if matches!(node.kind, NodeKind::Agent | NodeKind::Tool) && node.retry.is_none() {
                suggestions.push(format!(
                    "node {} calls an external collaborator but has no retry policy",
                    node.id
                ));
            }
        }
    }

    fn check_shape_warnings(
        definition: &GraphDefinition,
        warnings: &mut Vec<ValidationIssue>,
        suggestions: &mut Vec<String>,
    ) {
        if definition.node_count() + definition.edge_count() > COMPLEXITY_THRESHOLD {
            warnings.push(ValidationIssue::warning(
                "HIGH_COMPLEXITY",
                format!(
                    "graph has {} nodes and {} edges; consider splitting into subgraphs",
                    definition.node_count(),
                    definition.edge_count()
                ),
            ));
        }

        let mut fan_in: HashMap<&str, usize> = HashMap::new();
        let mut fan_out: HashMap<&str, usize> = HashMap::new();
        for edge in &definition.edges {
            *fan_out.entry(edge.from.as_str()).or_insert(0) += 1;
            *fan_in.entry(edge.to.as_str()).or_insert(0) += 1;
        }
        for node in &definition.nodes {
            let fi = fan_in.get(node.id.as_str()).copied().unwrap_or(0);
            let fo = fan_out.get(node.id.as_str()).copied().unwrap_or(0);
            if fi >= FAN_THRESHOLD || fo >= FAN_THRESHOLD {
                warnings.push(
                    ValidationIssue::warning(
                        "BOTTLENECK",
                        format!("node {} has fan-in {} / fan-out {}", node.id, fi, fo),
                    )
                    .for_node(&node.id),
                );
            }
        }

        if !definition.nodes.iter().any(|n| n.kind == NodeKind::Input) {
            warnings.push(ValidationIssue::warning(
                "NO_INPUT_NODE",
                "graph has no input-kind node",
            ));
            suggestions.push("add an input node so workflow input reaches the graph".to_string());
        }
        if !definition.nodes.iter().any(|n| n.kind == NodeKind::Output) {
            warnings.push(ValidationIssue::warning(
                "NO_OUTPUT_NODE",
                "graph has no output-kind node",
            ));
            suggestions.push("add an output node to assemble the final result".to_string());
        }
    }

    fn petgraph_of(definition: &GraphDefinition) -> DiGraph<&str, ()> {
        let mut graph = DiGraph::new();
        let mut indices = HashMap::new();
        for node in &definition.nodes {
            let idx = graph.add_node(node.id.as_str());
            indices.insert(node.id.as_str(), idx);
        }
        for edge in &definition.edges {
            if let (Some(&from), Some(&to)) = (
                indices.get(edge.from.as_str()),
                indices.get(edge.to.as_str()),
            ) {
                graph.add_edge(from, to, ());
            }
        }
        graph
    }

    /// Enumerate minimal cyclic paths by DFS with an explicit recursion
    /// stack. Cycles are deduplicated by their canonical rotation.
    fn find_cycles(definition: &GraphDefinition) -> Vec<Vec<String>> {
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &definition.edges {
            adjacency
                .entry(edge.from.as_str())
                .or_default()
                .push(edge.to.as_str());
        }

        let mut cycles: Vec<Vec<String>> = Vec::new();
        let mut seen_keys: HashSet<Vec<String>> = HashSet::new();
        let mut visited: HashSet<&str> = HashSet::new();

        for node in &definition.nodes {
            if visited.contains(node.id.as_str()) {
                continue;
            }
            let mut stack: Vec<&str> = Vec::new();
            let mut on_stack: HashSet<&str> = HashSet::new();
            Self::dfs_cycles(
                node.id.as_str(),
                &adjacency,
                &mut visited,
                &mut stack,
                &mut on_stack,
                &mut cycles,
                &mut seen_keys,
            );
        }

        cycles
    }

    #[allow(clippy::too_many_arguments)]
    fn dfs_cycles<'a>(
        node: &'a str,
        adjacency: &HashMap<&'a str, Vec<&'a str>>,
        visited: &mut HashSet<&'a str>,
        stack: &mut Vec<&'a str>,
        on_stack: &mut HashSet<&'a str>,
        cycles: &mut Vec<Vec<String>>,
        seen_keys: &mut HashSet<Vec<String>>,
    ) {
        visited.insert(node);
        stack.push(node);
        on_stack.insert(node);

        if let Some(next) = adjacency.get(node) {
            for &succ in next {
                if on_stack.contains(succ) {
                    let start = stack.iter().position(|&n| n == succ).unwrap_or(0);
                    let cycle: Vec<String> =
                        stack[start..].iter().map(|s| s.to_string()).collect();
                    let key = Self::canonical_rotation(&cycle);
                    if seen_keys.insert(key) {
                        cycles.push(cycle);
                    }
                } else if !visited.contains(succ) {
                    Self::dfs_cycles(succ, adjacency, visited, stack, on_stack, cycles, seen_keys);
                }
            }
        }

        stack.pop();
        on_stack.remove(node);
    }

    fn canonical_rotation(cycle: &[String]) -> Vec<String> {
        let min_pos = cycle
            .iter()
            .enumerate()
            .min_by_key(|(_, id)| id.as_str())
            .map(|(i, _)| i)
            .unwrap_or(0);
        cycle[min_pos..]
            .iter()
            .chain(cycle[..min_pos].iter())
            .cloned()
            .collect()
    }

    /// BFS from every input-kind node. Skipped (empty result) when the graph
    /// declares no input nodes; the missing-input warning covers that case.
    fn find_unreachable(definition: &GraphDefinition) -> Vec<String> {
        let sources: Vec<&str> = definition
            .nodes
            .iter()
            .filter(|n| n.kind == NodeKind::Input)
            .map(|n| n.id.as_str())
            .collect();
        if sources.is_empty() {
            return Vec::new();
        }

        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &definition.edges {
            adjacency
                .entry(edge.from.as_str())
                .or_default()
                .push(edge.to.as_str());
        }

        let mut reached: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = sources.into_iter().collect();
        while let Some(node) = queue.pop_front() {
            if !reached.insert(node) {
                continue;
            }
            if let Some(next) = adjacency.get(node) {
                for &succ in next {
                    if !reached.contains(succ) {
                        queue.push_back(succ);
                    }
                }
            }
        }

        definition
            .nodes
            .iter()
            .filter(|n| !reached.contains(n.id.as_str()))
            .map(|n| n.id.clone())
            .collect()
    }

    fn find_dead_ends(definition: &GraphDefinition) -> Vec<String> {
        let has_outgoing: HashSet<&str> =
            definition.edges.iter().map(|e| e.from.as_str()).collect();
        definition
            .nodes
            .iter()
            .filter(|n| n.kind != NodeKind::Output && !has_outgoing.contains(n.id.as_str()))
            .map(|n| n.id.clone())
            .collect()
    }

    /// Longest path from any zero-in-degree node, counted in edges.
    fn max_depth(graph: &DiGraph<&str, ()>) -> usize {
        let order = match petgraph::algo::toposort(graph, None) {
            Ok(order) => order,
            Err(_) => return 0,
        };

        let mut depth: HashMap<NodeIndex, usize> = HashMap::new();
        for idx in order {
            let base = depth.get(&idx).copied().unwrap_or(0);
            for succ in graph.neighbors(idx) {
                let entry = depth.entry(succ).or_insert(0);
                *entry = (*entry).max(base + 1);
            }
        }

        depth.values().copied().max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, GraphBuilder, Node};

    fn linear() -> GraphDefinition {
        GraphBuilder::new("linear")
            .add_input_node("in")
            .unwrap()
            .add_output_node("out")
            .unwrap()
            .add_edge(Edge::new("in", "out"))
            .unwrap()
            .definition()
    }

    #[test]
    fn test_valid_graph_passes() {
        let report = GraphValidator::validate(&linear());
        assert!(report.valid);
        assert!(report.errors.is_empty());
        assert_eq!(report.metadata.node_count, 2);
        assert_eq!(report.metadata.max_depth, 1);
    }

    #[test]
    fn test_cycle_reported_with_path() {
        let def = GraphBuilder::new("cyclic")
            .add_node(Node::new("a", NodeKind::Custom))
            .unwrap()
            .add_node(Node::new("b", NodeKind::Custom))
            .unwrap()
            .add_node(Node::new("c", NodeKind::Custom))
            .unwrap()
            .add_edge(Edge::new("a", "b"))
            .unwrap()
            .add_edge(Edge::new("b", "c"))
            .unwrap()
            .add_edge(Edge::new("c", "a"))
            .unwrap()
            .definition();

        let report = GraphValidator::validate(&def);
        assert!(!report.valid);
        assert_eq!(report.metadata.cyclic_paths.len(), 1);
        assert_eq!(report.metadata.cyclic_paths[0].len(), 3);
        assert!(report.errors.iter().any(|e| e.code == "CYCLE"));
    }

    #[test]
    fn test_conditional_edge_requires_condition() {
        let mut def = linear();
        def.edges[0].kind = EdgeKind::Conditional;
        let report = GraphValidator::validate(&def);
        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| e.code == "MISSING_CONDITION"));
    }

    #[test]
    fn test_unreachable_and_dead_end_warnings() {
        let def = GraphBuilder::new("g")
            .add_input_node("in")
            .unwrap()
            .add_output_node("out")
            .unwrap()
            .add_node(Node::new("island", NodeKind::Custom))
            .unwrap()
            .add_edge(Edge::new("in", "out"))
            .unwrap()
            .definition();

        let report = GraphValidator::validate(&def);
        assert!(report.valid);
        assert_eq!(report.metadata.unreachable, vec!["island".to_string()]);
        assert_eq!(report.metadata.dead_ends, vec!["island".to_string()]);
        assert!(report.warnings.iter().any(|w| w.code == "DISCONNECTED"));
    }

    #[test]
    fn test_bottleneck_warning_on_high_fanout() {
        let mut builder = GraphBuilder::new("fan").add_input_node("hub").unwrap();
        for i in 0..8 {
            builder = builder
                .add_output_node(format!("leaf{}", i))
                .unwrap()
                .add_edge(Edge::new("hub", format!("leaf{}", i)))
                .unwrap();
        }
        let report = GraphValidator::validate(&builder.definition());
        assert!(report
            .warnings
            .iter()
            .any(|w| w.code == "BOTTLENECK" && w.node_id.as_deref() == Some("hub")));
    }

    #[test]
    fn test_missing_retry_suggestion() {
        let def = GraphBuilder::new("g")
            .add_agent_node("a", "agent-1")
            .unwrap()
            .definition();
        let report = GraphValidator::validate(&def);
        assert!(report.suggestions.iter().any(|s| s.contains("retry")));
    }
}

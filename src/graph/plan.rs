//! Execution-plan compilation
//!
//! Turns a validated [`GraphDefinition`] into an [`ExecutableGraph`]: a
//! topological order, a dependency map, and phase/critical-path metadata the
//! executor and monitors consume.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::engine::ExecutorConfig;
use crate::error::EngineError;
use crate::Result;

use super::validation::{GraphValidator, ValidationReport};
use super::GraphDefinition;

/// Dependency list for one node. Fan-in is typically small.
pub type DependencyList = SmallVec<[String; 4]>;

/// One phase of nodes with no dependencies among each other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPhase {
    pub index: usize,
    pub nodes: Vec<String>,
}

/// Compiled scheduling metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Maximal antichains obtained by peeling zero-in-degree layers. Nodes
    /// within a phase may run in parallel.
    pub phases: Vec<ExecutionPhase>,

    /// Longest path by estimated node duration. Monitoring only.
    pub critical_path: Vec<String>,

    /// Sum of estimated durations along the critical path.
    pub estimated_duration_ms: u64,
}

impl ExecutionPlan {
    /// The parallel groups, phase by phase.
    pub fn parallel_groups(&self) -> impl Iterator<Item = &[String]> {
        self.phases.iter().map(|p| p.nodes.as_slice())
    }
}

/// A validated definition plus everything the executor needs to schedule it.
#[derive(Debug, Clone)]
pub struct ExecutableGraph {
    pub definition: Arc<GraphDefinition>,

    /// Topological order. Ties broken by ascending node priority, then id.
    pub sorted_nodes: Vec<String>,

    /// `node -> prerequisite nodes`, over dependency-propagating edges only
    /// (error edges are excluded; they activate on failure).
    pub dependencies: HashMap<String, DependencyList>,

    /// Reverse of `dependencies`.
    pub dependents: HashMap<String, DependencyList>,

    pub plan: ExecutionPlan,
    pub runtime_config: ExecutorConfig,
    pub validation: ValidationReport,
}

impl ExecutableGraph {
    /// Validate `definition` and compile scheduling metadata.
    pub fn compile(definition: GraphDefinition, runtime_config: ExecutorConfig) -> Result<Self> {
        let validation = GraphValidator::validate(&definition);
        if !validation.valid {
            let summary = validation
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

        let (dependencies, dependents) = Self::dependency_maps(&definition);
        let sorted_nodes = Self::topological_order(&definition, &dependencies, &dependents)?;
        let phases = Self::phases(&definition, &dependencies, &dependents);
        let (critical_path, estimated_duration_ms) =
            Self::critical_path(&definition, &sorted_nodes, &dependencies);

        Ok(Self {
            definition: Arc::new(definition),
            sorted_nodes,
            dependencies,
            dependents,
            plan: ExecutionPlan {
                phases,
                critical_path,
                estimated_duration_ms,
            },
            runtime_config,
            validation,
        })
    }

    /// Prerequisites of `node_id`.
    pub fn dependencies_of(&self, node_id: &str) -> &[String] {
        self.dependencies
            .get(node_id)
            .map(|d| d.as_slice())
            .unwrap_or(&[])
    }

    /// Forward dependency maps over non-error edges.
    fn dependency_maps(
        definition: &GraphDefinition,
    ) -> (HashMap<String, DependencyList>, HashMap<String, DependencyList>) {
        let mut dependencies: HashMap<String, DependencyList> = HashMap::new();
        let mut dependents: HashMap<String, DependencyList> = HashMap::new();
        for node in &definition.nodes {
            dependencies.entry(node.id.clone()).or_default();
            dependents.entry(node.id.clone()).or_default();
        }
        for edge in &definition.edges {
            if !edge.kind.propagates_dependency() {
                continue;
            }
            dependencies
                .entry(edge.to.clone())
                .or_default()
                .push(edge.from.clone());
            dependents
                .entry(edge.from.clone())
                .or_default()
                .push(edge.to.clone());
        }
        (dependencies, dependents)
    }

    /// Kahn's algorithm with a (priority, id) min-heap for deterministic
    /// tie-breaking.
    fn topological_order(
        definition: &GraphDefinition,
        dependencies: &HashMap<String, DependencyList>,
        dependents: &HashMap<String, DependencyList>,
    ) -> Result<Vec<String>> {
        let priority_of: HashMap<&str, i32> = definition
            .nodes
            .iter()
            .map(|n| (n.id.as_str(), n.priority))
            .collect();

        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        for node in &definition.nodes {
            in_degree.insert(
                node.id.as_str(),
                dependencies.get(&node.id).map(|d| d.len()).unwrap_or(0),
            );
        }

        let mut heap: BinaryHeap<Reverse<(i32, String)>> = BinaryHeap::new();
        for (id, &degree) in &in_degree {
            if degree == 0 {
                let priority = priority_of.get(id).copied().unwrap_or(0);
                heap.push(Reverse((priority, id.to_string())));
            }
        }

        let mut sorted = Vec::with_capacity(definition.node_count());
        while let Some(Reverse((_, id))) = heap.pop() {
            if let Some(next) = dependents.get(&id) {
                for succ in next {
                    let degree = in_degree
                        .get_mut(succ.as_str())
                        .expect("dependent of a known node");
                    *degree -= 1;
                    if *degree == 0 {
                        let priority = priority_of.get(succ.as_str()).copied().unwrap_or(0);
                        heap.push(Reverse((priority, succ.clone())));
                    }
                }
            }
            sorted.push(id);
        }

        if sorted.len() != definition.node_count() {
            // Validation rejects cycles; loop edges can still starve Kahn.
            return Err(EngineError::validation_failed(
                "dependency graph is not acyclic",
            ));
        }
        Ok(sorted)
    }

    /// Peel zero-in-degree layers into parallel phases.
    fn phases(
        definition: &GraphDefinition,
        dependencies: &HashMap<String, DependencyList>,
        dependents: &HashMap<String, DependencyList>,
    ) -> Vec<ExecutionPhase> {
        let mut in_degree: HashMap<&str, usize> = definition
            .nodes
            .iter()
            .map(|n| {
                (
                    n.id.as_str(),
                    dependencies.get(&n.id).map(|d| d.len()).unwrap_or(0),
                )
            })
            .collect();

        let mut current: Vec<String> = in_degree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(id, _)| id.to_string())
            .collect();
        current.sort();

        let mut phases = Vec::new();
        let mut index = 0;
        while !current.is_empty() {
            let mut next: Vec<String> = Vec::new();
            for id in &current {
                if let Some(succs) = dependents.get(id.as_str()) {
                    for succ in succs {
                        let degree = in_degree
                            .get_mut(succ.as_str())
                            .expect("dependent of a known node");
                        *degree -= 1;
                        if *degree == 0 {
                            next.push(succ.clone());
                        }
                    }
                }
            }
            next.sort();
            phases.push(ExecutionPhase {
                index,
                nodes: std::mem::replace(&mut current, next),
            });
            index += 1;
        }
        phases
    }

    /// Longest path weighted by estimated node duration, reconstructed for
    /// monitoring.
    fn critical_path(
        definition: &GraphDefinition,
        sorted_nodes: &[String],
        dependencies: &HashMap<String, DependencyList>,
    ) -> (Vec<String>, u64) {
        let duration_of: HashMap<&str, u64> = definition
            .nodes
            .iter()
            .map(|n| {
                (
                    n.id.as_str(),
                    n.config.estimated_duration_ms.unwrap_or(0),
                )
            })
            .collect();

        let mut best: HashMap<&str, (u64, Option<&str>)> = HashMap::new();
        for id in sorted_nodes {
            let own = duration_of.get(id.as_str()).copied().unwrap_or(0);
            let (longest_prefix, via) = dependencies
                .get(id)
                .into_iter()
                .flatten()
                .filter_map(|dep| best.get(dep.as_str()).map(|&(d, _)| (d, dep.as_str())))
                .max_by_key(|&(d, _)| d)
                .map(|(d, dep)| (d, Some(dep)))
                .unwrap_or((0, None));
            best.insert(id.as_str(), (longest_prefix + own, via));
        }

        // Later topological positions win ties so the path reaches a sink.
        let mut end: Option<&str> = None;
        let mut total = 0u64;
        for id in sorted_nodes {
            if let Some(&(d, _)) = best.get(id.as_str()) {
                if end.is_none() || d >= total {
                    end = Some(id.as_str());
                    total = d;
                }
            }
        }
        let Some(end) = end else {
            return (Vec::new(), 0);
        };

        let mut path = vec![end.to_string()];
        let mut cursor = end;
        while let Some(&(_, Some(prev))) = best.get(cursor) {
            path.push(prev.to_string());
            cursor = prev;
        }
        path.reverse();
        (path, total)
    }
}

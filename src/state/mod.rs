//! Execution state types and the state manager
//!
//! The state manager is the sole owner of mutable per-execution state. The
//! value types here are what it guards: node membership sets, per-node
//! results, data outputs, and progress.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod checkpoint;
pub mod events;
pub mod manager;

pub use checkpoint::{Checkpoint, CheckpointConfig, CheckpointFrequency, CheckpointMetadata};
pub use events::{EventBus, StateEvent, SubscriptionId};
pub use manager::{StateManager, StateManagerConfig};

/// Status of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    /// Wire name of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Paused => "paused",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a dispatched node, as recorded in results and streamed steps.
///
/// Nodes that never dispatch (a failed or deactivated upstream path) stay in
/// the pending membership set and produce no result; they surface through
/// the report's warnings instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Executing,
    Completed,
    Failed,
}

/// Resources consumed by one node execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub memory_bytes: u64,
    pub cpu_time_ms: u64,
}

/// Timing and retry metadata for one node result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResultMetadata {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub retry_count: u32,
}

/// Outcome of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
    pub node_id: String,
    pub status: NodeStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub metadata: NodeResultMetadata,
    pub resource_usage: ResourceUsage,
}

impl NodeResult {
    /// A completed result.
    pub fn completed(
        node_id: impl Into<String>,
        output: Option<Value>,
        started_at: DateTime<Utc>,
        retry_count: u32,
        resource_usage: ResourceUsage,
    ) -> Self {
        let ended_at = Utc::now();
        Self {
            node_id: node_id.into(),
            status: NodeStatus::Completed,
            output,
            error: None,
            metadata: NodeResultMetadata {
                started_at,
                ended_at,
                duration_ms: (ended_at - started_at).num_milliseconds().max(0) as u64,
                retry_count,
            },
            resource_usage,
        }
    }

    /// A failed result with zeroed resource usage.
    pub fn failed(
        node_id: impl Into<String>,
        error: impl Into<String>,
        started_at: DateTime<Utc>,
        retry_count: u32,
    ) -> Self {
        let ended_at = Utc::now();
        Self {
            node_id: node_id.into(),
            status: NodeStatus::Failed,
            output: None,
            error: Some(error.into()),
            metadata: NodeResultMetadata {
                started_at,
                ended_at,
                duration_ms: (ended_at - started_at).num_milliseconds().max(0) as u64,
                retry_count,
            },
            resource_usage: ResourceUsage::default(),
        }
    }
}

/// Progress of one execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionProgress {
    pub total_nodes: usize,
    pub completed_nodes: usize,
    pub failed_nodes: usize,

    /// `completed / total * 100`.
    pub percentage: f64,

    /// Completed nodes per elapsed second.
    pub throughput: f64,

    /// `avg time per completed node * remaining nodes`; zero before the
    /// first completion.
    pub estimated_remaining_ms: u64,

    /// `avg concurrent executing / min(total, 10) * 100`.
    pub parallel_efficiency: f64,
}

/// Aggregate performance metrics for one execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub duration_ms: u64,
    pub node_times_ms: HashMap<String, u64>,
    pub parallel_efficiency: f64,
    pub resource_utilization: f64,
    pub throughput: f64,
    pub error_rate: f64,
    pub retry_rate: f64,
}

/// Mutable state of one execution. Owned exclusively by the
/// [`StateManager`]; everything here is a plain value so checkpoints are
/// structural deep copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub execution_id: String,
    pub graph_id: String,
    pub status: ExecutionStatus,

    #[serde(rename = "pendingIds")]
    pub pending: HashSet<String>,
    #[serde(rename = "executingIds")]
    pub executing: HashSet<String>,
    #[serde(rename = "completedIds")]
    pub completed: HashSet<String>,
    #[serde(rename = "failedIds")]
    pub failed: HashSet<String>,

    pub node_results: HashMap<String, NodeResult>,

    /// `node id -> output`, plus `"{node id}_input"` entries for explicit
    /// node inputs.
    pub data_state: HashMap<String, Value>,

    pub progress: ExecutionProgress,

    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Caller-supplied context values.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub context: serde_json::Map<String, Value>,

    // Running sums for the parallel-efficiency estimate. Not persisted.
    #[serde(skip, default)]
    pub(crate) concurrency_sample_sum: u64,
    #[serde(skip, default)]
    pub(crate) concurrency_sample_count: u64,
}

impl ExecutionState {
    /// Initial state: every node pending, progress zero.
    pub fn new(
        execution_id: impl Into<String>,
        graph_id: impl Into<String>,
        node_ids: impl IntoIterator<Item = String>,
        context: serde_json::Map<String, Value>,
    ) -> Self {
        let pending: HashSet<String> = node_ids.into_iter().collect();
        let total = pending.len();
        let now = Utc::now();
        Self {
            execution_id: execution_id.into(),
            graph_id: graph_id.into(),
            status: ExecutionStatus::Pending,
            pending,
            executing: HashSet::new(),
            completed: HashSet::new(),
            failed: HashSet::new(),
            node_results: HashMap::new(),
            data_state: HashMap::new(),
            progress: ExecutionProgress {
                total_nodes: total,
                ..ExecutionProgress::default()
            },
            started_at: now,
            updated_at: now,
            context,
            concurrency_sample_sum: 0,
            concurrency_sample_count: 0,
        }
    }

    /// Total node count across the four membership sets.
    pub fn total_nodes(&self) -> usize {
        self.pending.len() + self.executing.len() + self.completed.len() + self.failed.len()
    }

    /// Whether `node_id` is known to this execution.
    pub fn contains(&self, node_id: &str) -> bool {
        self.pending.contains(node_id)
            || self.executing.contains(node_id)
            || self.completed.contains(node_id)
            || self.failed.contains(node_id)
    }

    /// Recompute progress from the membership sets and elapsed time, and
    /// sample current concurrency for the efficiency estimate.
    pub(crate) fn recompute_progress(&mut self) {
        let now = Utc::now();
        let total = self.total_nodes();
        let completed = self.completed.len();

        self.concurrency_sample_sum += self.executing.len() as u64;
        self.concurrency_sample_count += 1;

        let elapsed_secs = ((now - self.started_at).num_milliseconds().max(0) as f64) / 1000.0;
        let throughput = if elapsed_secs > 0.0 {
            completed as f64 / elapsed_secs
        } else {
            0.0
        };

        let remaining = self.pending.len() + self.executing.len();
        let estimated_remaining_ms = if completed > 0 {
            let avg_ms = (elapsed_secs * 1000.0) / completed as f64;
            (avg_ms * remaining as f64) as u64
        } else {
            0
        };

        let avg_concurrent = if self.concurrency_sample_count > 0 {
            self.concurrency_sample_sum as f64 / self.concurrency_sample_count as f64
        } else {
            0.0
        };
        let parallel_efficiency = if total > 0 {
            avg_concurrent / (total.min(10) as f64) * 100.0
        } else {
            0.0
        };

        self.progress = ExecutionProgress {
            total_nodes: total,
            completed_nodes: completed,
            failed_nodes: self.failed.len(),
            percentage: if total > 0 {
                completed as f64 / total as f64 * 100.0
            } else {
                0.0
            },
            throughput,
            estimated_remaining_ms,
            parallel_efficiency,
        };
        self.updated_at = now;
    }

    /// Aggregate performance metrics derived from node results.
    pub fn performance_metrics(&self) -> PerformanceMetrics {
        let duration_ms = (self.updated_at - self.started_at).num_milliseconds().max(0) as u64;
        let node_times_ms: HashMap<String, u64> = self
            .node_results
            .iter()
            .map(|(id, r)| (id.clone(), r.metadata.duration_ms))
            .collect();

        let finished = self.completed.len() + self.failed.len();
        let error_rate = if finished > 0 {
            self.failed.len() as f64 / finished as f64
        } else {
            0.0
        };
        let retried = self
            .node_results
            .values()
            .filter(|r| r.metadata.retry_count > 0)
            .count();
        let retry_rate = if finished > 0 {
            retried as f64 / finished as f64
        } else {
            0.0
        };

        let busy_ms: u64 = node_times_ms.values().sum();
        let resource_utilization = if duration_ms > 0 {
            (busy_ms as f64 / duration_ms as f64).min(1.0)
        } else {
            0.0
        };

        PerformanceMetrics {
            duration_ms,
            node_times_ms,
            parallel_efficiency: self.progress.parallel_efficiency,
            resource_utilization,
            throughput: self.progress.throughput,
            error_rate,
            retry_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ExecutionState {
        ExecutionState::new(
            "exec-1",
            "graph-1",
            ["a", "b", "c"].iter().map(|s| s.to_string()),
            serde_json::Map::new(),
        )
    }

    #[test]
    fn test_initial_state() {
        let state = state();
        assert_eq!(state.status, ExecutionStatus::Pending);
        assert_eq!(state.pending.len(), 3);
        assert_eq!(state.total_nodes(), 3);
        assert_eq!(state.progress.total_nodes, 3);
        assert_eq!(state.progress.percentage, 0.0);
    }

    #[test]
    fn test_progress_recompute() {
        let mut state = state();
        state.pending.remove("a");
        state.completed.insert("a".to_string());
        state.recompute_progress();

        assert_eq!(state.progress.completed_nodes, 1);
        assert!((state.progress.percentage - 33.333).abs() < 0.01);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert!(!ExecutionStatus::Paused.is_terminal());
    }

    #[test]
    fn test_state_round_trip() {
        let mut state = state();
        state
            .data_state
            .insert("a".to_string(), serde_json::json!({"v": 1}));
        let text = serde_json::to_string(&state).unwrap();
        let back: ExecutionState = serde_json::from_str(&text).unwrap();
        assert_eq!(back, state);
    }
}

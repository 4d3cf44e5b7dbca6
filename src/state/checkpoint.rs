//! Checkpoint types and retention configuration
//!
//! A checkpoint is a structural deep copy of an execution's state and data,
//! taken under the per-execution lock so it always satisfies the state
//! invariants.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::ExecutionState;

/// When checkpoints are taken automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointFrequency {
    /// After every node completion.
    Node,
    /// Every `interval_ms` while the execution runs.
    Time,
    /// Only on explicit request.
    Manual,
}

/// Checkpointing configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    pub enabled: bool,
    pub frequency: CheckpointFrequency,
    pub interval_ms: u64,

    /// Backend selector, e.g. `"memory"`. Informational; the backend itself
    /// is wired at construction.
    pub storage: String,

    pub compression: bool,

    /// Most-recent checkpoints kept per execution; oldest are discarded
    /// first.
    pub retention: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            frequency: CheckpointFrequency::Manual,
            interval_ms: 30_000,
            storage: "memory".to_string(),
            compression: false,
            retention: 10,
        }
    }
}

/// Descriptive metadata for a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    pub execution_id: String,
    pub completed_nodes: usize,
    pub progress_percent: f64,
}

/// Point-in-time snapshot of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub timestamp: DateTime<Utc>,

    /// Deep copy of the execution state at checkpoint time.
    pub state: ExecutionState,

    /// Deep copy of the data outputs at checkpoint time.
    pub data: HashMap<String, Value>,

    pub metadata: CheckpointMetadata,
}

impl Checkpoint {
    /// Snapshot `state` under a fresh checkpoint id.
    pub fn capture(state: &ExecutionState, label: Option<String>) -> Self {
        Self {
            id: format!("cp-{}", Uuid::new_v4()),
            timestamp: Utc::now(),
            state: state.clone(),
            data: state.data_state.clone(),
            metadata: CheckpointMetadata {
                label,
                execution_id: state.execution_id.clone(),
                completed_nodes: state.completed.len(),
                progress_percent: state.progress.percentage,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_copies_state_and_data() {
        let mut state = ExecutionState::new(
            "exec-1",
            "graph-1",
            ["a", "b"].iter().map(|s| s.to_string()),
            serde_json::Map::new(),
        );
        state.pending.remove("a");
        state.completed.insert("a".to_string());
        state
            .data_state
            .insert("a".to_string(), serde_json::json!({"v": 1}));
        state.recompute_progress();

        let checkpoint = Checkpoint::capture(&state, Some("after-a".to_string()));
        assert!(checkpoint.id.starts_with("cp-"));
        assert_eq!(checkpoint.metadata.completed_nodes, 1);
        assert_eq!(checkpoint.metadata.execution_id, "exec-1");
        assert_eq!(checkpoint.data.get("a"), Some(&serde_json::json!({"v": 1})));

        // The snapshot is independent of the live state.
        state.data_state.clear();
        assert_eq!(checkpoint.data.len(), 1);
        assert_eq!(checkpoint.state.completed.len(), 1);
    }

    #[test]
    fn test_default_config() {
        let config = CheckpointConfig::default();
        assert!(config.enabled);
        assert_eq!(config.frequency, CheckpointFrequency::Manual);
        assert_eq!(config.retention, 10);
    }
}

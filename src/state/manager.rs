//! Authoritative owner of per-execution state
//!
//! All mutation goes through a per-execution exclusive lock (the write half
//! of a `tokio::sync::RwLock`), so concurrent mutations for one execution
//! serialize in FIFO order while different executions proceed concurrently.
//! Reads take the shared half and always observe a fully committed state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::checkpoint::{InMemoryBackend, PersistenceBackend};
use crate::error::EngineError;
use crate::graph::GraphDefinition;
use crate::Result;

use super::checkpoint::{Checkpoint, CheckpointConfig, CheckpointFrequency};
use super::events::{EventBus, StateEvent};
use super::{ExecutionProgress, ExecutionState, ExecutionStatus, NodeResult, PerformanceMetrics};

/// Tuning for the state manager.
#[derive(Debug, Clone)]
pub struct StateManagerConfig {
    pub checkpointing: CheckpointConfig,

    /// Period of the background sweep that prunes finished executions.
    pub cleanup_interval_ms: u64,

    /// How long terminal executions are retained before the sweep removes
    /// them.
    pub finished_ttl_ms: u64,
}

impl Default for StateManagerConfig {
    fn default() -> Self {
        Self {
            checkpointing: CheckpointConfig::default(),
            cleanup_interval_ms: 60_000,
            finished_ttl_ms: 3_600_000,
        }
    }
}

struct ExecutionEntry {
    state: RwLock<ExecutionState>,
    checkpoints: RwLock<Vec<Checkpoint>>,
    /// Node dispatch times, consumed when synthesizing failure results.
    started_at: Mutex<HashMap<String, DateTime<Utc>>>,
}

/// Sole owner of mutable execution state, checkpoints, and the event bus.
#[derive(Clone)]
pub struct StateManager {
    executions: Arc<DashMap<String, Arc<ExecutionEntry>>>,
    backend: Arc<dyn PersistenceBackend>,
    events: Arc<EventBus>,
    config: StateManagerConfig,
    cleanup_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl StateManager {
    /// Create a manager over the in-memory backend.
    pub fn new(config: StateManagerConfig) -> Self {
        Self::with_backend(config, Arc::new(InMemoryBackend::new()))
    }

    /// Create a manager over a custom persistence backend.
    pub fn with_backend(config: StateManagerConfig, backend: Arc<dyn PersistenceBackend>) -> Self {
        Self {
            executions: Arc::new(DashMap::new()),
            backend,
            events: Arc::new(EventBus::new()),
            config,
            cleanup_task: Arc::new(Mutex::new(None)),
        }
    }

    /// The event bus for lifecycle subscriptions.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Checkpointing configuration in effect.
    pub fn checkpoint_config(&self) -> &CheckpointConfig {
        &self.config.checkpointing
    }

    /// Create the initial state for an execution: every node pending,
    /// progress zero, status `pending`. Fails when the id is already
    /// initialized.
    pub async fn initialize(
        &self,
        execution_id: &str,
        definition: &GraphDefinition,
        context: Option<serde_json::Map<String, Value>>,
    ) -> Result<()> {
        if self.executions.contains_key(execution_id) {
            return Err(EngineError::state_inconsistent(format!(
                "execution {} is already initialized",
                execution_id
            )));
        }

        let state = ExecutionState::new(
            execution_id,
            definition.id.clone(),
            definition.node_ids().map(str::to_string),
            context.unwrap_or_default(),
        );
        self.executions.insert(
            execution_id.to_string(),
            Arc::new(ExecutionEntry {
                state: RwLock::new(state),
                checkpoints: RwLock::new(Vec::new()),
                started_at: Mutex::new(HashMap::new()),
            }),
        );
        self.ensure_cleanup_task();

        debug!(execution_id, graph_id = %definition.id, "execution state initialized");
        Ok(())
    }

    /// Transition the execution status. Terminal statuses admit no further
    /// transitions; on `completed` progress is forced to 100%.
    pub async fn update_execution_status(
        &self,
        execution_id: &str,
        new_status: ExecutionStatus,
    ) -> Result<()> {
        let entry = self.entry(execution_id)?;
        let previous = {
            let mut state = entry.state.write().await;
            if state.status == new_status {
                return Ok(());
            }
            if state.status.is_terminal() {
                return Err(EngineError::state_inconsistent(format!(
                    "execution {} is already {} and cannot become {}",
                    execution_id, state.status, new_status
                )));
            }
            let previous = state.status;
            state.status = new_status;
            state.updated_at = Utc::now();
            if new_status == ExecutionStatus::Completed {
                state.progress.percentage = 100.0;
            }
            previous
        };

        info!(execution_id, from = %previous, to = %new_status, "execution status changed");
        self.events.emit(&StateEvent::StatusChanged {
            execution_id: execution_id.to_string(),
            previous,
            new: new_status,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Move a node from `pending` to `executing`, optionally recording its
    /// assembled input under `"{node_id}_input"`.
    pub async fn start_node(
        &self,
        execution_id: &str,
        node_id: &str,
        input: Option<Value>,
    ) -> Result<()> {
        let entry = self.entry(execution_id)?;
        {
            let mut state = entry.state.write().await;
            if !state.contains(node_id) {
                return Err(EngineError::state_inconsistent(format!(
                    "node {} is not part of execution {}",
                    node_id, execution_id
                )));
            }
            if state.executing.contains(node_id) {
                return Err(EngineError::state_inconsistent(format!(
                    "node {} is already executing",
                    node_id
                )));
            }
            if state.completed.contains(node_id) || state.failed.contains(node_id) {
                return Err(EngineError::state_inconsistent(format!(
                    "node {} already finished",
                    node_id
                )));
            }
            state.pending.remove(node_id);
            state.executing.insert(node_id.to_string());
            if let Some(input) = input {
                state.data_state.insert(format!("{}_input", node_id), input);
            }
            state.recompute_progress();
        }
        entry
            .started_at
            .lock()
            .insert(node_id.to_string(), Utc::now());

        self.events.emit(&StateEvent::NodeStarted {
            execution_id: execution_id.to_string(),
            node_id: node_id.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Move an executing node to `completed` and record its result. When
    /// checkpointing frequency is `node`, a checkpoint is taken afterwards.
    pub async fn complete_node(
        &self,
        execution_id: &str,
        node_id: &str,
        result: NodeResult,
    ) -> Result<()> {
        let entry = self.entry(execution_id)?;
        let duration_ms = result.metadata.duration_ms;
        let snapshot = {
            let mut state = entry.state.write().await;
            if !state.executing.contains(node_id) {
                return Err(EngineError::state_inconsistent(format!(
                    "node {} completed without executing",
                    node_id
                )));
            }
            state.executing.remove(node_id);
            state.completed.insert(node_id.to_string());
            if let Some(output) = &result.output {
                state.data_state.insert(node_id.to_string(), output.clone());
            }
            state.node_results.insert(node_id.to_string(), result);
            state.recompute_progress();
            state.clone()
        };
        entry.started_at.lock().remove(node_id);

        if self.config.checkpointing.enabled
            && self.config.checkpointing.frequency == CheckpointFrequency::Node
        {
            self.store_checkpoint(execution_id, &entry, Checkpoint::capture(&snapshot, None))
                .await;
        }
        self.persist_state(execution_id, &snapshot).await;

        self.events.emit(&StateEvent::NodeCompleted {
            execution_id: execution_id.to_string(),
            node_id: node_id.to_string(),
            duration_ms,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Move an executing node to `failed`, synthesizing its result from the
    /// error. Does not change the execution status.
    pub async fn fail_node(
        &self,
        execution_id: &str,
        node_id: &str,
        error: &EngineError,
    ) -> Result<()> {
        let entry = self.entry(execution_id)?;
        let started_at = entry
            .started_at
            .lock()
            .remove(node_id)
            .unwrap_or_else(Utc::now);
        {
            let mut state = entry.state.write().await;
            if !state.executing.contains(node_id) {
                return Err(EngineError::state_inconsistent(format!(
                    "node {} failed without executing",
                    node_id
                )));
            }
            state.executing.remove(node_id);
            state.failed.insert(node_id.to_string());
            let result = NodeResult::failed(
                node_id,
                error.to_string(),
                started_at,
                error.context.retry_count.unwrap_or(0),
            );
            state.node_results.insert(node_id.to_string(), result);
            state.recompute_progress();
        }

        self.events.emit(&StateEvent::NodeFailed {
            execution_id: execution_id.to_string(),
            node_id: node_id.to_string(),
            error: error.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Snapshot the execution into a new checkpoint, pruning to the
    /// configured retention.
    pub async fn create_checkpoint(
        &self,
        execution_id: &str,
        label: Option<String>,
    ) -> Result<Checkpoint> {
        let entry = self.entry(execution_id)?;
        let snapshot = entry.state.read().await.clone();
        let checkpoint = Checkpoint::capture(&snapshot, label);
        self.store_checkpoint(execution_id, &entry, checkpoint.clone())
            .await;
        Ok(checkpoint)
    }

    /// Replace the live state with a checkpoint's snapshot. The state's
    /// `updated_at` is always reset to now.
    pub async fn restore_from_checkpoint(
        &self,
        execution_id: &str,
        checkpoint_id: &str,
    ) -> Result<()> {
        let entry = self.entry(execution_id)?;
        let restored = {
            let checkpoints = entry.checkpoints.read().await;
            checkpoints
                .iter()
                .find(|c| c.id == checkpoint_id)
                .cloned()
                .ok_or_else(|| {
                    EngineError::state_inconsistent(format!(
                        "unknown checkpoint {} for execution {}",
                        checkpoint_id, execution_id
                    ))
                })?
        };

        let mut state = entry.state.write().await;
        *state = restored.state;
        state.data_state = restored.data;
        state.updated_at = Utc::now();
        info!(execution_id, checkpoint_id, "state restored from checkpoint");
        Ok(())
    }

    /// The output recorded for a node, if any.
    pub async fn get_node_output(&self, execution_id: &str, node_id: &str) -> Option<Value> {
        let entry = self.executions.get(execution_id)?.clone();
        let state = entry.state.read().await;
        state.data_state.get(node_id).cloned()
    }

    /// Record an explicit input for a node under `"{node_id}_input"`.
    pub async fn set_node_input(
        &self,
        execution_id: &str,
        node_id: &str,
        input: Value,
    ) -> Result<()> {
        let entry = self.entry(execution_id)?;
        let mut state = entry.state.write().await;
        if !state.contains(node_id) {
            return Err(EngineError::state_inconsistent(format!(
                "node {} is not part of execution {}",
                node_id, execution_id
            )));
        }
        state.data_state.insert(format!("{}_input", node_id), input);
        state.updated_at = Utc::now();
        Ok(())
    }

    /// Current progress.
    pub async fn get_progress(&self, execution_id: &str) -> Result<ExecutionProgress> {
        let entry = self.entry(execution_id)?;
        let state = entry.state.read().await;
        Ok(state.progress.clone())
    }

    /// Aggregate performance metrics.
    pub async fn get_performance_metrics(&self, execution_id: &str) -> Result<PerformanceMetrics> {
        let entry = self.entry(execution_id)?;
        let state = entry.state.read().await;
        Ok(state.performance_metrics())
    }

    /// All retained checkpoints, oldest first.
    pub async fn get_checkpoints(&self, execution_id: &str) -> Vec<Checkpoint> {
        let Some(entry) = self.executions.get(execution_id).map(|e| e.clone()) else {
            return Vec::new();
        };
        let checkpoints = entry.checkpoints.read().await;
        checkpoints.clone()
    }

    /// Consistent snapshot of the current state.
    pub async fn get_current_state(&self, execution_id: &str) -> Option<ExecutionState> {
        let entry = self.executions.get(execution_id)?.clone();
        let state = entry.state.read().await;
        Some(state.clone())
    }

    /// Ids of all live executions.
    pub fn execution_ids(&self) -> Vec<String> {
        self.executions.iter().map(|e| e.key().clone()).collect()
    }

    /// Remove all state, checkpoints, and the lock for an execution, and
    /// notify the persistence backend.
    pub async fn cleanup(&self, execution_id: &str) -> Result<()> {
        self.executions.remove(execution_id);
        if let Err(err) = self.backend.cleanup(execution_id).await {
            warn!(execution_id, error = %err, "backend cleanup failed");
        }
        debug!(execution_id, "execution state removed");
        Ok(())
    }

    /// Cancel the background sweep, tear down the backend, and drop all
    /// state.
    pub async fn shutdown(&self) {
        if let Some(task) = self.cleanup_task.lock().take() {
            task.abort();
        }
        if let Err(err) = self.backend.shutdown().await {
            warn!(error = %err, "backend shutdown failed");
        }
        self.executions.clear();
    }

    fn entry(&self, execution_id: &str) -> Result<Arc<ExecutionEntry>> {
        self.executions
            .get(execution_id)
            .map(|e| e.clone())
            .ok_or_else(|| {
                EngineError::state_inconsistent(format!("unknown execution: {}", execution_id))
            })
    }

    async fn store_checkpoint(
        &self,
        execution_id: &str,
        entry: &Arc<ExecutionEntry>,
        checkpoint: Checkpoint,
    ) {
        {
            let mut checkpoints = entry.checkpoints.write().await;
            checkpoints.push(checkpoint.clone());
            let retention = self.config.checkpointing.retention.max(1);
            while checkpoints.len() > retention {
                checkpoints.remove(0);
            }
        }
        if let Err(err) = self.backend.store_checkpoint(execution_id, &checkpoint).await {
            warn!(execution_id, error = %err, "checkpoint persistence failed");
        }
        self.events.emit(&StateEvent::CheckpointCreated {
            execution_id: execution_id.to_string(),
            checkpoint_id: checkpoint.id,
            timestamp: Utc::now(),
        });
    }

    async fn persist_state(&self, execution_id: &str, state: &ExecutionState) {
        if let Err(err) = self.backend.store_state(execution_id, state).await {
            warn!(execution_id, error = %err, "state persistence failed");
        }
    }

    /// Spawn the periodic sweep on first use. Terminal executions older
    /// than the configured TTL are removed.
    fn ensure_cleanup_task(&self) {
        let mut guard = self.cleanup_task.lock();
        if guard.is_some() {
            return;
        }
        let executions = Arc::clone(&self.executions);
        let backend = Arc::clone(&self.backend);
        let interval = Duration::from_millis(self.config.cleanup_interval_ms.max(100));
        let ttl_ms = self.config.finished_ttl_ms as i64;

        *guard = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let ids: Vec<String> = executions.iter().map(|e| e.key().clone()).collect();
                for id in ids {
                    let Some(entry) = executions.get(&id).map(|e| e.clone()) else {
                        continue;
                    };
                    let expired = {
                        let state = entry.state.read().await;
                        state.status.is_terminal()
                            && (Utc::now() - state.updated_at).num_milliseconds() > ttl_ms
                    };
                    if expired {
                        executions.remove(&id);
                        if let Err(err) = backend.cleanup(&id).await {
                            warn!(execution_id = %id, error = %err, "backend cleanup failed");
                        }
                        debug!(execution_id = %id, "expired execution pruned");
                    }
                }
            }
        }));
    }
}

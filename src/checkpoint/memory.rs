//! In-memory persistence backend

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;

use crate::state::{Checkpoint, ExecutionState};

use super::PersistenceBackend;

/// Keeps deep copies of states and checkpoints in process memory. The
/// mandatory default backend.
#[derive(Default)]
pub struct InMemoryBackend {
    states: DashMap<String, ExecutionState>,
    checkpoints: DashMap<String, Vec<Checkpoint>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of executions with persisted state.
    pub fn state_count(&self) -> usize {
        self.states.len()
    }
}

#[async_trait]
impl PersistenceBackend for InMemoryBackend {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn store_state(&self, execution_id: &str, state: &ExecutionState) -> Result<()> {
        self.states.insert(execution_id.to_string(), state.clone());
        Ok(())
    }

    async fn load_state(&self, execution_id: &str) -> Result<Option<ExecutionState>> {
        Ok(self.states.get(execution_id).map(|s| s.clone()))
    }

    async fn store_checkpoint(&self, execution_id: &str, checkpoint: &Checkpoint) -> Result<()> {
        self.checkpoints
            .entry(execution_id.to_string())
            .or_default()
            .push(checkpoint.clone());
        Ok(())
    }

    async fn load_checkpoints(&self, execution_id: &str) -> Result<Vec<Checkpoint>> {
        Ok(self
            .checkpoints
            .get(execution_id)
            .map(|c| c.clone())
            .unwrap_or_default())
    }

    async fn cleanup(&self, execution_id: &str) -> Result<()> {
        self.states.remove(execution_id);
        self.checkpoints.remove(execution_id);
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.states.clear();
        self.checkpoints.clear();
        Ok(())
    }
}

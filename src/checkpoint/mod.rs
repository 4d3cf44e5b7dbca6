//! Pluggable persistence for execution state and checkpoints
//!
//! The state manager writes through a [`PersistenceBackend`]; only the
//! in-memory backend ships with the crate. Persistence failures are logged
//! and swallowed by the caller so they never break execution.

mod memory;

pub use memory::InMemoryBackend;

use anyhow::Result;
use async_trait::async_trait;

use crate::state::{Checkpoint, ExecutionState};

/// Storage contract for offloaded state and checkpoints.
///
/// Implementations must be safe to call concurrently for different
/// executions; the state manager serializes calls for a single execution.
#[async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Prepare the backend (connections, schemas).
    async fn initialize(&self) -> Result<()>;

    /// Persist the latest state for an execution.
    async fn store_state(&self, execution_id: &str, state: &ExecutionState) -> Result<()>;

    /// Load the latest persisted state, if any.
    async fn load_state(&self, execution_id: &str) -> Result<Option<ExecutionState>>;

    /// Persist one checkpoint.
    async fn store_checkpoint(&self, execution_id: &str, checkpoint: &Checkpoint) -> Result<()>;

    /// Load all persisted checkpoints for an execution, oldest first.
    async fn load_checkpoints(&self, execution_id: &str) -> Result<Vec<Checkpoint>>;

    /// Drop everything stored for an execution.
    async fn cleanup(&self, execution_id: &str) -> Result<()>;

    /// Release backend resources.
    async fn shutdown(&self) -> Result<()>;
}

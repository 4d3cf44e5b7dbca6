//! Streaming execution events
//!
//! The executor yields [`ExecutionStep`] events in real time over a bounded
//! channel; observers consume them as a [`ReceiverStream`]. Steps are
//! transient and not retained beyond the observer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::state::NodeStatus;

/// Channel capacity for step streams.
pub const STREAM_BUFFER: usize = 128;

/// Kinds of streamed steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    NodeStart,
    NodeComplete,
    NodeError,
    EdgeTraverse,
    Checkpoint,
}

/// One streamed execution event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub id: String,
    pub kind: StepKind,
    pub node_id: String,
    pub timestamp: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    pub status: NodeStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, Value>,
}

impl ExecutionStep {
    fn new(kind: StepKind, node_id: &str, status: NodeStatus) -> Self {
        Self {
            id: format!("step-{}", Uuid::new_v4()),
            kind,
            node_id: node_id.to_string(),
            timestamp: Utc::now(),
            duration_ms: None,
            status,
            input: None,
            output: None,
            error: None,
            error_kind: None,
            metadata: serde_json::Map::new(),
        }
    }

    /// A node is about to run.
    pub fn node_start(node_id: &str, input: Option<Value>) -> Self {
        let mut step = Self::new(StepKind::NodeStart, node_id, NodeStatus::Executing);
        step.input = input;
        step
    }

    /// A node finished successfully.
    pub fn node_complete(node_id: &str, output: Option<Value>, duration_ms: u64) -> Self {
        let mut step = Self::new(StepKind::NodeComplete, node_id, NodeStatus::Completed);
        step.output = output;
        step.duration_ms = Some(duration_ms);
        step
    }

    /// A node failed.
    pub fn node_error(node_id: &str, error: &crate::error::EngineError) -> Self {
        let mut step = Self::new(StepKind::NodeError, node_id, NodeStatus::Failed);
        step.error = Some(error.message.clone());
        step.error_kind = Some(error.code().to_string());
        step
    }

    /// A checkpoint was captured.
    pub fn checkpoint(node_id: &str, checkpoint_id: &str) -> Self {
        let mut step = Self::new(StepKind::Checkpoint, node_id, NodeStatus::Executing);
        step.metadata.insert(
            "checkpoint_id".to_string(),
            Value::String(checkpoint_id.to_string()),
        );
        step
    }
}

/// Cheap, cloneable emitter over an optional step channel.
///
/// A disabled emitter drops every step; a closed receiver drops them too,
/// so a departing observer never blocks execution.
#[derive(Clone, Default)]
pub struct StepEmitter {
    tx: Option<mpsc::Sender<ExecutionStep>>,
}

impl StepEmitter {
    /// Emitter that discards all steps.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Emitter feeding a new stream. Returns the receiver half.
    pub fn channel() -> (Self, mpsc::Receiver<ExecutionStep>) {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        (Self { tx: Some(tx) }, rx)
    }

    /// Send a step, blocking while the observer's buffer is full. Steps are
    /// dropped once the observer goes away.
    pub async fn emit(&self, step: ExecutionStep) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(step).await;
        }
    }

    /// Whether anything is listening.
    pub fn is_enabled(&self) -> bool {
        self.tx.as_ref().map(|tx| !tx.is_closed()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_emitter_channel_delivers_steps() {
        let (emitter, mut rx) = StepEmitter::channel();
        assert!(emitter.is_enabled());

        emitter
            .emit(ExecutionStep::node_start("a", Some(json!({"x": 1}))))
            .await;
        emitter
            .emit(ExecutionStep::node_complete("a", Some(json!(2)), 15))
            .await;

        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind, StepKind::NodeStart);
        assert_eq!(first.node_id, "a");
        assert_eq!(first.status, NodeStatus::Executing);

        let second = rx.recv().await.unwrap();
        assert_eq!(second.kind, StepKind::NodeComplete);
        assert_eq!(second.duration_ms, Some(15));
    }

    #[tokio::test]
    async fn test_disabled_and_closed_emitters_drop_steps() {
        let emitter = StepEmitter::disabled();
        assert!(!emitter.is_enabled());
        emitter.emit(ExecutionStep::node_start("a", None)).await;

        let (emitter, rx) = StepEmitter::channel();
        drop(rx);
        assert!(!emitter.is_enabled());
        emitter.emit(ExecutionStep::node_start("a", None)).await;
    }

    #[test]
    fn test_error_step_carries_taxonomy_code() {
        let error = crate::error::EngineError::node_execution_failed("x", "boom");
        let step = ExecutionStep::node_error("x", &error);
        assert_eq!(step.error_kind.as_deref(), Some("NODE_EXECUTION_FAILED"));
        assert_eq!(step.error.as_deref(), Some("boom"));
        assert_eq!(step.status, NodeStatus::Failed);
    }
}

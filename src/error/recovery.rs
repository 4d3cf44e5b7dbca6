//! Recovery suggestions attached to engine errors
//!
//! Suggestions are advisory only. Confidence is a heuristic over the error
//! kind, observed retry counts, and whether a restorable checkpoint exists.

use serde::{Deserialize, Serialize};

use super::{EngineError, ErrorKind};

/// Advisory recovery actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryAction {
    /// Re-run the failed operation, possibly with a larger budget.
    Retry,
    /// Skip the failed node and continue with independent subgraphs.
    Skip,
    /// Swap in an alternative agent/tool for the failed node.
    Substitute,
    /// Run compensating logic for partially applied effects.
    Compensate,
    /// Restore the most recent checkpoint and resume from there.
    Rollback,
}

/// One suggestion with a confidence score in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoverySuggestion {
    pub action: RecoveryAction,
    pub confidence: f64,
    pub description: String,
}

impl RecoverySuggestion {
    fn new(action: RecoveryAction, confidence: f64, description: impl Into<String>) -> Self {
        Self {
            action,
            confidence: confidence.clamp(0.0, 1.0),
            description: description.into(),
        }
    }
}

/// Compute suggestions for `error`, sorted by descending confidence.
pub fn suggest(error: &EngineError, has_checkpoint: bool) -> Vec<RecoverySuggestion> {
    let mut suggestions = Vec::new();

    let retries_left = match (error.context.retry_count, error.context.max_retries) {
        (Some(count), Some(max)) => count < max,
        _ => true,
    };

    match error.kind {
        ErrorKind::NodeExecutionFailed => {
            if error.retryable && retries_left {
                suggestions.push(RecoverySuggestion::new(
                    RecoveryAction::Retry,
                    0.8,
                    "handler failure is retryable and attempts remain",
                ));
            }
            suggestions.push(RecoverySuggestion::new(
                RecoveryAction::Skip,
                0.5,
                "record the failure and continue independent subgraphs",
            ));
            suggestions.push(RecoverySuggestion::new(
                RecoveryAction::Substitute,
                0.3,
                "swap in an alternative agent or tool for this node",
            ));
        }
        ErrorKind::Timeout => {
            suggestions.push(RecoverySuggestion::new(
                RecoveryAction::Retry,
                0.7,
                "re-run with a longer overall timeout",
            ));
        }
        ErrorKind::ResourceExceeded => {
            suggestions.push(RecoverySuggestion::new(
                RecoveryAction::Retry,
                0.6,
                "retry after resources are released",
            ));
        }
        ErrorKind::StateInconsistent => {
            if has_checkpoint {
                suggestions.push(RecoverySuggestion::new(
                    RecoveryAction::Rollback,
                    0.75,
                    "restore the most recent checkpoint",
                ));
            }
            suggestions.push(RecoverySuggestion::new(
                RecoveryAction::Compensate,
                0.3,
                "reconcile externally applied effects before resuming",
            ));
        }
        ErrorKind::MultipleNodeFailures => {
            if error.retryable {
                suggestions.push(RecoverySuggestion::new(
                    RecoveryAction::Retry,
                    0.55,
                    "retry the retryable subset of failed nodes",
                ));
            }
            if has_checkpoint {
                suggestions.push(RecoverySuggestion::new(
                    RecoveryAction::Rollback,
                    0.5,
                    "restore the most recent checkpoint and re-run",
                ));
            }
            suggestions.push(RecoverySuggestion::new(
                RecoveryAction::Skip,
                0.35,
                "accept partial results from completed subgraphs",
            ));
        }
        ErrorKind::EdgeTraversalFailed => {
            suggestions.push(RecoverySuggestion::new(
                RecoveryAction::Retry,
                0.6,
                "re-evaluate the edge after correcting its inputs",
            ));
        }
        ErrorKind::InitializationFailed => {
            suggestions.push(RecoverySuggestion::new(
                RecoveryAction::Retry,
                0.5,
                "retry once missing collaborators are available",
            ));
        }
        ErrorKind::ValidationFailed | ErrorKind::ConfigurationInvalid => {
            suggestions.push(RecoverySuggestion::new(
                RecoveryAction::Substitute,
                0.2,
                "fix the graph definition before re-running",
            ));
        }
        ErrorKind::Cancelled => {}
    }

    // Checkpoint presence boosts rollback viability for any retryable error.
    if has_checkpoint
        && error.retryable
        && !suggestions
            .iter()
            .any(|s| s.action == RecoveryAction::Rollback)
    {
        suggestions.push(RecoverySuggestion::new(
            RecoveryAction::Rollback,
            0.4,
            "a restorable checkpoint exists",
        ));
    }

    suggestions.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    suggestions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    #[test]
    fn test_suggestions_sorted_by_confidence() {
        let err = EngineError::node_execution_failed("n", "boom");
        let suggestions = suggest(&err, true);

        assert!(!suggestions.is_empty());
        for pair in suggestions.windows(2) {
            assert!(pair[0].confidence >= pair[1].confidence);
        }
        assert_eq!(suggestions[0].action, RecoveryAction::Retry);
    }

    #[test]
    fn test_rollback_requires_checkpoint() {
        let err = EngineError::state_inconsistent("unknown checkpoint");
        let without = suggest(&err, false);
        assert!(without
            .iter()
            .all(|s| s.action != RecoveryAction::Rollback));

        let with = suggest(&err, true);
        assert_eq!(with[0].action, RecoveryAction::Rollback);
    }

    #[test]
    fn test_exhausted_retries_drop_retry_suggestion() {
        let mut err = EngineError::node_execution_failed("n", "boom");
        err.context.retry_count = Some(3);
        err.context.max_retries = Some(3);

        let suggestions = suggest(&err, false);
        assert!(suggestions.iter().all(|s| s.action != RecoveryAction::Retry));
    }

    #[test]
    fn test_cancelled_has_no_suggestions() {
        let err = EngineError::cancelled("stopped");
        assert!(suggest(&err, false).is_empty());
    }
}

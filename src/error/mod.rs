//! Error taxonomy for workflow execution
//!
//! Every failure surfaced by the engine belongs to exactly one [`ErrorKind`]
//! and carries a severity, a retryable flag, and structured context about the
//! execution it arose in.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub mod recovery;

pub use recovery::{RecoveryAction, RecoverySuggestion};

/// Maximum length of a preserved cause/stack string before truncation.
const MAX_CAUSE_LEN: usize = 1_000;

/// Closed set of failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Graph is structurally or semantically invalid (cycles, missing
    /// endpoints, missing required config).
    ValidationFailed,

    /// Pre-execution setup failed (missing collaborators, resource
    /// allocation).
    InitializationFailed,

    /// A node handler returned an error or panicked.
    NodeExecutionFailed,

    /// The overall execution timeout triggered.
    Timeout,

    /// External or timeout-driven cancellation.
    Cancelled,

    /// A pool or quota limit was crossed.
    ResourceExceeded,

    /// Aggregation of two or more node failures under `continue` mode.
    MultipleNodeFailures,

    /// A state transition would violate an invariant, or an unknown
    /// execution/checkpoint id was referenced.
    StateInconsistent,

    /// Edge condition or transform evaluation failed.
    EdgeTraversalFailed,

    /// Assembly-time misuse (duplicate ids, dangling endpoints).
    ConfigurationInvalid,
}

impl ErrorKind {
    /// Stable string code for this kind.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::ValidationFailed => "VALIDATION_FAILED",
            ErrorKind::InitializationFailed => "INITIALIZATION_FAILED",
            ErrorKind::NodeExecutionFailed => "NODE_EXECUTION_FAILED",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::ResourceExceeded => "RESOURCE_EXCEEDED",
            ErrorKind::MultipleNodeFailures => "MULTIPLE_NODE_FAILURES",
            ErrorKind::StateInconsistent => "STATE_INCONSISTENT",
            ErrorKind::EdgeTraversalFailed => "EDGE_TRAVERSAL_FAILED",
            ErrorKind::ConfigurationInvalid => "CONFIGURATION_INVALID",
        }
    }

    /// Default severity assigned to errors of this kind.
    pub fn default_severity(&self) -> Severity {
        match self {
            ErrorKind::Cancelled => Severity::Warning,
            _ => Severity::Error,
        }
    }

    /// Default retryable flag for this kind. Callers refine it where the
    /// taxonomy makes it conditional (retry budget, checkpoint presence).
    pub fn default_retryable(&self) -> bool {
        match self {
            ErrorKind::ValidationFailed
            | ErrorKind::Cancelled
            | ErrorKind::ConfigurationInvalid
            | ErrorKind::StateInconsistent
            | ErrorKind::MultipleNodeFailures => false,
            ErrorKind::InitializationFailed
            | ErrorKind::NodeExecutionFailed
            | ErrorKind::Timeout
            | ErrorKind::ResourceExceeded
            | ErrorKind::EdgeTraversalFailed => true,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Error severity levels.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Structured context attached to an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_kind: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub edge_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_status: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_count: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_nodes: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_nodes: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    /// Free-form context. Sanitization strips sensitive keys from here.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub additional: serde_json::Map<String, Value>,
}

/// Main error type for engine operations.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{}: {}", .kind.code(), .message)]
pub struct EngineError {
    /// Which taxonomy entry this error belongs to.
    pub kind: ErrorKind,

    /// Human-readable message.
    pub message: String,

    /// Severity of the failure.
    pub severity: Severity,

    /// Whether retrying the failed operation may succeed.
    pub retryable: bool,

    /// Structured execution context.
    #[serde(default)]
    pub context: ErrorContext,

    /// Stringified underlying cause, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,

    /// Child errors. Populated for `MultipleNodeFailures`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related: Vec<EngineError>,
}

impl EngineError {
    /// Create an error of the given kind with kind-default severity and
    /// retryability.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            severity: kind.default_severity(),
            retryable: kind.default_retryable(),
            context: ErrorContext::default(),
            cause: None,
            related: Vec::new(),
        }
    }

    /// Graph failed structural or semantic validation.
    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationFailed, message)
    }

    /// Pre-execution setup failed.
    pub fn initialization_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InitializationFailed, message)
    }

    /// A node handler failed.
    pub fn node_execution_failed(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        let mut err = Self::new(ErrorKind::NodeExecutionFailed, message);
        err.context.node_id = Some(node_id.into());
        err
    }

    /// The overall execution deadline expired.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// The execution was cancelled.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    /// A pool or quota limit was crossed.
    pub fn resource_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceExceeded, message)
    }

    /// An invariant-violating transition or unknown execution/checkpoint id.
    pub fn state_inconsistent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StateInconsistent, message)
    }

    /// Edge condition/transform evaluation failed.
    pub fn edge_traversal_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::EdgeTraversalFailed, message)
    }

    /// Assembly-time misuse.
    pub fn configuration_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigurationInvalid, message)
    }

    /// Aggregate two or more failures into a `MultipleNodeFailures` error.
    ///
    /// Severity is the maximum across children, and the aggregate is
    /// retryable iff any child is retryable.
    pub fn multiple(errors: Vec<EngineError>) -> Self {
        debug_assert!(errors.len() >= 2, "aggregate requires at least two failures");
        let severity = errors
            .iter()
            .map(|e| e.severity)
            .max()
            .unwrap_or(Severity::Error);
        let retryable = errors.iter().any(|e| e.retryable);

        let mut by_kind: std::collections::BTreeMap<&'static str, usize> =
            std::collections::BTreeMap::new();
        for e in &errors {
            *by_kind.entry(e.kind.code()).or_insert(0) += 1;
        }
        let summary = by_kind
            .iter()
            .map(|(code, count)| format!("{}x {}", count, code))
            .collect::<Vec<_>>()
            .join(", ");

        let mut err = Self::new(
            ErrorKind::MultipleNodeFailures,
            format!("{} node failures ({})", errors.len(), summary),
        );
        err.severity = severity;
        err.retryable = retryable;
        err.related = errors;
        err
    }

    /// Attach structured context.
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = context;
        self
    }

    /// Override the severity.
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Override the retryable flag.
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Record the underlying cause.
    pub fn with_cause(mut self, cause: impl std::fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }

    /// The stable string code of this error's kind.
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// The most severe error among this one and its children. Children win
    /// ties so aggregates point at a concrete failure.
    pub fn most_severe(&self) -> &EngineError {
        let mut best: &EngineError = self;
        for child in &self.related {
            let candidate = child.most_severe();
            if candidate.severity >= best.severity {
                best = candidate;
            }
        }
        best
    }

    /// Wrap an arbitrary failure into `NodeExecutionFailed`, preserving an
    /// existing `EngineError` unchanged when it already carries a taxonomy
    /// kind other than `NodeExecutionFailed`.
    pub fn wrap_node_failure(node_id: &str, err: EngineError) -> EngineError {
        match err.kind {
            ErrorKind::NodeExecutionFailed => err,
            ErrorKind::Cancelled
            | ErrorKind::Timeout
            | ErrorKind::StateInconsistent
            | ErrorKind::ResourceExceeded => err,
            _ => {
                let mut wrapped =
                    Self::node_execution_failed(node_id, err.message.clone()).with_cause(&err);
                wrapped.context = err.context.clone();
                wrapped.context.node_id = Some(node_id.to_string());
                wrapped
            }
        }
    }

    /// Export-safe copy: strips sensitive keys from `context.additional` and
    /// truncates oversized cause text.
    pub fn sanitized(&self) -> EngineError {
        let mut out = self.clone();
        out.context.additional.retain(|key, _| {
            let lower = key.to_ascii_lowercase();
            !(lower.contains("secret") || lower.contains("credential") || lower.contains("token"))
        });
        if let Some(cause) = &mut out.cause {
            if cause.len() > MAX_CAUSE_LEN {
                cause.truncate(MAX_CAUSE_LEN);
            }
        }
        out.related = out.related.iter().map(|e| e.sanitized()).collect();
        out
    }

    /// Advisory recovery suggestions, sorted by descending confidence.
    pub fn recovery_suggestions(&self, has_checkpoint: bool) -> Vec<RecoverySuggestion> {
        recovery::suggest(self, has_checkpoint)
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::configuration_invalid(format!("serialization error: {}", err)).with_cause(err)
    }
}

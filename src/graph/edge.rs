//! Edge types for workflow graphs

use serde::{Deserialize, Serialize};

use super::node::TransformFn;

/// Kinds of edges supported in a workflow graph. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    /// Conveys the predecessor's output into the successor's input.
    Data,
    /// Ordering only; no data is transferred.
    Control,
    /// Conveys data only when the condition evaluates true.
    Conditional,
    /// Activates only when the source node fails.
    Error,
    /// Loop back-reference.
    Loop,
}

impl EdgeKind {
    /// Whether edges of this kind contribute to forward dependency
    /// computation. Error edges activate on failure and are excluded.
    pub fn propagates_dependency(&self) -> bool {
        !matches!(self, EdgeKind::Error)
    }

    /// Whether edges of this kind carry the predecessor's output.
    pub fn carries_data(&self) -> bool {
        matches!(self, EdgeKind::Data | EdgeKind::Conditional | EdgeKind::Loop)
    }

    /// Wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Data => "data",
            EdgeKind::Control => "control",
            EdgeKind::Conditional => "conditional",
            EdgeKind::Error => "error",
            EdgeKind::Loop => "loop",
        }
    }
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Predicate attached to a conditional edge, evaluated against the source
/// node's output by the expression engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeCondition {
    pub expression: String,
}

impl EdgeCondition {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
        }
    }
}

/// Transform applied to data flowing across an edge before the successor's
/// handler sees it.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct EdgeTransform {
    /// Transform discriminator, e.g. `"function"` or `"expression"`. A
    /// non-empty type must carry a function or a valid expression.
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub transform_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,

    #[serde(skip, default)]
    pub function: Option<TransformFn>,
}

impl EdgeTransform {
    /// A programmatic edge transform.
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(serde_json::Value, &serde_json::Value) -> crate::Result<serde_json::Value>
            + Send
            + Sync
            + 'static,
    {
        Self {
            transform_type: "function".to_string(),
            expression: None,
            function: Some(std::sync::Arc::new(f)),
        }
    }

    /// An expression or named edge transform.
    pub fn expression(expression: impl Into<String>) -> Self {
        Self {
            transform_type: "expression".to_string(),
            expression: Some(expression.into()),
            function: None,
        }
    }
}

impl std::fmt::Debug for EdgeTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeTransform")
            .field("type", &self.transform_type)
            .field("expression", &self.expression)
            .field("function", &self.function.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl PartialEq for EdgeTransform {
    fn eq(&self, other: &Self) -> bool {
        self.transform_type == other.transform_type
            && self.expression == other.expression
            && self.function.is_some() == other.function.is_some()
    }
}

/// A directed connection between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Unique identifier. Defaults to `"{from}->{to}"`.
    pub id: String,

    pub from: String,
    pub to: String,

    pub kind: EdgeKind,

    /// Required for conditional edges.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<EdgeCondition>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transform: Option<EdgeTransform>,

    #[serde(default)]
    pub priority: i32,
}

impl Edge {
    /// Create a data edge with the default id.
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        let from = from.into();
        let to = to.into();
        Self {
            id: format!("{}->{}", from, to),
            from,
            to,
            kind: EdgeKind::Data,
            condition: None,
            transform: None,
            priority: 0,
        }
    }

    /// Create a control edge.
    pub fn control(from: impl Into<String>, to: impl Into<String>) -> Self {
        let mut edge = Self::new(from, to);
        edge.kind = EdgeKind::Control;
        edge
    }

    /// Create a conditional edge.
    pub fn conditional(
        from: impl Into<String>,
        to: impl Into<String>,
        condition: impl Into<String>,
    ) -> Self {
        let mut edge = Self::new(from, to);
        edge.kind = EdgeKind::Conditional;
        edge.condition = Some(EdgeCondition::new(condition));
        edge
    }

    /// Create an error edge, activated only when the source fails.
    pub fn error(from: impl Into<String>, to: impl Into<String>) -> Self {
        let mut edge = Self::new(from, to);
        edge.kind = EdgeKind::Error;
        edge
    }

    /// Create a loop edge.
    pub fn loopback(from: impl Into<String>, to: impl Into<String>) -> Self {
        let mut edge = Self::new(from, to);
        edge.kind = EdgeKind::Loop;
        edge
    }

    /// Attach a transform to this edge.
    pub fn with_transform(mut self, transform: EdgeTransform) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Set the edge priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_id_and_kind() {
        let edge = Edge::new("a", "b");
        assert_eq!(edge.id, "a->b");
        assert_eq!(edge.kind, EdgeKind::Data);
        assert!(edge.kind.propagates_dependency());
        assert!(edge.kind.carries_data());
    }

    #[test]
    fn test_error_edges_excluded_from_dependencies() {
        let edge = Edge::error("risky", "fallback");
        assert!(!edge.kind.propagates_dependency());
        assert!(!edge.kind.carries_data());
    }

    #[test]
    fn test_control_edges_carry_no_data() {
        assert!(EdgeKind::Control.propagates_dependency());
        assert!(!EdgeKind::Control.carries_data());
    }

    #[test]
    fn test_conditional_round_trip() {
        let edge = Edge::conditional("check", "approved", "eq:status=ok");
        let text = serde_json::to_string(&edge).unwrap();
        let back: Edge = serde_json::from_str(&text).unwrap();
        assert_eq!(back, edge);
        assert_eq!(back.condition.unwrap().expression, "eq:status=ok");
    }
}

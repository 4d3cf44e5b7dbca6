//! Expression engine for edge conditions and string transforms
//!
//! Conditions use a small prefix-keyword language evaluated against a JSON
//! value: `eq:field=value`, `ne:field=value`, `gt:field>n`, `lt:field<n`,
//! `contains:field:needle`, `exists:field`, or a bare field name checked for
//! truthiness. Fields are dotted paths into the value. An empty or
//! unparseable expression evaluates unconditionally true rather than failing
//! silently.

use serde_json::Value;
use tracing::debug;

use crate::error::EngineError;
use crate::Result;

/// Resolve a dotted path (e.g. `result.score`) inside a JSON value.
pub fn resolve_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    let mut current = value;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Evaluate a condition expression against a value.
///
/// Never errors: expressions the engine does not understand evaluate true so
/// that a misspelled condition degrades to an unconditional edge instead of
/// silently dropping a branch.
pub fn evaluate_condition(expression: &str, value: &Value) -> bool {
    let expression = expression.trim();
    if expression.is_empty() {
        return true;
    }

    if let Some(rest) = expression.strip_prefix("eq:") {
        return evaluate_comparison(rest, '=', value, |ord| ord == std::cmp::Ordering::Equal);
    }
    if let Some(rest) = expression.strip_prefix("ne:") {
        return evaluate_comparison(rest, '=', value, |ord| ord != std::cmp::Ordering::Equal);
    }
    if let Some(rest) = expression.strip_prefix("gt:") {
        return evaluate_comparison(rest, '>', value, |ord| ord == std::cmp::Ordering::Greater);
    }
    if let Some(rest) = expression.strip_prefix("lt:") {
        return evaluate_comparison(rest, '<', value, |ord| ord == std::cmp::Ordering::Less);
    }
    if let Some(rest) = expression.strip_prefix("contains:") {
        return evaluate_contains(rest, value);
    }
    if let Some(field) = expression.strip_prefix("exists:") {
        return resolve_path(value, field).is_some();
    }
    if let Some(field) = expression.strip_prefix("not:") {
        return !evaluate_condition(field, value);
    }

    // Bare field: truthiness check.
    match resolve_path(value, expression) {
        Some(v) => is_truthy(v),
        None => {
            debug!(expression, "condition field absent, evaluating false");
            false
        }
    }
}

fn evaluate_comparison(
    body: &str,
    separator: char,
    value: &Value,
    accept: impl Fn(std::cmp::Ordering) -> bool,
) -> bool {
    let Some((field, expected)) = body.split_once(separator) else {
        debug!(body, "malformed comparison, evaluating true");
        return true;
    };

    let Some(actual) = resolve_path(value, field) else {
        return false;
    };

    match actual {
        Value::String(s) => accept(s.as_str().cmp(expected)),
        Value::Number(n) => match (n.as_f64(), expected.parse::<f64>()) {
            (Some(actual), Ok(expected)) => actual
                .partial_cmp(&expected)
                .map(&accept)
                .unwrap_or(false),
            _ => false,
        },
        Value::Bool(b) => expected
            .parse::<bool>()
            .map(|expected| accept(b.cmp(&expected)))
            .unwrap_or(false),
        _ => false,
    }
}

fn evaluate_contains(body: &str, value: &Value) -> bool {
    let Some((field, needle)) = body.split_once(':') else {
        debug!(body, "malformed contains, evaluating true");
        return true;
    };

    match resolve_path(value, field) {
        Some(Value::String(s)) => s.contains(needle),
        Some(Value::Array(items)) => items
            .iter()
            .any(|item| matches!(item, Value::String(s) if s == needle)),
        Some(Value::Object(map)) => map.contains_key(needle),
        _ => false,
    }
}

/// JSON truthiness: null/false/0/empty are false, everything else true.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Whether `name` refers to a registered named transform.
pub fn is_named_transform(name: &str) -> bool {
    matches!(name, "identity" | "uppercase" | "lowercase" | "stringify")
}

/// Apply a named or expression transform to a value.
///
/// Unrecognized names degrade to identity rather than failing.
pub fn apply_transform(name: &str, input: Value) -> Result<Value> {
    match name {
        "" | "identity" => Ok(input),
        "uppercase" => Ok(map_strings(input, &|s| s.to_uppercase())),
        "lowercase" => Ok(map_strings(input, &|s| s.to_lowercase())),
        "stringify" => match input {
            Value::String(s) => Ok(Value::String(s)),
            other => serde_json::to_string(&other)
                .map(Value::String)
                .map_err(|e| {
                    EngineError::edge_traversal_failed(format!("stringify failed: {}", e))
                }),
        },
        other => {
            debug!(transform = other, "unknown transform, applying identity");
            Ok(input)
        }
    }
}

/// Apply `f` to every string leaf, recursing through arrays and objects.
fn map_strings(value: Value, f: &dyn Fn(&str) -> String) -> Value {
    match value {
        Value::String(s) => Value::String(f(&s)),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(|v| map_strings(v, f)).collect())
        }
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, map_strings(v, f)))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_equality_conditions() {
        let value = json!({"status": "active", "count": 5});

        assert!(evaluate_condition("eq:status=active", &value));
        assert!(!evaluate_condition("eq:status=inactive", &value));
        assert!(evaluate_condition("eq:count=5", &value));
        assert!(evaluate_condition("ne:count=10", &value));
    }

    #[test]
    fn test_comparison_conditions() {
        let value = json!({"score": 75});

        assert!(evaluate_condition("gt:score>50", &value));
        assert!(!evaluate_condition("gt:score>100", &value));
        assert!(evaluate_condition("lt:score<100", &value));
        assert!(!evaluate_condition("lt:score<50", &value));
    }

    #[test]
    fn test_contains_and_exists() {
        let value = json!({"text": "hello world", "tags": ["rust", "graph"]});

        assert!(evaluate_condition("contains:text:world", &value));
        assert!(!evaluate_condition("contains:text:foo", &value));
        assert!(evaluate_condition("contains:tags:rust", &value));
        assert!(evaluate_condition("exists:text", &value));
        assert!(!evaluate_condition("exists:missing", &value));
    }

    #[test]
    fn test_truthiness_and_dotted_paths() {
        let value = json!({"result": {"ok": true, "items": []}, "zero": 0});

        assert!(evaluate_condition("result.ok", &value));
        assert!(!evaluate_condition("result.items", &value));
        assert!(!evaluate_condition("zero", &value));
        assert!(evaluate_condition("not:zero", &value));
        assert!(!evaluate_condition("missing.path", &value));
    }

    #[test]
    fn test_empty_and_malformed_expressions_pass() {
        let value = json!({});
        assert!(evaluate_condition("", &value));
        assert!(evaluate_condition("eq:nosplit", &value));
    }

    #[test]
    fn test_named_transforms() {
        let input = json!({"greeting": "hello", "nested": ["a", "b"]});
        let out = apply_transform("uppercase", input).unwrap();
        assert_eq!(out, json!({"greeting": "HELLO", "nested": ["A", "B"]}));

        let out = apply_transform("stringify", json!(42)).unwrap();
        assert_eq!(out, json!("42"));

        let out = apply_transform("unknown_name", json!(1)).unwrap();
        assert_eq!(out, json!(1));
    }
}

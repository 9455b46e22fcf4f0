//! Edge condition evaluation.

use serde_json::Value;

use crate::execute::context::lookup_path;

/// Tracing target for condition evaluation.
const TRACING_TARGET: &str = "flowline_engine::execute";

/// Decides whether a conditional edge matches a node's output.
///
/// The executor evaluates every outgoing edge of a condition node against
/// the node's output; edges that do not match are closed for the rest of the
/// run. Implement this to plug in a custom expression language.
pub trait ConditionEvaluator: Send + Sync {
    /// Returns whether the edge condition matches the data.
    ///
    /// `None` means the edge is unconditional and always matches.
    fn matches(&self, condition: Option<&Value>, data: &Value) -> bool;
}

/// Built-in evaluator over `{"field", "op", "value"}` comparison objects.
///
/// Supported operators: `eq`, `ne`, `gt`, `gte`, `lt`, `lte`, `contains`,
/// `exists`. A field path that does not resolve is treated as `null` for
/// equality operators and fails the ordered and `contains` operators.
/// Malformed conditions are logged and treated as matching, so a bad edge
/// never silently severs a branch.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConditionEvaluator;

impl ConditionEvaluator for DefaultConditionEvaluator {
    fn matches(&self, condition: Option<&Value>, data: &Value) -> bool {
        let Some(condition) = condition else {
            return true;
        };
        if condition.is_null() {
            return true;
        }

        let (Some(field), Some(op)) = (
            condition.get("field").and_then(Value::as_str),
            condition.get("op").and_then(Value::as_str),
        ) else {
            tracing::warn!(
                target: TRACING_TARGET,
                condition = %condition,
                "Malformed edge condition, treating as match"
            );
            return true;
        };

        let actual = lookup_path(data, field);
        let expected = condition.get("value").unwrap_or(&Value::Null);

        match op {
            "exists" => actual.is_some(),
            "eq" => actual.unwrap_or(&Value::Null) == expected,
            "ne" => actual.unwrap_or(&Value::Null) != expected,
            "gt" | "gte" | "lt" | "lte" => compare_numeric(op, actual, expected),
            "contains" => match actual {
                Some(Value::String(text)) => expected
                    .as_str()
                    .is_some_and(|needle| text.contains(needle)),
                Some(Value::Array(items)) => items.contains(expected),
                Some(Value::Object(map)) => {
                    expected.as_str().is_some_and(|key| map.contains_key(key))
                }
                _ => false,
            },
            other => {
                tracing::warn!(
                    target: TRACING_TARGET,
                    op = other,
                    "Unknown condition operator, treating as match"
                );
                true
            }
        }
    }
}

fn compare_numeric(op: &str, actual: Option<&Value>, expected: &Value) -> bool {
    let (Some(actual), Some(expected)) = (actual.and_then(Value::as_f64), expected.as_f64())
    else {
        return false;
    };
    match op {
        "gt" => actual > expected,
        "gte" => actual >= expected,
        "lt" => actual < expected,
        "lte" => actual <= expected,
        _ => false,
    }
}

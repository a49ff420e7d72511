//! `fixed[x]` and `pattern[x]` comparison.

use serde_json::Value;

/// Exact match for `fixed[x]`: same shape, same members, same order of
/// array items. Numbers compare by value so `1` equals `1.0`.
pub fn fixed_matches(value: &Value, fixed: &Value) -> bool {
    match (value, fixed) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && b.iter()
                    .all(|(key, expected)| a.get(key).is_some_and(|v| fixed_matches(v, expected)))
        }
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(v, expected)| fixed_matches(v, expected))
        }
        _ => value == fixed,
    }
}

/// Subset match for `pattern[x]`.
///
/// - Objects: every pattern key must be present with a matching value
/// - Arrays: every pattern item must match some instance item
/// - Scalars: equality (numbers by value)
/// - `null` and empty containers in the pattern match anything
pub fn pattern_matches(value: &Value, pattern: &Value) -> bool {
    match pattern {
        Value::Null => true,

        Value::Object(pattern_map) => {
            if pattern_map.is_empty() {
                return true;
            }
            let Some(item_map) = value.as_object() else {
                return false;
            };
            pattern_map.iter().all(|(key, pattern_value)| {
                item_map
                    .get(key)
                    .is_some_and(|item_value| pattern_matches(item_value, pattern_value))
            })
        }

        Value::Array(pattern_items) => {
            if pattern_items.is_empty() {
                return true;
            }
            let Some(items) = value.as_array() else {
                return false;
            };
            pattern_items
                .iter()
                .all(|p| items.iter().any(|item| pattern_matches(item, p)))
        }

        Value::Number(_) => fixed_matches(value, pattern),

        Value::String(_) | Value::Bool(_) => value == pattern,
    }
}

//! Flattening of nested node properties into store-friendly values.
//!
//! The graph store keeps scalars and lists of scalars. Nested shapes are
//! either promoted (`k: {s: v}` becomes `k_s: v`) or kept as JSON text.

use serde_json::{Map, Value};

use crate::tree::STRUCTURAL_KEYS;

/// Flatten a property map. Structural keys are dropped.
///
/// - `k: {s: v}` becomes `k_s: v` (non-scalar `v` as JSON text)
/// - lists of scalars are kept
/// - lists of objects become lists of JSON text
/// - any other list becomes the JSON text of the list
/// - `null` is kept so the store can remove the key
pub fn flatten_properties(props: &Map<String, Value>) -> Map<String, Value> {
    let mut flat = Map::new();
    for (key, value) in props {
        if STRUCTURAL_KEYS.contains(&key.as_str()) {
            continue;
        }
        match value {
            Value::Object(inner) => {
                for (sub, sub_value) in inner {
                    flat.insert(format!("{key}_{sub}"), scalar_or_json(sub_value));
                }
            }
            Value::Array(items) if items.iter().all(is_scalar) => {
                flat.insert(key.clone(), value.clone());
            }
            Value::Array(items) if items.iter().all(Value::is_object) => {
                let encoded = items
                    .iter()
                    .map(|item| Value::String(item.to_string()))
                    .collect();
                flat.insert(key.clone(), Value::Array(encoded));
            }
            Value::Array(_) => {
                flat.insert(key.clone(), Value::String(value.to_string()));
            }
            _ => {
                flat.insert(key.clone(), value.clone());
            }
        }
    }
    flat
}

fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::Bool(_) | Value::Number(_) | Value::String(_))
}

fn scalar_or_json(value: &Value) -> Value {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => value.clone(),
        Value::Array(items) if items.iter().all(is_scalar) => value.clone(),
        other => Value::String(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn flat(v: Value) -> Value {
        Value::Object(flatten_properties(v.as_object().unwrap()))
    }

    #[test]
    fn promotes_nested_maps() {
        assert_eq!(
            flat(json!({"meta": {"level": 2, "tags": ["a"], "deep": {"x": 1}}})),
            json!({"meta_level": 2, "meta_tags": ["a"], "meta_deep": "{\"x\":1}"})
        );
    }

    #[test]
    fn list_shapes() {
        assert_eq!(
            flat(json!({
                "tags": ["ppe", "lockout", 3, true],
                "empty": [],
                "steps": [{"n": 1}, {"n": 2}],
                "mixed": [1, {"n": 2}],
                "holes": ["a", null]
            })),
            json!({
                "tags": ["ppe", "lockout", 3, true],
                "empty": [],
                "steps": ["{\"n\":1}", "{\"n\":2}"],
                "mixed": "[1,{\"n\":2}]",
                "holes": "[\"a\",null]"
            })
        );
    }

    #[test]
    fn drops_structural_keys_keeps_null() {
        assert_eq!(
            flat(json!({"id": "C1", "children": [], "connections": [], "question_prompts": [], "gone": null, "name": "x"})),
            json!({"gone": null, "name": "x"})
        );
    }
}

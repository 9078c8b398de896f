//! Helpers over the JSON payloads that flow between nodes.

use serde_json::{Map, Value};

/// Keys that tool nodes use for their primary list output, in lookup order.
pub const COLLECTION_KEYS: [&str; 4] = ["subdomains", "findings", "results", "items"];

/// Resolve a dotted path (`info.severity`, `results.0.url`) inside a payload.
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    if path.is_empty() {
        return Some(value);
    }

    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Render a value the way it is spliced into commands and templates.
pub fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Numeric view of a value; numeric strings coerce, everything else does not.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                trimmed.parse::<f64>().ok()
            }
        }
        _ => None,
    }
}

/// Build a JSON number, keeping integral values integral.
pub fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

/// The list a payload represents: the payload itself when it is an array,
/// the first known collection key of an object, or the payload as a singleton.
pub fn extract_items(value: &Value) -> Vec<Value> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items.clone(),
        Value::Object(map) => COLLECTION_KEYS
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_array))
            .cloned()
            .unwrap_or_else(|| vec![value.clone()]),
        other => vec![other.clone()],
    }
}

/// Name of the collection key [`extract_items`] picked, if any.
pub fn collection_key(value: &Value) -> Option<&'static str> {
    let map = value.as_object()?;
    COLLECTION_KEYS
        .iter()
        .copied()
        .find(|key| map.get(*key).map(Value::is_array).unwrap_or(false))
}

/// Combine the payloads arriving on several input ports into one.
///
/// A single input passes through untouched. When every input is an array the
/// arrays are concatenated in port order. Otherwise objects are shallow-merged
/// (arrays under the same key are concatenated) and non-object payloads are
/// kept under their port name.
pub fn merge_payloads<'a, I>(inputs: I) -> Value
where
    I: IntoIterator<Item = (&'a str, &'a Value)>,
{
    let inputs: Vec<(&str, &Value)> = inputs.into_iter().collect();

    match inputs.as_slice() {
        [] => return Value::Object(Map::new()),
        [(_, only)] => return (*only).clone(),
        _ => {}
    }

    if inputs.iter().all(|(_, v)| v.is_array()) {
        let merged = inputs
            .iter()
            .flat_map(|(_, v)| v.as_array().cloned().unwrap_or_default())
            .collect();
        return Value::Array(merged);
    }

    let mut merged = Map::new();
    for (port, data) in inputs {
        match data {
            Value::Object(fields) => {
                for (key, incoming) in fields {
                    match (merged.get_mut(key), incoming) {
                        (Some(Value::Array(existing)), Value::Array(more)) => {
                            existing.extend(more.iter().cloned());
                        }
                        _ => {
                            merged.insert(key.clone(), incoming.clone());
                        }
                    }
                }
            }
            other => {
                merged.insert(port.to_string(), other.clone());
            }
        }
    }
    Value::Object(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_path_walks_objects_and_arrays() {
        let payload = json!({"info": {"severity": "high"}, "results": [{"url": "a"}, {"url": "b"}]});
        assert_eq!(get_path(&payload, "info.severity"), Some(&json!("high")));
        assert_eq!(get_path(&payload, "results.1.url"), Some(&json!("b")));
        assert_eq!(get_path(&payload, "info.missing"), None);
    }

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(is_truthy(&json!([])));
        assert!(is_truthy(&json!("x")));
    }

    #[test]
    fn test_extract_items_prefers_collection_keys() {
        let payload = json!({"count": 2, "subdomains": ["a.example.com", "b.example.com"]});
        assert_eq!(extract_items(&payload).len(), 2);
        assert_eq!(collection_key(&payload), Some("subdomains"));
        assert_eq!(extract_items(&json!({"x": 1})), vec![json!({"x": 1})]);
    }

    #[test]
    fn test_merge_single_input_passes_through() {
        let data = json!({"count": 5});
        assert_eq!(merge_payloads([("main", &data)]), data);
    }

    #[test]
    fn test_merge_concatenates_arrays() {
        let a = json!([1, 2]);
        let b = json!([3]);
        assert_eq!(merge_payloads([("a", &a), ("b", &b)]), json!([1, 2, 3]));
    }

    #[test]
    fn test_merge_objects_shallow() {
        let a = json!({"subdomains": ["a"], "count": 1});
        let b = json!({"subdomains": ["b"], "count": 1, "extra": true});
        let c = json!("raw");
        let merged = merge_payloads([("a", &a), ("b", &b), ("c", &c)]);
        assert_eq!(merged["subdomains"], json!(["a", "b"]));
        assert_eq!(merged["extra"], json!(true));
        assert_eq!(merged["c"], json!("raw"));
    }
}

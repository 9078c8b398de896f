//! In-memory set and partition operations behind the logic nodes.

use crate::condition::{Condition, ConditionError};
use reconcore::value::{as_number, collection_key, display, extract_items, get_path};
use reconcore::Value;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Items a filter or split works on. Bare subdomain strings are wrapped as
/// `{"subdomain": ..}` so conditions can address them by name.
pub fn condition_items(payload: &Value) -> Vec<Value> {
    match collection_key(payload) {
        Some("subdomains") => extract_items(payload)
            .into_iter()
            .map(|s| json!({ "subdomain": s }))
            .collect(),
        _ => extract_items(payload),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    #[default]
    Include,
    Exclude,
}

impl FilterMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Include => "include",
            Self::Exclude => "exclude",
        }
    }
}

/// Keep items that match (`include`) or do not match (`exclude`).
pub fn filter_items(items: Vec<Value>, condition: &Condition, mode: FilterMode) -> Vec<Value> {
    items
        .into_iter()
        .filter(|item| condition.evaluate(item) == (mode == FilterMode::Include))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// Concatenate; repeated scalars collapse, records are kept as-is
    #[default]
    Union,
    /// Items present in every input
    Intersection,
    /// Concatenate and drop every structural duplicate
    Deduplicate,
    /// Concatenate and flatten nested lists
    Flatten,
}

impl MergeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Union => "union",
            Self::Intersection => "intersection",
            Self::Deduplicate => "deduplicate",
            Self::Flatten => "flatten",
        }
    }
}

/// Combine the inputs of a merge node. `inputs` are `(port, payload)` pairs;
/// null payloads are ignored. With `preserve_structure`, inputs that all
/// carry the same collection key get it back on the result.
pub fn merge(inputs: &[(&str, &Value)], strategy: MergeStrategy, preserve_structure: bool) -> Value {
    let present: Vec<(&str, &Value)> = inputs
        .iter()
        .copied()
        .filter(|(_, data)| !data.is_null())
        .collect();
    let sources: Vec<&str> = present.iter().map(|(port, _)| *port).collect();
    let lists: Vec<Vec<Value>> = present.iter().map(|(_, data)| extract_items(data)).collect();

    let items = match strategy {
        MergeStrategy::Union => dedup_by(lists.into_iter().flatten(), |item| !item.is_object() && !item.is_array()),
        MergeStrategy::Deduplicate => dedup_by(lists.into_iter().flatten(), |_| true),
        MergeStrategy::Flatten => {
            let mut flat = Vec::new();
            for item in lists.into_iter().flatten() {
                flatten_into(item, &mut flat);
            }
            flat
        }
        MergeStrategy::Intersection => {
            let mut rest = lists.into_iter();
            match rest.next() {
                Some(first) => {
                    let others: Vec<Vec<Value>> = rest.collect();
                    first
                        .into_iter()
                        .filter(|item| others.iter().all(|list| list.contains(item)))
                        .collect()
                }
                None => Vec::new(),
            }
        }
    };

    let mut result = json!({
        "count": items.len(),
        "items": items,
        "sources": sources,
        "mergeType": strategy.as_str(),
    });

    if preserve_structure {
        let keys: Vec<Option<&str>> = present.iter().map(|(_, data)| collection_key(data)).collect();
        if let Some(Some(key)) = keys.first().copied() {
            if keys.iter().all(|k| *k == Some(key)) {
                let items = result["items"].clone();
                result[key] = items;
            }
        }
    }

    result
}

fn dedup_by(items: impl Iterator<Item = Value>, collapses: impl Fn(&Value) -> bool) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();
    for item in items {
        if collapses(&item) && out.contains(&item) {
            continue;
        }
        out.push(item);
    }
    out
}

fn flatten_into(item: Value, out: &mut Vec<Value>) {
    match item {
        Value::Array(items) => items.into_iter().for_each(|i| flatten_into(i, out)),
        other => out.push(other),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitBy {
    #[default]
    Severity,
    Status,
    Length,
    Custom,
}

/// Items routed to each side of a split.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Partition {
    pub matched: Vec<Value>,
    pub unmatched: Vec<Value>,
}

impl Partition {
    pub fn into_value(self) -> Value {
        json!({
            "trueCount": self.matched.len(),
            "falseCount": self.unmatched.len(),
            "true": self.matched,
            "false": self.unmatched,
        })
    }
}

/// Partition items by a built-in rule or a custom condition.
///
/// Without `value` the rules are: severity `high`/`critical`, status
/// 200/201/202, length above 1000. With `value` they become severity equal
/// to it, status equal to it, length above it. `custom` needs `value` as its
/// condition; without one nothing matches.
pub fn split(items: Vec<Value>, by: SplitBy, value: Option<&str>) -> Result<Partition, ConditionError> {
    let value = value.map(str::trim).filter(|v| !v.is_empty());
    let custom = match (by, value) {
        (SplitBy::Custom, Some(source)) => Some(Condition::parse(source)?),
        _ => None,
    };

    let field = |item: &Value, key: &str| get_path(item, key).filter(|v| !v.is_null()).cloned();

    let mut partition = Partition::default();
    for item in items {
        let matched = match by {
            SplitBy::Severity => field(&item, "severity").map(|severity| {
                let severity = display(&severity);
                match value {
                    Some(expected) => severity == expected,
                    None => severity == "high" || severity == "critical",
                }
            }),
            SplitBy::Status => field(&item, "status").map(|status| match value {
                Some(expected) => display(&status) == expected,
                None => as_number(&status)
                    .map(|code| [200.0, 201.0, 202.0].contains(&code))
                    .unwrap_or(false),
            }),
            SplitBy::Length => field(&item, "length").and_then(|length| {
                let threshold = value.and_then(|v| v.parse::<f64>().ok()).unwrap_or(1000.0);
                as_number(&length).map(|n| n > threshold)
            }),
            SplitBy::Custom => custom.as_ref().map(|condition| condition.evaluate(&item)),
        }
        .unwrap_or(false);

        if matched {
            partition.matched.push(item);
        } else {
            partition.unmatched.push(item);
        }
    }
    Ok(partition)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_items_wraps_subdomains() {
        let items = condition_items(&json!({"subdomains": ["a.example.com"], "count": 1}));
        assert_eq!(items, vec![json!({"subdomain": "a.example.com"})]);

        let items = condition_items(&json!({"findings": [{"severity": "high"}]}));
        assert_eq!(items, vec![json!({"severity": "high"})]);
    }

    #[test]
    fn test_filter_modes() {
        let items = vec![json!({"status": 200}), json!({"status": 404}), json!({"status": 200})];
        let condition = Condition::parse("status == 200").unwrap();
        assert_eq!(filter_items(items.clone(), &condition, FilterMode::Include).len(), 2);
        assert_eq!(
            filter_items(items, &condition, FilterMode::Exclude),
            vec![json!({"status": 404})]
        );
    }

    #[test]
    fn test_merge_union_collapses_scalars() {
        let a = json!({"subdomains": ["a.example.com", "b.example.com"]});
        let b = json!({"subdomains": ["b.example.com", "c.example.com"]});
        let merged = merge(&[("input1", &a), ("input2", &b)], MergeStrategy::Union, true);
        assert_eq!(merged["count"], 3);
        assert_eq!(merged["sources"], json!(["input1", "input2"]));
        assert_eq!(merged["subdomains"], merged["items"]);
    }

    #[test]
    fn test_merge_union_keeps_records_but_deduplicate_drops_them() {
        let a = json!([{"url": "/admin"}]);
        let b = json!([{"url": "/admin"}]);
        let inputs = [("input1", &a), ("input2", &b)];
        assert_eq!(merge(&inputs, MergeStrategy::Union, false)["count"], 2);
        assert_eq!(merge(&inputs, MergeStrategy::Deduplicate, false)["count"], 1);
    }

    #[test]
    fn test_merge_intersection() {
        let a = json!({"subdomains": ["a", "b", "c"]});
        let b = json!({"subdomains": ["c", "a"]});
        let merged = merge(&[("input1", &a), ("input2", &b)], MergeStrategy::Intersection, false);
        assert_eq!(merged["items"], json!(["a", "c"]));
        assert!(merged.get("subdomains").is_none());
    }

    #[test]
    fn test_merge_flatten_and_null_inputs() {
        let a = json!([[1, [2]], 3]);
        let merged = merge(&[("input1", &a), ("input2", &Value::Null)], MergeStrategy::Flatten, true);
        assert_eq!(merged["items"], json!([1, 2, 3]));
        assert_eq!(merged["sources"], json!(["input1"]));
    }

    #[test]
    fn test_split_default_rules() {
        let findings = vec![
            json!({"severity": "critical"}),
            json!({"severity": "low"}),
            json!({"template": "no severity"}),
        ];
        let partition = split(findings, SplitBy::Severity, None).unwrap();
        assert_eq!(partition.matched.len(), 1);
        assert_eq!(partition.unmatched.len(), 2);

        let results = vec![json!({"status": 201}), json!({"status": 302})];
        let partition = split(results, SplitBy::Status, None).unwrap();
        assert_eq!(partition.matched, vec![json!({"status": 201})]);

        let sized = vec![json!({"length": 5000}), json!({"length": 10})];
        let partition = split(sized, SplitBy::Length, Some("100")).unwrap();
        assert_eq!(partition.matched, vec![json!({"length": 5000})]);
    }

    #[test]
    fn test_split_custom() {
        let items = vec![json!({"subdomain": "api.example.com"}), json!({"subdomain": "www.example.com"})];
        let partition = split(items.clone(), SplitBy::Custom, Some("subdomain startsWith api")).unwrap();
        assert_eq!(partition.matched.len(), 1);

        let partition = split(items, SplitBy::Custom, None).unwrap();
        assert!(partition.matched.is_empty());

        assert!(split(vec![], SplitBy::Custom, Some("x ==")).is_err());
    }
}

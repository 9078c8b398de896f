//! Item-wise transforms over a payload's list projection.

use reconcore::template;
use reconcore::value::{display, get_path};
use reconcore::Value;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformKind {
    #[default]
    Map,
    Extract,
    Format,
    Aggregate,
    Sort,
    Limit,
}

impl TransformKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Map => "map",
            Self::Extract => "extract",
            Self::Format => "format",
            Self::Aggregate => "aggregate",
            Self::Sort => "sort",
            Self::Limit => "limit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    #[default]
    Count,
    Unique,
    Group,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

fn item_scope(item: &Value) -> Map<String, Value> {
    let mut scope = Map::new();
    scope.insert("item".to_string(), item.clone());
    scope
}

/// Render `expression` per item (`{{item}}`, `{{item.field}}`). Results that
/// read as JSON objects or lists are parsed back into values.
pub fn map_items(items: &[Value], expression: &str) -> Vec<Value> {
    items
        .iter()
        .map(|item| {
            let rendered = template::render(expression, &[&item_scope(item)]);
            let trimmed = rendered.trim_start();
            if trimmed.starts_with('{') || trimmed.starts_with('[') {
                serde_json::from_str(&rendered).unwrap_or(Value::String(rendered))
            } else {
                Value::String(rendered)
            }
        })
        .collect()
}

/// Project records onto `fields`; non-record items pass through.
pub fn extract_fields(items: &[Value], fields: &[&str]) -> Vec<Value> {
    items
        .iter()
        .map(|item| match item {
            Value::Object(record) => Value::Object(
                fields
                    .iter()
                    .filter_map(|f| record.get(*f).map(|v| (f.to_string(), v.clone())))
                    .collect(),
            ),
            other => other.clone(),
        })
        .collect()
}

/// Render `template` per item into a string.
pub fn format_items(items: &[Value], template_text: &str) -> Vec<Value> {
    items
        .iter()
        .map(|item| Value::String(template::render(template_text, &[&item_scope(item)])))
        .collect()
}

/// Summarise items. `group` keys on `field` when given, otherwise on the
/// whole item.
pub fn aggregate(items: Vec<Value>, by: Aggregation, field: Option<&str>) -> Value {
    match by {
        Aggregation::Count => json!({ "count": items.len(), "items": items }),
        Aggregation::Unique => {
            let total = items.len();
            let mut unique: Vec<Value> = Vec::new();
            for item in items {
                if !unique.contains(&item) {
                    unique.push(item);
                }
            }
            json!({ "count": unique.len(), "unique": unique, "total": total })
        }
        Aggregation::Group => {
            let mut groups: BTreeMap<String, Vec<Value>> = BTreeMap::new();
            for item in items {
                let key = match field {
                    Some(field) => get_path(&item, field).map(display).unwrap_or_default(),
                    None => display(&item),
                };
                groups.entry(key).or_default().push(item);
            }
            json!({ "groupCount": groups.len(), "groups": groups })
        }
    }
}

/// Stable string-wise sort by `key` (`value` sorts by the item itself).
pub fn sort_items(mut items: Vec<Value>, key: &str, order: SortOrder) -> Vec<Value> {
    let sort_key = |item: &Value| -> String {
        if key == "value" {
            display(item)
        } else {
            get_path(item, key).map(display).unwrap_or_default()
        }
    };
    items.sort_by(|a, b| {
        let ordering = sort_key(a).cmp(&sort_key(b));
        match order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    });
    items
}

pub fn limit_items(mut items: Vec<Value>, count: usize) -> Vec<Value> {
    items.truncate(count);
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    fn findings() -> Vec<Value> {
        vec![
            json!({"template": "git-config", "severity": "high", "target": "https://b"}),
            json!({"template": "tech-detect", "severity": "info", "target": "https://a"}),
            json!({"template": "cve-2021", "severity": "high", "target": "https://c"}),
        ]
    }

    #[test]
    fn test_map_parses_json_results() {
        let mapped = map_items(&findings(), r#"{"url": "{{item.target}}"}"#);
        assert_eq!(mapped[0], json!({"url": "https://b"}));

        let mapped = map_items(&[json!("a.example.com")], "https://{{item}}");
        assert_eq!(mapped, vec![json!("https://a.example.com")]);

        let mapped = map_items(&[json!({"x": 1})], "{{item}}");
        assert_eq!(mapped, vec![json!({"x": 1})]);
    }

    #[test]
    fn test_extract_fields() {
        let extracted = extract_fields(&findings(), &["template", "missing"]);
        assert_eq!(extracted[1], json!({"template": "tech-detect"}));
        assert_eq!(extract_fields(&[json!(7)], &["x"]), vec![json!(7)]);
    }

    #[test]
    fn test_format() {
        let formatted = format_items(&findings()[..1], "[{{item.severity}}] {{item.template}}");
        assert_eq!(formatted, vec![json!("[high] git-config")]);
    }

    #[test]
    fn test_aggregate() {
        let items = vec![json!("a"), json!("b"), json!("a")];
        assert_eq!(aggregate(items.clone(), Aggregation::Count, None)["count"], 3);

        let unique = aggregate(items, Aggregation::Unique, None);
        assert_eq!(unique["unique"], json!(["a", "b"]));
        assert_eq!(unique["total"], 3);

        let grouped = aggregate(findings(), Aggregation::Group, Some("severity"));
        assert_eq!(grouped["groupCount"], 2);
        assert_eq!(grouped["groups"]["high"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_sort_and_limit() {
        let sorted = sort_items(findings(), "target", SortOrder::Asc);
        assert_eq!(sorted[0]["target"], "https://a");

        let sorted = sort_items(vec![json!("b"), json!("c"), json!("a")], "value", SortOrder::Desc);
        assert_eq!(sorted, vec![json!("c"), json!("b"), json!("a")]);

        assert_eq!(limit_items(findings(), 2).len(), 2);
        assert_eq!(limit_items(findings(), 10).len(), 3);
    }
}

use crate::data::{
    aggregate, extract_fields, format_items, limit_items, map_items, sort_items, Aggregation,
    SortOrder, TransformKind,
};
use crate::kind::{definition, Builtin};
use async_trait::async_trait;
use reconcore::value::extract_items;
use reconcore::{
    node_config, ConfigField, Node, NodeCategory, NodeContext, NodeDefinition, NodeResult,
    PortDefinition, Value,
};
use serde_json::json;

node_config! {
    pub struct TransformConfig {
        transform_type: TransformKind = TransformKind::Map => ConfigField::select("Transform Type")
            .describe("Operation applied to the input items")
            .option("Map", "map")
            .option("Extract Fields", "extract")
            .option("Format", "format")
            .option("Aggregate", "aggregate")
            .option("Sort", "sort")
            .option("Limit", "limit"),
        map_expression: String = "{{item}}".to_string() => ConfigField::string("Map Expression")
            .describe("Template rendered per item, e.g. https://{{item}}"),
        extract_fields: String = String::new() => ConfigField::string("Extract Fields")
            .describe("Comma-separated fields to keep"),
        format_template: String = "{{item}}".to_string() => ConfigField::string("Format Template")
            .describe("Template rendered per item into a string"),
        aggregate_by: Aggregation = Aggregation::Count => ConfigField::select("Aggregate By")
            .option("Count", "count")
            .option("Unique", "unique")
            .option("Group", "group"),
        group_field: Option<String> = None => ConfigField::string("Group Field")
            .describe("Field to group by; the whole item when empty"),
        sort_by: String = "value".to_string() => ConfigField::string("Sort By")
            .describe("Field to sort on, or 'value' for the item itself"),
        sort_order: SortOrder = SortOrder::Asc => ConfigField::select("Sort Order")
            .option("Ascending", "asc")
            .option("Descending", "desc"),
        limit_count: u32 = 10 => ConfigField::number("Limit")
            .describe("Maximum number of items to keep")
            .range(1.0, 10000.0),
    }
}

/// Item-wise transforms over the input's list projection.
pub struct TransformNode {
    config: TransformConfig,
}

impl TransformNode {
    fn apply(&self, items: Vec<Value>) -> Value {
        let config = &self.config;
        match config.transform_type {
            TransformKind::Map => Value::Array(map_items(&items, &config.map_expression)),
            TransformKind::Extract => {
                let fields: Vec<&str> = config
                    .extract_fields
                    .split(',')
                    .map(str::trim)
                    .filter(|f| !f.is_empty())
                    .collect();
                Value::Array(extract_fields(&items, &fields))
            }
            TransformKind::Format => Value::Array(format_items(&items, &config.format_template)),
            TransformKind::Aggregate => aggregate(
                items,
                config.aggregate_by,
                config.group_field.as_deref().filter(|f| !f.trim().is_empty()),
            ),
            TransformKind::Sort => {
                Value::Array(sort_items(items, &config.sort_by, config.sort_order))
            }
            TransformKind::Limit => Value::Array(limit_items(items, config.limit_count as usize)),
        }
    }
}

impl Builtin for TransformNode {
    const TYPE: &'static str = "transform";

    type Config = TransformConfig;

    fn with_config(config: TransformConfig) -> Self {
        Self { config }
    }

    fn describe() -> NodeDefinition {
        definition::<TransformConfig>(
            Self::TYPE,
            NodeCategory::Data,
            "Transform",
            "Transform and manipulate data",
            "shuffle",
            vec![PortDefinition::new("input", "any")
                .required()
                .describe("Data to transform")],
            vec![PortDefinition::new("output", "any")
                .required()
                .describe("Transformed data")],
        )
    }
}

#[async_trait]
impl Node for TransformNode {
    fn node_type(&self) -> &str {
        Self::TYPE
    }

    fn definition(&self) -> NodeDefinition {
        Self::describe()
    }

    async fn execute(&self, ctx: NodeContext) -> NodeResult {
        let items = extract_items(&ctx.merged_input());
        let original_count = items.len();
        let kind = self.config.transform_type;

        let result = self.apply(items);
        let count = match &result {
            Value::Array(items) => items.len(),
            _ => 1,
        };
        ctx.events.info(format!(
            "Applied {} transform to {} items",
            kind.as_str(),
            original_count
        ));

        Ok(ctx.output(json!({
            "result": result,
            "count": count,
            "originalCount": original_count,
            "transformType": kind.as_str(),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcore::{EventEmitter, WorkflowNode};

    async fn run(config: Value, input: Value) -> Value {
        let mut node = WorkflowNode::new("shape", "transform");
        node.config = config.as_object().cloned().unwrap();
        let transform = TransformNode::parse(&node).unwrap();
        let ctx = NodeContext::new(node, EventEmitter::detached("shape")).with_input("input", input);
        transform.execute(ctx).await.unwrap().data
    }

    #[tokio::test]
    async fn test_map_subdomains_to_urls() {
        let output = run(
            json!({"map_expression": "https://{{item}}"}),
            json!({"subdomains": ["a.example.com", "b.example.com"], "count": 2}),
        )
        .await;
        assert_eq!(output["result"], json!(["https://a.example.com", "https://b.example.com"]));
        assert_eq!(output["transformType"], "map");
        assert_eq!(output["originalCount"], 2);
    }

    #[tokio::test]
    async fn test_extract_and_limit() {
        let findings = json!({"findings": [
            {"template": "a", "severity": "high", "target": "x"},
            {"template": "b", "severity": "low", "target": "y"},
        ]});
        let output = run(
            json!({"transform_type": "extract", "extract_fields": "template, severity"}),
            findings.clone(),
        )
        .await;
        assert_eq!(output["result"][1], json!({"template": "b", "severity": "low"}));

        let output = run(json!({"transform_type": "limit", "limit_count": 1}), findings).await;
        assert_eq!(output["count"], 1);
    }

    #[tokio::test]
    async fn test_group_by_field() {
        let output = run(
            json!({"transform_type": "aggregate", "aggregate_by": "group", "group_field": "status"}),
            json!({"results": [{"status": 200}, {"status": 404}, {"status": 200}]}),
        )
        .await;
        assert_eq!(output["result"]["groupCount"], 2);
        assert_eq!(output["count"], 1);
    }

    #[tokio::test]
    async fn test_sort_descending() {
        let output = run(
            json!({"transform_type": "sort", "sort_order": "desc"}),
            json!(["b", "a", "c"]),
        )
        .await;
        assert_eq!(output["result"], json!(["c", "b", "a"]));
    }
}

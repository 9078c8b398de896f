use crate::condition::Condition;
use crate::kind::{definition, Builtin};
use crate::logic::{condition_items, filter_items, FilterMode};
use async_trait::async_trait;
use reconcore::value::collection_key;
use reconcore::{
    node_config, ConfigField, Node, NodeCategory, NodeContext, NodeDefinition, NodeResult,
    PortDefinition, Value,
};
use serde_json::json;

node_config! {
    pub struct FilterConfig {
        condition: String = "true".to_string() => ConfigField::string("Filter Condition")
            .describe("Condition applied to each item (e.g., 'status == 200')"),
        mode: FilterMode = FilterMode::Include => ConfigField::select("Filter Mode")
            .describe("Keep matching items or drop them")
            .option("Include matching", "include")
            .option("Exclude matching", "exclude"),
    }
}

/// Keeps or drops the items of a list payload by condition.
pub struct FilterNode {
    config: FilterConfig,
}

impl Builtin for FilterNode {
    const TYPE: &'static str = "filter";

    type Config = FilterConfig;

    fn with_config(config: FilterConfig) -> Self {
        Self { config }
    }

    fn describe() -> NodeDefinition {
        definition::<FilterConfig>(
            Self::TYPE,
            NodeCategory::Logic,
            "Filter",
            "Filter items based on conditions",
            "filter",
            vec![PortDefinition::new("input", "array")
                .required()
                .describe("Items to filter")],
            vec![PortDefinition::new("filtered", "array")
                .required()
                .describe("Items that passed the filter")],
        )
    }
}

#[async_trait]
impl Node for FilterNode {
    fn node_type(&self) -> &str {
        Self::TYPE
    }

    fn definition(&self) -> NodeDefinition {
        Self::describe()
    }

    async fn execute(&self, ctx: NodeContext) -> NodeResult {
        let condition = Condition::parse(&self.config.condition)?;
        let input = ctx.merged_input();
        let items = condition_items(&input);
        let original_count = items.len();
        let kept = filter_items(items, &condition, self.config.mode);

        ctx.events.info(format!(
            "Filtered {} items down to {}",
            original_count,
            kept.len()
        ));

        let mut output = json!({
            "count": kept.len(),
            "originalCount": original_count,
            "filter": {
                "condition": condition.source(),
                "mode": self.config.mode.as_str(),
            },
        });
        // Downstream tools look for their usual key, not `items`.
        match collection_key(&input) {
            Some("subdomains") => {
                output["subdomains"] = kept
                    .iter()
                    .map(|item| item.get("subdomain").cloned().unwrap_or(Value::Null))
                    .collect();
            }
            Some(key @ ("findings" | "results")) => output[key] = Value::Array(kept.clone()),
            _ => {}
        }
        output["items"] = Value::Array(kept);

        Ok(ctx.output(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcore::{EventEmitter, WorkflowNode};

    async fn run(config: Value, input: Value) -> Value {
        let mut node = WorkflowNode::new("keep", "filter");
        node.config = config.as_object().cloned().unwrap();
        let filter = FilterNode::parse(&node).unwrap();
        let ctx = NodeContext::new(node, EventEmitter::detached("keep")).with_input("input", input);
        filter.execute(ctx).await.unwrap().data
    }

    #[tokio::test]
    async fn test_filters_findings() {
        let input = json!({"findings": [
            {"severity": "high", "template": "a"},
            {"severity": "low", "template": "b"},
        ]});
        let output = run(json!({"condition": "severity == high"}), input.clone()).await;
        assert_eq!(output["count"], 1);
        assert_eq!(output["originalCount"], 2);
        assert_eq!(output["findings"], output["items"]);
        assert_eq!(output["filter"]["mode"], "include");

        let output = run(json!({"condition": "severity == high", "mode": "exclude"}), input).await;
        assert_eq!(output["items"][0]["template"], "b");
    }

    #[tokio::test]
    async fn test_subdomains_keep_their_shape() {
        let input = json!({"subdomains": ["api.example.com", "www.example.com"], "count": 2});
        let output = run(json!({"condition": "subdomain startsWith api"}), input).await;
        assert_eq!(output["subdomains"], json!(["api.example.com"]));
        assert_eq!(output["items"], json!([{"subdomain": "api.example.com"}]));
    }

    #[tokio::test]
    async fn test_default_condition_keeps_everything() {
        let output = run(json!({}), json!([1, 2, 3])).await;
        assert_eq!(output["count"], 3);
    }

    #[tokio::test]
    async fn test_malformed_condition_fails_the_node() {
        let node = WorkflowNode::new("keep", "filter").with_config("condition", "severity ==");
        let filter = FilterNode::parse(&node).unwrap();
        let ctx = NodeContext::new(node, EventEmitter::detached("keep"))
            .with_input("input", json!({"findings": [{"severity": "high"}]}));
        let failure = filter.execute(ctx).await.unwrap_err();
        assert!(matches!(
            failure.error,
            reconcore::NodeError::Configuration(ref m) if m.starts_with("Invalid condition")
        ));
        assert!(!failure.should_continue);
    }
}

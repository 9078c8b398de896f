use crate::condition::Condition;
use crate::kind::{definition, Builtin};
use async_trait::async_trait;
use chrono::Utc;
use reconcore::{
    node_config, ConfigField, Node, NodeCategory, NodeContext, NodeDefinition, NodeResult,
    PortDefinition,
};
use reconruntime::{BRANCH_KEY, ROUTED_KEY};
use serde_json::json;

node_config! {
    pub struct ConditionalConfig {
        condition: String = "count > 0".to_string() => ConfigField::string("Condition")
            .describe("Expression such as 'count > 0' or 'severity == high'"),
    }
}

/// Routes its input to the `true` or `false` output. Successors wired to the
/// untaken output are skipped by the engine; the others receive the input
/// unchanged.
pub struct ConditionalNode {
    config: ConditionalConfig,
}

impl Builtin for ConditionalNode {
    const TYPE: &'static str = "conditional";

    type Config = ConditionalConfig;

    fn with_config(config: ConditionalConfig) -> Self {
        Self { config }
    }

    fn describe() -> NodeDefinition {
        definition::<ConditionalConfig>(
            Self::TYPE,
            NodeCategory::Logic,
            "Conditional",
            "Route data based on a condition",
            "git-branch",
            vec![PortDefinition::new("input", "any")
                .required()
                .describe("Data to evaluate")],
            vec![
                PortDefinition::new("true", "any").describe("Taken when the condition holds"),
                PortDefinition::new("false", "any").describe("Taken otherwise"),
            ],
        )
    }
}

#[async_trait]
impl Node for ConditionalNode {
    fn node_type(&self) -> &str {
        Self::TYPE
    }

    fn definition(&self) -> NodeDefinition {
        Self::describe()
    }

    async fn execute(&self, ctx: NodeContext) -> NodeResult {
        let condition = Condition::parse(&self.config.condition)?;
        let data = ctx.merged_input();
        let passed = condition.evaluate(&data);

        ctx.events
            .info(format!("Condition \"{}\" evaluated to: {}", condition, passed));

        Ok(ctx.output(json!({
            "condition": passed,
            ROUTED_KEY: data,
            BRANCH_KEY: passed,
            "metadata": {
                "originalCondition": condition.source(),
                "evaluatedAt": Utc::now().to_rfc3339(),
            },
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcore::{EventEmitter, NodeError, WorkflowNode};
    use serde_json::Value;

    async fn run(condition: &str, input: Value) -> NodeResult {
        let node = WorkflowNode::new("route", "conditional").with_config("condition", condition);
        let router = ConditionalNode::parse(&node).unwrap();
        let ctx = NodeContext::new(node, EventEmitter::detached("route")).with_input("input", input);
        router.execute(ctx).await
    }

    #[tokio::test]
    async fn test_routes_on_condition() {
        let output = run("count > 0", json!({"count": 5, "subdomains": ["a"]}))
            .await
            .unwrap();
        assert_eq!(output.data[BRANCH_KEY], true);
        assert_eq!(output.data["condition"], true);
        assert_eq!(output.data["data"]["count"], 5);
        assert_eq!(output.data["metadata"]["originalCondition"], "count > 0");

        let output = run("count > 0", json!({"count": 0})).await.unwrap();
        assert_eq!(output.data[BRANCH_KEY], false);
    }

    #[tokio::test]
    async fn test_bad_condition_is_a_configuration_error() {
        let failure = run("count >", json!({})).await.unwrap_err();
        assert!(matches!(failure.error, NodeError::Configuration(_)));
        assert!(!failure.should_continue);
    }
}

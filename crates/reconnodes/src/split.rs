use crate::kind::{definition, Builtin};
use crate::logic::{condition_items, split, SplitBy};
use async_trait::async_trait;
use reconcore::{
    node_config, ConfigField, Node, NodeCategory, NodeContext, NodeDefinition, NodeResult,
    PortDefinition,
};

node_config! {
    pub struct SplitConfig {
        split_by: SplitBy = SplitBy::Severity => ConfigField::select("Split By")
            .describe("Rule used to partition the items")
            .option("Severity", "severity")
            .option("Status Code", "status")
            .option("Response Length", "length")
            .option("Custom Condition", "custom"),
        split_value: Option<String> = None => ConfigField::string("Split Value")
            .describe("Value to match, length threshold or custom condition"),
    }
}

/// Partitions a list into the items that match a rule and those that do not.
pub struct SplitNode {
    config: SplitConfig,
}

impl Builtin for SplitNode {
    const TYPE: &'static str = "split";

    type Config = SplitConfig;

    fn with_config(config: SplitConfig) -> Self {
        Self { config }
    }

    fn describe() -> NodeDefinition {
        definition::<SplitConfig>(
            Self::TYPE,
            NodeCategory::Logic,
            "Split",
            "Split data into two streams",
            "split",
            vec![PortDefinition::new("input", "array")
                .required()
                .describe("Items to partition")],
            vec![
                PortDefinition::new("true", "array").describe("Items matching the rule"),
                PortDefinition::new("false", "array").describe("Remaining items"),
            ],
        )
    }
}

#[async_trait]
impl Node for SplitNode {
    fn node_type(&self) -> &str {
        Self::TYPE
    }

    fn definition(&self) -> NodeDefinition {
        Self::describe()
    }

    async fn execute(&self, ctx: NodeContext) -> NodeResult {
        let items = condition_items(&ctx.merged_input());
        let partition = split(items, self.config.split_by, self.config.split_value.as_deref())?;
        ctx.events.info(format!(
            "Split into {} matching and {} remaining items",
            partition.matched.len(),
            partition.unmatched.len()
        ));
        Ok(ctx.output(partition.into_value()))
    }
}

use crate::kind::{definition, Builtin};
use crate::logic::{merge, MergeStrategy};
use async_trait::async_trait;
use reconcore::{
    node_config, ConfigField, Node, NodeCategory, NodeContext, NodeDefinition, NodeResult,
    PortDefinition, Value,
};

/// Ports a merge node reads, in merge order.
const INPUT_PORTS: [&str; 3] = ["input1", "input2", "input3"];

node_config! {
    pub struct MergeConfig {
        merge_type: MergeStrategy = MergeStrategy::Union => ConfigField::select("Merge Type")
            .describe("How the inputs are combined")
            .option("Union (combine all)", "union")
            .option("Intersection (common items)", "intersection")
            .option("Deduplicate", "deduplicate")
            .option("Flatten", "flatten"),
        preserve_structure: bool = true => ConfigField::boolean("Preserve Structure")
            .describe("Keep the inputs' collection key on the result"),
    }
}

pub struct MergeNode {
    config: MergeConfig,
}

impl Builtin for MergeNode {
    const TYPE: &'static str = "merge";

    type Config = MergeConfig;

    fn with_config(config: MergeConfig) -> Self {
        Self { config }
    }

    fn describe() -> NodeDefinition {
        let inputs = INPUT_PORTS
            .iter()
            .enumerate()
            .map(|(i, port)| {
                let port = PortDefinition::new(*port, "any");
                if i == 0 {
                    port.required().describe("First input")
                } else {
                    port.describe("Additional input")
                }
            })
            .collect();
        definition::<MergeConfig>(
            Self::TYPE,
            NodeCategory::Logic,
            "Merge",
            "Combine multiple data streams",
            "git-merge",
            inputs,
            vec![PortDefinition::new("merged", "array")
                .required()
                .describe("Combined items")],
        )
    }
}

#[async_trait]
impl Node for MergeNode {
    fn node_type(&self) -> &str {
        Self::TYPE
    }

    fn definition(&self) -> NodeDefinition {
        Self::describe()
    }

    async fn execute(&self, ctx: NodeContext) -> NodeResult {
        // Declared ports first, then anything else wired in, in port order.
        let mut inputs: Vec<(&str, &Value)> = INPUT_PORTS
            .iter()
            .filter_map(|port| ctx.inputs.get(*port).map(|input| (*port, &input.data)))
            .collect();
        inputs.extend(
            ctx.inputs
                .iter()
                .filter(|(port, _)| !INPUT_PORTS.contains(&port.as_str()))
                .map(|(port, input)| (port.as_str(), &input.data)),
        );

        let merged = merge(&inputs, self.config.merge_type, self.config.preserve_structure);
        ctx.events.info(format!(
            "Merged {} inputs into {} items",
            merged["sources"].as_array().map(Vec::len).unwrap_or(0),
            merged["count"]
        ));
        Ok(ctx.output(merged))
    }
}

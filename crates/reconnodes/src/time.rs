use crate::kind::{definition, Builtin};
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use reconcore::value::{as_number, get_path, number};
use reconcore::{
    node_config, ConfigField, Node, NodeCategory, NodeContext, NodeDefinition, NodeError,
    NodeResult, PortDefinition, Value,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::{sleep, Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitKind {
    #[default]
    Fixed,
    Random,
    Variable,
}

node_config! {
    pub struct WaitConfig {
        wait_type: WaitKind = WaitKind::Fixed => ConfigField::select("Wait Type")
            .option("Fixed Duration", "fixed")
            .option("Random Duration", "random")
            .option("From Variable", "variable"),
        duration: f64 = 5.0 => ConfigField::number("Duration (seconds)")
            .describe("Fixed wait time")
            .range(0.1, 3600.0),
        min_duration: f64 = 1.0 => ConfigField::number("Minimum Duration (seconds)")
            .describe("Lower bound for random waits")
            .range(0.1, 3600.0),
        max_duration: f64 = 10.0 => ConfigField::number("Maximum Duration (seconds)")
            .describe("Upper bound for random waits")
            .range(0.1, 3600.0),
        variable_name: Option<String> = None => ConfigField::string("Variable Name")
            .describe("Input field or run variable holding the wait in seconds"),
        min_wait: f64 = 0.0 => ConfigField::number("Safety Minimum (seconds)")
            .describe("Waits are never shorter than this")
            .range(0.0, 60.0),
        max_wait: f64 = 300.0 => ConfigField::number("Safety Maximum (seconds)")
            .describe("Waits are never longer than this")
            .range(1.0, 3600.0),
    }
}

/// Pauses the flow, then passes its input through.
pub struct WaitNode {
    config: WaitConfig,
}

impl WaitNode {
    /// Seconds to wait before clamping to the safety window.
    fn requested(&self, ctx: &NodeContext, input: &Value) -> Result<f64, NodeError> {
        let config = &self.config;
        match config.wait_type {
            WaitKind::Fixed => Ok(config.duration),
            WaitKind::Random => {
                let lo = config.min_duration.min(config.max_duration);
                let hi = config.min_duration.max(config.max_duration);
                Ok(rand::thread_rng().gen_range(lo..=hi))
            }
            WaitKind::Variable => {
                let name = config
                    .variable_name
                    .as_deref()
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .ok_or_else(|| {
                        NodeError::Configuration("variable_name is required for variable waits".into())
                    })?;
                get_path(input, name)
                    .filter(|v| !v.is_null())
                    .or_else(|| ctx.variable(name))
                    .and_then(as_number)
                    .ok_or_else(|| {
                        NodeError::Configuration(format!("Variable '{}' is not a number", name))
                    })
            }
        }
    }

    fn clamp(&self, seconds: f64) -> f64 {
        let lo = self.config.min_wait;
        let hi = self.config.max_wait.max(lo);
        seconds.clamp(lo, hi)
    }
}

impl Builtin for WaitNode {
    const TYPE: &'static str = "wait";

    type Config = WaitConfig;

    fn with_config(config: WaitConfig) -> Self {
        Self { config }
    }

    fn describe() -> NodeDefinition {
        definition::<WaitConfig>(
            Self::TYPE,
            NodeCategory::Logic,
            "Wait",
            "Pause execution for a fixed, random or variable duration",
            "clock",
            vec![PortDefinition::new("input", "any").describe("Data passed through after the wait")],
            vec![PortDefinition::new("output", "any")
                .required()
                .describe("The input, stamped with the wait time")],
        )
    }
}

#[async_trait]
impl Node for WaitNode {
    fn node_type(&self) -> &str {
        Self::TYPE
    }

    fn definition(&self) -> NodeDefinition {
        Self::describe()
    }

    async fn execute(&self, ctx: NodeContext) -> NodeResult {
        let input = ctx.merged_input();
        let seconds = self.clamp(self.requested(&ctx, &input)?);

        ctx.events.info(format!("Waiting for {:.2} seconds", seconds));
        tokio::select! {
            _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled.into()),
            _ = sleep(Duration::from_secs_f64(seconds)) => {}
        }

        let mut output = match input {
            Value::Object(map) => Value::Object(map),
            other => json!({ "data": other }),
        };
        output["waitTime"] = number(seconds);
        output["timestamp"] = json!(Utc::now().to_rfc3339());
        Ok(ctx.output(output))
    }
}

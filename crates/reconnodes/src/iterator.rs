//! Batch iteration over a list drawn from the input, a run variable or a
//! static JSON literal.

use crate::condition::Condition;
use crate::kind::{definition, Builtin};
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use reconcore::value::{extract_items, get_path};
use reconcore::{
    node_config, ConfigField, Node, NodeCategory, NodeContext, NodeDefinition, NodeError,
    NodeResult, PortDefinition, Value,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemSource {
    #[default]
    Input,
    Variable,
    Static,
}

node_config! {
    pub struct IteratorConfig {
        source_type: ItemSource = ItemSource::Input => ConfigField::select("Source Type")
            .describe("Where the items come from")
            .option("Input Data", "input")
            .option("Variable", "variable")
            .option("Static List", "static"),
        input_field: Option<String> = None => ConfigField::string("Input Field")
            .describe("Dotted path to the list in the input; the input's main list when empty"),
        variable_name: Option<String> = None => ConfigField::string("Variable Name")
            .describe("Run variable holding the list"),
        static_items: String = "[]".to_string() => ConfigField::text("Static Items")
            .describe("JSON array of items"),
        batch_size: u32 = 10 => ConfigField::number("Batch Size")
            .describe("Items per batch; 0 processes everything in one batch")
            .range(0.0, 1000.0),
        parallel: bool = false => ConfigField::boolean("Parallel Processing")
            .describe("Process the items of a batch concurrently"),
        batch_delay: f64 = 0.0 => ConfigField::number("Batch Delay (seconds)")
            .describe("Pause between batches")
            .range(0.0, 300.0),
        item_delay: f64 = 0.0 => ConfigField::number("Item Delay (seconds)")
            .describe("Pause between items when processing sequentially")
            .range(0.0, 60.0),
        filter_condition: Option<String> = None => ConfigField::string("Filter Condition")
            .describe("Condition over 'item' and 'index', e.g. 'item.status == 200'"),
        max_items: u32 = 0 => ConfigField::number("Maximum Items")
            .describe("Stop after this many items; 0 means no limit")
            .range(0.0, 10000.0),
    }
}

pub struct IteratorNode {
    config: IteratorConfig,
}

/// A list found at a path; scalars become a singleton, absence is empty.
fn as_list(value: Option<&Value>) -> Vec<Value> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.clone(),
        Some(other) => vec![other.clone()],
    }
}

fn stamp(index: usize, item: Value) -> Value {
    json!({
        "index": index,
        "item": item,
        "processed": true,
        "timestamp": Utc::now().to_rfc3339(),
    })
}

async fn pause(seconds: f64, cancel: &CancellationToken) -> Result<(), NodeError> {
    if seconds <= 0.0 {
        return Ok(());
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(NodeError::Cancelled),
        _ = sleep(Duration::from_secs_f64(seconds)) => Ok(()),
    }
}

impl IteratorNode {
    fn source_items(&self, ctx: &NodeContext) -> Result<Vec<Value>, NodeError> {
        let config = &self.config;
        let named = |name: &Option<String>| {
            name.as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string)
        };

        match config.source_type {
            ItemSource::Input => {
                let input = ctx.merged_input();
                Ok(match named(&config.input_field) {
                    Some(path) => as_list(get_path(&input, &path)),
                    None => extract_items(&input),
                })
            }
            ItemSource::Variable => Ok(named(&config.variable_name)
                .map(|name| as_list(ctx.variable(&name)))
                .unwrap_or_default()),
            ItemSource::Static => {
                let parsed: Value = serde_json::from_str(&config.static_items).map_err(|e| {
                    NodeError::Configuration(format!("Invalid static items JSON: {}", e))
                })?;
                Ok(as_list(Some(&parsed)))
            }
        }
    }

    /// Drop items failing the filter condition, then apply the item cap.
    fn select(&self, items: Vec<Value>) -> Result<Vec<Value>, NodeError> {
        let condition = self
            .config
            .filter_condition
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .map(Condition::parse)
            .transpose()?;

        let mut selected: Vec<Value> = match condition {
            Some(condition) => items
                .into_iter()
                .enumerate()
                .filter(|(index, item)| {
                    condition.evaluate(&json!({ "item": item, "index": index }))
                })
                .map(|(_, item)| item)
                .collect(),
            None => items,
        };

        if self.config.max_items > 0 {
            selected.truncate(self.config.max_items as usize);
        }
        Ok(selected)
    }
}

impl Builtin for IteratorNode {
    const TYPE: &'static str = "iterator";

    type Config = IteratorConfig;

    fn with_config(config: IteratorConfig) -> Self {
        Self { config }
    }

    fn describe() -> NodeDefinition {
        definition::<IteratorConfig>(
            Self::TYPE,
            NodeCategory::Logic,
            "Iterator/Loop",
            "Iterate over collections of data with batch processing and filtering",
            "repeat",
            vec![PortDefinition::new("input", "any")
                .describe("Input data containing items to iterate over")],
            vec![PortDefinition::new("items", "array")
                .required()
                .describe("Processed items")],
        )
    }
}

#[async_trait]
impl Node for IteratorNode {
    fn node_type(&self) -> &str {
        Self::TYPE
    }

    fn definition(&self) -> NodeDefinition {
        Self::describe()
    }

    async fn execute(&self, ctx: NodeContext) -> NodeResult {
        let source = self.source_items(&ctx)?;
        let source_count = source.len();
        let items = self.select(source)?;
        let total = items.len();

        if items.is_empty() {
            ctx.events.warn("No items to iterate over");
            return Ok(ctx.output(json!({
                "items": [],
                "totalItems": 0,
                "processedItems": 0,
                "batches": 0,
            })));
        }

        let batch_size = match self.config.batch_size as usize {
            0 => total,
            n => n,
        };
        let batch_count = total.div_ceil(batch_size);
        ctx.events.info(format!(
            "Processing {} items in {} batch(es)",
            total, batch_count
        ));

        let mut results = Vec::with_capacity(total);
        for (batch_index, batch) in items.chunks(batch_size).enumerate() {
            if batch_index > 0 {
                pause(self.config.batch_delay, &ctx.cancellation).await?;
            }
            let offset = batch_index * batch_size;

            if self.config.parallel {
                let stamped = join_all(
                    batch
                        .iter()
                        .enumerate()
                        .map(|(i, item)| async move { stamp(offset + i, item.clone()) }),
                )
                .await;
                results.extend(stamped);
            } else {
                for (i, item) in batch.iter().enumerate() {
                    if ctx.cancellation.is_cancelled() {
                        return Err(NodeError::Cancelled.into());
                    }
                    results.push(stamp(offset + i, item.clone()));
                    if i + 1 < batch.len() {
                        pause(self.config.item_delay, &ctx.cancellation).await?;
                    }
                }
            }

            ctx.events.info(format!(
                "Processed batch {}/{} ({}/{} items)",
                batch_index + 1,
                batch_count,
                results.len(),
                total
            ));
            ctx.events.progress(
                results.len() as f64 * 100.0 / total as f64,
                Some(format!("Batch {}/{}", batch_index + 1, batch_count)),
            );
        }

        ctx.events
            .info(format!("Iterator completed: processed {} items", results.len()));

        Ok(ctx.output(json!({
            "totalItems": total,
            "processedItems": results.len(),
            "items": results,
            "batches": batch_count,
            "metadata": {
                "batchSize": batch_size,
                "parallel": self.config.parallel,
                "filtered": total != source_count,
            },
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcore::{EventBus, EventEmitter, ExecutionEvent, ExecutionId, WorkflowNode};
    use serde_json::Map;

    fn iterator(config: Value) -> (WorkflowNode, IteratorNode) {
        let mut node = WorkflowNode::new("loop", "iterator");
        node.config = config.as_object().cloned().unwrap();
        let iterator = IteratorNode::parse(&node).unwrap();
        (node, iterator)
    }

    async fn run(config: Value, input: Value) -> Value {
        let (node, iterator) = iterator(config);
        let ctx = NodeContext::new(node, EventEmitter::detached("loop")).with_input("input", input);
        iterator.execute(ctx).await.unwrap().data
    }

    #[tokio::test]
    async fn test_reports_progress_per_batch() {
        let bus = EventBus::new(64);
        let mut events = bus.subscribe();
        let (logs, _log_rx) = tokio::sync::mpsc::unbounded_channel();
        let (node, iterator) = iterator(json!({"batch_size": 2}));
        let emitter = bus.create_emitter(ExecutionId::nil(), "loop".into(), logs);
        let ctx = NodeContext::new(node, emitter)
            .with_input("input", json!({"subdomains": ["a", "b", "c"]}));
        iterator.execute(ctx).await.unwrap();

        let mut percents = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ExecutionEvent::NodeProgress { percent, node_id, .. } = event {
                assert_eq!(node_id, "loop");
                percents.push(percent);
            }
        }
        assert_eq!(percents.len(), 2);
        assert!(percents[0] > 66.0 && percents[0] < 67.0);
        assert_eq!(percents[1], 100.0);
    }

    #[tokio::test]
    async fn test_batches_input_list() {
        let output = run(
            json!({"batch_size": 2}),
            json!({"subdomains": ["a", "b", "c", "d", "e"]}),
        )
        .await;
        assert_eq!(output["totalItems"], 5);
        assert_eq!(output["processedItems"], 5);
        assert_eq!(output["batches"], 3);
        assert_eq!(output["items"][4]["index"], 4);
        assert_eq!(output["items"][4]["item"], "e");
        assert_eq!(output["items"][0]["processed"], true);
        assert_eq!(output["metadata"]["filtered"], false);
    }

    #[tokio::test]
    async fn test_input_field_and_filter() {
        let output = run(
            json!({
                "input_field": "scan.results",
                "filter_condition": "item.status == 200",
                "parallel": true,
            }),
            json!({"scan": {"results": [{"status": 200}, {"status": 404}, {"status": 200}]}}),
        )
        .await;
        assert_eq!(output["totalItems"], 2);
        assert_eq!(output["items"][1]["index"], 1);
        assert_eq!(output["metadata"]["filtered"], true);
        assert_eq!(output["metadata"]["parallel"], true);
    }

    #[tokio::test]
    async fn test_static_items_and_cap() {
        let output = run(
            json!({"source_type": "static", "static_items": "[1, 2, 3, 4]", "max_items": 3, "batch_size": 0}),
            Value::Null,
        )
        .await;
        assert_eq!(output["totalItems"], 3);
        assert_eq!(output["batches"], 1);
        assert_eq!(output["metadata"]["batchSize"], 3);
    }

    #[tokio::test]
    async fn test_variable_source() {
        let (node, iterator) = iterator(json!({"source_type": "variable", "variable_name": "hosts"}));
        let mut variables = Map::new();
        variables.insert("hosts".into(), json!(["a.example.com"]));
        let ctx = NodeContext::new(node, EventEmitter::detached("loop")).with_variables(variables);
        let output = iterator.execute(ctx).await.unwrap().data;
        assert_eq!(output["items"][0]["item"], "a.example.com");
    }

    #[tokio::test]
    async fn test_empty_and_invalid_sources() {
        let output = run(json!({}), json!([])).await;
        assert_eq!(output["totalItems"], 0);

        let (node, iterator) = iterator(json!({"source_type": "static", "static_items": "[oops"}));
        let failure = iterator
            .execute(NodeContext::new(node, EventEmitter::detached("loop")))
            .await
            .unwrap_err();
        assert!(matches!(failure.error, NodeError::Configuration(_)));
    }
}

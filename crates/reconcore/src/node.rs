use crate::backend::TaskBackend;
use crate::events::EventEmitter;
use crate::schema::NodeDefinition;
use crate::value::merge_payloads;
use crate::{template, ExecutionId, NodeError, NodeId, WorkflowNode};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Core trait that all executable nodes implement
#[async_trait]
pub trait Node: Send + Sync {
    /// Type identifier as used in workflow documents (e.g. "subfinder")
    fn node_type(&self) -> &str;

    /// Declarative metadata: category, ports and configuration schema
    fn definition(&self) -> NodeDefinition;

    /// Run one unit of work. Nodes never touch the graph; the engine commits
    /// whatever comes back.
    async fn execute(&self, ctx: NodeContext) -> NodeResult;
}

/// Upstream output addressed to one input port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInput {
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_node: Option<NodeId>,
}

impl NodeInput {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            source_node: None,
        }
    }

    pub fn from_node(data: Value, source: impl Into<String>) -> Self {
        Self {
            data,
            source_node: Some(source.into()),
        }
    }
}

pub type NodeInputs = BTreeMap<String, NodeInput>;

/// Execution context passed to each node
#[derive(Clone)]
pub struct NodeContext {
    /// Snapshot of the node being executed (id, type, raw config)
    pub node: WorkflowNode,

    /// Inputs keyed by target port
    pub inputs: NodeInputs,

    /// Run variables: backend address, credential and caller extras
    pub variables: Arc<Map<String, Value>>,

    pub execution_id: ExecutionId,

    /// Node-side logger; entries reach the run log through the engine
    pub events: EventEmitter,

    pub cancellation: CancellationToken,

    /// Injected task backend; tool nodes build an HTTP one when absent
    pub backend: Option<Arc<dyn TaskBackend>>,
}

impl NodeContext {
    pub fn new(node: WorkflowNode, events: EventEmitter) -> Self {
        Self {
            node,
            inputs: NodeInputs::new(),
            variables: Arc::new(Map::new()),
            execution_id: uuid::Uuid::new_v4(),
            events,
            cancellation: CancellationToken::new(),
            backend: None,
        }
    }

    pub fn with_input(mut self, port: impl Into<String>, data: Value) -> Self {
        self.inputs.insert(port.into(), NodeInput::new(data));
        self
    }

    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = Arc::new(variables);
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn TaskBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn node_id(&self) -> &str {
        &self.node.id
    }

    pub fn config(&self) -> &Map<String, Value> {
        &self.node.config
    }

    /// Get required input or return error
    pub fn require_input(&self, port: &str) -> Result<&Value, NodeError> {
        self.inputs
            .get(port)
            .map(|i| &i.data)
            .ok_or_else(|| NodeError::MissingInput(port.to_string()))
    }

    pub fn variable(&self, key: &str) -> Option<&Value> {
        self.variables.get(key)
    }

    /// All inputs folded into one payload.
    pub fn merged_input(&self) -> Value {
        merge_payloads(self.inputs.iter().map(|(port, input)| (port.as_str(), &input.data)))
    }

    /// Substitute `{{name}}` from variables, then `extra`, then node config.
    pub fn render(&self, template: &str, extra: Option<&Map<String, Value>>) -> String {
        let mut sources: Vec<&Map<String, Value>> = vec![self.variables.as_ref()];
        if let Some(extra) = extra {
            sources.push(extra);
        }
        sources.push(&self.node.config);
        template::render(template, &sources)
    }

    /// Build a successful output stamped with this node's id.
    pub fn output(&self, data: Value) -> NodeOutput {
        NodeOutput::new(data).for_node(self.node_id())
    }
}

/// Output from node execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeOutput {
    pub data: Value,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metadata: NodeMetadata,
}

impl NodeOutput {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            success: true,
            error: None,
            metadata: NodeMetadata::default(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            data: Value::Object(Map::new()),
            success: false,
            error: Some(error.into()),
            metadata: NodeMetadata::default(),
        }
    }

    pub fn for_node(mut self, node_id: impl Into<String>) -> Self {
        self.metadata.node_id = Some(node_id.into());
        self
    }

    pub fn with_execution_time(mut self, ms: u64) -> Self {
        self.metadata.execution_time_ms = ms;
        self
    }
}

/// Metadata about node execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub execution_time_ms: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
}

impl Default for NodeMetadata {
    fn default() -> Self {
        Self {
            execution_time_ms: 0,
            timestamp: Utc::now(),
            node_id: None,
        }
    }
}

/// A node that did not produce output.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{error}")]
pub struct NodeFailure {
    pub error: NodeError,
    /// Let the run go on even if the node's config says stop on error
    pub should_continue: bool,
}

impl NodeFailure {
    pub fn recoverable(error: NodeError) -> Self {
        Self {
            error,
            should_continue: true,
        }
    }
}

impl From<NodeError> for NodeFailure {
    fn from(error: NodeError) -> Self {
        Self {
            error,
            should_continue: false,
        }
    }
}

pub type NodeResult = Result<NodeOutput, NodeFailure>;

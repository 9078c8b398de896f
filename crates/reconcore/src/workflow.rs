use crate::WorkflowError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub type WorkflowId = String;
pub type NodeId = String;

/// Port name used when a connection does not name one.
pub const DEFAULT_PORT: &str = "main";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeCategory {
    #[default]
    Discovery,
    Analysis,
    Logic,
    Data,
    Output,
}

impl NodeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Analysis => "analysis",
            Self::Logic => "logic",
            Self::Data => "data",
            Self::Output => "output",
        }
    }
}

impl std::fmt::Display for NodeCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NodeCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "discovery" => Ok(Self::Discovery),
            "analysis" => Ok(Self::Analysis),
            "logic" => Ok(Self::Logic),
            "data" => Ok(Self::Data),
            "output" => Ok(Self::Output),
            other => Err(format!("unknown node category: {}", other)),
        }
    }
}

/// A workflow graph: nodes in insertion order plus the edges between them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowGraph {
    pub id: WorkflowId,
    pub name: String,
    pub nodes: Vec<WorkflowNode>,
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub variables: Map<String, Value>,
    #[serde(default)]
    pub status: GraphStatus,
}

impl WorkflowGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            nodes: Vec::new(),
            connections: Vec::new(),
            variables: Map::new(),
            status: GraphStatus::Idle,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    /// Append a node; ids must be unique within the graph.
    pub fn add_node(&mut self, node: WorkflowNode) -> Result<NodeId, WorkflowError> {
        if self.find_node(&node.id).is_some() {
            return Err(WorkflowError::DuplicateNode(node.id));
        }
        let id = node.id.clone();
        self.nodes.push(node);
        Ok(id)
    }

    /// Remove a node together with every connection touching it.
    pub fn remove_node(&mut self, id: &str) -> Result<WorkflowNode, WorkflowError> {
        let index = self
            .nodes
            .iter()
            .position(|n| n.id == id)
            .ok_or_else(|| WorkflowError::NodeNotFound(id.to_string()))?;
        self.connections.retain(|c| c.source != id && c.target != id);
        Ok(self.nodes.remove(index))
    }

    /// Add an edge between two existing nodes. No cycle check happens here.
    pub fn connect(&mut self, connection: Connection) -> Result<&Connection, WorkflowError> {
        for end in [&connection.source, &connection.target] {
            if self.find_node(end).is_none() {
                return Err(WorkflowError::NodeNotFound(end.clone()));
            }
        }
        if connection.source == connection.target {
            return Err(WorkflowError::InvalidConnection(format!(
                "node {} cannot connect to itself",
                connection.source
            )));
        }
        if self.connections.iter().any(|c| c.id == connection.id) {
            return Err(WorkflowError::InvalidConnection(format!(
                "connection {} already exists",
                connection.id
            )));
        }
        self.connections.push(connection);
        Ok(&self.connections[self.connections.len() - 1])
    }

    pub fn disconnect(&mut self, connection_id: &str) -> Result<Connection, WorkflowError> {
        let index = self
            .connections
            .iter()
            .position(|c| c.id == connection_id)
            .ok_or_else(|| {
                WorkflowError::InvalidConnection(format!("connection {} not found", connection_id))
            })?;
        Ok(self.connections.remove(index))
    }

    pub fn find_node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn find_node_mut(&mut self, id: &str) -> Option<&mut WorkflowNode> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    pub fn incoming<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections.iter().filter(move |c| c.target == id)
    }

    pub fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections.iter().filter(move |c| c.source == id)
    }

    /// Put the graph and every node back into the pre-run state.
    pub fn reset(&mut self) {
        self.status = GraphStatus::Idle;
        for node in &mut self.nodes {
            node.status = NodeStatus::Idle;
            node.error = None;
        }
    }
}

/// One step of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    pub title: String,
    #[serde(default)]
    pub category: NodeCategory,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub status: NodeStatus,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowNode {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        let node_type = node_type.into();
        Self {
            id: id.into(),
            title: node_type.clone(),
            node_type,
            category: NodeCategory::default(),
            position: Position::default(),
            config: Map::new(),
            status: NodeStatus::Idle,
            inputs: vec![DEFAULT_PORT.to_string()],
            outputs: vec![DEFAULT_PORT.to_string()],
            data: None,
            error: None,
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_category(mut self, category: NodeCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_position(mut self, x: f64, y: f64) -> Self {
        self.position = Position { x, y };
        self
    }

    pub fn with_ports(mut self, inputs: &[&str], outputs: &[&str]) -> Self {
        self.inputs = inputs.iter().map(|s| s.to_string()).collect();
        self.outputs = outputs.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Whether a failure of this node aborts the rest of the run.
    pub fn stop_on_error(&self) -> bool {
        self.config
            .get("stop_on_error")
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }
}

/// Directed edge from one node's output port to another node's input port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default, rename = "sourceHandle", skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, rename = "targetHandle", skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

impl Connection {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        let source = source.into();
        let target = target.into();
        Self {
            id: Self::derive_id(&source, &target),
            source,
            target,
            source_handle: None,
            target_handle: None,
        }
    }

    pub fn derive_id(source: &str, target: &str) -> String {
        format!("{}-{}", source, target)
    }

    pub fn from_port(mut self, handle: impl Into<String>) -> Self {
        self.source_handle = Some(handle.into());
        self
    }

    pub fn to_port(mut self, handle: impl Into<String>) -> Self {
        self.target_handle = Some(handle.into());
        self
    }

    pub fn source_port(&self) -> &str {
        self.source_handle.as_deref().unwrap_or(DEFAULT_PORT)
    }

    pub fn target_port(&self) -> &str {
        self.target_handle.as_deref().unwrap_or(DEFAULT_PORT)
    }
}

/// Canvas position; carried for round-tripping only.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Default for Position {
    fn default() -> Self {
        Self { x: 100.0, y: 100.0 }
    }
}

//! Serializable workflow documents (the on-disk / over-the-wire format).

use crate::{
    Connection, GraphStatus, NodeCategory, NodeStatus, Position, WorkflowError, WorkflowGraph,
    WorkflowNode, DEFAULT_PORT,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashSet};

pub const DOCUMENT_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDocument {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exported_at: Option<DateTime<Utc>>,
    pub nodes: Vec<DocumentNode>,
    pub connections: Vec<DocumentConnection>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub variables: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<DocumentMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<NodeCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<NodeStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentConnection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    pub node_count: usize,
    pub connection_count: usize,
    pub categories: Vec<NodeCategory>,
}

impl WorkflowDocument {
    /// Snapshot a graph for export, stamped with version and export time.
    pub fn export(graph: &WorkflowGraph) -> Self {
        let categories: BTreeSet<&str> = graph.nodes.iter().map(|n| n.category.as_str()).collect();
        let categories = categories
            .into_iter()
            .filter_map(|c| c.parse().ok())
            .collect();

        Self {
            id: graph.id.clone(),
            name: graph.name.clone(),
            version: Some(DOCUMENT_VERSION.to_string()),
            exported_at: Some(Utc::now()),
            nodes: graph.nodes.iter().map(DocumentNode::from).collect(),
            connections: graph.connections.iter().map(DocumentConnection::from).collect(),
            variables: graph.variables.clone(),
            metadata: Some(DocumentMetadata {
                node_count: graph.nodes.len(),
                connection_count: graph.connections.len(),
                categories,
            }),
        }
    }

    /// Build a runnable graph. Missing optional fields take their defaults and
    /// every status comes back `idle`.
    pub fn into_graph(self) -> Result<WorkflowGraph, WorkflowError> {
        if self.id.trim().is_empty() {
            return Err(WorkflowError::Invalid("workflow id is required".into()));
        }

        let mut graph = WorkflowGraph::new(self.name).with_id(self.id);
        graph.variables = self.variables;
        graph.status = GraphStatus::Idle;

        for doc in self.nodes {
            let node = WorkflowNode {
                title: doc.title.unwrap_or_else(|| doc.node_type.clone()),
                id: doc.id,
                node_type: doc.node_type,
                category: doc.category.unwrap_or_default(),
                position: doc.position.unwrap_or_default(),
                config: doc.config,
                status: NodeStatus::Idle,
                inputs: doc.inputs.unwrap_or_else(|| vec![DEFAULT_PORT.to_string()]),
                outputs: doc.outputs.unwrap_or_else(|| vec![DEFAULT_PORT.to_string()]),
                data: doc.data,
                error: None,
            };
            graph.add_node(node)?;
        }

        let mut seen = HashSet::new();
        for doc in self.connections {
            let id = doc
                .id
                .unwrap_or_else(|| Connection::derive_id(&doc.source, &doc.target));
            if !seen.insert(id.clone()) {
                return Err(WorkflowError::InvalidConnection(format!(
                    "duplicate connection {}",
                    id
                )));
            }
            graph.connect(Connection {
                id,
                source: doc.source,
                target: doc.target,
                source_handle: doc.source_handle,
                target_handle: doc.target_handle,
            })?;
        }

        Ok(graph)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl From<&WorkflowNode> for DocumentNode {
    fn from(node: &WorkflowNode) -> Self {
        Self {
            id: node.id.clone(),
            node_type: node.node_type.clone(),
            title: Some(node.title.clone()),
            category: Some(node.category),
            position: Some(node.position),
            config: node.config.clone(),
            status: Some(node.status),
            inputs: Some(node.inputs.clone()),
            outputs: Some(node.outputs.clone()),
            data: node.data.clone(),
        }
    }
}

impl From<&Connection> for DocumentConnection {
    fn from(conn: &Connection) -> Self {
        Self {
            id: Some(conn.id.clone()),
            source: conn.source.clone(),
            target: conn.target.clone(),
            source_handle: conn.source_handle.clone(),
            target_handle: conn.target_handle.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> WorkflowGraph {
        let mut graph = WorkflowGraph::new("recon").with_id("wf-1");
        graph
            .add_node(WorkflowNode::new("enum", "subfinder").with_config("domain", "example.com"))
            .unwrap();
        graph
            .add_node(WorkflowNode::new("scan", "nuclei").with_category(NodeCategory::Analysis))
            .unwrap();
        graph.connect(Connection::new("enum", "scan")).unwrap();
        graph
    }

    #[test]
    fn test_export_reload_resets_statuses() {
        let mut graph = sample();
        graph.status = GraphStatus::Completed;
        graph.nodes[0].status = NodeStatus::Completed;
        graph.nodes[1].status = NodeStatus::Failed;
        graph.nodes[1].error = Some("boom".into());

        let json = WorkflowDocument::export(&graph).to_json_pretty().unwrap();
        let reloaded = WorkflowDocument::from_json(&json).unwrap().into_graph().unwrap();

        assert_eq!(reloaded.status, GraphStatus::Idle);
        assert_eq!(reloaded.connections, graph.connections);
        assert_eq!(reloaded.nodes.len(), graph.nodes.len());
        for (before, after) in graph.nodes.iter().zip(&reloaded.nodes) {
            assert_eq!(after.status, NodeStatus::Idle);
            assert_eq!(after.error, None);
            assert_eq!(after.id, before.id);
            assert_eq!(after.config, before.config);
            assert_eq!(after.category, before.category);
        }
    }

    #[test]
    fn test_export_metadata() {
        let doc = WorkflowDocument::export(&sample());
        let meta = doc.metadata.unwrap();
        assert_eq!(doc.version.as_deref(), Some("1.0"));
        assert_eq!(meta.node_count, 2);
        assert_eq!(meta.connection_count, 1);
        assert_eq!(meta.categories, vec![NodeCategory::Analysis, NodeCategory::Discovery]);
    }

    #[test]
    fn test_import_applies_defaults() {
        let doc: WorkflowDocument = serde_json::from_value(json!({
            "id": "wf", "name": "minimal",
            "nodes": [{"id": "a", "type": "subfinder", "status": "failed"}, {"id": "b", "type": "nuclei"}],
            "connections": [{"source": "a", "target": "b", "targetHandle": "targets"}]
        }))
        .unwrap();
        let graph = doc.into_graph().unwrap();
        let a = graph.find_node("a").unwrap();
        assert_eq!(a.category, NodeCategory::Discovery);
        assert_eq!(a.position, Position { x: 100.0, y: 100.0 });
        assert_eq!(a.status, NodeStatus::Idle);
        assert_eq!(graph.connections[0].id, "a-b");
        assert_eq!(graph.connections[0].target_port(), "targets");
    }

    #[test]
    fn test_import_rejects_duplicate_connections() {
        let doc: WorkflowDocument = serde_json::from_value(json!({
            "id": "wf", "name": "dup",
            "nodes": [{"id": "a", "type": "subfinder"}, {"id": "b", "type": "nuclei"}],
            "connections": [{"source": "a", "target": "b"}, {"source": "a", "target": "b"}]
        }))
        .unwrap();
        assert!(matches!(doc.into_graph(), Err(WorkflowError::InvalidConnection(_))));
    }
}

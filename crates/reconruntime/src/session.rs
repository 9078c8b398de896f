//! Editing operations over a workflow graph between runs.

use crate::registry::NodeRegistry;
use crate::resolver::{ExecutionStats, GraphResolver, Phases};
use reconcore::schema::ConfigValidation;
use reconcore::{
    Connection, NodeDefinition, NodeId, WorkflowError, WorkflowGraph, WorkflowNode,
};
use serde_json::{Map, Value};
use std::sync::Arc;

pub struct WorkflowSession {
    graph: WorkflowGraph,
    registry: Arc<NodeRegistry>,
    resolver: GraphResolver,
}

impl WorkflowSession {
    pub fn new(graph: WorkflowGraph, registry: Arc<NodeRegistry>) -> Self {
        Self {
            graph,
            registry,
            resolver: GraphResolver::new(),
        }
    }

    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    pub fn into_graph(self) -> WorkflowGraph {
        self.graph
    }

    /// Add a node of a registered type. Empty config, category and ports are
    /// filled in from the type's definition.
    pub fn add_node(&mut self, mut node: WorkflowNode) -> Result<NodeId, WorkflowError> {
        if !self.registry.is_registered(&node.node_type) {
            return Err(WorkflowError::UnknownNodeType(node.node_type));
        }

        if let Some(definition) = self.registry.get_definition(&node.node_type) {
            node.category = definition.category;
            if node.config.is_empty() {
                node.config = definition.default_config.clone();
            }
            node.inputs = definition.inputs.iter().map(|p| p.name.clone()).collect();
            node.outputs = definition.outputs.iter().map(|p| p.name.clone()).collect();
        }

        tracing::debug!(node_id = %node.id, node_type = %node.node_type, "Adding node");
        self.graph.add_node(node)
    }

    pub fn remove_node(&mut self, id: &str) -> Result<WorkflowNode, WorkflowError> {
        self.graph.remove_node(id)
    }

    /// Add a connection, refusing any that would close a cycle.
    pub fn add_connection(&mut self, connection: Connection) -> Result<&Connection, WorkflowError> {
        if self.resolver.would_create_cycle(&self.graph, &connection)? {
            tracing::warn!(
                "Rejected connection {} -> {}: would create a cycle",
                connection.source,
                connection.target
            );
            return Err(WorkflowError::CyclicDependency(connection.target));
        }
        self.graph.connect(connection)
    }

    pub fn remove_connection(&mut self, connection_id: &str) -> Result<Connection, WorkflowError> {
        self.graph.disconnect(connection_id)
    }

    /// Merge `patch` into a node's configuration and report schema violations.
    /// A `null` value removes the key.
    pub fn update_node_config(
        &mut self,
        id: &str,
        patch: Map<String, Value>,
    ) -> Result<ConfigValidation, WorkflowError> {
        let node = self
            .graph
            .find_node_mut(id)
            .ok_or_else(|| WorkflowError::NodeNotFound(id.to_string()))?;

        for (key, value) in patch {
            if value.is_null() {
                node.config.remove(&key);
            } else {
                node.config.insert(key, value);
            }
        }

        let node = node.clone();
        Ok(self.registry.validate_node_config(&node))
    }

    pub fn validate_node(&self, id: &str) -> Result<ConfigValidation, WorkflowError> {
        let node = self
            .graph
            .find_node(id)
            .ok_or_else(|| WorkflowError::NodeNotFound(id.to_string()))?;
        Ok(self.registry.validate_node_config(node))
    }

    pub fn definition(&self, node_type: &str) -> Option<&NodeDefinition> {
        self.registry.get_definition(node_type)
    }

    pub fn node_types(&self) -> Vec<String> {
        self.registry.list_node_types()
    }

    pub fn plan(&self) -> Result<Phases, WorkflowError> {
        self.resolver.resolve_execution_order(&self.graph)
    }

    pub fn stats(&self) -> Result<ExecutionStats, WorkflowError> {
        self.resolver.execution_stats(&self.graph)
    }
}

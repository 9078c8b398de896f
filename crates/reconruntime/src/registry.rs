use reconcore::schema::ConfigValidation;
use reconcore::{
    ConfigViolation, Node, NodeCategory, NodeDefinition, NodeError, WorkflowError, WorkflowNode,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Factory trait for creating node instances
pub trait NodeFactory: Send + Sync {
    /// Get node type identifier
    fn node_type(&self) -> &str;

    /// Create an executable instance for one workflow node
    fn create(&self, node: &WorkflowNode) -> Result<Box<dyn Node>, NodeError>;

    /// Declarative definition (ports, schema). Derived once, at registration.
    fn definition(&self) -> Result<NodeDefinition, NodeError>;
}

/// Registry of available node types
pub struct NodeRegistry {
    factories: HashMap<String, Arc<dyn NodeFactory>>,
    definitions: HashMap<String, NodeDefinition>,
    order: Vec<String>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            definitions: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Register a node factory. A definition that cannot be derived is logged
    /// and left out; the type itself stays instantiable.
    pub fn register(&mut self, factory: Arc<dyn NodeFactory>) {
        let node_type = factory.node_type().to_string();
        tracing::info!("Registering node type: {}", node_type);

        match factory.definition() {
            Ok(definition) => {
                self.definitions.insert(node_type.clone(), definition);
            }
            Err(e) => {
                tracing::warn!("Failed to get definition for node type {}: {}", node_type, e);
                self.definitions.remove(&node_type);
            }
        }

        if self.factories.insert(node_type.clone(), factory).is_none() {
            self.order.push(node_type);
        }
    }

    /// Create a node instance for a workflow node
    pub fn create_node(&self, node: &WorkflowNode) -> Result<Box<dyn Node>, WorkflowError> {
        let factory = self
            .factories
            .get(&node.node_type)
            .ok_or_else(|| WorkflowError::UnknownNodeType(node.node_type.clone()))?;

        factory
            .create(node)
            .map_err(|e| WorkflowError::Invalid(format!("Failed to create node {}: {}", node.id, e)))
    }

    pub fn is_registered(&self, node_type: &str) -> bool {
        self.factories.contains_key(node_type)
    }

    /// Registered node types in registration order
    pub fn list_node_types(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn get_definition(&self, node_type: &str) -> Option<&NodeDefinition> {
        self.definitions.get(node_type)
    }

    pub fn all_definitions(&self) -> Vec<&NodeDefinition> {
        self.order
            .iter()
            .filter_map(|t| self.definitions.get(t))
            .collect()
    }

    pub fn definitions_by_category(&self, category: NodeCategory) -> Vec<&NodeDefinition> {
        self.all_definitions()
            .into_iter()
            .filter(|d| d.category == category)
            .collect()
    }

    /// Check a node's configuration against its type's schema. A registered
    /// type without a definition has nothing to check against and passes.
    pub fn validate_node_config(&self, node: &WorkflowNode) -> ConfigValidation {
        match self.definitions.get(&node.node_type) {
            Some(definition) => definition.validate(&node.config),
            None if self.is_registered(&node.node_type) => {
                tracing::debug!(
                    "No definition for node type {}; configuration of {} not validated",
                    node.node_type,
                    node.id
                );
                ConfigValidation::default()
            }
            None => ConfigValidation {
                violations: vec![ConfigViolation {
                    field: "type".to_string(),
                    message: format!("Unknown node type: {}", node.node_type),
                }],
            },
        }
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

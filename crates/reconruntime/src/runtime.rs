use crate::executor::{ExecutionHandle, ExecutionOutcome, ProgressObserver, WorkflowEngine};
use crate::registry::NodeRegistry;
use crate::session::WorkflowSession;
use reconcore::{
    EventBus, ExecutionContext, ExecutionEvent, FlowError, TaskBackend, WorkflowError,
    WorkflowGraph, WorkflowId,
};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Main runtime for executing workflows
pub struct FlowRuntime {
    registry: Arc<NodeRegistry>,
    engine: Arc<WorkflowEngine>,
    event_bus: Arc<EventBus>,
    workflows: Arc<RwLock<HashMap<WorkflowId, WorkflowGraph>>>,
}

impl FlowRuntime {
    /// Create a runtime around a pre-populated registry
    pub fn with_registry(registry: NodeRegistry, config: RuntimeConfig) -> Self {
        let registry = Arc::new(registry);
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));

        let mut engine = WorkflowEngine::new(Arc::clone(&registry), Arc::clone(&event_bus));
        if let Some(limit) = config.node_timeout {
            engine = engine.with_node_timeout(limit);
        }
        if let Some(backend) = config.backend {
            engine = engine.with_backend(backend);
        }

        Self {
            registry,
            engine: Arc::new(engine),
            event_bus,
            workflows: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &Arc<WorkflowEngine> {
        &self.engine
    }

    /// Open an editing session over a graph.
    pub fn session(&self, graph: WorkflowGraph) -> WorkflowSession {
        WorkflowSession::new(graph, Arc::clone(&self.registry))
    }

    /// Store a workflow, replacing any with the same id
    pub async fn register_workflow(&self, workflow: WorkflowGraph) {
        let mut workflows = self.workflows.write().await;
        workflows.insert(workflow.id.clone(), workflow);
    }

    pub async fn get_workflow(&self, id: &str) -> Option<WorkflowGraph> {
        self.workflows.read().await.get(id).cloned()
    }

    pub async fn list_workflows(&self) -> Vec<WorkflowGraph> {
        let mut list: Vec<WorkflowGraph> = self.workflows.read().await.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    pub async fn remove_workflow(&self, id: &str) -> Option<WorkflowGraph> {
        self.workflows.write().await.remove(id)
    }

    /// Execute a stored workflow; its node statuses are written back afterwards.
    pub async fn execute_workflow(
        &self,
        workflow_id: &str,
        variables: Map<String, Value>,
    ) -> Result<ExecutionOutcome, FlowError> {
        let mut graph = self
            .get_workflow(workflow_id)
            .await
            .ok_or_else(|| FlowError::Workflow(WorkflowError::NotFound(workflow_id.to_string())))?;

        let context = self.engine.execute(&mut graph, variables, None).await;
        self.register_workflow(graph.clone()).await;
        Ok(ExecutionOutcome { graph, context })
    }

    /// Execute a workflow directly (without registration)
    pub async fn execute(
        &self,
        graph: &mut WorkflowGraph,
        variables: Map<String, Value>,
        observer: Option<&dyn ProgressObserver>,
    ) -> ExecutionContext {
        self.engine.execute(graph, variables, observer).await
    }

    /// Run in the background with pause/resume/cancel control
    pub fn spawn(
        &self,
        graph: WorkflowGraph,
        variables: Map<String, Value>,
        observer: Option<Arc<dyn ProgressObserver>>,
    ) -> ExecutionHandle {
        self.engine.spawn(graph, variables, observer)
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}

/// Configuration for the runtime
#[derive(Clone)]
pub struct RuntimeConfig {
    pub event_buffer_size: usize,
    /// Upper bound for a single node execution
    pub node_timeout: Option<Duration>,
    /// Backend handed to tool nodes; when unset they build one from run variables
    pub backend: Option<Arc<dyn TaskBackend>>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 1000,
            node_timeout: None,
            backend: None,
        }
    }
}

impl std::fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("event_buffer_size", &self.event_buffer_size)
            .field("node_timeout", &self.node_timeout)
            .field("backend", &self.backend.is_some())
            .finish()
    }
}

use crate::registry::NodeRegistry;
use crate::resolver::{GraphResolver, Phases};
use chrono::Utc;
use futures::future::join_all;
use reconcore::{
    Connection, EventBus, ExecutionContext, ExecutionEvent, ExecutionId, FlowError, GraphStatus,
    LogEntry, LogLevel, NodeContext, NodeError, NodeFailure, NodeInput, NodeInputs, NodeOutput,
    NodeResult, NodeStatus, TaskBackend, WorkflowError, WorkflowGraph,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;

/// Output key a router node uses to report which branch it took.
pub const BRANCH_KEY: &str = "passedCondition";

/// Output key holding the data a router forwards down its taken branch.
pub const ROUTED_KEY: &str = "data";

/// Snapshot handed to a [`ProgressObserver`].
pub struct Progress<'a> {
    /// Phases finished so far
    pub phase: usize,
    pub total_phases: usize,
    pub finished: bool,
    pub graph: &'a WorkflowGraph,
    pub context: &'a ExecutionContext,
}

/// Called after every phase and once more when the run ends.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, progress: &Progress<'_>);
}

impl<F> ProgressObserver for F
where
    F: Fn(&Progress<'_>) + Send + Sync,
{
    fn on_progress(&self, progress: &Progress<'_>) {
        self(progress)
    }
}

/// Pause/cancel switches shared between a run and its handle.
struct RunControl {
    cancel: CancellationToken,
    paused: watch::Sender<bool>,
    status: watch::Sender<GraphStatus>,
}

impl RunControl {
    fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            paused: watch::channel(false).0,
            status: watch::channel(GraphStatus::Idle).0,
        }
    }
}

enum Dispatch {
    Spawned(JoinHandle<(NodeResult, u64)>),
    Rejected(NodeFailure),
}

/// Runs workflow graphs phase by phase.
pub struct WorkflowEngine {
    registry: Arc<NodeRegistry>,
    resolver: GraphResolver,
    event_bus: Arc<EventBus>,
    node_timeout: Option<Duration>,
    backend: Option<Arc<dyn TaskBackend>>,
}

impl WorkflowEngine {
    pub fn new(registry: Arc<NodeRegistry>, event_bus: Arc<EventBus>) -> Self {
        Self {
            registry,
            resolver: GraphResolver::new(),
            event_bus,
            node_timeout: None,
            backend: None,
        }
    }

    /// Bound every node execution.
    pub fn with_node_timeout(mut self, limit: Duration) -> Self {
        self.node_timeout = Some(limit);
        self
    }

    /// Hand this backend to tool nodes instead of letting them dial HTTP.
    pub fn with_backend(mut self, backend: Arc<dyn TaskBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn resolver(&self) -> &GraphResolver {
        &self.resolver
    }

    /// Execute a graph to completion, updating node statuses in place.
    ///
    /// Never fails: the outcome is visible through the graph status, node
    /// statuses/errors and the returned context.
    pub async fn execute(
        &self,
        graph: &mut WorkflowGraph,
        variables: Map<String, Value>,
        observer: Option<&dyn ProgressObserver>,
    ) -> ExecutionContext {
        let context = ExecutionContext::new(graph.id.clone(), variables);
        self.run(graph, context, observer, &RunControl::new()).await
    }

    /// Start a run in the background; the handle can pause, resume or cancel it.
    pub fn spawn(
        self: &Arc<Self>,
        mut graph: WorkflowGraph,
        variables: Map<String, Value>,
        observer: Option<Arc<dyn ProgressObserver>>,
    ) -> ExecutionHandle {
        let control = Arc::new(RunControl::new());
        let context = ExecutionContext::new(graph.id.clone(), variables);
        let execution_id = context.execution_id;

        let engine = Arc::clone(self);
        let run_control = Arc::clone(&control);
        let task = tokio::spawn(async move {
            let context = engine
                .run(&mut graph, context, observer.as_deref(), &run_control)
                .await;
            ExecutionOutcome { graph, context }
        });

        ExecutionHandle {
            execution_id,
            control,
            task,
        }
    }

    async fn run(
        &self,
        graph: &mut WorkflowGraph,
        mut context: ExecutionContext,
        observer: Option<&dyn ProgressObserver>,
        control: &RunControl,
    ) -> ExecutionContext {
        let execution_id = context.execution_id;

        // graph variables sit under the caller's
        let mut variables = graph.variables.clone();
        variables.extend(std::mem::take(&mut context.variables));
        context.variables = variables;

        graph.reset();
        set_status(graph, control, GraphStatus::Running);

        self.event_bus.emit(ExecutionEvent::WorkflowStarted {
            execution_id,
            workflow_id: graph.id.clone(),
            timestamp: Utc::now(),
        });
        self.log(
            &mut context,
            LogLevel::Info,
            None,
            format!("Starting workflow execution: {}", graph.name),
        );

        let (log_tx, mut log_rx) = mpsc::unbounded_channel::<LogEntry>();
        let variables = Arc::new(context.variables.clone());

        let mut total_phases = 0;
        let outcome = match self.preflight(graph, &mut context) {
            Err(e) => Err(FlowError::Workflow(e)),
            Ok(phases) => {
                total_phases = phases.len();
                self.log(
                    &mut context,
                    LogLevel::Info,
                    None,
                    format!("Execution plan created with {} phases", phases.len()),
                );
                self.run_phases(
                    graph,
                    &mut context,
                    &phases,
                    &variables,
                    &log_tx,
                    &mut log_rx,
                    observer,
                    control,
                )
                .await
            }
        };

        match outcome {
            Ok(()) => {
                set_status(graph, control, GraphStatus::Completed);
                self.log(
                    &mut context,
                    LogLevel::Info,
                    None,
                    "Workflow execution completed successfully",
                );
            }
            Err(e) => {
                set_status(graph, control, GraphStatus::Failed);
                let level = if matches!(e, FlowError::Cancelled) {
                    LogLevel::Warn
                } else {
                    LogLevel::Error
                };
                self.log(&mut context, level, None, format!("Workflow execution failed: {}", e));
                self.skip_remaining(graph, &mut context, &e.to_string());
            }
        }

        drain_logs(&mut log_rx, &mut context);
        context.finish();

        self.event_bus.emit(ExecutionEvent::WorkflowCompleted {
            execution_id,
            status: graph.status,
            duration_ms: context.duration_ms(),
            timestamp: Utc::now(),
        });

        if let Some(observer) = observer {
            observer.on_progress(&Progress {
                phase: total_phases,
                total_phases,
                finished: true,
                graph,
                context: &context,
            });
        }

        context
    }

    /// Structural checks that abort the run before anything is dispatched.
    fn preflight(
        &self,
        graph: &mut WorkflowGraph,
        context: &mut ExecutionContext,
    ) -> Result<Phases, WorkflowError> {
        let unknown: Vec<(String, String)> = graph
            .nodes
            .iter()
            .filter(|n| !self.registry.is_registered(&n.node_type))
            .map(|n| (n.id.clone(), n.node_type.clone()))
            .collect();

        if let Some((_, node_type)) = unknown.first() {
            for (id, node_type) in &unknown {
                let message = format!("Unknown node type: {}", node_type);
                if let Some(node) = graph.find_node_mut(id) {
                    node.status = NodeStatus::Failed;
                    node.error = Some(message.clone());
                }
                context.mark_failed(id, Some(NodeOutput::failed(message.clone()).for_node(id.as_str())));
                self.log(context, LogLevel::Error, Some(id.as_str()), message);
            }
            return Err(WorkflowError::UnknownNodeType(node_type.clone()));
        }

        self.resolver.resolve_execution_order(graph)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_phases(
        &self,
        graph: &mut WorkflowGraph,
        context: &mut ExecutionContext,
        phases: &Phases,
        variables: &Arc<Map<String, Value>>,
        log_tx: &mpsc::UnboundedSender<LogEntry>,
        log_rx: &mut mpsc::UnboundedReceiver<LogEntry>,
        observer: Option<&dyn ProgressObserver>,
        control: &RunControl,
    ) -> Result<(), FlowError> {
        for (index, phase) in phases.iter().enumerate() {
            self.wait_if_paused(graph, context, control).await?;
            if control.cancel.is_cancelled() {
                return Err(FlowError::Cancelled);
            }

            let runnable: Vec<&String> = phase
                .iter()
                .filter(|id| {
                    graph
                        .find_node(id)
                        .map(|n| n.status == NodeStatus::Idle)
                        .unwrap_or(false)
                })
                .collect();
            if runnable.is_empty() {
                continue;
            }

            self.log(
                context,
                LogLevel::Info,
                None,
                format!("Starting execution phase {} with {} nodes", index + 1, runnable.len()),
            );
            self.event_bus.emit(ExecutionEvent::PhaseStarted {
                execution_id: context.execution_id,
                phase: index + 1,
                nodes: runnable.iter().map(|id| id.to_string()).collect(),
                timestamp: Utc::now(),
            });

            // launch the whole phase before awaiting any of it
            let mut launched = Vec::with_capacity(runnable.len());
            for id in runnable {
                let dispatch = self.dispatch(graph, context, id, variables, log_tx, control);
                launched.push((id.clone(), dispatch));
            }

            let (ids, dispatches): (Vec<String>, Vec<Dispatch>) = launched.into_iter().unzip();
            let results = join_all(dispatches.into_iter().map(|d| async move {
                match d {
                    Dispatch::Rejected(failure) => (Err(failure), 0),
                    Dispatch::Spawned(task) => match task.await {
                        Ok(result) => result,
                        Err(e) => (
                            Err(NodeError::ExecutionFailed(format!("node task aborted: {}", e)).into()),
                            0,
                        ),
                    },
                }
            }))
            .await;

            drain_logs(log_rx, context);

            if control.cancel.is_cancelled() {
                return Err(FlowError::Cancelled);
            }

            let mut abort = None;
            for (id, (result, elapsed)) in ids.into_iter().zip(results) {
                if let Some(reason) = self.commit(graph, context, &id, result, elapsed) {
                    abort.get_or_insert(reason);
                }
            }

            if let Some((node_id, reason)) = abort {
                self.log(
                    context,
                    LogLevel::Error,
                    Some(node_id.as_str()),
                    format!("Critical node failure: {}, stopping workflow", node_id),
                );
                return Err(FlowError::Execution(format!("Node {} failed: {}", node_id, reason)));
            }

            self.prune_untaken_branches(graph, context, &phases[index + 1..]);

            if let Some(observer) = observer {
                observer.on_progress(&Progress {
                    phase: index + 1,
                    total_phases: phases.len(),
                    finished: false,
                    graph,
                    context,
                });
            }
        }

        Ok(())
    }

    /// Validate, instantiate and launch one node.
    fn dispatch(
        &self,
        graph: &mut WorkflowGraph,
        context: &mut ExecutionContext,
        id: &str,
        variables: &Arc<Map<String, Value>>,
        log_tx: &mpsc::UnboundedSender<LogEntry>,
        control: &RunControl,
    ) -> Dispatch {
        let inputs = collect_node_inputs(graph, context, id);
        let Some(node) = graph.find_node_mut(id) else {
            let missing = WorkflowError::NodeNotFound(id.to_string()).to_string();
            return Dispatch::Rejected(NodeError::ExecutionFailed(missing).into());
        };
        node.status = NodeStatus::Running;
        let node = node.clone();
        context.mark_running(id);

        self.log(
            context,
            LogLevel::Info,
            Some(id),
            format!("Executing node: {} ({})", node.title, node.node_type),
        );
        self.event_bus.emit(ExecutionEvent::NodeStarted {
            execution_id: context.execution_id,
            node_id: node.id.clone(),
            node_type: node.node_type.clone(),
            timestamp: Utc::now(),
        });

        let validation = self.registry.validate_node_config(&node);
        if !validation.is_valid() {
            return Dispatch::Rejected(NodeError::InvalidConfig(validation.messages()).into());
        }

        let instance = match self.registry.create_node(&node) {
            Ok(instance) => instance,
            Err(e) => return Dispatch::Rejected(NodeError::Configuration(e.to_string()).into()),
        };

        let ctx = NodeContext {
            events: self
                .event_bus
                .create_emitter(context.execution_id, node.id.clone(), log_tx.clone()),
            node,
            inputs,
            variables: Arc::clone(variables),
            execution_id: context.execution_id,
            cancellation: control.cancel.child_token(),
            backend: self.backend.clone(),
        };

        let limit = self.node_timeout;
        Dispatch::Spawned(tokio::spawn(async move {
            let start = Instant::now();
            let result = match limit {
                Some(limit) => match timeout(limit, instance.execute(ctx)).await {
                    Ok(result) => result,
                    Err(_) => Err(NodeError::Timeout {
                        seconds: limit.as_secs(),
                    }
                    .into()),
                },
                None => instance.execute(ctx).await,
            };
            (result, start.elapsed().as_millis() as u64)
        }))
    }

    /// Record one node's result. Returns the node id and reason when the
    /// failure should stop the run.
    fn commit(
        &self,
        graph: &mut WorkflowGraph,
        context: &mut ExecutionContext,
        id: &str,
        result: NodeResult,
        elapsed: u64,
    ) -> Option<(String, String)> {
        let execution_id = context.execution_id;
        let node = graph.find_node_mut(id)?;

        match result {
            Ok(output) => {
                let output = output.for_node(id).with_execution_time(elapsed);
                node.status = NodeStatus::Completed;
                node.data = Some(output.data.clone());
                node.error = None;
                let title = node.title.clone();

                self.event_bus.emit(ExecutionEvent::NodeCompleted {
                    execution_id,
                    node_id: id.to_string(),
                    data: output.data.clone(),
                    duration_ms: elapsed,
                    timestamp: Utc::now(),
                });
                context.mark_completed(id, output);
                self.log(
                    context,
                    LogLevel::Info,
                    Some(id),
                    format!("Node execution completed: {} in {}ms", title, elapsed),
                );
                None
            }
            Err(failure) => {
                let message = failure.error.to_string();
                node.status = NodeStatus::Failed;
                node.error = Some(message.clone());
                let stop = !failure.should_continue && node.stop_on_error();

                self.event_bus.emit(ExecutionEvent::NodeFailed {
                    execution_id,
                    node_id: id.to_string(),
                    error: message.clone(),
                    timestamp: Utc::now(),
                });
                context.mark_failed(
                    id,
                    Some(NodeOutput::failed(message.clone()).for_node(id).with_execution_time(elapsed)),
                );
                self.log(
                    context,
                    LogLevel::Error,
                    Some(id),
                    format!("Node execution failed: {}", message),
                );
                stop.then(|| (id.to_string(), message))
            }
        }
    }

    /// Skip every pending node whose incoming connections are all dead: they
    /// leave a skipped node, or a router's branch that was not taken.
    fn prune_untaken_branches(
        &self,
        graph: &mut WorkflowGraph,
        context: &mut ExecutionContext,
        pending: &[Vec<String>],
    ) {
        for id in pending.iter().flatten() {
            let dead = {
                let Some(node) = graph.find_node(id) else { continue };
                if node.status != NodeStatus::Idle {
                    continue;
                }
                let mut incoming = graph.incoming(id).peekable();
                incoming.peek().is_some() && incoming.all(|c| is_dead(graph, context, c))
            };
            if dead {
                self.skip(graph, context, id, "all incoming branches were not taken");
            }
        }
    }

    fn skip(&self, graph: &mut WorkflowGraph, context: &mut ExecutionContext, id: &str, reason: &str) {
        if let Some(node) = graph.find_node_mut(id) {
            node.status = NodeStatus::Skipped;
        }
        context.running.remove(id);
        self.event_bus.emit(ExecutionEvent::NodeSkipped {
            execution_id: context.execution_id,
            node_id: id.to_string(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
        self.log(context, LogLevel::Debug, Some(id), format!("Node skipped: {}", reason));
    }

    fn skip_remaining(&self, graph: &mut WorkflowGraph, context: &mut ExecutionContext, reason: &str) {
        let pending: Vec<String> = graph
            .nodes
            .iter()
            .filter(|n| matches!(n.status, NodeStatus::Idle | NodeStatus::Running))
            .map(|n| n.id.clone())
            .collect();
        for id in pending {
            self.skip(graph, context, &id, reason);
        }
    }

    async fn wait_if_paused(
        &self,
        graph: &mut WorkflowGraph,
        context: &mut ExecutionContext,
        control: &RunControl,
    ) -> Result<(), FlowError> {
        let mut paused = control.paused.subscribe();
        if !*paused.borrow_and_update() {
            return Ok(());
        }

        set_status(graph, control, GraphStatus::Paused);
        self.log(context, LogLevel::Info, None, "Workflow execution paused");
        self.event_bus.emit(ExecutionEvent::WorkflowPaused {
            execution_id: context.execution_id,
            timestamp: Utc::now(),
        });

        loop {
            tokio::select! {
                _ = control.cancel.cancelled() => return Err(FlowError::Cancelled),
                changed = paused.changed() => {
                    if changed.is_err() || !*paused.borrow_and_update() {
                        break;
                    }
                }
            }
        }

        set_status(graph, control, GraphStatus::Running);
        self.log(context, LogLevel::Info, None, "Workflow execution resumed");
        self.event_bus.emit(ExecutionEvent::WorkflowResumed {
            execution_id: context.execution_id,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    fn log(
        &self,
        context: &mut ExecutionContext,
        level: LogLevel,
        node_id: Option<&str>,
        message: impl Into<String>,
    ) {
        let entry = context.log(level, node_id, message).clone();
        self.event_bus.emit(ExecutionEvent::Log {
            execution_id: context.execution_id,
            entry,
        });
    }
}

fn set_status(graph: &mut WorkflowGraph, control: &RunControl, status: GraphStatus) {
    graph.status = status;
    control.status.send_replace(status);
}

/// Entries nodes logged through their emitters; already mirrored to tracing.
fn drain_logs(rx: &mut mpsc::UnboundedReceiver<LogEntry>, context: &mut ExecutionContext) {
    while let Ok(entry) = rx.try_recv() {
        context.logs.push(entry);
    }
}

/// Upstream outputs keyed by target port; a source without output adds nothing.
fn collect_node_inputs(graph: &WorkflowGraph, context: &ExecutionContext, id: &str) -> NodeInputs {
    let mut inputs = NodeInputs::new();
    for conn in graph.incoming(id) {
        if let Some(data) = context.output_data(&conn.source) {
            inputs.insert(
                conn.target_port().to_string(),
                NodeInput::from_node(connection_payload(data, conn), conn.source.clone()),
            );
        }
    }
    inputs
}

/// What travels along one connection. Routers forward the data they were
/// given rather than their verdict; a `true`/`false` handle on a partitioned
/// output carries only that side.
fn connection_payload(data: &Value, conn: &Connection) -> Value {
    if data.get(BRANCH_KEY).is_some_and(Value::is_boolean) {
        if let Some(routed) = data.get(ROUTED_KEY) {
            return routed.clone();
        }
    }
    match conn.source_handle.as_deref() {
        Some(side @ ("true" | "false")) => data.get(side).cloned().unwrap_or_else(|| data.clone()),
        _ => data.clone(),
    }
}

fn is_dead(graph: &WorkflowGraph, context: &ExecutionContext, conn: &Connection) -> bool {
    let Some(source) = graph.find_node(&conn.source) else {
        return true;
    };
    if source.status == NodeStatus::Skipped {
        return true;
    }
    let taken = context
        .output_data(&conn.source)
        .and_then(|data| data.get(BRANCH_KEY))
        .and_then(Value::as_bool);
    match (taken, conn.source_handle.as_deref()) {
        (Some(passed), Some("true")) => !passed,
        (Some(passed), Some("false")) => passed,
        _ => false,
    }
}

/// Final state of a background run.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub graph: WorkflowGraph,
    pub context: ExecutionContext,
}

/// Handle for steering a run started with [`WorkflowEngine::spawn`].
pub struct ExecutionHandle {
    pub execution_id: ExecutionId,
    control: Arc<RunControl>,
    task: JoinHandle<ExecutionOutcome>,
}

impl ExecutionHandle {
    /// Hold dispatch of the next phase; running nodes finish normally.
    pub fn pause(&self) {
        self.control.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.control.paused.send_replace(false);
    }

    /// Stop issuing work and tell in-flight nodes to give up.
    pub fn cancel(&self) {
        self.control.cancel.cancel();
    }

    pub fn status(&self) -> GraphStatus {
        *self.control.status.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn join(self) -> Result<ExecutionOutcome, FlowError> {
        self.task
            .await
            .map_err(|e| FlowError::Execution(format!("Task join error: {}", e)))
    }
}

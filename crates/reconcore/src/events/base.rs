use crate::context::{LogEntry, LogLevel};
use crate::{GraphStatus, NodeId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

pub type ExecutionId = Uuid;

/// Events emitted during workflow execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    WorkflowStarted {
        execution_id: ExecutionId,
        workflow_id: WorkflowId,
        timestamp: DateTime<Utc>,
    },
    PhaseStarted {
        execution_id: ExecutionId,
        phase: usize,
        nodes: Vec<NodeId>,
        timestamp: DateTime<Utc>,
    },
    NodeStarted {
        execution_id: ExecutionId,
        node_id: NodeId,
        node_type: String,
        timestamp: DateTime<Utc>,
    },
    NodeCompleted {
        execution_id: ExecutionId,
        node_id: NodeId,
        data: Value,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    NodeFailed {
        execution_id: ExecutionId,
        node_id: NodeId,
        error: String,
        timestamp: DateTime<Utc>,
    },
    NodeSkipped {
        execution_id: ExecutionId,
        node_id: NodeId,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    NodeProgress {
        execution_id: ExecutionId,
        node_id: NodeId,
        percent: f64,
        message: Option<String>,
        timestamp: DateTime<Utc>,
    },
    Log {
        execution_id: ExecutionId,
        entry: LogEntry,
    },
    WorkflowPaused {
        execution_id: ExecutionId,
        timestamp: DateTime<Utc>,
    },
    WorkflowResumed {
        execution_id: ExecutionId,
        timestamp: DateTime<Utc>,
    },
    WorkflowCompleted {
        execution_id: ExecutionId,
        status: GraphStatus,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    pub fn execution_id(&self) -> ExecutionId {
        match self {
            Self::WorkflowStarted { execution_id, .. }
            | Self::PhaseStarted { execution_id, .. }
            | Self::NodeStarted { execution_id, .. }
            | Self::NodeCompleted { execution_id, .. }
            | Self::NodeFailed { execution_id, .. }
            | Self::NodeSkipped { execution_id, .. }
            | Self::NodeProgress { execution_id, .. }
            | Self::Log { execution_id, .. }
            | Self::WorkflowPaused { execution_id, .. }
            | Self::WorkflowResumed { execution_id, .. }
            | Self::WorkflowCompleted { execution_id, .. } => *execution_id,
        }
    }
}

/// Logger handed to a running node.
///
/// Entries go to the engine over an unbounded channel (the engine appends them
/// to the run log), to tracing, and to the broadcast bus for live viewers.
#[derive(Clone)]
pub struct EventEmitter {
    execution_id: ExecutionId,
    node_id: NodeId,
    sender: broadcast::Sender<ExecutionEvent>,
    logs: mpsc::UnboundedSender<LogEntry>,
}

impl EventEmitter {
    pub fn new(
        execution_id: ExecutionId,
        node_id: NodeId,
        sender: broadcast::Sender<ExecutionEvent>,
        logs: mpsc::UnboundedSender<LogEntry>,
    ) -> Self {
        Self {
            execution_id,
            node_id,
            sender,
            logs,
        }
    }

    /// An emitter connected to nothing; for running a node outside an engine.
    pub fn detached(node_id: impl Into<String>) -> Self {
        let (sender, _) = broadcast::channel(16);
        let (logs, _) = mpsc::unbounded_channel();
        Self::new(Uuid::new_v4(), node_id.into(), sender, logs)
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>, data: Option<Value>) {
        let mut entry = LogEntry::new(level, Some(self.node_id.clone()), message);
        entry.data = data;
        entry.trace();
        let _ = self.sender.send(ExecutionEvent::Log {
            execution_id: self.execution_id,
            entry: entry.clone(),
        });
        let _ = self.logs.send(entry);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message, None);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message, None);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message, None);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message, None);
    }

    /// Emit progress update
    pub fn progress(&self, percent: f64, message: Option<String>) {
        let _ = self.sender.send(ExecutionEvent::NodeProgress {
            execution_id: self.execution_id,
            node_id: self.node_id.clone(),
            percent,
            message,
            timestamp: Utc::now(),
        });
    }
}

/// Global event bus
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn create_emitter(
        &self,
        execution_id: ExecutionId,
        node_id: NodeId,
        logs: mpsc::UnboundedSender<LogEntry>,
    ) -> EventEmitter {
        EventEmitter::new(execution_id, node_id, self.sender.clone(), logs)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

use crate::BackendError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
    /// Anything the backend reports that we do not model; polled like `running`.
    #[serde(other)]
    Unknown,
}

impl TaskState {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Body of a status poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub status: TaskState,
    #[serde(default)]
    pub output: Option<String>,
}

impl TaskStatus {
    pub fn new(status: TaskState, output: impl Into<String>) -> Self {
        Self {
            status,
            output: Some(output.into()),
        }
    }

    pub fn output(&self) -> &str {
        self.output.as_deref().unwrap_or_default()
    }
}

/// The remote service that actually runs security tools.
#[async_trait]
pub trait TaskBackend: Send + Sync {
    /// Submit a command line; returns the backend's task id.
    async fn submit(&self, command: &str) -> Result<String, BackendError>;

    async fn status(&self, task_id: &str) -> Result<TaskStatus, BackendError>;

    /// Ask the backend to stop a task. Callers treat this as best effort.
    async fn cancel(&self, task_id: &str) -> Result<(), BackendError>;
}

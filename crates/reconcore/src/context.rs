use crate::{ExecutionId, NodeId, NodeOutput, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One entry of a run's structured log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl LogEntry {
    pub fn new(level: LogLevel, node_id: Option<NodeId>, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            level,
            node_id,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Mirror the entry to `tracing` at the matching level.
    pub fn trace(&self) {
        let node = self.node_id.as_deref().unwrap_or("-");
        match self.level {
            LogLevel::Debug => tracing::debug!(node_id = node, "{}", self.message),
            LogLevel::Info => tracing::info!(node_id = node, "{}", self.message),
            LogLevel::Warn => tracing::warn!(node_id = node, "{}", self.message),
            LogLevel::Error => tracing::error!(node_id = node, "{}", self.message),
        }
    }
}

/// Mutable record of a single run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub workflow_id: WorkflowId,
    pub execution_id: ExecutionId,
    pub variables: Map<String, Value>,
    pub node_outputs: BTreeMap<NodeId, NodeOutput>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub running: BTreeSet<NodeId>,
    pub completed: BTreeSet<NodeId>,
    pub failed: BTreeSet<NodeId>,
    pub logs: Vec<LogEntry>,
}

impl ExecutionContext {
    pub fn new(workflow_id: impl Into<String>, variables: Map<String, Value>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            execution_id: Uuid::new_v4(),
            variables,
            node_outputs: BTreeMap::new(),
            started_at: Utc::now(),
            finished_at: None,
            running: BTreeSet::new(),
            completed: BTreeSet::new(),
            failed: BTreeSet::new(),
            logs: Vec::new(),
        }
    }

    pub fn log(&mut self, level: LogLevel, node_id: Option<&str>, message: impl Into<String>) -> &LogEntry {
        self.push_log(LogEntry::new(level, node_id.map(str::to_string), message))
    }

    /// Append an entry, mirroring it to tracing.
    pub fn push_log(&mut self, entry: LogEntry) -> &LogEntry {
        entry.trace();
        self.logs.push(entry);
        &self.logs[self.logs.len() - 1]
    }

    pub fn mark_running(&mut self, node_id: &str) {
        self.running.insert(node_id.to_string());
    }

    pub fn mark_completed(&mut self, node_id: &str, output: NodeOutput) {
        self.running.remove(node_id);
        self.completed.insert(node_id.to_string());
        self.node_outputs.insert(node_id.to_string(), output);
    }

    pub fn mark_failed(&mut self, node_id: &str, output: Option<NodeOutput>) {
        self.running.remove(node_id);
        self.failed.insert(node_id.to_string());
        if let Some(output) = output {
            self.node_outputs.insert(node_id.to_string(), output);
        }
    }

    /// Data produced by a node, if it completed successfully.
    pub fn output_data(&self, node_id: &str) -> Option<&Value> {
        self.node_outputs
            .get(node_id)
            .filter(|o| o.success)
            .map(|o| &o.data)
    }

    pub fn finish(&mut self) {
        self.running.clear();
        self.finished_at = Some(Utc::now());
    }

    pub fn duration_ms(&self) -> u64 {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds().max(0) as u64
    }

    pub fn logs_for<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a LogEntry> + 'a {
        self.logs
            .iter()
            .filter(move |e| e.node_id.as_deref() == Some(node_id))
    }
}

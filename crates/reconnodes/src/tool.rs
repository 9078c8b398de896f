//! Shared behaviour of tool-backed nodes.
//!
//! A tool node renders a command line, submits it to the task backend, polls
//! until the task finishes and hands the raw output to a parser.

use crate::backend::HttpTaskBackend;
use reconcore::backend::{TaskBackend, TaskState};
use reconcore::events::EventEmitter;
use reconcore::value::display;
use reconcore::{LogLevel, NodeCategory, NodeContext, NodeError, NodeResult, Value};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Placeholder replaced by the node's resolved target.
pub const INPUT_PLACEHOLDER: &str = "{{input}}";

/// Where a target can be read from an upstream payload.
#[derive(Debug, Clone, Copy)]
pub enum TargetSource {
    /// First element of an array field
    First(&'static str),
    /// A scalar field
    Field(&'static str),
}

/// Timing and target lookup shared by one class of tools.
#[derive(Debug, Clone, Copy)]
pub struct ToolProfile {
    pub category: NodeCategory,
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub targets: &'static [TargetSource],
}

impl ToolProfile {
    pub const DISCOVERY: ToolProfile = ToolProfile {
        category: NodeCategory::Discovery,
        timeout: Duration::from_secs(300),
        poll_interval: Duration::from_secs(2),
        targets: &[TargetSource::First("subdomains"), TargetSource::Field("domain")],
    };

    pub const ANALYSIS: ToolProfile = ToolProfile {
        category: NodeCategory::Analysis,
        timeout: Duration::from_secs(600),
        poll_interval: Duration::from_secs(2),
        targets: &[
            TargetSource::First("subdomains"),
            TargetSource::First("urls"),
            TargetSource::Field("target"),
        ],
    };

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn label(&self) -> &'static str {
        self.category.as_str()
    }
}

/// The target an upstream payload points at, if any.
pub fn input_target(payload: &Value, sources: &[TargetSource]) -> Option<String> {
    if let Value::String(s) = payload {
        return Some(s.clone()).filter(|s| !s.trim().is_empty());
    }

    sources
        .iter()
        .find_map(|source| match source {
            TargetSource::First(key) => payload.get(*key)?.as_array()?.first().map(display),
            TargetSource::Field(key) => payload.get(*key).filter(|v| !v.is_null()).map(display),
        })
        .filter(|s| !s.trim().is_empty())
}

/// Render a command template. `{{input}}` becomes the upstream target, or
/// `fallback` (the node's configured target) when nothing upstream names one;
/// other placeholders resolve against run variables and node config.
pub fn build_command(
    ctx: &NodeContext,
    profile: &ToolProfile,
    template: &str,
    fallback: Option<&str>,
) -> Result<String, NodeError> {
    let command = if template.contains(INPUT_PLACEHOLDER) {
        let target = input_target(&ctx.merged_input(), profile.targets)
            .or_else(|| {
                fallback
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            })
            .ok_or_else(|| {
                NodeError::Configuration(format!(
                    "No target for {}: connect an upstream node or set one in the config",
                    ctx.node_id()
                ))
            })?;
        template.replace(INPUT_PLACEHOLDER, &target)
    } else {
        template.to_string()
    };

    Ok(ctx.render(&command, None))
}

/// The injected backend, or an HTTP one built from the run variables.
pub fn resolve_backend(ctx: &NodeContext) -> Arc<dyn TaskBackend> {
    match &ctx.backend {
        Some(backend) => Arc::clone(backend),
        None => Arc::new(HttpTaskBackend::from_variables(&ctx.variables)),
    }
}

/// Submit `command`, wait for it and parse what it printed.
pub async fn run_tool(
    ctx: &NodeContext,
    profile: &ToolProfile,
    command: &str,
    parse: fn(&str) -> Value,
) -> NodeResult {
    let label = profile.label();
    ctx.events
        .info(format!("Starting {} with command: {}", label, command));

    let backend = resolve_backend(ctx);
    match submit_and_wait(backend.as_ref(), ctx, profile, command).await {
        Ok(raw) => {
            let parsed = parse(&raw);
            let count = ["subdomains", "findings", "results", "parameters"]
                .iter()
                .find_map(|key| parsed.get(*key).and_then(Value::as_array))
                .map(|items| json!(items.len()))
                .unwrap_or_else(|| json!("unknown"));
            ctx.events.log(
                LogLevel::Info,
                format!("{} completed successfully", capitalize(label)),
                Some(json!({ "resultCount": count })),
            );
            Ok(ctx.output(parsed))
        }
        Err(e) => {
            ctx.events
                .error(format!("{} tool execution failed: {}", capitalize(label), e));
            Err(e.into())
        }
    }
}

async fn submit_and_wait(
    backend: &dyn TaskBackend,
    ctx: &NodeContext,
    profile: &ToolProfile,
    command: &str,
) -> Result<String, NodeError> {
    let task_id = tokio::select! {
        _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
        submitted = backend.submit(command) => submitted?,
    };
    ctx.events.debug(format!("Submitted task {}", task_id));
    await_task(backend, &task_id, profile, &ctx.cancellation, &ctx.events).await
}

/// Poll a submitted task until it finishes, the deadline passes or the run
/// is cancelled. On deadline or cancellation the backend is asked to stop the
/// task; a failed cancel request is only logged.
pub async fn await_task(
    backend: &dyn TaskBackend,
    task_id: &str,
    profile: &ToolProfile,
    cancel: &CancellationToken,
    events: &EventEmitter,
) -> Result<String, NodeError> {
    let outcome = tokio::select! {
        _ = cancel.cancelled() => Err(NodeError::Cancelled),
        polled = tokio::time::timeout(profile.timeout, poll(backend, task_id, profile.poll_interval)) => {
            polled.unwrap_or(Err(NodeError::Timeout {
                seconds: profile.timeout.as_secs(),
            }))
        }
    };

    if matches!(
        outcome,
        Err(NodeError::Cancelled) | Err(NodeError::Timeout { .. })
    ) {
        match backend.cancel(task_id).await {
            Ok(()) => events.info(format!("Cancelled task {}", task_id)),
            Err(e) => events.warn(format!("Failed to cancel task {}: {}", task_id, e)),
        }
    }

    outcome
}

async fn poll(
    backend: &dyn TaskBackend,
    task_id: &str,
    interval: Duration,
) -> Result<String, NodeError> {
    loop {
        let status = backend.status(task_id).await?;
        match status.status {
            TaskState::Completed => return Ok(status.output().to_string()),
            TaskState::Failed => return Err(NodeError::TaskFailed(status.output().to_string())),
            _ => tokio::time::sleep(interval).await,
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reconcore::backend::TaskStatus;
    use reconcore::{BackendError, WorkflowNode};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Scripted {
        statuses: Mutex<VecDeque<TaskStatus>>,
        submitted: Mutex<Vec<String>>,
        cancelled: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn with(statuses: Vec<TaskStatus>) -> Self {
            Self {
                statuses: Mutex::new(statuses.into()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl TaskBackend for Scripted {
        async fn submit(&self, command: &str) -> Result<String, BackendError> {
            self.submitted.lock().unwrap().push(command.to_string());
            Ok("task-1".into())
        }

        async fn status(&self, _task_id: &str) -> Result<TaskStatus, BackendError> {
            Ok(self
                .statuses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(TaskStatus {
                    status: TaskState::Running,
                    output: None,
                }))
        }

        async fn cancel(&self, task_id: &str) -> Result<(), BackendError> {
            self.cancelled.lock().unwrap().push(task_id.to_string());
            Ok(())
        }
    }

    fn fast(profile: ToolProfile) -> ToolProfile {
        profile.with_poll_interval(Duration::from_millis(5))
    }

    fn ctx(node: WorkflowNode) -> NodeContext {
        let id = node.id.clone();
        NodeContext::new(node, EventEmitter::detached(id))
    }

    #[test]
    fn test_input_target_precedence() {
        let sources = ToolProfile::ANALYSIS.targets;
        let payload = json!({"subdomains": ["a.example.com"], "target": "b.example.com"});
        assert_eq!(input_target(&payload, sources).as_deref(), Some("a.example.com"));

        let payload = json!({"urls": ["https://c.example.com"], "target": "b.example.com"});
        assert_eq!(input_target(&payload, sources).as_deref(), Some("https://c.example.com"));

        assert_eq!(input_target(&json!("d.example.com"), sources).as_deref(), Some("d.example.com"));
        assert_eq!(input_target(&json!({"count": 0}), sources), None);
    }

    #[test]
    fn test_build_command_prefers_upstream_then_config() {
        let node = WorkflowNode::new("enum", "subfinder").with_config("threads", 25);
        let template = "subfinder -d {{input}} -t {{threads}}";

        let upstream = ctx(node.clone()).with_input("main", json!({"domain": "up.example.com"}));
        assert_eq!(
            build_command(&upstream, &ToolProfile::DISCOVERY, template, Some("cfg.example.com")).unwrap(),
            "subfinder -d up.example.com -t 25"
        );

        let alone = ctx(node.clone());
        assert_eq!(
            build_command(&alone, &ToolProfile::DISCOVERY, template, Some("cfg.example.com")).unwrap(),
            "subfinder -d cfg.example.com -t 25"
        );

        let err = build_command(&alone, &ToolProfile::DISCOVERY, template, None).unwrap_err();
        assert!(matches!(err, NodeError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_await_task_polls_until_completed() {
        let backend = Scripted::with(vec![
            TaskStatus {
                status: TaskState::Pending,
                output: None,
            },
            TaskStatus::new(TaskState::Running, ""),
            TaskStatus::new(TaskState::Completed, "a.example.com"),
        ]);
        let output = await_task(
            &backend,
            "task-1",
            &fast(ToolProfile::DISCOVERY),
            &CancellationToken::new(),
            &EventEmitter::detached("n"),
        )
        .await
        .unwrap();
        assert_eq!(output, "a.example.com");
        assert!(backend.cancelled.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_await_task_reports_failure() {
        let backend = Scripted::with(vec![TaskStatus::new(TaskState::Failed, "resolver down")]);
        let err = await_task(
            &backend,
            "task-1",
            &fast(ToolProfile::ANALYSIS),
            &CancellationToken::new(),
            &EventEmitter::detached("n"),
        )
        .await
        .unwrap_err();
        assert_eq!(err, NodeError::TaskFailed("resolver down".into()));
    }

    #[tokio::test]
    async fn test_deadline_cancels_remote_task() {
        let backend = Scripted::default();
        let profile = fast(ToolProfile::DISCOVERY).with_timeout(Duration::from_millis(30));
        let err = await_task(
            &backend,
            "task-1",
            &profile,
            &CancellationToken::new(),
            &EventEmitter::detached("n"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, NodeError::Timeout { .. }));
        assert_eq!(*backend.cancelled.lock().unwrap(), vec!["task-1".to_string()]);
    }

    #[tokio::test]
    async fn test_cancellation_cancels_remote_task() {
        let backend = Scripted::default();
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = await_task(
            &backend,
            "task-1",
            &fast(ToolProfile::DISCOVERY),
            &token,
            &EventEmitter::detached("n"),
        )
        .await
        .unwrap_err();
        assert_eq!(err, NodeError::Cancelled);
        assert_eq!(backend.cancelled.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_run_tool_parses_output() {
        let backend = Arc::new(Scripted::with(vec![TaskStatus::new(
            TaskState::Completed,
            "a.example.com\nb.example.com",
        )]));
        let node = WorkflowNode::new("enum", "subfinder");
        let ctx = ctx(node).with_backend(backend.clone());

        let output = run_tool(
            &ctx,
            &fast(ToolProfile::DISCOVERY),
            "subfinder -d example.com",
            crate::parsers::parse_subdomains,
        )
        .await
        .unwrap();
        assert_eq!(output.data["count"], 2);
        assert_eq!(*backend.submitted.lock().unwrap(), vec!["subfinder -d example.com".to_string()]);
    }
}

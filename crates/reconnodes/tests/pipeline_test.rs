// crates/reconnodes/tests/pipeline_test.rs

use async_trait::async_trait;
use reconcore::{
    BackendError, Connection, EventBus, GraphStatus, NodeStatus, TaskBackend, TaskState,
    TaskStatus, WorkflowGraph, WorkflowNode,
};
use reconnodes::builtin_registry;
use reconruntime::{FlowRuntime, RuntimeConfig, WorkflowEngine};
use serde_json::{json, Map};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const NUCLEI_LINE: &str = r#"{"info":{"name":"Exposed Git Config","severity":"high"},"matched-at":"https://a.example.com/.git/config"}"#;

/// Completes every task at once with output picked by the tool name.
#[derive(Default)]
struct FakeBackend {
    tasks: Mutex<HashMap<String, String>>,
    submitted: Mutex<Vec<String>>,
}

impl FakeBackend {
    fn commands(&self) -> Vec<String> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskBackend for FakeBackend {
    async fn submit(&self, command: &str) -> Result<String, BackendError> {
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(command.to_string());
        let task_id = format!("task-{}", submitted.len());
        self.tasks
            .lock()
            .unwrap()
            .insert(task_id.clone(), command.to_string());
        Ok(task_id)
    }

    async fn status(&self, task_id: &str) -> Result<TaskStatus, BackendError> {
        let command = self
            .tasks
            .lock()
            .unwrap()
            .get(task_id)
            .cloned()
            .ok_or_else(|| BackendError::InvalidResponse(format!("unknown task {}", task_id)))?;

        let status = match command.split_whitespace().next() {
            Some("subfinder") | Some("amass") => TaskStatus::new(
                TaskState::Completed,
                "a.example.com\nb.example.com\nc.example.com\nd.example.com\ne.example.com",
            ),
            Some("nuclei") => TaskStatus::new(TaskState::Completed, NUCLEI_LINE),
            _ => TaskStatus::new(TaskState::Failed, "tool not installed"),
        };
        Ok(status)
    }

    async fn cancel(&self, _task_id: &str) -> Result<(), BackendError> {
        Ok(())
    }
}

fn engine(backend: Arc<FakeBackend>) -> WorkflowEngine {
    WorkflowEngine::new(Arc::new(builtin_registry()), Arc::new(EventBus::new(100)))
        .with_backend(backend)
}

fn status(graph: &WorkflowGraph, id: &str) -> NodeStatus {
    graph.find_node(id).map(|n| n.status).unwrap()
}

#[tokio::test]
async fn test_discovery_feeds_scanner() {
    let backend = Arc::new(FakeBackend::default());
    let mut graph = WorkflowGraph::new("recon");
    graph
        .add_node(WorkflowNode::new("enum", "subfinder").with_config("domain", "example.com"))
        .unwrap();
    graph.add_node(WorkflowNode::new("scan", "nuclei")).unwrap();
    graph.connect(Connection::new("enum", "scan")).unwrap();

    let context = engine(backend.clone())
        .execute(&mut graph, Map::new(), None)
        .await;

    assert_eq!(graph.status, GraphStatus::Completed);
    assert_eq!(status(&graph, "enum"), NodeStatus::Completed);
    assert_eq!(status(&graph, "scan"), NodeStatus::Completed);
    assert!(context.failed.is_empty());

    let commands = backend.commands();
    assert_eq!(
        commands[0],
        "subfinder -d example.com -t 10 -timeout 30 -silent"
    );
    assert!(commands[1].starts_with("nuclei -u \"a.example.com\""));

    let findings = context.output_data("scan").unwrap();
    assert_eq!(findings["count"], 1);
    assert_eq!(findings["severityCounts"]["high"], 1);
}

#[tokio::test]
async fn test_conditional_skips_untaken_branch() {
    let backend = Arc::new(FakeBackend::default());
    let mut graph = WorkflowGraph::new("branching");
    graph
        .add_node(WorkflowNode::new("enum", "subfinder").with_config("domain", "example.com"))
        .unwrap();
    graph
        .add_node(WorkflowNode::new("enough", "conditional").with_config("condition", "count > 3"))
        .unwrap();
    graph
        .add_node(
            WorkflowNode::new("urls", "transform")
                .with_config("map_expression", "https://{{item}}"),
        )
        .unwrap();
    graph
        .add_node(WorkflowNode::new("retry", "amass").with_config("domain", "example.com"))
        .unwrap();
    graph.connect(Connection::new("enum", "enough")).unwrap();
    graph
        .connect(Connection::new("enough", "urls").from_port("true"))
        .unwrap();
    graph
        .connect(Connection::new("enough", "retry").from_port("false"))
        .unwrap();

    let context = engine(backend.clone())
        .execute(&mut graph, Map::new(), None)
        .await;

    assert_eq!(graph.status, GraphStatus::Completed);
    assert_eq!(status(&graph, "urls"), NodeStatus::Completed);
    assert_eq!(status(&graph, "retry"), NodeStatus::Skipped);
    assert_eq!(backend.commands().len(), 1);

    let routed = context.output_data("enough").unwrap();
    assert_eq!(routed["data"]["count"], 5);

    let urls = context.output_data("urls").unwrap();
    assert_eq!(urls["count"], 5);
    assert_eq!(
        urls["result"],
        json!([
            "https://a.example.com",
            "https://b.example.com",
            "https://c.example.com",
            "https://d.example.com",
            "https://e.example.com",
        ])
    );
}

#[tokio::test]
async fn test_tool_on_taken_branch_finds_its_target() {
    let backend = Arc::new(FakeBackend::default());
    let mut graph = WorkflowGraph::new("gated");
    graph
        .add_node(WorkflowNode::new("enum", "subfinder").with_config("domain", "example.com"))
        .unwrap();
    graph
        .add_node(WorkflowNode::new("any", "conditional").with_config("condition", "count > 0"))
        .unwrap();
    graph.add_node(WorkflowNode::new("scan", "nuclei")).unwrap();
    graph.connect(Connection::new("enum", "any")).unwrap();
    graph
        .connect(Connection::new("any", "scan").from_port("true"))
        .unwrap();

    let context = engine(backend.clone())
        .execute(&mut graph, Map::new(), None)
        .await;

    assert_eq!(graph.status, GraphStatus::Completed);
    assert_eq!(status(&graph, "scan"), NodeStatus::Completed);

    let commands = backend.commands();
    assert_eq!(commands.len(), 2);
    assert!(commands[1].starts_with("nuclei -u \"a.example.com\""));
    assert_eq!(context.output_data("scan").unwrap()["count"], 1);
}

#[tokio::test]
async fn test_failed_tool_stops_the_run() {
    let backend = Arc::new(FakeBackend::default());
    let mut graph = WorkflowGraph::new("broken");
    graph
        .add_node(WorkflowNode::new("fuzz", "ffuf").with_config("url", "https://example.com/FUZZ"))
        .unwrap();
    graph
        .add_node(WorkflowNode::new("after", "filter").with_config("condition", "status == 200"))
        .unwrap();
    graph.connect(Connection::new("fuzz", "after")).unwrap();

    let context = engine(backend).execute(&mut graph, Map::new(), None).await;

    assert_eq!(graph.status, GraphStatus::Failed);
    assert_eq!(status(&graph, "fuzz"), NodeStatus::Failed);
    assert_eq!(status(&graph, "after"), NodeStatus::Skipped);
    assert!(context.failed.contains("fuzz"));
    assert!(graph
        .find_node("fuzz")
        .and_then(|n| n.error.as_deref())
        .unwrap()
        .contains("tool not installed"));
}

#[tokio::test]
async fn test_merge_through_runtime() {
    let backend = Arc::new(FakeBackend::default());
    let config = RuntimeConfig {
        backend: Some(backend.clone()),
        ..RuntimeConfig::default()
    };
    let runtime = FlowRuntime::with_registry(builtin_registry(), config);

    let mut graph = WorkflowGraph::new("merged").with_variable("target", "example.com");
    graph
        .add_node(WorkflowNode::new("passive", "subfinder").with_config("domain", "{{target}}"))
        .unwrap();
    graph
        .add_node(WorkflowNode::new("active", "amass").with_config("domain", "{{target}}"))
        .unwrap();
    graph
        .add_node(WorkflowNode::new("join", "merge").with_config("merge_type", "deduplicate"))
        .unwrap();
    graph
        .connect(Connection::new("passive", "join").to_port("input1"))
        .unwrap();
    graph
        .connect(Connection::new("active", "join").to_port("input2"))
        .unwrap();

    let context = runtime.execute(&mut graph, Map::new(), None).await;

    assert_eq!(graph.status, GraphStatus::Completed);
    let merged = context.output_data("join").unwrap();
    assert_eq!(merged["count"], 5);
    assert_eq!(merged["sources"], json!(["input1", "input2"]));
    assert!(backend
        .commands()
        .iter()
        .all(|command| command.contains("-d example.com")));
}

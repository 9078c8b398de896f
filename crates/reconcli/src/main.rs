// crates/reconcli/src/main.rs

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use reconcore::{
    Connection, ExecutionEvent, GraphStatus, LogLevel, NodeCategory, NodeStatus, Value,
    WorkflowGraph, WorkflowNode,
};
use reconnodes::backend::{API_BASE_URL_VAR, AUTH_TOKEN_VAR};
use reconnodes::builtin_registry;
use reconruntime::{load_workflow, save_workflow, FlowRuntime, GraphResolver, RuntimeConfig};
use serde_json::Map;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

const CATEGORIES: [NodeCategory; 5] = [
    NodeCategory::Discovery,
    NodeCategory::Analysis,
    NodeCategory::Logic,
    NodeCategory::Data,
    NodeCategory::Output,
];

#[derive(Parser)]
#[command(name = "reconflow")]
#[command(about = "Security reconnaissance workflow engine", long_about = None)]
struct Cli {
    /// Show debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Run variable as key=value; values that parse as JSON are kept typed
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,

        /// Base URL of the task execution API
        #[arg(long, env = "RECONFLOW_API_URL")]
        api_url: Option<String>,

        /// Bearer token for the task execution API
        #[arg(long, env = "RECONFLOW_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Print every node's output data after the run
        #[arg(long)]
        outputs: bool,
    },

    /// Check a workflow for cycles, unknown node types and bad configuration
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// Show the execution phases and graph statistics
    Plan {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// List available node types
    Nodes {
        /// Only show one category
        #[arg(short, long)]
        category: Option<NodeCategory>,
    },

    /// Create an example reconnaissance workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,

        /// Domain the example enumerates
        #[arg(short, long, default_value = "example.com")]
        domain: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            file,
            vars,
            api_url,
            token,
            outputs,
        } => {
            let mut variables = parse_vars(&vars)?;
            if let Some(url) = api_url {
                variables.insert(API_BASE_URL_VAR.into(), Value::String(url));
            }
            if let Some(token) = token {
                variables.insert(AUTH_TOKEN_VAR.into(), Value::String(token));
            }
            run_workflow(file, variables, outputs).await?;
        }

        Commands::Validate { file } => {
            validate_workflow(file)?;
        }

        Commands::Plan { file } => {
            plan_workflow(file)?;
        }

        Commands::Nodes { category } => {
            list_nodes(category);
        }

        Commands::Init { output, domain } => {
            create_example_workflow(output, &domain)?;
        }
    }

    Ok(())
}

/// RUST_LOG wins; otherwise info, or debug with --verbose.
fn init_logging(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn parse_vars(pairs: &[String]) -> Result<Map<String, Value>> {
    let mut variables = Map::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .with_context(|| format!("variable '{}' must look like key=value", pair))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        variables.insert(key.trim().to_string(), value);
    }
    Ok(variables)
}

fn print_event(event: ExecutionEvent) {
    match event {
        ExecutionEvent::WorkflowStarted { workflow_id, .. } => {
            println!("▶️  Workflow {} started", workflow_id);
        }
        ExecutionEvent::PhaseStarted { phase, nodes, .. } => {
            println!("── Phase {}: {}", phase, nodes.join(", "));
        }
        ExecutionEvent::NodeStarted {
            node_id, node_type, ..
        } => {
            println!("  ⚡ Starting node: {} ({})", node_id, node_type);
        }
        ExecutionEvent::NodeCompleted {
            node_id,
            duration_ms,
            ..
        } => {
            println!("  ✅ Node {} completed in {}ms", node_id, duration_ms);
        }
        ExecutionEvent::NodeFailed { node_id, error, .. } => {
            println!("  ❌ Node {} failed: {}", node_id, error);
        }
        ExecutionEvent::NodeSkipped {
            node_id, reason, ..
        } => {
            println!("  ⏭️  Node {} skipped: {}", node_id, reason);
        }
        ExecutionEvent::NodeProgress {
            node_id,
            percent,
            message,
            ..
        } => match message {
            Some(msg) => println!("     📊 [{}] {:.0}% - {}", node_id, percent, msg),
            None => println!("     📊 [{}] {:.0}%", node_id, percent),
        },
        ExecutionEvent::Log { entry, .. } => {
            let marker = match entry.level {
                LogLevel::Debug => return,
                LogLevel::Info => "ℹ️ ",
                LogLevel::Warn => "⚠️ ",
                LogLevel::Error => "🛑",
            };
            match entry.node_id {
                Some(node_id) => println!("     {} [{}] {}", marker, node_id, entry.message),
                None => println!("     {} {}", marker, entry.message),
            }
        }
        ExecutionEvent::WorkflowPaused { .. } => println!("⏸️  Workflow paused"),
        ExecutionEvent::WorkflowResumed { .. } => println!("⏯️  Workflow resumed"),
        ExecutionEvent::WorkflowCompleted {
            status,
            duration_ms,
            ..
        } => {
            if status == GraphStatus::Completed {
                println!("✨ Workflow completed successfully in {}ms", duration_ms);
            } else {
                println!("💥 Workflow {:?} after {}ms", status, duration_ms);
            }
        }
    }
}

async fn run_workflow(file: PathBuf, variables: Map<String, Value>, show_outputs: bool) -> Result<()> {
    println!("🚀 Loading workflow from: {}", file.display());
    let graph = load_workflow(&file)?;
    debug!(workflow_id = %graph.id, variables = variables.len(), "Loaded workflow");

    println!("📋 Workflow: {}", graph.name);
    println!("   Nodes: {}", graph.nodes.len());
    println!("   Connections: {}", graph.connections.len());
    println!();

    let runtime = FlowRuntime::with_registry(builtin_registry(), RuntimeConfig::default());

    let mut events = runtime.subscribe_events();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            let done = matches!(event, ExecutionEvent::WorkflowCompleted { .. });
            print_event(event);
            if done {
                break;
            }
        }
    });

    let handle = runtime.spawn(graph, variables, None);
    let cancel = tokio::spawn(async { tokio::signal::ctrl_c().await.is_ok() });

    // Poll so Ctrl-C can cancel the run without dropping its handle.
    while !handle.is_finished() {
        if cancel.is_finished() {
            println!("🛑 Cancelling run");
            handle.cancel();
            break;
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
    }
    let outcome = handle.join().await?;
    cancel.abort();
    let _ = tokio::time::timeout(tokio::time::Duration::from_secs(1), printer).await;

    let graph = outcome.graph;
    let context = outcome.context;
    let count = |status: NodeStatus| graph.nodes.iter().filter(|n| n.status == status).count();

    println!();
    println!("📊 Execution Summary:");
    println!("   Execution ID: {}", context.execution_id);
    println!("   Status: {:?}", graph.status);
    println!(
        "   Completed: {}/{} nodes ({} failed, {} skipped)",
        count(NodeStatus::Completed),
        graph.nodes.len(),
        count(NodeStatus::Failed),
        count(NodeStatus::Skipped)
    );
    println!("   Duration: {}ms", context.duration_ms());

    for node in graph.nodes.iter().filter(|n| n.status == NodeStatus::Failed) {
        if let Some(error) = &node.error {
            println!("   ❌ {}: {}", node.id, error);
        }
    }

    if show_outputs && !context.node_outputs.is_empty() {
        println!();
        println!("📤 Outputs:");
        for node in &graph.nodes {
            if let Some(data) = context.output_data(&node.id) {
                println!("   Node {}:", node.id);
                println!("{}", serde_json::to_string_pretty(data)?);
            }
        }
    }

    if graph.status != GraphStatus::Completed {
        bail!("workflow finished with status {:?}", graph.status);
    }
    Ok(())
}

fn validate_workflow(file: PathBuf) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let graph = load_workflow(&file)?;
    let registry = builtin_registry();
    let mut problems = Vec::new();

    if let Err(e) = GraphResolver::new().check_cycles(&graph) {
        problems.push(e.to_string());
    }

    for node in &graph.nodes {
        if !registry.is_registered(&node.node_type) {
            problems.push(format!("{}: unknown node type '{}'", node.id, node.node_type));
            continue;
        }
        for violation in registry.validate_node_config(node).violations {
            problems.push(format!(
                "{}.{}: {}",
                node.id, violation.field, violation.message
            ));
        }
    }

    if !problems.is_empty() {
        println!("❌ Workflow has {} problem(s):", problems.len());
        for problem in &problems {
            println!("   • {}", problem);
        }
        bail!("validation failed");
    }

    println!("✅ Workflow is valid:");
    println!("   Name: {}", graph.name);
    println!("   Nodes: {}", graph.nodes.len());
    println!("   Connections: {}", graph.connections.len());

    Ok(())
}

fn plan_workflow(file: PathBuf) -> Result<()> {
    let graph = load_workflow(&file)?;
    let resolver = GraphResolver::new();
    let phases = resolver.resolve_execution_order(&graph)?;
    let stats = resolver.execution_stats(&graph)?;

    println!("🗺️  Execution plan for: {}", graph.name);
    for (index, phase) in phases.iter().enumerate() {
        let labels: Vec<String> = phase
            .iter()
            .map(|id| match graph.find_node(id) {
                Some(node) => format!("{} ({})", id, node.node_type),
                None => id.clone(),
            })
            .collect();
        println!("   Phase {}: {}", index + 1, labels.join(", "));
    }

    println!();
    println!("   Total nodes: {}", stats.total_nodes);
    println!("   Phases: {}", stats.phases);
    println!("   Max parallelism: {}", stats.max_parallelism);
    println!("   Avg parallelism: {:.2}", stats.avg_parallelism);
    println!("   Critical path: {}", stats.critical_path.join(" → "));

    Ok(())
}

fn list_nodes(only: Option<NodeCategory>) {
    println!("📦 Available Node Types:");

    let registry = builtin_registry();
    for category in CATEGORIES
        .into_iter()
        .filter(|c| only.map_or(true, |only| only == *c))
    {
        let definitions = registry.definitions_by_category(category);
        if definitions.is_empty() {
            continue;
        }
        println!();
        println!("  {}", category.as_str().to_uppercase());
        for definition in definitions {
            println!("  • {} - {}", definition.node_type, definition.name);
            println!("    {}", definition.description);
        }
    }
}

fn example_workflow(domain: &str) -> Result<WorkflowGraph> {
    let mut graph = WorkflowGraph::new("Subdomain Scan").with_variable("target", domain);

    graph.add_node(
        WorkflowNode::new("enumerate", "subfinder")
            .with_title("Enumerate Subdomains")
            .with_category(NodeCategory::Discovery)
            .with_config("domain", "{{target}}")
            .with_position(100.0, 100.0),
    )?;
    graph.add_node(
        WorkflowNode::new("found", "conditional")
            .with_title("Any Subdomains?")
            .with_category(NodeCategory::Logic)
            .with_config("condition", "count > 0")
            .with_ports(&["input"], &["true", "false"])
            .with_position(350.0, 100.0),
    )?;
    graph.add_node(
        WorkflowNode::new("scan", "nuclei")
            .with_title("Vulnerability Scan")
            .with_category(NodeCategory::Analysis)
            .with_config("severity", serde_json::json!(["critical", "high", "medium"]))
            .with_position(600.0, 100.0),
    )?;

    graph.connect(Connection::new("enumerate", "found").to_port("input"))?;
    graph.connect(Connection::new("found", "scan").from_port("true"))?;

    Ok(graph)
}

fn create_example_workflow(output: PathBuf, domain: &str) -> Result<()> {
    let graph = example_workflow(domain)?;
    save_workflow(&graph, &output)?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  reconflow run --file {} --api-url http://127.0.0.1:8000",
        output.display()
    );

    Ok(())
}

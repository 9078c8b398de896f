//! Workflow execution runtime
//!
//! Node registry, graph resolution, the phased execution engine, editing
//! sessions and workflow file loading.

mod executor;
pub mod loader;
mod registry;
mod resolver;
mod runtime;
mod session;

pub use executor::{
    ExecutionHandle, ExecutionOutcome, Progress, ProgressObserver, WorkflowEngine, BRANCH_KEY,
    ROUTED_KEY,
};
pub use loader::{load_workflow, save_workflow, WorkflowLoader};
pub use registry::{NodeFactory, NodeRegistry};
pub use resolver::{ExecutionStats, GraphResolver, Phases};
pub use runtime::{FlowRuntime, RuntimeConfig};
pub use session::WorkflowSession;

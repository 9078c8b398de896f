//! Core abstractions for the reconflow engine
//!
//! Data model, node contract, configuration schemas and the event plumbing
//! shared by the runtime, the node catalog and the binaries.

pub mod backend;
pub mod context;
pub mod document;
mod error;
pub mod events;
mod node;
pub mod schema;
pub mod template;
pub mod value;
mod workflow;

pub use backend::{TaskBackend, TaskState, TaskStatus};
pub use context::{ExecutionContext, LogEntry, LogLevel};
pub use document::WorkflowDocument;
pub use error::{BackendError, FlowError, NodeError, WorkflowError};
pub use events::*;
pub use node::{
    Node, NodeContext, NodeFailure, NodeInput, NodeInputs, NodeMetadata, NodeOutput, NodeResult,
};
pub use schema::{
    ConfigField, ConfigSchema, ConfigValidation, ConfigViolation, FieldType, NodeDefinition,
    PortDefinition,
};
pub use serde_json::Value;
pub use workflow::{
    Connection, GraphStatus, NodeCategory, NodeId, NodeStatus, Position, WorkflowGraph,
    WorkflowId, WorkflowNode, DEFAULT_PORT,
};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;

//! Built-in node library
//!
//! Tool-backed discovery and analysis nodes, in-memory logic and data nodes,
//! and the HTTP task backend the tool nodes submit work to.

mod analysis;
pub mod backend;
pub mod condition;
mod conditional;
pub mod data;
mod discovery;
mod filter;
mod http;
mod iterator;
mod kind;
pub mod logic;
mod merge;
pub mod parsers;
mod split;
mod time;
pub mod tool;
mod transform;

pub use analysis::{ArjunNode, FfufNode, NucleiNode};
pub use backend::HttpTaskBackend;
pub use condition::{Condition, ConditionError};
pub use conditional::ConditionalNode;
pub use discovery::{AmassNode, SubfinderNode};
pub use filter::FilterNode;
pub use http::HttpRequestNode;
pub use iterator::IteratorNode;
pub use kind::{Builtin, BuiltinFactory, BuiltinNode, NodeKind};
pub use merge::MergeNode;
pub use split::SplitNode;
pub use time::WaitNode;
pub use transform::TransformNode;

use reconruntime::NodeRegistry;
use std::sync::Arc;

/// Register every built-in node type with a registry
pub fn register_all(registry: &mut NodeRegistry) {
    for kind in NodeKind::ALL {
        registry.register(Arc::new(BuiltinFactory(*kind)));
    }
}

/// A registry holding the full built-in catalog.
pub fn builtin_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    register_all(&mut registry);
    registry
}

//! The closed set of built-in node types.
//!
//! Every builtin is one variant of [`NodeKind`]; [`BuiltinNode`] carries the
//! variant's parsed configuration and dispatches [`Node`] to it.

use crate::analysis::{ArjunNode, FfufNode, NucleiNode};
use crate::conditional::ConditionalNode;
use crate::discovery::{AmassNode, SubfinderNode};
use crate::filter::FilterNode;
use crate::http::HttpRequestNode;
use crate::iterator::IteratorNode;
use crate::merge::MergeNode;
use crate::split::SplitNode;
use crate::time::WaitNode;
use crate::transform::TransformNode;
use async_trait::async_trait;
use reconcore::{
    ConfigSchema, Node, NodeCategory, NodeContext, NodeDefinition, NodeError, NodeResult,
    PortDefinition, WorkflowNode,
};
use reconruntime::NodeFactory;
use std::fmt;
use std::str::FromStr;

/// A builtin node type: a type tag, a typed configuration and its metadata.
pub trait Builtin: Node + Sized + 'static {
    const TYPE: &'static str;

    type Config: ConfigSchema;

    fn with_config(config: Self::Config) -> Self;

    fn describe() -> NodeDefinition;

    /// Validate the node's config bag and build the typed node from it.
    fn parse(node: &WorkflowNode) -> Result<Self, NodeError> {
        Self::Config::from_config(&node.config).map(Self::with_config)
    }
}

/// Assemble a definition whose schema and defaults come from `C`.
pub(crate) fn definition<C: ConfigSchema>(
    node_type: &str,
    category: NodeCategory,
    name: &str,
    description: &str,
    icon: &str,
    inputs: Vec<PortDefinition>,
    outputs: Vec<PortDefinition>,
) -> NodeDefinition {
    NodeDefinition {
        node_type: node_type.to_string(),
        category,
        name: name.to_string(),
        description: description.to_string(),
        icon: icon.to_string(),
        inputs,
        outputs,
        config_schema: C::schema(),
        default_config: C::default_config(),
    }
}

macro_rules! builtin_nodes {
    ($($variant:ident => $node:ty),* $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum NodeKind {
            $($variant),*
        }

        impl NodeKind {
            /// Registration order.
            pub const ALL: &'static [NodeKind] = &[$(NodeKind::$variant),*];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(NodeKind::$variant => <$node as Builtin>::TYPE),*
                }
            }

            pub fn definition(&self) -> NodeDefinition {
                match self {
                    $(NodeKind::$variant => <$node as Builtin>::describe()),*
                }
            }

            /// Parse a workflow node's config into the matching variant.
            pub fn build(&self, node: &WorkflowNode) -> Result<BuiltinNode, NodeError> {
                match self {
                    $(NodeKind::$variant => <$node as Builtin>::parse(node).map(BuiltinNode::$variant)),*
                }
            }
        }

        /// A builtin node with its parsed configuration.
        pub enum BuiltinNode {
            $($variant($node)),*
        }

        impl BuiltinNode {
            pub fn kind(&self) -> NodeKind {
                match self {
                    $(BuiltinNode::$variant(_) => NodeKind::$variant),*
                }
            }
        }

        #[async_trait]
        impl Node for BuiltinNode {
            fn node_type(&self) -> &str {
                self.kind().as_str()
            }

            fn definition(&self) -> NodeDefinition {
                self.kind().definition()
            }

            async fn execute(&self, ctx: NodeContext) -> NodeResult {
                match self {
                    $(BuiltinNode::$variant(node) => node.execute(ctx).await),*
                }
            }
        }
    };
}

builtin_nodes! {
    Subfinder => SubfinderNode,
    Amass => AmassNode,
    Nuclei => NucleiNode,
    Ffuf => FfufNode,
    Arjun => ArjunNode,
    Conditional => ConditionalNode,
    Filter => FilterNode,
    Merge => MergeNode,
    Split => SplitNode,
    Transform => TransformNode,
    Wait => WaitNode,
    Iterator => IteratorNode,
    Http => HttpRequestNode,
}

impl NodeKind {
    pub fn category(&self) -> NodeCategory {
        self.definition().category
    }

    /// Build a node straight from a workflow node, looking the kind up by type.
    pub fn instantiate(node: &WorkflowNode) -> Result<BuiltinNode, NodeError> {
        node.node_type.parse::<NodeKind>()?.build(node)
    }
}

impl FromStr for NodeKind {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| NodeError::UnknownNodeType(s.to_string()))
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry entry for one builtin kind.
pub struct BuiltinFactory(pub NodeKind);

impl NodeFactory for BuiltinFactory {
    fn node_type(&self) -> &str {
        self.0.as_str()
    }

    fn create(&self, node: &WorkflowNode) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(self.0.build(node)?))
    }

    fn definition(&self) -> Result<NodeDefinition, NodeError> {
        Ok(self.0.definition())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_tags_round_trip_and_are_unique() {
        let tags: HashSet<&str> = NodeKind::ALL.iter().map(NodeKind::as_str).collect();
        assert_eq!(tags.len(), NodeKind::ALL.len());
        for kind in NodeKind::ALL {
            assert_eq!(kind.as_str().parse::<NodeKind>().unwrap(), *kind);
        }
        assert!(matches!(
            "assetfinder".parse::<NodeKind>(),
            Err(NodeError::UnknownNodeType(_))
        ));
    }

    #[test]
    fn test_definitions_are_self_consistent() {
        for kind in NodeKind::ALL {
            let definition = kind.definition();
            assert_eq!(definition.node_type, kind.as_str());
            assert!(!definition.outputs.is_empty(), "{} has no outputs", kind);
            // Defaults must satisfy their own schema.
            let validation = definition.validate(&definition.default_config);
            assert!(validation.is_valid(), "{}: {:?}", kind, validation.messages());
            for key in definition.default_config.keys() {
                assert!(definition.config_schema.contains_key(key), "{}: {}", kind, key);
            }
        }
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let node = WorkflowNode::new("enum", "subfinder").with_config("threads", 500);
        let err = NodeKind::instantiate(&node).err().unwrap();
        match err {
            NodeError::InvalidConfig(messages) => {
                assert_eq!(messages.len(), 1);
                assert!(messages[0].contains("threads"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_categories() {
        assert_eq!(NodeKind::Subfinder.category(), NodeCategory::Discovery);
        assert_eq!(NodeKind::Nuclei.category(), NodeCategory::Analysis);
        assert_eq!(NodeKind::Conditional.category(), NodeCategory::Logic);
        assert_eq!(NodeKind::Transform.category(), NodeCategory::Data);
    }
}

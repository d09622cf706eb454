//! Behavior tree interpreter built on `arbor-core`.
//!
//! Trees are described by a serializable [`TreeDefinition`], turned into a
//! [`BehaviorTree`] by the [`TreeBuilder`] and ticked against a
//! [`arbor_core::Blackboard`]. Node behaviour is a closed set of composites,
//! decorators and leaves; embedders plug in their own leaves through
//! [`Registry::register_action`].

#![cfg_attr(docsrs, feature(doc_cfg))]
#![forbid(unsafe_code)]

pub mod builder;
pub mod composites;
pub mod decorators;
pub mod definition;
pub mod error;
pub mod leaves;
pub mod node;
pub mod registry;
pub mod tree;

pub use builder::{BuildOptions, IdStrategy, TreeBuilder, DEFAULT_MAX_DEPTH, DEFAULT_MAX_NODES};
pub use composites::ParallelPolicy;
pub use decorators::{Decorator, OneShotPolicy, StatusConversion};
pub use definition::{NodeDefinition, TreeDefinition, TreeMetadata, SCHEMA_MAJOR};
pub use error::{BuildError, ConfigurationError, RegistryError, StructuralError, TickError};
pub use leaves::{Action, Leaf};
pub use node::{Node, NodeId, NodeKind};
pub use registry::{
    BuildFn, ChildBounds, NodeCategory, NodeConfig, NodeSchema, ParamKind, ParamSpec, Registry,
};
pub use tree::{format_path, BehaviorTree, NodeIndex, NodePath};

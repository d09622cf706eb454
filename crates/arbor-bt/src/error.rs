use arbor_core::BlackboardError;
use thiserror::Error;

/// A tick could not complete. The node engine never swallows these; the caller decides.
#[derive(Debug, Error)]
pub enum TickError {
    #[error("action `{node_id}` failed: {source}")]
    Action {
        node_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("node `{node_id}` could not access the blackboard: {source}")]
    Blackboard {
        node_id: String,
        #[source]
        source: BlackboardError,
    },

    #[error("node `{node_id}` is not attached to a blackboard")]
    Detached { node_id: String },

    #[error("node `{node_id}` returned INVALID from its update")]
    InvalidStatus { node_id: String },

    #[error("node `{node_id}` is malformed: {reason}")]
    Malformed { node_id: String, reason: String },
}

impl TickError {
    pub fn node_id(&self) -> &str {
        match self {
            TickError::Action { node_id, .. }
            | TickError::Blackboard { node_id, .. }
            | TickError::Detached { node_id }
            | TickError::InvalidStatus { node_id }
            | TickError::Malformed { node_id, .. } => node_id,
        }
    }
}

/// The definition's shape is wrong. Raised during build; no partial tree is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralError {
    #[error("circular subtree reference: {}", cycle.join(" -> "))]
    CircularReference { cycle: Vec<String> },

    #[error("maximum depth {max_depth} exceeded at {path}")]
    DepthExceeded { max_depth: usize, path: String },

    #[error("tree expands to more than {max_nodes} nodes (limit hit at {path})")]
    TooManyNodes { max_nodes: usize, path: String },

    #[error("unknown node type `{node_type}` at {path}")]
    UnknownNodeType { node_type: String, path: String },

    #[error("unknown subtree `{name}` referenced at {path}")]
    UnknownSubtree { name: String, path: String },

    #[error("`{node_type}` node `{node_id}` expects {expected} children, found {found}")]
    ChildCount {
        node_type: String,
        node_id: String,
        expected: String,
        found: usize,
    },

    #[error("duplicate node id `{node_id}` at {path}")]
    DuplicateNodeId { node_id: String, path: String },

    #[error("unsupported schema version `{found}` (expected {expected}.x)")]
    UnsupportedSchemaVersion { found: String, expected: u32 },
}

/// A node parameter is missing or has the wrong shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid configuration for node `{node_id}` at {path}: {message}")]
pub struct ConfigurationError {
    pub node_id: String,
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error(transparent)]
    Structural(#[from] StructuralError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("node type `{0}` is already registered")]
    Duplicate(String),

    #[error("schema for `{node_type}` is inconsistent: {reason}")]
    InvalidSchema { node_type: String, reason: String },
}

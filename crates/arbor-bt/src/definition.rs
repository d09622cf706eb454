//! Serialized tree definitions (JSON or YAML).

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use arbor_core::VariableSchema;
use serde::{Deserialize, Serialize};

use crate::error::StructuralError;

/// Major schema version understood by this crate.
pub const SCHEMA_MAJOR: u32 = 1;

fn default_schema_version() -> String {
    format!("{SCHEMA_MAJOR}.0")
}

fn default_status() -> String {
    "draft".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeDefinition {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,

    pub tree_id: String,

    #[serde(default)]
    pub metadata: TreeMetadata,

    pub root: NodeDefinition,

    /// Named subtrees that nodes can pull in with `ref`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub subtrees: BTreeMap<String, NodeDefinition>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub blackboard_schema: BTreeMap<String, VariableSchema>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeMetadata {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default = "default_status")]
    pub status: String,
}

impl Default for TreeMetadata {
    fn default() -> Self {
        Self {
            name: String::new(),
            version: String::new(),
            tags: Vec::new(),
            status: default_status(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeDefinition {
    /// Registered type name, e.g. `"Sequence"`. Empty for pure references.
    #[serde(default)]
    pub node_type: String,

    /// Stable id. Generated at build time when empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub node_id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, serde_json::Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeDefinition>,

    /// Name of a subtree to splice in at this position.
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl NodeDefinition {
    pub fn new(node_type: impl Into<String>) -> Self {
        Self {
            node_type: node_type.into(),
            ..Self::default()
        }
    }

    pub fn reference(subtree: impl Into<String>) -> Self {
        Self {
            reference: Some(subtree.into()),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.node_id = id.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_child(mut self, child: NodeDefinition) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = NodeDefinition>) -> Self {
        self.children.extend(children);
        self
    }

    /// Subtree names referenced anywhere below (and including) this node.
    pub fn references(&self) -> Vec<&str> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(def) = stack.pop() {
            if let Some(name) = &def.reference {
                out.push(name.as_str());
            }
            stack.extend(def.children.iter());
        }
        out
    }
}

impl TreeDefinition {
    pub fn new(tree_id: impl Into<String>, root: NodeDefinition) -> Self {
        Self {
            schema_version: default_schema_version(),
            tree_id: tree_id.into(),
            metadata: TreeMetadata::default(),
            root,
            subtrees: BTreeMap::new(),
            blackboard_schema: BTreeMap::new(),
        }
    }

    pub fn with_subtree(mut self, name: impl Into<String>, root: NodeDefinition) -> Self {
        self.subtrees.insert(name.into(), root);
        self
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("Failed to parse tree definition JSON")
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).context("Failed to parse tree definition YAML")
    }

    /// Load from a `.json`, `.yaml` or `.yml` file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read tree definition: {}", path.display()))?;
        let yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        let parsed = if yaml {
            Self::from_yaml_str(&raw)
        } else {
            Self::from_json_str(&raw)
        };
        parsed.with_context(|| format!("Invalid tree definition: {}", path.display()))
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize tree definition")
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize tree definition")
    }

    pub fn check_schema_version(&self) -> Result<(), StructuralError> {
        let major = self
            .schema_version
            .split('.')
            .next()
            .and_then(|m| m.trim().parse::<u32>().ok());
        if major == Some(SCHEMA_MAJOR) {
            Ok(())
        } else {
            Err(StructuralError::UnsupportedSchemaVersion {
                found: self.schema_version.clone(),
                expected: SCHEMA_MAJOR,
            })
        }
    }
}

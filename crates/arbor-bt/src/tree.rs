use std::collections::{BTreeMap, HashMap};

use arbor_core::{Blackboard, BlackboardError, Status, TickContext, VariableSchema};

use crate::definition::{TreeDefinition, TreeMetadata};
use crate::error::TickError;
use crate::node::{Iter, Node, NodeId};

/// Position of a node as child indices from the root. The root is `[]`.
pub type NodePath = Vec<usize>;

pub fn format_path(path: &[usize]) -> String {
    if path.is_empty() {
        return "root".to_string();
    }
    let parts: Vec<String> = path.iter().map(usize::to_string).collect();
    format!("root/{}", parts.join("/"))
}

/// Lookup from node id to structural path and back.
#[derive(Debug, Clone, Default)]
pub struct NodeIndex {
    by_id: HashMap<NodeId, NodePath>,
    by_path: BTreeMap<NodePath, NodeId>,
}

impl NodeIndex {
    pub fn build(root: &Node) -> Self {
        let mut index = Self::default();
        let mut stack: Vec<(&Node, NodePath)> = vec![(root, Vec::new())];
        while let Some((node, path)) = stack.pop() {
            for (i, child) in node.children().iter().enumerate() {
                let mut child_path = path.clone();
                child_path.push(i);
                stack.push((child, child_path));
            }
            index.by_id.insert(node.id().to_string(), path.clone());
            index.by_path.insert(path, node.id().to_string());
        }
        index
    }

    pub fn path_of(&self, id: &str) -> Option<&[usize]> {
        self.by_id.get(id).map(Vec::as_slice)
    }

    pub fn id_at(&self, path: &[usize]) -> Option<&str> {
        self.by_path.get(path).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// A built, immutable-shape behavior tree.
#[derive(Debug)]
pub struct BehaviorTree {
    tree_id: String,
    schema_version: String,
    metadata: TreeMetadata,
    blackboard_schema: BTreeMap<String, VariableSchema>,
    root: Node,
    index: NodeIndex,
}

impl BehaviorTree {
    pub fn new(tree_id: impl Into<String>, root: Node) -> Self {
        let index = NodeIndex::build(&root);
        Self {
            tree_id: tree_id.into(),
            schema_version: format!("{}.0", crate::definition::SCHEMA_MAJOR),
            metadata: TreeMetadata::default(),
            blackboard_schema: BTreeMap::new(),
            root,
            index,
        }
    }

    pub(crate) fn with_definition_meta(mut self, def: &TreeDefinition) -> Self {
        self.schema_version = def.schema_version.clone();
        self.metadata = def.metadata.clone();
        self.blackboard_schema = def.blackboard_schema.clone();
        self
    }

    pub fn tree_id(&self) -> &str {
        &self.tree_id
    }

    pub fn metadata(&self) -> &TreeMetadata {
        &self.metadata
    }

    pub fn blackboard_schema(&self) -> &BTreeMap<String, VariableSchema> {
        &self.blackboard_schema
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn status(&self) -> Status {
        self.root.status()
    }

    pub fn tick(&mut self, ctx: &TickContext, bb: &mut Blackboard) -> Result<Status, TickError> {
        self.root.tick(ctx, bb)
    }

    /// Reset every node to INVALID, interrupting anything still running.
    pub fn reset(&mut self) {
        self.root.stop();
    }

    /// Register one blackboard client per node that touches the blackboard.
    pub fn attach(&mut self, bb: &mut Blackboard) -> Result<(), BlackboardError> {
        self.root.attach(bb)
    }

    /// Deepest node reached by following the active child from the root.
    pub fn tip(&self) -> &Node {
        self.root.tip()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        let path = self.index.path_of(id)?;
        let mut node = &self.root;
        for &i in path {
            node = node.child(i)?;
        }
        Some(node)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        let path = self.index.path_of(id)?.to_vec();
        let mut node = &mut self.root;
        for i in path {
            node = node.child_mut(i)?;
        }
        Some(node)
    }

    pub fn path_of(&self, id: &str) -> Option<&[usize]> {
        self.index.path_of(id)
    }

    pub fn id_at(&self, path: &[usize]) -> Option<&str> {
        self.index.id_at(path)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.path_of(id).is_some()
    }

    pub fn index(&self) -> &NodeIndex {
        &self.index
    }

    pub fn iter(&self) -> Iter<'_> {
        self.root.iter()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Self-contained definition that rebuilds a structurally equivalent tree.
    pub fn to_definition(&self) -> TreeDefinition {
        TreeDefinition {
            schema_version: self.schema_version.clone(),
            tree_id: self.tree_id.clone(),
            metadata: self.metadata.clone(),
            root: self.root.to_definition(),
            subtrees: BTreeMap::new(),
            blackboard_schema: self.blackboard_schema.clone(),
        }
    }
}

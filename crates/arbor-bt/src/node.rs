//! Node engine: the shared tick protocol every node kind runs through.
//!
//! A node is a closed enum of behaviours plus a set of fields that every node
//! carries (identity, status, feedback, children). The protocol is:
//!
//! 1. If the node is not RUNNING, `initialise` runs first.
//! 2. The kind-specific update computes the new status.
//! 3. On a terminal result, children left RUNNING are stopped and the
//!    node's own `terminate` hook runs.
//!
//! `stop` resets a whole subtree back to INVALID, calling `terminate(INVALID)`
//! on every node that was RUNNING.

use std::collections::BTreeMap;

use arbor_core::{Access, Blackboard, BlackboardError, ClientToken, Status, TickContext};

use crate::composites::{self, ParallelPolicy};
use crate::decorators::Decorator;
use crate::definition::NodeDefinition;
use crate::error::TickError;
use crate::leaves::Leaf;

pub type NodeId = String;

/// Behaviour of a node. Composite cursors live inline.
#[derive(Debug)]
pub enum NodeKind {
    Sequence { memory: bool, cursor: usize },
    Selector { memory: bool, cursor: usize },
    Parallel { policy: ParallelPolicy },
    Decorator(Decorator),
    Leaf(Leaf),
}

impl NodeKind {
    pub fn sequence(memory: bool) -> Self {
        NodeKind::Sequence { memory, cursor: 0 }
    }

    pub fn selector(memory: bool) -> Self {
        NodeKind::Selector { memory, cursor: 0 }
    }

    pub fn parallel(policy: ParallelPolicy) -> Self {
        NodeKind::Parallel { policy }
    }

    pub fn is_composite(&self) -> bool {
        matches!(
            self,
            NodeKind::Sequence { .. } | NodeKind::Selector { .. } | NodeKind::Parallel { .. }
        )
    }

    /// Parameters needed to rebuild this kind from a definition.
    pub fn config(&self) -> BTreeMap<String, serde_json::Value> {
        let mut config = BTreeMap::new();
        match self {
            NodeKind::Sequence { memory, .. } | NodeKind::Selector { memory, .. } => {
                config.insert("memory".to_string(), serde_json::Value::Bool(*memory));
            }
            NodeKind::Parallel { policy } => policy.write_config(&mut config),
            NodeKind::Decorator(decorator) => decorator.write_config(&mut config),
            NodeKind::Leaf(leaf) => leaf.write_config(&mut config),
        }
        config
    }
}

#[derive(Debug)]
pub struct Node {
    id: NodeId,
    name: String,
    node_type: String,
    status: Status,
    feedback: String,
    children: Vec<Node>,
    current_child: Option<usize>,
    client: Option<ClientToken>,
    kind: NodeKind,
}

impl Node {
    pub fn new(
        id: impl Into<NodeId>,
        name: impl Into<String>,
        node_type: impl Into<String>,
        kind: NodeKind,
        children: Vec<Node>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            node_type: node_type.into(),
            status: Status::Invalid,
            feedback: String::new(),
            children,
            current_child: None,
            client: None,
            kind,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node_type(&self) -> &str {
        &self.node_type
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Free-form note set by the last update, e.g. `"timed out after 1.000s"`.
    pub fn feedback(&self) -> &str {
        &self.feedback
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Index of the child ticked most recently, if any.
    pub fn current_child(&self) -> Option<usize> {
        self.current_child
    }

    pub fn client(&self) -> Option<&ClientToken> {
        self.client.as_ref()
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf(_))
    }

    pub(crate) fn child(&self, index: usize) -> Option<&Node> {
        self.children.get(index)
    }

    pub(crate) fn child_mut(&mut self, index: usize) -> Option<&mut Node> {
        self.children.get_mut(index)
    }

    pub fn tick(&mut self, ctx: &TickContext, bb: &mut Blackboard) -> Result<Status, TickError> {
        if self.status != Status::Running {
            self.initialise();
        }

        let status = self.update(ctx, bb)?;
        if status == Status::Invalid {
            return Err(TickError::InvalidStatus {
                node_id: self.id.clone(),
            });
        }

        if status.is_terminal() {
            for child in self.children.iter_mut() {
                if child.status == Status::Running {
                    child.stop();
                }
            }
            self.terminate(status);
        }

        tracing::trace!(node_id = %self.id, from = %self.status, to = %status, "tick");
        self.status = status;
        Ok(status)
    }

    /// Reset this subtree to INVALID.
    pub fn stop(&mut self) {
        for child in self.children.iter_mut() {
            child.stop();
        }
        if self.status == Status::Running {
            self.terminate(Status::Invalid);
        }
        self.status = Status::Invalid;
        self.current_child = None;
        match &mut self.kind {
            NodeKind::Sequence { cursor, .. } | NodeKind::Selector { cursor, .. } => *cursor = 0,
            NodeKind::Decorator(decorator) => decorator.clear_timer(),
            _ => {}
        }
    }

    fn initialise(&mut self) {
        self.feedback.clear();
        self.current_child = None;
        match &mut self.kind {
            NodeKind::Sequence { cursor, .. } | NodeKind::Selector { cursor, .. } => {
                *cursor = 0;
                for child in self.children.iter_mut() {
                    child.stop();
                }
            }
            NodeKind::Parallel { .. } => {
                for child in self.children.iter_mut() {
                    child.stop();
                }
            }
            NodeKind::Decorator(decorator) => decorator.initialise(),
            NodeKind::Leaf(leaf) => leaf.initialise(),
        }
    }

    fn update(&mut self, ctx: &TickContext, bb: &mut Blackboard) -> Result<Status, TickError> {
        let Node {
            id,
            children,
            current_child,
            client,
            feedback,
            kind,
            ..
        } = self;

        match kind {
            NodeKind::Sequence { memory, cursor } => composites::tick_ordered(
                Status::Success,
                *memory,
                cursor,
                children,
                current_child,
                ctx,
                bb,
            ),
            NodeKind::Selector { memory, cursor } => composites::tick_ordered(
                Status::Failure,
                *memory,
                cursor,
                children,
                current_child,
                ctx,
                bb,
            ),
            NodeKind::Parallel { policy } => {
                composites::tick_parallel(*policy, children, current_child, ctx, bb)
            }
            NodeKind::Decorator(decorator) => {
                let Some(child) = children.first_mut() else {
                    return Err(TickError::Malformed {
                        node_id: id.clone(),
                        reason: "decorator has no child".to_string(),
                    });
                };
                *current_child = None;
                decorator.update(id, child, current_child, feedback, client.as_ref(), ctx, bb)
            }
            NodeKind::Leaf(leaf) => leaf.update(id, client.as_ref(), feedback, ctx, bb),
        }
    }

    fn terminate(&mut self, new_status: Status) {
        match &mut self.kind {
            NodeKind::Decorator(decorator) => decorator.clear_timer(),
            NodeKind::Leaf(leaf) => leaf.terminate(new_status),
            _ => {}
        }
    }

    /// Follow `current_child` down through the children ticked on the last tick.
    pub fn tip(&self) -> &Node {
        let mut node = self;
        while let Some(next) = node
            .current_child
            .and_then(|i| node.children.get(i))
            .filter(|child| child.status != Status::Invalid)
        {
            node = next;
        }
        node
    }

    /// Depth-first, pre-order walk over this subtree.
    pub fn iter(&self) -> Iter<'_> {
        Iter { stack: vec![self] }
    }

    /// Keys this node reads or writes, with the access it needs.
    pub fn blackboard_keys(&self) -> Vec<(String, Access)> {
        match &self.kind {
            NodeKind::Decorator(decorator) => decorator.blackboard_keys(),
            NodeKind::Leaf(leaf) => leaf.blackboard_keys(),
            _ => Vec::new(),
        }
    }

    fn needs_client(&self) -> bool {
        match &self.kind {
            NodeKind::Leaf(leaf) => leaf.is_action() || !leaf.blackboard_keys().is_empty(),
            NodeKind::Decorator(decorator) => !decorator.blackboard_keys().is_empty(),
            _ => false,
        }
    }

    /// Register a blackboard client for every node in this subtree that touches the blackboard.
    pub(crate) fn attach(&mut self, bb: &mut Blackboard) -> Result<(), BlackboardError> {
        if let Some(previous) = self.client.take() {
            bb.unregister_client(&previous);
        }
        if self.needs_client() {
            let token = bb.register_client(self.id.clone());
            for (key, access) in self.blackboard_keys() {
                bb.register_key(&token, &key, access)?;
            }
            self.client = Some(token);
        }
        for child in self.children.iter_mut() {
            child.attach(bb)?;
        }
        Ok(())
    }

    /// Definition that rebuilds this subtree, with every id and parameter explicit.
    pub fn to_definition(&self) -> NodeDefinition {
        NodeDefinition {
            node_type: self.node_type.clone(),
            node_id: self.id.clone(),
            name: self.name.clone(),
            config: self.kind.config(),
            children: self.children.iter().map(Node::to_definition).collect(),
            reference: None,
        }
    }
}

pub struct Iter<'a> {
    stack: Vec<&'a Node>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Node;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

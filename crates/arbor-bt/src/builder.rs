//! Tree Builder - turns a [`TreeDefinition`] into a runnable [`BehaviorTree`].
//!
//! Building runs in two passes:
//!
//! 1. Resolve `ref` nodes against the definition's subtrees, tracking the chain of subtree
//!    names being expanded so cycles are reported instead of recursing forever.
//! 2. Instantiate every node through the [`Registry`], checking child counts, parameters
//!    and id uniqueness.
//!
//! Both passes enforce the depth limit, and resolution also caps the total node count.
//! Nothing is returned unless the whole tree builds.

use std::cell::Cell;
use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::definition::{NodeDefinition, TreeDefinition};
use crate::error::{BuildError, ConfigurationError, StructuralError};
use crate::node::{Node, NodeId};
use crate::registry::{NodeConfig, Registry};
use crate::tree::{format_path, BehaviorTree};

pub const DEFAULT_MAX_DEPTH: usize = 100;

/// Upper bound on nodes after every subtree reference is expanded.
pub const DEFAULT_MAX_NODES: usize = 100_000;

const ID_NAMESPACE: Uuid = Uuid::from_u128(0x5b1f_0c3e_8d2a_4a61_9e7b_3c44_d0a1_62f9);

/// How ids are generated for nodes that do not declare one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    /// Derived from node type, name and position; stable across builds.
    #[default]
    Deterministic,
    Random,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOptions {
    pub max_depth: usize,
    pub max_nodes: usize,
    pub id_strategy: IdStrategy,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_nodes: DEFAULT_MAX_NODES,
            id_strategy: IdStrategy::Deterministic,
        }
    }
}

pub struct TreeBuilder<'r> {
    registry: &'r Registry,
    options: BuildOptions,
}

impl<'r> TreeBuilder<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self {
            registry,
            options: BuildOptions::default(),
        }
    }

    pub fn with_options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> BuildOptions {
        self.options
    }

    pub fn build(&self, def: &TreeDefinition) -> Result<BehaviorTree, BuildError> {
        def.check_schema_version()?;
        check_subtree_cycles(&def.subtrees)?;

        let resolver = Resolver {
            subtrees: &def.subtrees,
            max_depth: self.options.max_depth,
            max_nodes: self.options.max_nodes,
            resolved: Cell::new(0),
        };
        let resolved = resolver.resolve(&def.root, &mut Vec::new(), &mut Vec::new())?;

        let mut seen = HashSet::new();
        let root = self.instantiate(&resolved, &mut Vec::new(), &mut seen)?;
        let tree = BehaviorTree::new(def.tree_id.clone(), root).with_definition_meta(def);

        tracing::info!(tree_id = %def.tree_id, nodes = tree.len(), "built behavior tree");
        Ok(tree)
    }

    fn instantiate(
        &self,
        def: &NodeDefinition,
        path: &mut Vec<usize>,
        seen: &mut HashSet<NodeId>,
    ) -> Result<Node, BuildError> {
        check_depth(path, self.options.max_depth)?;

        let schema = self.registry.get_schema(&def.node_type).ok_or_else(|| {
            StructuralError::UnknownNodeType {
                node_type: def.node_type.clone(),
                path: format_path(path),
            }
        })?;

        let id = if def.node_id.is_empty() {
            self.generate_id(def, path)
        } else {
            def.node_id.clone()
        };

        if !schema.children.contains(def.children.len()) {
            return Err(StructuralError::ChildCount {
                node_type: def.node_type.clone(),
                node_id: id,
                expected: schema.children.to_string(),
                found: def.children.len(),
            }
            .into());
        }
        if !seen.insert(id.clone()) {
            return Err(StructuralError::DuplicateNodeId {
                node_id: id,
                path: format_path(path),
            }
            .into());
        }

        let config_error = |message: String| ConfigurationError {
            node_id: id.clone(),
            path: format_path(path),
            message,
        };
        let unknown = schema.check_config(&def.config).map_err(config_error)?;
        for param in unknown {
            tracing::warn!(node_id = %id, node_type = %def.node_type, param, "ignoring unknown node parameter");
        }

        let build = self.registry.get_implementation(&def.node_type).ok_or_else(|| {
            StructuralError::UnknownNodeType {
                node_type: def.node_type.clone(),
                path: format_path(path),
            }
        })?;
        let kind = build(&NodeConfig::new(&def.node_type, &def.config)).map_err(config_error)?;

        let mut children = Vec::with_capacity(def.children.len());
        for (i, child) in def.children.iter().enumerate() {
            path.push(i);
            let built = self.instantiate(child, path, seen);
            path.pop();
            children.push(built?);
        }

        let name = if def.name.is_empty() {
            def.node_type.clone()
        } else {
            def.name.clone()
        };
        Ok(Node::new(id, name, def.node_type.clone(), kind, children))
    }

    fn generate_id(&self, def: &NodeDefinition, path: &[usize]) -> NodeId {
        match self.options.id_strategy {
            IdStrategy::Deterministic => {
                let seed = format!("{}|{}|{}", def.node_type, def.name, format_path(path));
                Uuid::new_v5(&ID_NAMESPACE, seed.as_bytes()).to_string()
            }
            IdStrategy::Random => Uuid::new_v4().to_string(),
        }
    }
}

fn check_depth(path: &[usize], max_depth: usize) -> Result<(), StructuralError> {
    if path.len() + 1 > max_depth {
        return Err(StructuralError::DepthExceeded {
            max_depth,
            path: format_path(path),
        });
    }
    Ok(())
}

struct Resolver<'a> {
    subtrees: &'a BTreeMap<String, NodeDefinition>,
    max_depth: usize,
    max_nodes: usize,
    /// Nodes produced so far; repeated references can fan out far faster than depth grows.
    resolved: Cell<usize>,
}

impl Resolver<'_> {
    /// Inline every `ref` below `def`. `stack` holds the subtree names currently being expanded.
    fn resolve(
        &self,
        def: &NodeDefinition,
        stack: &mut Vec<String>,
        path: &mut Vec<usize>,
    ) -> Result<NodeDefinition, StructuralError> {
        check_depth(path, self.max_depth)?;

        if let Some(name) = &def.reference {
            if let Some(pos) = stack.iter().position(|s| s == name) {
                let mut cycle = stack[pos..].to_vec();
                cycle.push(name.clone());
                return Err(StructuralError::CircularReference { cycle });
            }
            if stack.len() >= self.max_depth {
                return Err(StructuralError::DepthExceeded {
                    max_depth: self.max_depth,
                    path: format_path(path),
                });
            }
            let target = self
                .subtrees
                .get(name)
                .ok_or_else(|| StructuralError::UnknownSubtree {
                    name: name.clone(),
                    path: format_path(path),
                })?;

            stack.push(name.clone());
            let resolved = self.resolve(target, stack, path);
            stack.pop();
            let mut resolved = resolved?;

            if !def.node_id.is_empty() {
                scope_ids(&mut resolved, &def.node_id);
                resolved.node_id = def.node_id.clone();
            }
            if !def.name.is_empty() {
                resolved.name = def.name.clone();
            }
            return Ok(resolved);
        }

        let count = self.resolved.get() + 1;
        if count > self.max_nodes {
            return Err(StructuralError::TooManyNodes {
                max_nodes: self.max_nodes,
                path: format_path(path),
            });
        }
        self.resolved.set(count);

        let mut children = Vec::with_capacity(def.children.len());
        for (i, child) in def.children.iter().enumerate() {
            path.push(i);
            let resolved = self.resolve(child, stack, path);
            path.pop();
            children.push(resolved?);
        }

        Ok(NodeDefinition {
            node_type: def.node_type.clone(),
            node_id: def.node_id.clone(),
            name: def.name.clone(),
            config: def.config.clone(),
            children,
            reference: None,
        })
    }
}

/// Prefix explicit ids inside a spliced subtree so two references to it cannot collide.
fn scope_ids(def: &mut NodeDefinition, scope: &str) {
    let mut stack: Vec<&mut NodeDefinition> = def.children.iter_mut().collect();
    while let Some(node) = stack.pop() {
        if !node.node_id.is_empty() {
            node.node_id = format!("{scope}/{}", node.node_id);
        }
        stack.extend(node.children.iter_mut());
    }
}

/// Reject cycles among subtree references, including subtrees the root never reaches.
fn check_subtree_cycles(subtrees: &BTreeMap<String, NodeDefinition>) -> Result<(), StructuralError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    let edges: BTreeMap<&str, Vec<&str>> = subtrees
        .iter()
        .map(|(name, root)| (name.as_str(), root.references()))
        .collect();
    let mut marks: BTreeMap<&str, Mark> = BTreeMap::new();

    for &start in edges.keys() {
        if marks.contains_key(start) {
            continue;
        }
        // Iterative DFS: (subtree, next edge to follow).
        let mut chain: Vec<(&str, usize)> = vec![(start, 0)];
        marks.insert(start, Mark::Visiting);
        while let Some((current, next)) = chain.last_mut() {
            let targets = edges.get(*current).map(Vec::as_slice).unwrap_or(&[]);
            let Some(&target) = targets.get(*next) else {
                marks.insert(*current, Mark::Done);
                chain.pop();
                continue;
            };
            *next += 1;
            match marks.get(target) {
                Some(Mark::Visiting) => {
                    let pos = chain.iter().position(|(n, _)| *n == target).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        chain[pos..].iter().map(|(n, _)| n.to_string()).collect();
                    cycle.push(target.to_string());
                    return Err(StructuralError::CircularReference { cycle });
                }
                Some(Mark::Done) => {}
                None if edges.contains_key(target) => {
                    marks.insert(target, Mark::Visiting);
                    chain.push((target, 0));
                }
                // Unknown names are reported by the resolver where they are used.
                None => {}
            }
        }
    }
    Ok(())
}

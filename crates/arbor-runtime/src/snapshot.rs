use std::collections::BTreeMap;

use arbor_core::{Status, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::execution::{ExecutionInstance, ExecutionMode};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    pub name: String,
    pub node_type: String,
    pub status: Status,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub feedback: String,
    pub is_tip: bool,
}

/// Point-in-time view of an execution for external consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub execution_id: String,
    pub tree_id: String,
    pub tick_count: u64,
    pub root_status: Status,
    pub mode: ExecutionMode,
    pub created_at: DateTime<Utc>,
    pub last_tick_at: Option<DateTime<Utc>>,
    /// Deepest node on the last evaluated path; `None` before the first tick.
    pub tip: Option<String>,
    pub node_states: BTreeMap<String, NodeState>,
    pub blackboard: BTreeMap<String, Value>,
}

impl ExecutionSnapshot {
    pub fn capture(instance: &ExecutionInstance) -> Self {
        let tree = instance.tree();
        let tip = (tree.status() != Status::Invalid).then(|| tree.tip().id().to_string());
        let node_states = tree
            .iter()
            .map(|node| {
                let state = NodeState {
                    name: node.name().to_string(),
                    node_type: node.node_type().to_string(),
                    status: node.status(),
                    feedback: node.feedback().to_string(),
                    is_tip: tip.as_deref() == Some(node.id()),
                };
                (node.id().to_string(), state)
            })
            .collect();

        Self {
            execution_id: instance.id().to_string(),
            tree_id: tree.tree_id().to_string(),
            tick_count: instance.tick_count(),
            root_status: tree.status(),
            mode: instance.mode(),
            created_at: instance.created_at(),
            last_tick_at: instance.last_tick_at(),
            tip,
            node_states,
            blackboard: instance.blackboard().snapshot(),
        }
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

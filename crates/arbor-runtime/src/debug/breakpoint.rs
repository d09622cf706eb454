use arbor_bt::Node;
use arbor_core::Blackboard;
use serde::{Deserialize, Serialize};

use super::condition::Condition;

/// Pause point on a node, checked when that node is the tip of a tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub node_id: String,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(default)]
    pub hit_count: u64,
}

impl Breakpoint {
    pub fn new(node_id: impl Into<String>, condition: Option<Condition>) -> Self {
        Self {
            node_id: node_id.into(),
            enabled: true,
            condition,
            hit_count: 0,
        }
    }

    /// Whether execution should break at `node`. A condition that cannot be evaluated breaks.
    pub(crate) fn should_break(&mut self, node: &Node, blackboard: &Blackboard) -> bool {
        if !self.enabled {
            return false;
        }
        let hit = match &self.condition {
            None => true,
            Some(condition) => condition.evaluate(node, blackboard).unwrap_or_else(|err| {
                tracing::warn!(
                    node_id = %self.node_id,
                    condition = %condition,
                    error = %err,
                    "breakpoint condition failed to evaluate; breaking"
                );
                true
            }),
        };
        if hit {
            self.hit_count += 1;
        }
        hit
    }
}

//! Leaf behaviours: fixed statuses, counters, blackboard checks and embedder actions.

use std::collections::BTreeMap;
use std::fmt;

use arbor_core::{
    Access, Blackboard, BlackboardClient, ClientToken, Comparison, ConditionError, Status,
    TickContext, Value,
};

use crate::error::TickError;

/// Behaviour supplied by the embedding application.
///
/// The action sees the blackboard only through its own client, so it can touch exactly the
/// keys returned by [`Action::blackboard_keys`].
pub trait Action: Send + 'static {
    fn blackboard_keys(&self) -> Vec<(String, Access)> {
        Vec::new()
    }

    /// Called when the node is ticked while not RUNNING.
    fn initialise(&mut self) {}

    fn update(
        &mut self,
        ctx: &TickContext,
        blackboard: &mut BlackboardClient<'_>,
    ) -> anyhow::Result<Status>;

    /// Called when the node finishes, or with INVALID when it is interrupted.
    fn terminate(&mut self, _new_status: Status) {}
}

pub struct ActionLeaf {
    config: BTreeMap<String, serde_json::Value>,
    action: Box<dyn Action>,
}

impl ActionLeaf {
    pub fn new(config: BTreeMap<String, serde_json::Value>, action: Box<dyn Action>) -> Self {
        Self { config, action }
    }
}

impl fmt::Debug for ActionLeaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionLeaf")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum Leaf {
    /// Always returns the given status.
    Fixed(Status),
    /// RUNNING until ticked `target` times in one activation, then SUCCESS.
    Counter { target: u32, count: u32 },
    /// RUNNING for `duration` ticks, then `completion`.
    TickCounter {
        duration: u32,
        completion: Status,
        count: u32,
    },
    /// SUCCESS on every n-th tick, FAILURE otherwise. The count is never reset.
    SuccessEveryN { n: u32, count: u32 },
    SetVariable {
        key: String,
        value: Value,
        overwrite: bool,
    },
    UnsetVariable { key: String },
    CheckExists { key: String },
    CheckValue { comparison: Comparison },
    /// RUNNING until the key exists.
    WaitForVariable { key: String },
    Action(ActionLeaf),
}

impl Leaf {
    pub fn counter(target: u32) -> Self {
        Leaf::Counter { target, count: 0 }
    }

    pub fn tick_counter(duration: u32, completion: Status) -> Self {
        Leaf::TickCounter {
            duration,
            completion,
            count: 0,
        }
    }

    pub fn success_every_n(n: u32) -> Self {
        Leaf::SuccessEveryN { n, count: 0 }
    }

    pub fn action(action: impl Action) -> Self {
        Leaf::Action(ActionLeaf::new(BTreeMap::new(), Box::new(action)))
    }

    pub fn is_action(&self) -> bool {
        matches!(self, Leaf::Action(_))
    }

    /// Ticks counted by counting leaves.
    pub fn count(&self) -> Option<u32> {
        match self {
            Leaf::Counter { count, .. }
            | Leaf::TickCounter { count, .. }
            | Leaf::SuccessEveryN { count, .. } => Some(*count),
            _ => None,
        }
    }

    pub(crate) fn initialise(&mut self) {
        match self {
            Leaf::Counter { count, .. } | Leaf::TickCounter { count, .. } => *count = 0,
            Leaf::Action(leaf) => leaf.action.initialise(),
            _ => {}
        }
    }

    pub(crate) fn terminate(&mut self, new_status: Status) {
        if let Leaf::Action(leaf) = self {
            leaf.action.terminate(new_status);
        }
    }

    pub(crate) fn blackboard_keys(&self) -> Vec<(String, Access)> {
        match self {
            Leaf::SetVariable { key, .. } | Leaf::UnsetVariable { key } => {
                vec![(key.clone(), Access::Write)]
            }
            Leaf::CheckExists { key } | Leaf::WaitForVariable { key } => {
                vec![(key.clone(), Access::Read)]
            }
            Leaf::CheckValue { comparison } => vec![(comparison.key.clone(), Access::Read)],
            Leaf::Action(leaf) => leaf.action.blackboard_keys(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn update(
        &mut self,
        node_id: &str,
        client: Option<&ClientToken>,
        feedback: &mut String,
        ctx: &TickContext,
        bb: &mut Blackboard,
    ) -> Result<Status, TickError> {
        let token = || {
            client.ok_or_else(|| TickError::Detached {
                node_id: node_id.to_string(),
            })
        };
        let bb_err = |source| TickError::Blackboard {
            node_id: node_id.to_string(),
            source,
        };

        match self {
            Leaf::Fixed(status) => Ok(*status),
            Leaf::Counter { target, count } => {
                *count += 1;
                *feedback = format!("{count}/{target}");
                Ok(if *count >= *target {
                    Status::Success
                } else {
                    Status::Running
                })
            }
            Leaf::TickCounter {
                duration,
                completion,
                count,
            } => {
                *count += 1;
                Ok(if *count > *duration {
                    *completion
                } else {
                    Status::Running
                })
            }
            Leaf::SuccessEveryN { n, count } => {
                *count = count.wrapping_add(1);
                Ok(if *n > 0 && *count % *n == 0 {
                    Status::Success
                } else {
                    Status::Failure
                })
            }
            Leaf::SetVariable {
                key,
                value,
                overwrite,
            } => {
                if bb.set(token()?, key, value.clone(), *overwrite).map_err(bb_err)? {
                    Ok(Status::Success)
                } else {
                    *feedback = format!("`{key}` is already set");
                    Ok(Status::Failure)
                }
            }
            Leaf::UnsetVariable { key } => {
                bb.unset(token()?, key).map_err(bb_err)?;
                Ok(Status::Success)
            }
            Leaf::CheckExists { key } => Ok(if bb.exists(token()?, key).map_err(bb_err)? {
                Status::Success
            } else {
                Status::Failure
            }),
            Leaf::CheckValue { comparison } => match comparison.evaluate(bb, token()?) {
                Ok(true) => Ok(Status::Success),
                Ok(false) => Ok(Status::Failure),
                Err(ConditionError::Blackboard(source)) => Err(bb_err(source)),
                Err(err) => {
                    *feedback = err.to_string();
                    Ok(Status::Failure)
                }
            },
            Leaf::WaitForVariable { key } => Ok(if bb.exists(token()?, key).map_err(bb_err)? {
                Status::Success
            } else {
                Status::Running
            }),
            Leaf::Action(leaf) => {
                let token = token()?;
                let mut view = bb.client(token);
                leaf.action
                    .update(ctx, &mut view)
                    .map_err(|source| TickError::Action {
                        node_id: node_id.to_string(),
                        source,
                    })
            }
        }
    }

    pub(crate) fn write_config(&self, config: &mut BTreeMap<String, serde_json::Value>) {
        match self {
            Leaf::Fixed(_) => {}
            Leaf::Counter { target, .. } => {
                config.insert("target".into(), (*target).into());
            }
            Leaf::TickCounter {
                duration,
                completion,
                ..
            } => {
                config.insert("duration".into(), (*duration).into());
                config.insert("completion_status".into(), completion.as_str().into());
            }
            Leaf::SuccessEveryN { n, .. } => {
                config.insert("n".into(), (*n).into());
            }
            Leaf::SetVariable {
                key,
                value,
                overwrite,
            } => {
                config.insert("key".into(), key.clone().into());
                config.insert("value".into(), value.to_json());
                config.insert("overwrite".into(), (*overwrite).into());
            }
            Leaf::UnsetVariable { key }
            | Leaf::CheckExists { key }
            | Leaf::WaitForVariable { key } => {
                config.insert("key".into(), key.clone().into());
            }
            Leaf::CheckValue { comparison } => {
                config.insert("key".into(), comparison.key.clone().into());
                config.insert("operator".into(), comparison.operator.symbol().into());
                config.insert("value".into(), comparison.value.to_json());
            }
            Leaf::Action(leaf) => config.extend(leaf.config.clone()),
        }
    }
}

//! Sequence, selector and parallel control flow.
//!
//! Sequences and selectors share one routine parameterised by the child status that lets
//! them move on: SUCCESS for a sequence, FAILURE for a selector. Anything else ends the
//! composite with that status.
//!
//! A composite only carries on to the next child within the same tick when the child
//! settled instantly. A child that finishes after having been RUNNING uses up the tick and
//! the composite reports RUNNING; the next child is evaluated on the following tick.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use arbor_core::{Blackboard, Status, TickContext};
use serde::{Deserialize, Serialize};

use crate::error::TickError;
use crate::node::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParallelPolicy {
    /// SUCCESS once every child has succeeded. With `synchronise`, children that already
    /// succeeded are not ticked again.
    SuccessOnAll { synchronise: bool },
    /// SUCCESS as soon as any child succeeds.
    SuccessOnOne,
}

impl Default for ParallelPolicy {
    fn default() -> Self {
        ParallelPolicy::SuccessOnAll { synchronise: false }
    }
}

impl ParallelPolicy {
    pub fn name(self) -> &'static str {
        match self {
            ParallelPolicy::SuccessOnAll { .. } => "SuccessOnAll",
            ParallelPolicy::SuccessOnOne => "SuccessOnOne",
        }
    }

    pub(crate) fn write_config(self, config: &mut BTreeMap<String, serde_json::Value>) {
        config.insert("policy".to_string(), self.name().into());
        if let ParallelPolicy::SuccessOnAll { synchronise } = self {
            config.insert("synchronise".to_string(), synchronise.into());
        }
    }
}

impl fmt::Display for ParallelPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ParallelPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "SuccessOnAll" | "success_on_all" | "SUCCESS_ON_ALL" => {
                Ok(ParallelPolicy::SuccessOnAll { synchronise: false })
            }
            "SuccessOnOne" | "success_on_one" | "SUCCESS_ON_ONE" => Ok(ParallelPolicy::SuccessOnOne),
            other => Err(format!("unknown parallel policy `{other}`")),
        }
    }
}

fn settled(status: Status) -> bool {
    status != Status::Running
}

pub(crate) fn tick_ordered(
    pass: Status,
    memory: bool,
    cursor: &mut usize,
    children: &mut [Node],
    current: &mut Option<usize>,
    ctx: &TickContext,
    bb: &mut Blackboard,
) -> Result<Status, TickError> {
    if memory {
        tick_committed(pass, cursor, children, current, ctx, bb)
    } else {
        tick_reactive(pass, children, current, ctx, bb)
    }
}

/// Resume from the cursor; children before it are not re-evaluated.
fn tick_committed(
    pass: Status,
    cursor: &mut usize,
    children: &mut [Node],
    current: &mut Option<usize>,
    ctx: &TickContext,
    bb: &mut Blackboard,
) -> Result<Status, TickError> {
    let len = children.len();
    while *cursor < len {
        let index = *cursor;
        let child = &mut children[index];
        let was_running = !settled(child.status());

        *current = Some(index);
        let status = child.tick(ctx, bb)?;
        if status == Status::Running {
            return Ok(Status::Running);
        }
        if status != pass {
            *cursor = 0;
            return Ok(status);
        }

        *cursor += 1;
        if *cursor == len {
            *cursor = 0;
            return Ok(pass);
        }
        if was_running {
            return Ok(Status::Running);
        }
    }

    *cursor = 0;
    Ok(pass)
}

/// Re-evaluate from the first child each tick. Children already holding the pass status from
/// earlier ticks of this run are skipped; a child going RUNNING halts any later sibling that
/// was running.
fn tick_reactive(
    pass: Status,
    children: &mut [Node],
    current: &mut Option<usize>,
    ctx: &TickContext,
    bb: &mut Blackboard,
) -> Result<Status, TickError> {
    let len = children.len();
    for index in 0..len {
        if children[index].status() == pass {
            continue;
        }
        let was_running = !settled(children[index].status());

        *current = Some(index);
        let status = children[index].tick(ctx, bb)?;
        if status == Status::Running {
            for later in children[index + 1..].iter_mut() {
                if later.status() == Status::Running {
                    later.stop();
                }
            }
            return Ok(Status::Running);
        }
        if status != pass {
            return Ok(status);
        }
        if index + 1 < len && was_running {
            return Ok(Status::Running);
        }
    }
    Ok(pass)
}

pub(crate) fn tick_parallel(
    policy: ParallelPolicy,
    children: &mut [Node],
    current: &mut Option<usize>,
    ctx: &TickContext,
    bb: &mut Blackboard,
) -> Result<Status, TickError> {
    let synchronise = matches!(policy, ParallelPolicy::SuccessOnAll { synchronise: true });
    for (index, child) in children.iter_mut().enumerate() {
        if synchronise && child.status() == Status::Success {
            continue;
        }
        *current = Some(index);
        child.tick(ctx, bb)?;
    }

    let any = |s: Status| children.iter().any(|c| c.status() == s);
    let all = |s: Status| children.iter().all(|c| c.status() == s);
    let status = match policy {
        ParallelPolicy::SuccessOnAll { .. } if any(Status::Failure) => Status::Failure,
        ParallelPolicy::SuccessOnAll { .. } if all(Status::Success) => Status::Success,
        ParallelPolicy::SuccessOnOne if any(Status::Success) => Status::Success,
        ParallelPolicy::SuccessOnOne if all(Status::Failure) => Status::Failure,
        _ => Status::Running,
    };
    Ok(status)
}

use std::sync::Arc;

use arbor_bt::BehaviorTree;
use arbor_core::{Blackboard, Clock, MonotonicClock, Status, TickContext, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::debug::{DebugSession, StepMode, WatchCondition};
use crate::error::{DebugError, Result};
use crate::observability::{EventBus, EventKind};
use crate::snapshot::ExecutionSnapshot;

/// Who is driving the ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    #[default]
    Manual,
    Auto,
    Interval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Ticked { tick: u64, status: Status },
    /// The debugger held the tick back.
    Paused,
}

/// One built tree with its own blackboard, counters and debug session.
#[derive(Debug)]
pub struct ExecutionInstance {
    id: String,
    tree: BehaviorTree,
    blackboard: Blackboard,
    tick_count: u64,
    mode: ExecutionMode,
    created_at: DateTime<Utc>,
    last_tick_at: Option<DateTime<Utc>>,
    clock: Arc<dyn Clock>,
    debug: DebugSession,
    events: EventBus,
}

impl ExecutionInstance {
    /// Seed a fresh blackboard from the tree's variable schema and attach the tree to it.
    pub fn new(id: impl Into<String>, mut tree: BehaviorTree, events: EventBus) -> Result<Self> {
        let id = id.into();
        let mut blackboard = Blackboard::with_schema(tree.blackboard_schema())?;
        tree.attach(&mut blackboard)?;

        Ok(Self {
            debug: DebugSession::new(id.clone(), events.clone()),
            id,
            tree,
            blackboard,
            tick_count: 0,
            mode: ExecutionMode::Manual,
            created_at: Utc::now(),
            last_tick_at: None,
            clock: Arc::new(MonotonicClock::new()),
            events,
        })
    }

    pub fn with_clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tree(&self) -> &BehaviorTree {
        &self.tree
    }

    pub fn status(&self) -> Status {
        self.tree.status()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub(crate) fn set_mode(&mut self, mode: ExecutionMode) {
        self.mode = mode;
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_tick_at(&self) -> Option<DateTime<Utc>> {
        self.last_tick_at
    }

    pub fn blackboard(&self) -> &Blackboard {
        &self.blackboard
    }

    pub fn blackboard_mut(&mut self) -> &mut Blackboard {
        &mut self.blackboard
    }

    pub fn debug(&self) -> &DebugSession {
        &self.debug
    }

    pub fn debug_mut(&mut self) -> &mut DebugSession {
        &mut self.debug
    }

    /// Evaluate the tree once, unless the debugger holds the tick back.
    ///
    /// A failed tick leaves the tick counter untouched and is returned to the caller.
    pub fn tick(&mut self) -> Result<TickOutcome> {
        if self.debug.before_tick(&self.blackboard) {
            return Ok(TickOutcome::Paused);
        }

        let ctx = TickContext::new(self.tick_count + 1, self.clock.elapsed());
        let status = self.tree.tick(&ctx, &mut self.blackboard)?;
        self.tick_count = ctx.tick;
        self.last_tick_at = Some(Utc::now());

        let tip = self.tree.tip().id().to_string();
        tracing::debug!(execution_id = %self.id, tick = ctx.tick, %status, tip = %tip, "tick completed");
        self.events.publish(
            &self.id,
            EventKind::TickCompleted {
                tick: ctx.tick,
                status,
                tip,
            },
        );

        self.debug.after_tick(&self.tree, &self.blackboard);
        Ok(TickOutcome::Ticked {
            tick: ctx.tick,
            status,
        })
    }

    /// Interrupt anything running and return every node to INVALID. The blackboard is kept.
    pub fn reset(&mut self) {
        self.tree.reset();
        tracing::debug!(execution_id = %self.id, "tree reset");
    }

    pub fn snapshot(&self) -> ExecutionSnapshot {
        ExecutionSnapshot::capture(self)
    }

    pub fn set_breakpoint(&mut self, node_id: &str, condition: Option<&str>) -> Result<(), DebugError> {
        if !self.tree.contains(node_id) {
            return Err(DebugError::UnknownNode(node_id.to_string()));
        }
        self.debug.set_breakpoint(node_id, condition)?;
        Ok(())
    }

    pub fn set_watch(
        &mut self,
        key: &str,
        condition: WatchCondition,
        target: Option<Value>,
    ) -> Result<(), DebugError> {
        self.debug.set_watch(key, condition, target)?;
        Ok(())
    }

    pub fn step(&mut self, mode: StepMode) {
        self.debug.step(mode);
    }

    pub fn pause(&mut self) {
        self.debug.pause();
    }

    pub fn resume(&mut self) {
        self.debug.resume();
    }
}

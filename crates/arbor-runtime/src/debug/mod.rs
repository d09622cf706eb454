//! Debug instrumentation - breakpoints, watches and stepping around the tick loop.
//!
//! A [`DebugSession`] belongs to one execution. The execution asks it whether to proceed
//! before every tick ([`DebugSession::before_tick`], which also checks watches) and reports
//! the finished tick to it ([`DebugSession::after_tick`], which checks the tip's breakpoint
//! and the step mode). Pausing only ever takes effect before the next tick starts.

mod breakpoint;
mod condition;
mod watch;

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use arbor_bt::BehaviorTree;
use arbor_core::{normalize_key, Blackboard, Status, Value};
use serde::{Deserialize, Serialize};

pub use breakpoint::Breakpoint;
pub use condition::Condition;
pub use watch::{Watch, WatchCondition};

use crate::error::DebugError;
use crate::observability::{EventBus, EventKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum StepMode {
    /// Break after `count` ticks.
    Over { count: u32 },
    /// Break on the first tick whose tip changes status.
    Into,
    /// Break after one tick.
    Out,
}

impl StepMode {
    pub fn name(self) -> &'static str {
        match self {
            StepMode::Over { .. } => "step_over",
            StepMode::Into => "step_into",
            StepMode::Out => "step_out",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PauseReason {
    Manual,
    Breakpoint { node_id: String },
    Watch { key: String },
    Step,
}

impl fmt::Display for PauseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PauseReason::Manual => f.write_str("manual"),
            PauseReason::Breakpoint { node_id } => write!(f, "breakpoint on `{node_id}`"),
            PauseReason::Watch { key } => write!(f, "watch on `{key}`"),
            PauseReason::Step => f.write_str("step completed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveStep {
    #[serde(flatten)]
    pub mode: StepMode,
    /// Ticks left before a step-over breaks.
    pub remaining: u32,
}

/// Point-in-time view of a debug session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugState {
    pub paused: bool,
    pub pause_reason: Option<PauseReason>,
    pub step: Option<ActiveStep>,
    pub breakpoints: Vec<Breakpoint>,
    pub watches: Vec<Watch>,
}

#[derive(Debug)]
pub struct DebugSession {
    execution_id: String,
    breakpoints: BTreeMap<String, Breakpoint>,
    watches: BTreeMap<String, Watch>,
    step: Option<ActiveStep>,
    paused: tokio::sync::watch::Sender<bool>,
    pause_reason: Option<PauseReason>,
    /// Status each node had the last time it was the tip.
    tip_history: HashMap<String, Status>,
    events: EventBus,
}

impl DebugSession {
    pub fn new(execution_id: impl Into<String>, events: EventBus) -> Self {
        let (paused, _) = tokio::sync::watch::channel(false);
        Self {
            execution_id: execution_id.into(),
            breakpoints: BTreeMap::new(),
            watches: BTreeMap::new(),
            step: None,
            paused,
            pause_reason: None,
            tip_history: HashMap::new(),
            events,
        }
    }

    /// Add or replace the breakpoint on `node_id`. Replacing resets its hit count.
    pub fn set_breakpoint(&mut self, node_id: &str, condition: Option<&str>) -> Result<&Breakpoint, DebugError> {
        let condition = condition
            .map(Condition::parse)
            .transpose()
            .map_err(|err| DebugError::InvalidCondition(err.to_string()))?;
        let breakpoint = Breakpoint::new(node_id, condition);
        tracing::debug!(execution_id = %self.execution_id, node_id, "breakpoint set");
        self.breakpoints.insert(node_id.to_string(), breakpoint);
        self.breakpoints
            .get(node_id)
            .ok_or_else(|| DebugError::BreakpointNotFound(node_id.to_string()))
    }

    pub fn remove_breakpoint(&mut self, node_id: &str) -> Result<Breakpoint, DebugError> {
        self.breakpoints
            .remove(node_id)
            .ok_or_else(|| DebugError::BreakpointNotFound(node_id.to_string()))
    }

    pub fn enable_breakpoint(&mut self, node_id: &str, enabled: bool) -> Result<(), DebugError> {
        let breakpoint = self
            .breakpoints
            .get_mut(node_id)
            .ok_or_else(|| DebugError::BreakpointNotFound(node_id.to_string()))?;
        breakpoint.enabled = enabled;
        Ok(())
    }

    pub fn breakpoint(&self, node_id: &str) -> Option<&Breakpoint> {
        self.breakpoints.get(node_id)
    }

    pub fn breakpoints(&self) -> impl Iterator<Item = &Breakpoint> {
        self.breakpoints.values()
    }

    /// Add or replace the watch on `key`. Every condition except `Change` needs a target.
    pub fn set_watch(
        &mut self,
        key: &str,
        condition: WatchCondition,
        target: Option<Value>,
    ) -> Result<&Watch, DebugError> {
        let key = normalize_key(key).map_err(|err| DebugError::InvalidCondition(err.to_string()))?;
        let target = match (condition, target) {
            (WatchCondition::Change, _) => None,
            (_, Some(target)) => Some(target),
            (condition, None) => {
                return Err(DebugError::InvalidCondition(format!(
                    "{condition} watch on `{key}` needs a target value"
                )))
            }
        };
        tracing::debug!(execution_id = %self.execution_id, key = %key, %condition, "watch set");
        self.watches
            .insert(key.clone(), Watch::new(key.clone(), condition, target));
        self.watches
            .get(&key)
            .ok_or(DebugError::WatchNotFound(key))
    }

    pub fn remove_watch(&mut self, key: &str) -> Result<Watch, DebugError> {
        let normalized = normalize_key(key).map_err(|_| DebugError::WatchNotFound(key.to_string()))?;
        self.watches
            .remove(&normalized)
            .ok_or(DebugError::WatchNotFound(normalized))
    }

    pub fn enable_watch(&mut self, key: &str, enabled: bool) -> Result<(), DebugError> {
        let normalized = normalize_key(key).map_err(|_| DebugError::WatchNotFound(key.to_string()))?;
        let watch = self
            .watches
            .get_mut(&normalized)
            .ok_or(DebugError::WatchNotFound(normalized))?;
        watch.enabled = enabled;
        Ok(())
    }

    pub fn watch(&self, key: &str) -> Option<&Watch> {
        self.watches.get(&normalize_key(key).ok()?)
    }

    pub fn watches(&self) -> impl Iterator<Item = &Watch> {
        self.watches.values()
    }

    /// Run until the step completes, then pause again.
    pub fn step(&mut self, mode: StepMode) {
        let remaining = match mode {
            StepMode::Over { count } => count.max(1),
            StepMode::Into | StepMode::Out => 1,
        };
        self.step = Some(ActiveStep { mode, remaining });
        self.pause_reason = None;
        self.paused.send_replace(false);
        tracing::debug!(execution_id = %self.execution_id, mode = mode.name(), "stepping");
    }

    pub fn pause(&mut self) {
        self.pause_with(PauseReason::Manual);
    }

    /// Clear the pause and any step in progress.
    pub fn resume(&mut self) {
        self.step = None;
        self.pause_reason = None;
        if self.paused.send_replace(false) {
            self.events.publish(&self.execution_id, EventKind::Resumed);
            tracing::info!(execution_id = %self.execution_id, "execution resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    pub fn pause_reason(&self) -> Option<&PauseReason> {
        self.pause_reason.as_ref()
    }

    pub fn step_mode(&self) -> Option<ActiveStep> {
        self.step
    }

    /// Receiver that sees every pause flag change.
    pub fn subscribe_pause(&self) -> tokio::sync::watch::Receiver<bool> {
        self.paused.subscribe()
    }

    pub fn state(&self) -> DebugState {
        DebugState {
            paused: self.is_paused(),
            pause_reason: self.pause_reason.clone(),
            step: self.step,
            breakpoints: self.breakpoints.values().cloned().collect(),
            watches: self.watches.values().cloned().collect(),
        }
    }

    /// Check watches against the blackboard. Returns `true` when the tick must not run.
    pub fn before_tick(&mut self, blackboard: &Blackboard) -> bool {
        if self.is_paused() {
            return true;
        }

        let mut first = None;
        for watch in self.watches.values_mut() {
            let current = blackboard.value(&watch.key);
            if !watch.check(current) {
                continue;
            }
            tracing::warn!(
                execution_id = %self.execution_id,
                key = %watch.key,
                condition = %watch.condition,
                hit_count = watch.hit_count,
                "watch triggered"
            );
            self.events.publish(
                &self.execution_id,
                EventKind::WatchTriggered {
                    key: watch.key.clone(),
                    condition: watch.condition.to_string(),
                    value: current.cloned(),
                    hit_count: watch.hit_count,
                },
            );
            first.get_or_insert_with(|| watch.key.clone());
        }

        match first {
            Some(key) => {
                self.pause_with(PauseReason::Watch { key });
                true
            }
            None => false,
        }
    }

    /// Inspect the finished tick: the tip's breakpoint first, then the step mode.
    pub fn after_tick(&mut self, tree: &BehaviorTree, blackboard: &Blackboard) {
        let tip = tree.tip();
        let tip_id = tip.id().to_string();
        let previous = self
            .tip_history
            .insert(tip_id.clone(), tip.status())
            .unwrap_or(Status::Invalid);

        if let Some(breakpoint) = self.breakpoints.get_mut(&tip_id) {
            if breakpoint.should_break(tip, blackboard) {
                let hit_count = breakpoint.hit_count;
                tracing::warn!(execution_id = %self.execution_id, node_id = %tip_id, hit_count, "breakpoint hit");
                self.events.publish(
                    &self.execution_id,
                    EventKind::BreakpointHit {
                        node_id: tip_id.clone(),
                        hit_count,
                    },
                );
                self.step = None;
                self.pause_with(PauseReason::Breakpoint { node_id: tip_id });
                return;
            }
        }

        let Some(step) = self.step.as_mut() else {
            return;
        };
        let done = match step.mode {
            StepMode::Over { .. } => {
                step.remaining = step.remaining.saturating_sub(1);
                step.remaining == 0
            }
            StepMode::Into => tip.status() != previous,
            StepMode::Out => true,
        };
        if done {
            let mode = step.mode;
            self.step = None;
            self.events.publish(
                &self.execution_id,
                EventKind::StepCompleted {
                    mode: mode.name().to_string(),
                },
            );
            self.pause_with(PauseReason::Step);
        }
    }

    fn pause_with(&mut self, reason: PauseReason) {
        tracing::info!(execution_id = %self.execution_id, %reason, "execution paused");
        self.events.publish(
            &self.execution_id,
            EventKind::Paused {
                reason: reason.to_string(),
            },
        );
        self.pause_reason = Some(reason);
        self.paused.send_replace(true);
    }
}

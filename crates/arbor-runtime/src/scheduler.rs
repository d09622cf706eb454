//! Scheduler - drives one execution's tick loop as an independent tokio task.
//!
//! ```text
//! IDLE -> RUNNING <-> PAUSED -> STOPPED
//!            \-> ERROR (tick failure or panic)
//! ```
//!
//! Operator commands and the loop task share a per-execution context behind a mutex, so
//! transitions never race. The loop only observes cancellation and pause at its checkpoints:
//! before waiting, after acquiring the instance and between ticks. A tick in progress is
//! never interrupted.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::SchedulerError;
use crate::execution::{ExecutionInstance, ExecutionMode, TickOutcome};
use crate::observability::{EventBus, EventKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchedulerState {
    #[default]
    Idle,
    Running,
    Paused,
    Stopped,
    Error,
}

impl SchedulerState {
    pub fn as_str(self) -> &'static str {
        match self {
            SchedulerState::Idle => "IDLE",
            SchedulerState::Running => "RUNNING",
            SchedulerState::Paused => "PAUSED",
            SchedulerState::Stopped => "STOPPED",
            SchedulerState::Error => "ERROR",
        }
    }

    /// Whether a loop task is live in this state.
    pub fn is_active(self) -> bool {
        matches!(self, SchedulerState::Running | SchedulerState::Paused)
    }
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerMode {
    /// Back-to-back ticks with a yield in between.
    #[default]
    Auto,
    /// One tick per period.
    Interval,
}

impl SchedulerMode {
    fn execution_mode(self) -> ExecutionMode {
        match self {
            SchedulerMode::Auto => ExecutionMode::Auto,
            SchedulerMode::Interval => ExecutionMode::Interval,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartOptions {
    pub mode: SchedulerMode,
    /// Tick period in interval mode.
    pub interval: Duration,
    pub max_ticks: Option<u64>,
    pub stop_on_terminal: bool,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            mode: SchedulerMode::Auto,
            interval: Duration::from_millis(100),
            max_ticks: None,
            stop_on_terminal: true,
        }
    }
}

impl StartOptions {
    pub fn auto() -> Self {
        Self::default()
    }

    pub fn interval(period: Duration) -> Self {
        Self {
            mode: SchedulerMode::Interval,
            interval: period,
            ..Self::default()
        }
    }

    pub fn with_max_ticks(mut self, max_ticks: u64) -> Self {
        self.max_ticks = Some(max_ticks);
        self
    }

    pub fn with_stop_on_terminal(mut self, stop_on_terminal: bool) -> Self {
        self.stop_on_terminal = stop_on_terminal;
        self
    }
}

/// Scheduler status for polling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub execution_id: String,
    pub state: SchedulerState,
    pub options: Option<StartOptions>,
    pub ticks_executed: u64,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct SchedulerContext {
    state: SchedulerState,
    /// Bumped on every start so a finishing loop cannot touch a newer run.
    generation: u64,
    options: Option<StartOptions>,
    ticks_executed: u64,
    error: Option<String>,
    started_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
    cancel: CancellationToken,
    pause: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

pub struct Scheduler {
    execution_id: String,
    instance: Arc<tokio::sync::Mutex<ExecutionInstance>>,
    context: Arc<Mutex<SchedulerContext>>,
    events: EventBus,
}

impl Scheduler {
    pub fn new(
        execution_id: impl Into<String>,
        instance: Arc<tokio::sync::Mutex<ExecutionInstance>>,
        events: EventBus,
    ) -> Self {
        let (pause, _) = watch::channel(false);
        Self {
            execution_id: execution_id.into(),
            instance,
            context: Arc::new(Mutex::new(SchedulerContext {
                state: SchedulerState::Idle,
                generation: 0,
                options: None,
                ticks_executed: 0,
                error: None,
                started_at: None,
                stopped_at: None,
                cancel: CancellationToken::new(),
                pause,
                task: None,
            })),
            events,
        }
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Spawn the tick loop on the current tokio runtime.
    pub fn start(&self, options: StartOptions) -> Result<(), SchedulerError> {
        if options.mode == SchedulerMode::Interval && options.interval.is_zero() {
            return Err(SchedulerError::ZeroInterval);
        }
        let handle = Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;

        let mut ctx = self.context.lock();
        if ctx.state.is_active() {
            return Err(SchedulerError::InvalidTransition {
                current: ctx.state,
                requested: "start",
            });
        }

        let from = ctx.state;
        ctx.generation += 1;
        ctx.state = SchedulerState::Running;
        ctx.options = Some(options);
        ctx.ticks_executed = 0;
        ctx.error = None;
        ctx.started_at = Some(Utc::now());
        ctx.stopped_at = None;
        ctx.cancel = CancellationToken::new();
        ctx.pause.send_replace(false);

        let run = LoopRun {
            generation: ctx.generation,
            execution_id: self.execution_id.clone(),
            instance: Arc::clone(&self.instance),
            context: Arc::clone(&self.context),
            events: self.events.clone(),
            options,
            cancel: ctx.cancel.clone(),
            pause: ctx.pause.subscribe(),
        };
        ctx.task = Some(handle.spawn(run.run()));
        drop(ctx);

        tracing::info!(
            execution_id = %self.execution_id,
            mode = ?options.mode,
            interval_ms = options.interval.as_millis() as u64,
            max_ticks = ?options.max_ticks,
            "scheduler started"
        );
        self.publish_transition(from, SchedulerState::Running);
        Ok(())
    }

    pub fn pause(&self) -> Result<(), SchedulerError> {
        self.transition("pause", SchedulerState::Running, SchedulerState::Paused, true)
    }

    pub fn resume(&self) -> Result<(), SchedulerError> {
        self.transition("resume", SchedulerState::Paused, SchedulerState::Running, false)
    }

    /// Request the loop to end at its next checkpoint. Safe to call in any state, any number
    /// of times; an ERROR state and its message are kept.
    pub fn stop(&self) {
        let mut ctx = self.context.lock();
        ctx.cancel.cancel();
        let from = ctx.state;
        if matches!(from, SchedulerState::Stopped | SchedulerState::Error) {
            return;
        }
        ctx.state = SchedulerState::Stopped;
        ctx.stopped_at = Some(Utc::now());
        drop(ctx);

        tracing::info!(execution_id = %self.execution_id, "scheduler stopped");
        self.publish_transition(from, SchedulerState::Stopped);
    }

    /// Wait for the current loop task, if any, to finish.
    pub async fn wait(&self) {
        let task = self.context.lock().task.take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                tracing::warn!(execution_id = %self.execution_id, error = %err, "scheduler task failed");
            }
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.context.lock().state
    }

    pub fn status(&self) -> SchedulerStatus {
        let ctx = self.context.lock();
        SchedulerStatus {
            execution_id: self.execution_id.clone(),
            state: ctx.state,
            options: ctx.options,
            ticks_executed: ctx.ticks_executed,
            error: ctx.error.clone(),
            started_at: ctx.started_at,
            stopped_at: ctx.stopped_at,
        }
    }

    fn transition(
        &self,
        requested: &'static str,
        from: SchedulerState,
        to: SchedulerState,
        paused: bool,
    ) -> Result<(), SchedulerError> {
        let mut ctx = self.context.lock();
        if ctx.state != from {
            return Err(SchedulerError::InvalidTransition {
                current: ctx.state,
                requested,
            });
        }
        ctx.state = to;
        ctx.pause.send_replace(paused);
        drop(ctx);

        tracing::info!(execution_id = %self.execution_id, %from, %to, "scheduler {requested}");
        self.publish_transition(from, to);
        Ok(())
    }

    fn publish_transition(&self, from: SchedulerState, to: SchedulerState) {
        self.events
            .publish(&self.execution_id, EventKind::SchedulerStateChanged { from, to });
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("execution_id", &self.execution_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Everything one run of the loop task owns.
struct LoopRun {
    generation: u64,
    execution_id: String,
    instance: Arc<tokio::sync::Mutex<ExecutionInstance>>,
    context: Arc<Mutex<SchedulerContext>>,
    events: EventBus,
    options: StartOptions,
    cancel: CancellationToken,
    pause: watch::Receiver<bool>,
}

enum Exit {
    Cancelled,
    Finished(&'static str),
    Failed(String),
}

impl LoopRun {
    async fn run(mut self) {
        self.instance
            .lock()
            .await
            .set_mode(self.options.mode.execution_mode());

        let exit = self.drive().await;
        match exit {
            Exit::Cancelled => {
                tracing::debug!(execution_id = %self.execution_id, "scheduler loop cancelled");
            }
            Exit::Finished(reason) => {
                tracing::info!(execution_id = %self.execution_id, reason, "scheduler loop finished");
                self.finish(SchedulerState::Stopped, None);
            }
            Exit::Failed(message) => {
                tracing::warn!(execution_id = %self.execution_id, error = %message, "tick failed");
                self.finish(SchedulerState::Error, Some(message));
            }
        }
    }

    async fn drive(&mut self) -> Exit {
        let mut interval = (self.options.mode == SchedulerMode::Interval).then(|| {
            let mut interval = tokio::time::interval(self.options.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            if self.cancel.is_cancelled() {
                return Exit::Cancelled;
            }
            if self.budget_spent() {
                return Exit::Finished("max ticks reached");
            }

            if *self.pause.borrow_and_update() {
                tokio::select! {
                    _ = self.cancel.cancelled() => return Exit::Cancelled,
                    changed = self.pause.changed() => {
                        if changed.is_err() {
                            return Exit::Cancelled;
                        }
                    }
                }
                continue;
            }

            if let Some(interval) = interval.as_mut() {
                tokio::select! {
                    _ = self.cancel.cancelled() => return Exit::Cancelled,
                    _ = interval.tick() => {}
                }
            }

            let mut instance = self.instance.lock().await;
            if self.cancel.is_cancelled() {
                return Exit::Cancelled;
            }
            if *self.pause.borrow() {
                continue;
            }
            if instance.debug().is_paused() {
                let mut debug_paused = instance.debug().subscribe_pause();
                drop(instance);
                tokio::select! {
                    _ = self.cancel.cancelled() => return Exit::Cancelled,
                    changed = debug_paused.changed() => {
                        if changed.is_err() {
                            return Exit::Cancelled;
                        }
                    }
                }
                continue;
            }

            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| instance.tick()));
            drop(instance);

            let status = match outcome {
                Ok(Ok(TickOutcome::Ticked { status, .. })) => status,
                Ok(Ok(TickOutcome::Paused)) => continue,
                Ok(Err(err)) => return Exit::Failed(err.to_string()),
                Err(panic) => return Exit::Failed(panic_message(panic.as_ref())),
            };

            {
                let mut ctx = self.context.lock();
                if ctx.generation != self.generation {
                    return Exit::Cancelled;
                }
                ctx.ticks_executed += 1;
            }

            if self.options.stop_on_terminal && status.is_terminal() {
                return Exit::Finished("root reached a terminal status");
            }

            if self.options.mode == SchedulerMode::Auto {
                tokio::task::yield_now().await;
            }
        }
    }

    fn budget_spent(&self) -> bool {
        let Some(max_ticks) = self.options.max_ticks else {
            return false;
        };
        self.context.lock().ticks_executed >= max_ticks
    }

    /// Record how the loop ended, unless an operator already stopped it or a newer run exists.
    fn finish(&self, to: SchedulerState, error: Option<String>) {
        let mut ctx = self.context.lock();
        if ctx.generation != self.generation || !ctx.state.is_active() {
            return;
        }
        let from = ctx.state;
        ctx.state = to;
        ctx.error = error.clone();
        ctx.stopped_at = Some(Utc::now());
        drop(ctx);

        self.events
            .publish(&self.execution_id, EventKind::SchedulerStateChanged { from, to });
        if let Some(message) = error {
            self.events
                .publish(&self.execution_id, EventKind::ExecutionError { message });
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("tick panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("tick panicked: {message}")
    } else {
        "tick panicked".to_string()
    }
}

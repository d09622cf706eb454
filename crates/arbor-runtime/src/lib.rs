//! Arbor Runtime - execution control plane for behavior trees.
//!
//! This crate owns everything around a built tree: the per-execution
//! instance and blackboard, the autonomous scheduler, the debugger
//! (breakpoints, watches, stepping) and the event bus observers listen on.

#![forbid(unsafe_code)]

pub mod config;
pub mod debug;
pub mod error;
pub mod execution;
pub mod manager;
pub mod observability;
pub mod scheduler;
pub mod snapshot;

pub use config::RuntimeConfig;
pub use debug::{Breakpoint, Condition, DebugSession, DebugState, PauseReason, StepMode, Watch, WatchCondition};
pub use error::{DebugError, RuntimeError, SchedulerError};
pub use execution::{ExecutionInstance, ExecutionMode, TickOutcome};
pub use manager::{ExecutionHandle, ExecutionManager};
pub use observability::{EventBus, EventKind, EventLog, ExecutionEvent};
pub use scheduler::{Scheduler, SchedulerMode, SchedulerState, SchedulerStatus, StartOptions};
pub use snapshot::{ExecutionSnapshot, NodeState};

use arbor_bt::{BuildError, TickError};
use arbor_core::BlackboardError;
use thiserror::Error;

use crate::scheduler::SchedulerState;

/// An operator command that the scheduler's current state does not allow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("cannot {requested} while the scheduler is {current}")]
    InvalidTransition {
        current: SchedulerState,
        requested: &'static str,
    },

    #[error("interval mode needs a non-zero interval")]
    ZeroInterval,

    #[error("the scheduler must be started from within a tokio runtime")]
    NoRuntime,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DebugError {
    #[error("no breakpoint on node `{0}`")]
    BreakpointNotFound(String),

    #[error("no watch on blackboard key `{0}`")]
    WatchNotFound(String),

    #[error("node `{0}` is not part of this tree")]
    UnknownNode(String),

    #[error("invalid condition: {0}")]
    InvalidCondition(String),
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Blackboard(#[from] BlackboardError),

    #[error(transparent)]
    Tick(#[from] TickError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Debug(#[from] DebugError),

    #[error("execution `{0}` not found")]
    NotFound(String),

    #[error("execution `{execution_id}` is being ticked by its scheduler; pause or stop it first")]
    SchedulerActive { execution_id: String },
}

pub type Result<T, E = RuntimeError> = std::result::Result<T, E>;

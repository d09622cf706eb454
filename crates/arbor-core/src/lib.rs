//! Deterministic, engine-agnostic primitives shared by the arbor crates.
//!
//! Everything here is synchronous and allocation-light: statuses, blackboard
//! values, the access-controlled blackboard itself and the per-tick context.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![forbid(unsafe_code)]

pub mod blackboard;
pub mod comparison;
pub mod status;
pub mod tick;
pub mod value;

pub use blackboard::{
    normalize_key, Access, Blackboard, BlackboardClient, BlackboardError, ClientToken,
    KeyAccessInfo, VariableSchema, VariableType,
};
pub use comparison::{Comparison, ConditionError};
pub use status::Status;
pub use tick::{Clock, ManualClock, MonotonicClock, TickContext};
pub use value::{Operator, Value, ValueError};

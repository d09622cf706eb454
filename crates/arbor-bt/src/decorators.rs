//! Single-child decorators.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use arbor_core::{Access, Blackboard, ClientToken, Comparison, ConditionError, Status, TickContext};
use serde::{Deserialize, Serialize};

use crate::error::TickError;
use crate::node::Node;

/// Fixed status remapping, e.g. `FailureIsSuccess`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusConversion {
    SuccessIsFailure,
    FailureIsSuccess,
    FailureIsRunning,
    RunningIsFailure,
    RunningIsSuccess,
    SuccessIsRunning,
}

impl StatusConversion {
    pub const ALL: [StatusConversion; 6] = [
        StatusConversion::SuccessIsFailure,
        StatusConversion::FailureIsSuccess,
        StatusConversion::FailureIsRunning,
        StatusConversion::RunningIsFailure,
        StatusConversion::RunningIsSuccess,
        StatusConversion::SuccessIsRunning,
    ];

    pub fn type_name(self) -> &'static str {
        match self {
            StatusConversion::SuccessIsFailure => "SuccessIsFailure",
            StatusConversion::FailureIsSuccess => "FailureIsSuccess",
            StatusConversion::FailureIsRunning => "FailureIsRunning",
            StatusConversion::RunningIsFailure => "RunningIsFailure",
            StatusConversion::RunningIsSuccess => "RunningIsSuccess",
            StatusConversion::SuccessIsRunning => "SuccessIsRunning",
        }
    }

    fn mapping(self) -> (Status, Status) {
        match self {
            StatusConversion::SuccessIsFailure => (Status::Success, Status::Failure),
            StatusConversion::FailureIsSuccess => (Status::Failure, Status::Success),
            StatusConversion::FailureIsRunning => (Status::Failure, Status::Running),
            StatusConversion::RunningIsFailure => (Status::Running, Status::Failure),
            StatusConversion::RunningIsSuccess => (Status::Running, Status::Success),
            StatusConversion::SuccessIsRunning => (Status::Success, Status::Running),
        }
    }

    pub fn apply(self, status: Status) -> Status {
        let (from, to) = self.mapping();
        if status == from {
            to
        } else {
            status
        }
    }
}

impl fmt::Display for StatusConversion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OneShotPolicy {
    /// Latch the first SUCCESS or FAILURE.
    #[default]
    OnCompletion,
    /// Latch only a SUCCESS; failures are retried on the next activation.
    OnSuccessfulCompletion,
}

impl OneShotPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            OneShotPolicy::OnCompletion => "ON_COMPLETION",
            OneShotPolicy::OnSuccessfulCompletion => "ON_SUCCESSFUL_COMPLETION",
        }
    }

    pub fn parse(s: &str) -> Result<Self, String> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ON_COMPLETION" => Ok(OneShotPolicy::OnCompletion),
            "ON_SUCCESSFUL_COMPLETION" => Ok(OneShotPolicy::OnSuccessfulCompletion),
            other => Err(format!("unknown one-shot policy `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decorator {
    Inverter,
    Convert(StatusConversion),
    /// FAILURE once the child has been RUNNING for `duration`.
    Timeout {
        duration: Duration,
        started: Option<Duration>,
    },
    /// Restart a failing child up to `num_failures` times.
    Retry { num_failures: u32, failures: u32 },
    /// Restart a succeeding child until it has succeeded `num_success` times. `None` repeats
    /// forever.
    Repeat {
        num_success: Option<u32>,
        successes: u32,
    },
    /// Run the child to completion once, then keep returning the latched result.
    OneShot {
        policy: OneShotPolicy,
        latched: Option<Status>,
    },
    /// Tick the child only while the comparison holds.
    Guard { comparison: Comparison },
}

impl Decorator {
    pub fn timeout(duration: Duration) -> Self {
        Decorator::Timeout {
            duration,
            started: None,
        }
    }

    pub fn retry(num_failures: u32) -> Self {
        Decorator::Retry {
            num_failures,
            failures: 0,
        }
    }

    pub fn repeat(num_success: Option<u32>) -> Self {
        Decorator::Repeat {
            num_success,
            successes: 0,
        }
    }

    pub fn one_shot(policy: OneShotPolicy) -> Self {
        Decorator::OneShot {
            policy,
            latched: None,
        }
    }

    pub fn guard(comparison: Comparison) -> Self {
        Decorator::Guard { comparison }
    }

    pub(crate) fn initialise(&mut self) {
        match self {
            Decorator::Timeout { started, .. } => *started = None,
            Decorator::Retry { failures, .. } => *failures = 0,
            Decorator::Repeat { successes, .. } => *successes = 0,
            _ => {}
        }
    }

    pub(crate) fn clear_timer(&mut self) {
        if let Decorator::Timeout { started, .. } = self {
            *started = None;
        }
    }

    pub(crate) fn blackboard_keys(&self) -> Vec<(String, Access)> {
        match self {
            Decorator::Guard { comparison } => vec![(comparison.key.clone(), Access::Read)],
            _ => Vec::new(),
        }
    }

    pub(crate) fn update(
        &mut self,
        node_id: &str,
        child: &mut Node,
        current_child: &mut Option<usize>,
        feedback: &mut String,
        client: Option<&ClientToken>,
        ctx: &TickContext,
        bb: &mut Blackboard,
    ) -> Result<Status, TickError> {
        match self {
            Decorator::Inverter => Ok(match tick_child(child, current_child, ctx, bb)? {
                Status::Success => Status::Failure,
                Status::Failure => Status::Success,
                other => other,
            }),
            Decorator::Convert(conversion) => {
                Ok(conversion.apply(tick_child(child, current_child, ctx, bb)?))
            }
            Decorator::Timeout { duration, started } => {
                let status = tick_child(child, current_child, ctx, bb)?;
                if status != Status::Running {
                    *started = None;
                    return Ok(status);
                }
                let since = *started.get_or_insert(ctx.elapsed);
                let running_for = ctx.elapsed.saturating_sub(since);
                if running_for >= *duration {
                    child.stop();
                    *started = None;
                    *feedback = format!("timed out after {:.3}s", duration.as_secs_f64());
                    return Ok(Status::Failure);
                }
                *feedback = format!(
                    "{:.3}s remaining",
                    duration.saturating_sub(running_for).as_secs_f64()
                );
                Ok(Status::Running)
            }
            Decorator::Retry {
                num_failures,
                failures,
            } => match tick_child(child, current_child, ctx, bb)? {
                Status::Failure => {
                    *failures += 1;
                    if *failures > *num_failures {
                        *feedback = format!("gave up after {num_failures} retries");
                        Ok(Status::Failure)
                    } else {
                        child.stop();
                        *feedback = format!("retry {failures}/{num_failures}");
                        Ok(Status::Running)
                    }
                }
                other => Ok(other),
            },
            Decorator::Repeat {
                num_success,
                successes,
            } => match tick_child(child, current_child, ctx, bb)? {
                Status::Success => {
                    *successes += 1;
                    if num_success.is_some_and(|n| *successes >= n) {
                        Ok(Status::Success)
                    } else {
                        child.stop();
                        *feedback = match num_success {
                            Some(n) => format!("{successes}/{n} successes"),
                            None => format!("{successes} successes"),
                        };
                        Ok(Status::Running)
                    }
                }
                other => Ok(other),
            },
            Decorator::OneShot { policy, latched } => {
                if let Some(status) = latched {
                    return Ok(*status);
                }
                let status = tick_child(child, current_child, ctx, bb)?;
                let latch = match policy {
                    OneShotPolicy::OnCompletion => status.is_terminal(),
                    OneShotPolicy::OnSuccessfulCompletion => status == Status::Success,
                };
                if latch {
                    *latched = Some(status);
                }
                Ok(status)
            }
            Decorator::Guard { comparison } => {
                let token = client.ok_or_else(|| TickError::Detached {
                    node_id: node_id.to_string(),
                })?;
                let blocked = match comparison.evaluate(bb, token) {
                    Ok(true) => return tick_child(child, current_child, ctx, bb),
                    Ok(false) => format!(
                        "guard `{} {} {}` is false",
                        comparison.key, comparison.operator, comparison.value
                    ),
                    Err(ConditionError::Blackboard(source)) => {
                        return Err(TickError::Blackboard {
                            node_id: node_id.to_string(),
                            source,
                        })
                    }
                    Err(err) => format!("guard could not be evaluated: {err}"),
                };
                if child.status() == Status::Running {
                    child.stop();
                }
                *feedback = blocked;
                Ok(Status::Failure)
            }
        }
    }

    pub(crate) fn write_config(&self, config: &mut BTreeMap<String, serde_json::Value>) {
        match self {
            Decorator::Inverter | Decorator::Convert(_) => {}
            Decorator::Timeout { duration, .. } => {
                config.insert("duration".into(), duration.as_secs_f64().into());
            }
            Decorator::Retry { num_failures, .. } => {
                config.insert("num_failures".into(), (*num_failures).into());
            }
            Decorator::Repeat { num_success, .. } => {
                let n = num_success.map(i64::from).unwrap_or(-1);
                config.insert("num_success".into(), n.into());
            }
            Decorator::OneShot { policy, .. } => {
                config.insert("policy".into(), policy.as_str().into());
            }
            Decorator::Guard { comparison } => {
                config.insert("key".into(), comparison.key.clone().into());
                config.insert("operator".into(), comparison.operator.symbol().into());
                config.insert("value".into(), comparison.value.to_json());
            }
        }
    }
}

/// Tick the decorated child and record it as the branch this tick went down.
fn tick_child(
    child: &mut Node,
    current_child: &mut Option<usize>,
    ctx: &TickContext,
    bb: &mut Blackboard,
) -> Result<Status, TickError> {
    *current_child = Some(0);
    child.tick(ctx, bb)
}

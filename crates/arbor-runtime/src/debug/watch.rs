use std::fmt;
use std::str::FromStr;

use arbor_core::{Operator, Value};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WatchCondition {
    /// Any change from the previously observed value.
    Change,
    Equals,
    NotEquals,
    Greater,
    Less,
    GreaterEqual,
    LessEqual,
}

impl WatchCondition {
    pub fn as_str(self) -> &'static str {
        match self {
            WatchCondition::Change => "CHANGE",
            WatchCondition::Equals => "EQUALS",
            WatchCondition::NotEquals => "NOT_EQUALS",
            WatchCondition::Greater => "GREATER",
            WatchCondition::Less => "LESS",
            WatchCondition::GreaterEqual => "GREATER_EQUAL",
            WatchCondition::LessEqual => "LESS_EQUAL",
        }
    }

    /// Comparison against the target, `None` for `Change`.
    pub fn operator(self) -> Option<Operator> {
        match self {
            WatchCondition::Change => None,
            WatchCondition::Equals => Some(Operator::Eq),
            WatchCondition::NotEquals => Some(Operator::Ne),
            WatchCondition::Greater => Some(Operator::Gt),
            WatchCondition::Less => Some(Operator::Lt),
            WatchCondition::GreaterEqual => Some(Operator::Ge),
            WatchCondition::LessEqual => Some(Operator::Le),
        }
    }
}

impl fmt::Display for WatchCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WatchCondition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "CHANGE" => Ok(WatchCondition::Change),
            "EQUALS" | "==" => Ok(WatchCondition::Equals),
            "NOT_EQUALS" | "!=" => Ok(WatchCondition::NotEquals),
            "GREATER" | ">" => Ok(WatchCondition::Greater),
            "LESS" | "<" => Ok(WatchCondition::Less),
            "GREATER_EQUAL" | ">=" => Ok(WatchCondition::GreaterEqual),
            "LESS_EQUAL" | "<=" => Ok(WatchCondition::LessEqual),
            other => Err(format!("unknown watch condition `{other}`")),
        }
    }
}

/// Pause trigger on a blackboard key, checked before every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Watch {
    pub key: String,
    pub enabled: bool,
    pub condition: WatchCondition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Value>,
    #[serde(default)]
    pub hit_count: u64,
    #[serde(default)]
    pub last_observed: Option<Value>,
    #[serde(skip)]
    observed: bool,
    #[serde(skip)]
    holding: bool,
}

impl Watch {
    pub fn new(key: impl Into<String>, condition: WatchCondition, target: Option<Value>) -> Self {
        Self {
            key: key.into(),
            enabled: true,
            condition,
            target,
            hit_count: 0,
            last_observed: None,
            observed: false,
            holding: false,
        }
    }

    /// Observe the current value of the key and report whether the watch fires.
    ///
    /// `Change` fires when the value differs from the previous observation, never on the first.
    /// Comparisons fire when they start to hold, so a resumed execution is not re-paused by
    /// the same condition. A missing key never satisfies a comparison; values that cannot be
    /// ordered against the target do.
    pub(crate) fn check(&mut self, current: Option<&Value>) -> bool {
        let fired = match self.condition.operator() {
            None => self.observed && current != self.last_observed.as_ref(),
            Some(op) => {
                let holds = match (current, &self.target) {
                    (Some(value), Some(target)) => value.compare(op, target).unwrap_or(true),
                    _ => false,
                };
                let rising = holds && !self.holding;
                self.holding = holds;
                rising
            }
        };

        self.observed = true;
        self.last_observed = current.cloned();

        if fired && self.enabled {
            self.hit_count += 1;
            return true;
        }
        false
    }
}

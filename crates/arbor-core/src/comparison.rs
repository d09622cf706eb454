use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Blackboard, BlackboardError, ClientToken, Operator, Value, ValueError};

/// Why a condition could not be evaluated.
///
/// Callers decide what an error means; guards fail and breakpoints break.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConditionError {
    #[error("blackboard key `{0}` is not set")]
    MissingKey(String),

    #[error(transparent)]
    Blackboard(#[from] BlackboardError),

    #[error(transparent)]
    Value(#[from] ValueError),

    #[error("malformed condition: {0}")]
    Malformed(String),
}

/// `blackboard[key] <operator> value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub key: String,
    pub operator: Operator,
    pub value: Value,
}

impl Comparison {
    pub fn new(key: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn evaluate(&self, blackboard: &Blackboard, token: &ClientToken) -> Result<bool, ConditionError> {
        let current = blackboard
            .get(token, &self.key)?
            .ok_or_else(|| ConditionError::MissingKey(self.key.clone()))?;
        Ok(current.compare(self.operator, &self.value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Access;

    #[test]
    fn missing_key_is_an_error_not_false() {
        let mut bb = Blackboard::new();
        let token = bb.register_client("guard");
        bb.register_key(&token, "battery", Access::Read).unwrap();

        let cmp = Comparison::new("battery", Operator::Gt, 20);
        assert_eq!(
            cmp.evaluate(&bb, &token),
            Err(ConditionError::MissingKey("battery".into()))
        );

        bb.write("battery", Value::Int(50)).unwrap();
        assert_eq!(cmp.evaluate(&bb, &token), Ok(true));
    }

    #[test]
    fn unregistered_key_is_denied() {
        let mut bb = Blackboard::new();
        let token = bb.register_client("guard");
        bb.write("/door", Value::Bool(true)).unwrap();

        let cmp = Comparison::new("door", Operator::Eq, true);
        assert!(matches!(
            cmp.evaluate(&bb, &token),
            Err(ConditionError::Blackboard(BlackboardError::AccessDenied { .. }))
        ));
    }
}

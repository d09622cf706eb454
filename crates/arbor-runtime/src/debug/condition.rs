//! Breakpoint conditions.
//!
//! A condition is one or more clauses `<operand> <op> <literal>` joined by `&&` and `||`,
//! where `&&` binds tighter:
//!
//! ```text
//! status == RUNNING && bb.battery < 20 || node.name == "Dock"
//! ```
//!
//! Operands are `status`/`node.status`, `node.name`, `node.id`, `node.type`, `node.feedback`
//! and `bb.<key>`/`blackboard.<key>`. Literals are numbers, quoted strings, `true`/`false`
//! and bare status names.

use std::fmt;
use std::str::FromStr;

use arbor_bt::Node;
use arbor_core::{normalize_key, Blackboard, ConditionError, Operator, Status, Value};
use serde::{Deserialize, Serialize};

/// Operators in match order: two-character symbols first.
const OPERATORS: [(&str, Operator); 6] = [
    ("<=", Operator::Le),
    (">=", Operator::Ge),
    ("==", Operator::Eq),
    ("!=", Operator::Ne),
    ("<", Operator::Lt),
    (">", Operator::Gt),
];

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Status,
    NodeName,
    NodeId,
    NodeType,
    NodeFeedback,
    Blackboard(String),
}

impl Operand {
    fn parse(raw: &str) -> Result<Self, ConditionError> {
        let operand = match raw {
            "status" | "node.status" => Operand::Status,
            "node.name" => Operand::NodeName,
            "node.id" => Operand::NodeId,
            "node.type" => Operand::NodeType,
            "node.feedback" => Operand::NodeFeedback,
            other => {
                let key = other
                    .strip_prefix("bb.")
                    .or_else(|| other.strip_prefix("blackboard."))
                    .ok_or_else(|| ConditionError::Malformed(format!("unknown operand `{other}`")))?;
                Operand::Blackboard(normalize_key(key)?)
            }
        };
        Ok(operand)
    }

    fn resolve(&self, node: &Node, blackboard: &Blackboard) -> Result<Value, ConditionError> {
        Ok(match self {
            Operand::Status => Value::from(node.status().as_str()),
            Operand::NodeName => Value::from(node.name()),
            Operand::NodeId => Value::from(node.id()),
            Operand::NodeType => Value::from(node.node_type()),
            Operand::NodeFeedback => Value::from(node.feedback()),
            Operand::Blackboard(key) => blackboard
                .value(key)
                .cloned()
                .ok_or_else(|| ConditionError::MissingKey(key.clone()))?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Clause {
    operand: Operand,
    operator: Operator,
    literal: Value,
}

impl Clause {
    fn parse(raw: &str) -> Result<Self, ConditionError> {
        let (at, symbol, operator) = find_operator(raw)
            .ok_or_else(|| ConditionError::Malformed(format!("no comparison operator in `{raw}`")))?;
        let operand = Operand::parse(raw[..at].trim())?;
        let literal = parse_literal(raw[at + symbol.len()..].trim())?;

        if operand == Operand::Status && !matches!(operator, Operator::Eq | Operator::Ne) {
            return Err(ConditionError::Malformed(format!(
                "status only supports `==` and `!=`, not `{operator}`"
            )));
        }
        Ok(Self {
            operand,
            operator,
            literal,
        })
    }

    fn evaluate(&self, node: &Node, blackboard: &Blackboard) -> Result<bool, ConditionError> {
        let current = self.operand.resolve(node, blackboard)?;
        Ok(current.compare(self.operator, &self.literal)?)
    }
}

/// A parsed breakpoint condition. Serializes as its source text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Condition {
    source: String,
    /// Disjunction of conjunctions.
    any: Vec<Vec<Clause>>,
}

impl Condition {
    pub fn parse(source: &str) -> Result<Self, ConditionError> {
        let source = source.trim();
        if source.is_empty() {
            return Err(ConditionError::Malformed("empty condition".into()));
        }

        let mut any = Vec::new();
        for alternative in split_outside_quotes(source, "||") {
            let all = split_outside_quotes(alternative, "&&")
                .into_iter()
                .map(Clause::parse)
                .collect::<Result<Vec<_>, _>>()?;
            any.push(all);
        }
        Ok(Self {
            source: source.to_string(),
            any,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Evaluate against a node and the blackboard. Errors are returned, not folded into
    /// `false`; clauses after a decided alternative are not evaluated.
    pub fn evaluate(&self, node: &Node, blackboard: &Blackboard) -> Result<bool, ConditionError> {
        for all in &self.any {
            let mut holds = true;
            for clause in all {
                if !clause.evaluate(node, blackboard)? {
                    holds = false;
                    break;
                }
            }
            if holds {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl FromStr for Condition {
    type Err = ConditionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Condition {
    type Error = ConditionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Condition> for String {
    fn from(condition: Condition) -> Self {
        condition.source
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn find_operator(raw: &str) -> Option<(usize, &'static str, Operator)> {
    let mut quote = None;
    for (i, c) in raw.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, _) => {
                let rest = &raw[i..];
                if let Some((symbol, op)) = OPERATORS.iter().find(|(s, _)| rest.starts_with(s)) {
                    return Some((i, *symbol, *op));
                }
            }
        }
    }
    None
}

fn split_outside_quotes<'a>(raw: &'a str, separator: &str) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut quote = None;
    let mut start = 0;
    for (i, c) in raw.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, _) if i >= start && raw[i..].starts_with(separator) => {
                parts.push(raw[start..i].trim());
                start = i + separator.len();
            }
            (None, _) => {}
        }
    }
    parts.push(raw[start..].trim());
    parts
}

fn parse_literal(raw: &str) -> Result<Value, ConditionError> {
    if raw.is_empty() {
        return Err(ConditionError::Malformed("missing literal".into()));
    }
    for q in ['"', '\''] {
        if let Some(inner) = raw.strip_prefix(q) {
            return inner
                .strip_suffix(q)
                .filter(|s| !s.contains(q))
                .map(Value::from)
                .ok_or_else(|| ConditionError::Malformed(format!("unterminated string {raw}")));
        }
    }
    match raw {
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        _ => {}
    }
    if let Ok(int) = raw.parse::<i64>() {
        return Ok(Value::Int(int));
    }
    if let Ok(float) = raw.parse::<f64>() {
        if float.is_finite() {
            return Ok(Value::Float(float));
        }
    }
    if let Ok(status) = raw.parse::<Status>() {
        return Ok(Value::from(status.as_str()));
    }
    Err(ConditionError::Malformed(format!(
        "`{raw}` is not a number, quoted string, boolean or status"
    )))
}

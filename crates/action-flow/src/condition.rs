//! Step conditions
//!
//! A condition is either structured (see [`Condition`]) or a compact string:
//! `true`/`yes`/`1`, `false`/`no`/`0`, `flag`, `!flag`, `name == value`,
//! `name != value`. Strings are rendered against the run state first.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::state::{value_text, RunState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    Literal { value: bool },
    /// Variable is set, whatever its value
    Exists { var: String },
    Truthy { var: String },
    Equals { var: String, value: Value },
    NotEquals { var: String, value: Value },
    All { conditions: Vec<Condition> },
    Any { conditions: Vec<Condition> },
    Not { condition: Box<Condition> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepCondition {
    Flag(bool),
    Expr(String),
    Structured(Condition),
}

impl From<Condition> for StepCondition {
    fn from(condition: Condition) -> Self {
        StepCondition::Structured(condition)
    }
}

impl From<&str> for StepCondition {
    fn from(expr: &str) -> Self {
        StepCondition::Expr(expr.to_string())
    }
}

impl StepCondition {
    pub fn evaluate(&self, state: &RunState) -> bool {
        match self {
            StepCondition::Flag(flag) => *flag,
            StepCondition::Expr(expr) => evaluate_expr(&state.render_str(expr), state),
            StepCondition::Structured(condition) => condition.evaluate(state),
        }
    }
}

impl Condition {
    pub fn evaluate(&self, state: &RunState) -> bool {
        match self {
            Condition::Literal { value } => *value,
            Condition::Exists { var } => state.contains(var),
            Condition::Truthy { var } => state.get(var).map(truthy).unwrap_or(false),
            Condition::Equals { var, value } => state
                .get(var)
                .map(|current| loosely_equal(current, value))
                .unwrap_or(false),
            Condition::NotEquals { var, value } => !state
                .get(var)
                .map(|current| loosely_equal(current, value))
                .unwrap_or(false),
            Condition::All { conditions } => conditions.iter().all(|c| c.evaluate(state)),
            Condition::Any { conditions } => conditions.iter().any(|c| c.evaluate(state)),
            Condition::Not { condition } => !condition.evaluate(state),
        }
    }
}

fn evaluate_expr(expr: &str, state: &RunState) -> bool {
    let text = expr.trim();
    if text.is_empty() {
        return true;
    }
    match text.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => return true,
        "false" | "0" | "no" => return false,
        _ => {}
    }

    if let Some((left, right)) = text.split_once("!=") {
        return !compare(left, right, state);
    }
    if let Some((left, right)) = text.split_once("==") {
        return compare(left, right, state);
    }
    if let Some(name) = text.strip_prefix('!') {
        return !evaluate_expr(name, state);
    }
    if is_identifier(text) {
        return state.get(text).map(truthy).unwrap_or(false);
    }

    warn!(expression = %text, "unparsable condition, treating as false");
    false
}

fn compare(left: &str, right: &str, state: &RunState) -> bool {
    operand_text(left, state) == operand_text(right, state)
}

fn operand_text(raw: &str, state: &RunState) -> String {
    let raw = raw.trim();
    if let Some(value) = state.get(raw) {
        return value_text(value);
    }
    let unquoted = raw
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| raw.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')));
    unquoted.unwrap_or(raw).to_string()
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn loosely_equal(current: &Value, expected: &Value) -> bool {
    current == expected || value_text(current) == value_text(expected)
}

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => {
            let lowered = s.trim().to_ascii_lowercase();
            !(lowered.is_empty() || matches!(lowered.as_str(), "false" | "0" | "no"))
        }
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

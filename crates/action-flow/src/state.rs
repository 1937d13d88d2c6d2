//! Run-scoped variable store and `{key}` templating

use action_locator::fill_placeholders;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const LAST_ERROR_KEY: &str = "last_error";

/// Mutable variables shared by the steps of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunState(Map<String, Value>);

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Replace `{key}` placeholders in every string, recursively.
    pub fn render(&self, value: &Value) -> Value {
        match value {
            Value::String(text) => Value::String(self.render_str(text)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.render(v)).collect()),
            Value::Object(map) => Value::Object(self.render_map(map)),
            other => other.clone(),
        }
    }

    pub fn render_map(&self, map: &Map<String, Value>) -> Map<String, Value> {
        map.iter()
            .map(|(key, value)| (key.clone(), self.render(value)))
            .collect()
    }

    pub fn render_str(&self, text: &str) -> String {
        if self.0.is_empty() || !text.contains('{') {
            return text.to_string();
        }
        fill_placeholders(text, &self.0)
    }
}

impl From<Map<String, Value>> for RunState {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Text form used in comparisons and templating.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

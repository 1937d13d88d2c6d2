//! Plan model: an ordered list of steps loaded from YAML or JSON

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use autobot_core_types::{ActionRef, Params};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::condition::StepCondition;
use crate::errors::FlowError;

/// Named, ordered list of steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<Step>,
}

/// One adapter action invocation inside a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Optional stable identifier, reported in outcomes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// `adapter.action`
    pub action: String,

    /// Parameters; string values may contain `{key}` placeholders
    #[serde(default, alias = "args")]
    pub params: Params,

    /// Run-state key receiving the action result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_as: Option<String>,

    #[serde(default)]
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<StepCondition>,

    /// Extra attempts after the first
    #[serde(default)]
    pub retries: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay_ms: Option<u64>,

    /// Per-attempt dispatch timeout; the executor default applies when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    #[serde(default)]
    pub continue_on_error: bool,
}

impl Step {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            id: None,
            action: action.into(),
            params: Params::new(),
            save_as: None,
            description: String::new(),
            condition: None,
            retries: 0,
            retry_delay_ms: None,
            timeout_ms: None,
            continue_on_error: false,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn save_as(mut self, key: impl Into<String>) -> Self {
        self.save_as = Some(key.into());
        self
    }

    pub fn with_condition(mut self, condition: impl Into<StepCondition>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn with_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.retries = retries;
        self.retry_delay_ms = Some(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn continue_on_error(mut self) -> Self {
        self.continue_on_error = true;
        self
    }

    pub fn action_ref(&self) -> Result<ActionRef, FlowError> {
        self.action
            .parse::<ActionRef>()
            .map_err(|err| FlowError::InvalidPlan(err.to_string()))
    }

    pub fn attempts_allowed(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    pub fn retry_delay(&self) -> Option<Duration> {
        self.retry_delay_ms.map(Duration::from_millis)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

impl Plan {
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            steps,
        }
    }

    /// Parse a plan document. JSON is accepted as a subset of YAML.
    pub fn from_yaml_str(raw: &str) -> Result<Self, FlowError> {
        let plan: Plan = serde_yaml::from_str(raw).map_err(|err| FlowError::Parse(err.to_string()))?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, FlowError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|err| FlowError::Io(format!("{}: {}", path.display(), err)))?;
        Self::from_yaml_str(&raw)
    }

    /// Structural checks that need no adapter knowledge.
    pub fn validate(&self) -> Result<(), FlowError> {
        if self.name.trim().is_empty() {
            return Err(FlowError::InvalidPlan("plan name is empty".into()));
        }
        if self.steps.is_empty() {
            return Err(FlowError::InvalidPlan(format!(
                "plan '{}' has no steps",
                self.name
            )));
        }

        let mut ids = HashSet::new();
        for (index, step) in self.steps.iter().enumerate() {
            step.action_ref().map_err(|err| {
                FlowError::InvalidPlan(format!("step {}: {}", index + 1, err))
            })?;
            if let Some(id) = &step.id {
                if !ids.insert(id.as_str()) {
                    return Err(FlowError::InvalidPlan(format!(
                        "duplicate step id '{}'",
                        id
                    )));
                }
            }
            if matches!(&step.save_as, Some(key) if key.trim().is_empty()) {
                return Err(FlowError::InvalidPlan(format!(
                    "step {}: save_as is blank",
                    index + 1
                )));
            }
            if step.timeout_ms == Some(0) {
                return Err(FlowError::InvalidPlan(format!(
                    "step {}: timeout_ms must be positive",
                    index + 1
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_yaml_with_args_alias() {
        let plan = Plan::from_yaml_str(
            r#"
name: greet
steps:
  - action: whatsapp_web.open_chat
    args: { chat_name: "Alice" }
  - action: whatsapp_web.read_recent_messages
    save_as: recent
    retries: 2
    retry_delay_ms: 250
    condition: "{ready}"
"#,
        )
        .unwrap();

        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].params["chat_name"], "Alice");
        assert_eq!(plan.steps[1].attempts_allowed(), 3);
        assert_eq!(plan.steps[1].retry_delay(), Some(Duration::from_millis(250)));
        assert!(plan.steps[1].condition.is_some());
    }

    #[test]
    fn parses_json_document() {
        let plan = Plan::from_yaml_str(
            r#"{"name": "json", "steps": [{"action": "engine.log", "params": {"message": "hi"}}]}"#,
        )
        .unwrap();
        assert_eq!(plan.steps[0].action, "engine.log");
    }

    #[test]
    fn rejects_malformed_action_and_duplicate_ids() {
        let bad = Plan::new("p", vec![Step::new("no_dot")]);
        assert!(matches!(bad.validate(), Err(FlowError::InvalidPlan(_))));

        let dup = Plan::new(
            "p",
            vec![
                Step::new("engine.log").with_id("a"),
                Step::new("engine.log").with_id("a"),
            ],
        );
        assert!(matches!(dup.validate(), Err(FlowError::InvalidPlan(_))));

        assert!(Plan::new("p", vec![]).validate().is_err());
    }
}

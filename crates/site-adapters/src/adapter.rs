use std::path::PathBuf;

use action_primitives::ExecCtx;
use async_trait::async_trait;
use autobot_core_types::{Params, Sensitivity};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::AdapterResult;

/// Catalog entry for one adapter action.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub name: String,
    pub description: String,
    pub sensitivity: Sensitivity,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

impl ActionSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, sensitivity: Sensitivity) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            sensitivity,
            required: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionOutput {
    pub value: Value,
    /// Winning locator of the last selector resolution, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector_used: Option<String>,
}

impl ActionOutput {
    pub fn value(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            selector_used: None,
        }
    }
}

/// State captured after a failure for the telemetry snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Diagnostics {
    pub target: Option<String>,
    pub excerpt: Option<String>,
    pub capture_path: Option<PathBuf>,
}

/// A named bundle of actions on one UI surface.
#[async_trait]
pub trait Adapter: Send + Sync {
    fn name(&self) -> &str;

    fn actions(&self) -> Vec<ActionSpec>;

    fn action(&self, action: &str) -> Option<ActionSpec> {
        self.actions().into_iter().find(|spec| spec.name == action)
    }

    async fn execute(&self, action: &str, params: &Params, ctx: &ExecCtx)
        -> AdapterResult<ActionOutput>;

    /// Describe the current UI state after a failed attempt.
    async fn diagnostics(&self, _label: &str) -> Diagnostics {
        Diagnostics::default()
    }
}

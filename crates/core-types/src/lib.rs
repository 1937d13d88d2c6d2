use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Parameter mapping carried by steps, policy requests and confirmations.
pub type Params = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid action identifier '{0}', expected 'adapter.action'")]
    InvalidActionRef(String),

    #[error("unknown sensitivity '{0}'")]
    UnknownSensitivity(String),
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to a captured failure snapshot.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct SnapshotId(pub String);

impl SnapshotId {
    pub fn new() -> Self {
        Self(format!("snap-{}", Uuid::new_v4().simple()))
    }
}

impl Default for SnapshotId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `adapter.action` pair addressing one adapter operation.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ActionRef {
    pub adapter: String,
    pub action: String,
}

impl ActionRef {
    pub fn new(adapter: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            adapter: adapter.into(),
            action: action.into(),
        }
    }
}

impl FromStr for ActionRef {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        match trimmed.split_once('.') {
            Some((adapter, action))
                if !adapter.is_empty() && !action.is_empty() && !action.contains('.') =>
            {
                Ok(Self::new(adapter, action))
            }
            _ => Err(CoreError::InvalidActionRef(value.to_string())),
        }
    }
}

impl fmt::Display for ActionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.adapter, self.action)
    }
}

/// Fixed risk classification attached to every adapter action.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    ReadOnly,
    Interactive,
    MessageSend,
    FileDownload,
    PolicyChange,
}

impl Sensitivity {
    /// Irreversible or externally visible actions.
    pub fn is_sensitive(self) -> bool {
        matches!(
            self,
            Sensitivity::MessageSend | Sensitivity::FileDownload | Sensitivity::PolicyChange
        )
    }

    pub fn is_read_only(self) -> bool {
        matches!(self, Sensitivity::ReadOnly)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Sensitivity::ReadOnly => "read_only",
            Sensitivity::Interactive => "interactive",
            Sensitivity::MessageSend => "message_send",
            Sensitivity::FileDownload => "file_download",
            Sensitivity::PolicyChange => "policy_change",
        }
    }
}

impl FromStr for Sensitivity {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "read_only" | "readonly" => Ok(Sensitivity::ReadOnly),
            "interactive" => Ok(Sensitivity::Interactive),
            "message_send" => Ok(Sensitivity::MessageSend),
            "file_download" => Ok(Sensitivity::FileDownload),
            "policy_change" => Ok(Sensitivity::PolicyChange),
            _ => Err(CoreError::UnknownSensitivity(value.to_string())),
        }
    }
}

impl fmt::Display for Sensitivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure classification for a step.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    SelectorNotFound,
    SessionRecoveryFailed,
    PolicyDenied,
    ConfirmationExpired,
    ConfirmationTimeout,
    ActionTimeout,
    AdapterError,
    InvalidParams,
    UnknownAction,
    Cancelled,
}

impl FailureKind {
    /// Kinds the executor retries within a step's budget.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            FailureKind::SelectorNotFound | FailureKind::ActionTimeout | FailureKind::AdapterError
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::SelectorNotFound => "selector_not_found",
            FailureKind::SessionRecoveryFailed => "session_recovery_failed",
            FailureKind::PolicyDenied => "policy_denied",
            FailureKind::ConfirmationExpired => "confirmation_expired",
            FailureKind::ConfirmationTimeout => "confirmation_timeout",
            FailureKind::ActionTimeout => "action_timeout",
            FailureKind::AdapterError => "adapter_error",
            FailureKind::InvalidParams => "invalid_params",
            FailureKind::UnknownAction => "unknown_action",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

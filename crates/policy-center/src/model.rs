use std::fmt;
use std::str::FromStr;

use autobot_core_types::{Params, Sensitivity};
use serde::{Deserialize, Serialize};

use crate::errors::PolicyError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyProfile {
    /// Every non-read-only action needs confirmation.
    Strict,
    /// Sensitive actions need confirmation only when a rule is suspicious.
    #[default]
    Balanced,
    /// Everything runs unless a rule hard-blocks it.
    Trusted,
}

impl PolicyProfile {
    pub fn as_str(self) -> &'static str {
        match self {
            PolicyProfile::Strict => "strict",
            PolicyProfile::Balanced => "balanced",
            PolicyProfile::Trusted => "trusted",
        }
    }
}

impl FromStr for PolicyProfile {
    type Err = PolicyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(PolicyProfile::Strict),
            "balanced" => Ok(PolicyProfile::Balanced),
            "trusted" => Ok(PolicyProfile::Trusted),
            other => Err(PolicyError::UnknownProfile(other.to_string())),
        }
    }
}

impl fmt::Display for PolicyProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An adapter action about to be dispatched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolicyRequest {
    pub adapter: String,
    pub action: String,
    pub sensitivity: Sensitivity,
    #[serde(default)]
    pub params: Params,
}

impl PolicyRequest {
    pub fn new(
        adapter: impl Into<String>,
        action: impl Into<String>,
        sensitivity: Sensitivity,
        params: Params,
    ) -> Self {
        Self {
            adapter: adapter.into(),
            action: action.into(),
            sensitivity,
            params,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Allow,
    RequireConfirm { reason: String },
    Deny { reason: String },
}

impl Decision {
    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn is_deny(&self) -> bool {
        matches!(self, Decision::Deny { .. })
    }
}

/// Result of checking one denylist rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RuleVerdict {
    Clear,
    /// Soft threshold reached; ambiguous bulk pattern.
    Suspicious(String),
    /// Hard match; never bypassable.
    Blocked(String),
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PolicySource {
    Builtin,
    File,
    Env,
    Runtime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profiles_parse_case_insensitively() {
        assert_eq!("STRICT".parse::<PolicyProfile>().unwrap(), PolicyProfile::Strict);
        assert_eq!(" trusted ".parse::<PolicyProfile>().unwrap(), PolicyProfile::Trusted);
        assert!("lenient".parse::<PolicyProfile>().is_err());
    }
}

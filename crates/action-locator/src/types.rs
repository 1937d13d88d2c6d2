//! Core types for selector resolution

use serde::{Deserialize, Serialize};

/// Ordered locators for one logical target on one site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorSpec {
    pub site: String,
    pub logical_name: String,
    /// Primary first, fallbacks after
    pub locators: Vec<String>,
}

impl SelectorSpec {
    pub fn new(
        site: impl Into<String>,
        logical_name: impl Into<String>,
        locators: Vec<String>,
    ) -> Self {
        Self {
            site: site.into(),
            logical_name: logical_name.into(),
            locators,
        }
    }
}

/// Which adapter action a resolution runs on behalf of.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolveScope {
    pub adapter: String,
    pub action: String,
}

impl ResolveScope {
    pub fn new(adapter: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            adapter: adapter.into(),
            action: action.into(),
        }
    }
}

/// Successful resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTarget {
    pub logical_name: String,
    pub locator: String,
    /// Position of the winning locator in the declared list
    pub index: usize,
    /// Number of probes issued, including the winning one
    pub probes: usize,
}

impl ResolvedTarget {
    pub fn used_fallback(&self) -> bool {
        self.index > 0
    }
}

/// Outcome of a single probe, reported to the observer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeSample {
    pub adapter: String,
    pub action: String,
    pub logical_name: String,
    pub locator: String,
    pub matched: bool,
}

/// Aggregate failure after the whole list was exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionFailure {
    pub adapter: String,
    pub action: String,
    pub logical_name: String,
    pub tried: Vec<String>,
}

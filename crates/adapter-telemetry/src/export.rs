//! Serializable telemetry export consumed by reporting surfaces

use autobot_core_types::{FailureKind, SnapshotId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub actions: Vec<ActionTelemetry>,
    pub selectors: Vec<SelectorTelemetry>,
    pub probes: Vec<ProbeTelemetry>,
    pub resolution_failures: Vec<ResolutionFailureCount>,
    pub failures: Vec<FailureSnapshot>,
    /// Failure snapshots dropped by the per-run cap.
    pub truncated_snapshots: u64,
    /// Older snapshots pushed out of the retained buffer.
    pub evicted_snapshots: u64,
    pub generated_at: Option<DateTime<Utc>>,
}

impl TelemetrySnapshot {
    pub fn action(&self, adapter: &str, action: &str) -> Option<&ActionTelemetry> {
        self.actions
            .iter()
            .find(|a| a.adapter == adapter && a.action == action)
    }

    pub fn selector(&self, adapter: &str, action: &str, selector: &str) -> Option<&SelectorTelemetry> {
        self.selectors
            .iter()
            .find(|s| s.adapter == adapter && s.action == action && s.selector == selector)
    }

    pub fn failure(&self, id: &SnapshotId) -> Option<&FailureSnapshot> {
        self.failures.iter().find(|f| &f.id == id)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionTelemetry {
    pub adapter: String,
    pub action: String,
    pub successes: u64,
    pub failures: u64,
    pub samples: u64,
    pub mean_ms: f64,
    pub p50_ms: u64,
    pub p90_ms: u64,
    pub max_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<FailureKind>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorTelemetry {
    pub adapter: String,
    pub action: String,
    pub selector: String,
    pub successes: u64,
    pub failures: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeTelemetry {
    pub adapter: String,
    pub action: String,
    pub logical_name: String,
    pub locator: String,
    pub matched: u64,
    pub missed: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionFailureCount {
    pub adapter: String,
    pub action: String,
    pub logical_name: String,
    pub count: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailureSnapshot {
    pub id: SnapshotId,
    pub adapter: String,
    pub action: String,
    pub kind: FailureKind,
    pub cause: String,
    /// URL or window identifier at failure time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture_path: Option<PathBuf>,
    /// Locators tried by the last exhausted resolution for this action
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tried_locators: Vec<String>,
    pub recorded_at: DateTime<Utc>,
}

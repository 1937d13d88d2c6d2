//! Step outcomes, run results and the persisted run record

use std::path::Path;

use adapter_telemetry::TelemetrySnapshot;
use autobot_core_types::{FailureKind, Params, RunId, SnapshotId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::FlowError;
use crate::state::RunState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Ok,
    /// Condition evaluated false
    Skipped,
    Failed,
    /// Failed, but the step allowed the run to continue
    FailedContinue,
    Cancelled,
    /// Never reached because the run ended earlier
    NotRun,
}

impl StepStatus {
    /// Counts toward `completed_steps`.
    pub fn is_completed(self) -> bool {
        matches!(self, StepStatus::Ok | StepStatus::Skipped | StepStatus::FailedContinue)
    }
}

/// Terminal failure of a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    pub kind: FailureKind,
    pub cause: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<SnapshotId>,
}

impl StepError {
    pub fn new(kind: FailureKind, cause: impl Into<String>) -> Self {
        Self {
            kind,
            cause: cause.into(),
            snapshot: None,
        }
    }

    pub fn with_snapshot(mut self, snapshot: Option<SnapshotId>) -> Self {
        self.snapshot = snapshot;
        self
    }
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.cause)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub action: String,
    #[serde(default)]
    pub description: String,
    pub status: StepStatus,
    pub attempts_allowed: u32,
    pub attempts_used: u32,
    /// Params after templating
    #[serde(default)]
    pub params: Params,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl StepOutcome {
    pub fn new(index: usize, id: Option<String>, action: impl Into<String>, attempts_allowed: u32) -> Self {
        Self {
            index,
            id,
            action: action.into(),
            description: String::new(),
            status: StepStatus::NotRun,
            attempts_allowed,
            attempts_used: 0,
            params: Params::new(),
            result: None,
            error: None,
            confirmation_token: None,
            started_at: None,
            finished_at: None,
            latency_ms: None,
        }
    }

    pub fn start(mut self) -> Self {
        self.started_at = Some(Utc::now());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_success(mut self, result: Value) -> Self {
        self.status = StepStatus::Ok;
        self.result = Some(result);
        self
    }

    pub fn with_error(mut self, status: StepStatus, error: StepError) -> Self {
        self.status = status;
        self.error = Some(error);
        self
    }

    pub fn skipped(mut self) -> Self {
        self.status = StepStatus::Skipped;
        self
    }

    pub fn finish(mut self) -> Self {
        let finished = Utc::now();
        if let Some(started) = self.started_at {
            self.latency_ms = u64::try_from((finished - started).num_milliseconds()).ok();
        }
        self.finished_at = Some(finished);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    /// Every step completed, at least one via `continue_on_error`
    PartiallySucceeded,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub run_id: RunId,
    pub plan_name: String,
    pub success: bool,
    pub status: RunStatus,
    pub completed_steps: usize,
    pub total_steps: usize,
    pub run_state: RunState,
    pub step_outcomes: Vec<StepOutcome>,
    /// First error that ended the run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn outcome(&self, index: usize) -> Option<&StepOutcome> {
        self.step_outcomes.get(index)
    }
}

/// What a finished run leaves behind: its result plus the telemetry export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub plan_name: String,
    #[serde(default)]
    pub plan_description: String,
    pub success: bool,
    pub status: RunStatus,
    pub completed_steps: usize,
    pub total_steps: usize,
    pub run_state: RunState,
    pub step_outcomes: Vec<StepOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    pub telemetry: TelemetrySnapshot,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunRecord {
    pub fn new(result: ExecutionResult, plan_description: impl Into<String>, telemetry: TelemetrySnapshot) -> Self {
        Self {
            run_id: result.run_id,
            plan_name: result.plan_name,
            plan_description: plan_description.into(),
            success: result.success,
            status: result.status,
            completed_steps: result.completed_steps,
            total_steps: result.total_steps,
            run_state: result.run_state,
            step_outcomes: result.step_outcomes,
            error: result.error,
            telemetry,
            started_at: result.started_at,
            finished_at: result.finished_at,
        }
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), FlowError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|err| FlowError::Io(format!("{}: {}", parent.display(), err)))?;
        }
        let body = serde_json::to_string_pretty(self).map_err(|err| FlowError::Io(err.to_string()))?;
        std::fs::write(path, body).map_err(|err| FlowError::Io(format!("{}: {}", path.display(), err)))
    }
}

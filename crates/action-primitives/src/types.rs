//! Execution context handed to driver calls

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Runtime context for one adapter dispatch.
#[derive(Clone, Debug)]
pub struct ExecCtx {
    /// Run this dispatch belongs to
    pub run_id: String,

    /// Zero-based index of the step being executed
    pub step_index: usize,

    /// Deadline for this dispatch
    pub deadline: Instant,

    /// Cancellation token for cooperative cancellation
    pub cancel_token: CancellationToken,

    /// Unique identifier for this dispatch
    pub action_id: String,
}

impl ExecCtx {
    pub fn new(
        run_id: impl Into<String>,
        step_index: usize,
        timeout: Duration,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            step_index,
            deadline: Instant::now() + timeout,
            cancel_token,
            action_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Context for ad-hoc calls outside a run (control surface, tests).
    pub fn detached(timeout: Duration) -> Self {
        Self::new("detached", 0, timeout, CancellationToken::new())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    pub fn is_timeout(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn remaining_time(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// One recorded driver interaction, kept by the dry-run driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DriverCall {
    Navigate { url: String },
    Probe { locator: String, matched: bool },
    Click { locator: String },
    Fill { locator: String, text: String },
    Press { key: String },
    Hotkey { keys: Vec<String> },
    TypeText { text: String },
    ReadTexts { locator: String },
    Capture { label: String },
}

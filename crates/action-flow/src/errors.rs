//! Flow execution error types

use autobot_core_types::FailureKind;
use confirm_broker::ConfirmError;
use site_adapters::AdapterError;
use thiserror::Error;

/// Errors raised outside a running plan: loading, validation and the
/// confirm-then-execute path.
#[derive(Debug, Error)]
pub enum FlowError {
    /// Plan validation failed
    #[error("Plan validation failed: {0}")]
    InvalidPlan(String),

    /// Plan document could not be parsed
    #[error("Plan parse error: {0}")]
    Parse(String),

    /// Reading a plan file failed
    #[error("Plan I/O error: {0}")]
    Io(String),

    /// Adapter registration failed
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    /// Token could not be confirmed
    #[error(transparent)]
    Confirm(#[from] ConfirmError),

    /// A denylist rule blocks the bound action
    #[error("Policy denied: {0}")]
    Denied(String),

    /// Another run holds the UI session
    #[error("UI session is busy with another run")]
    SessionBusy,

    /// The bound action ran and failed
    #[error("{kind}: {cause}")]
    Action { kind: FailureKind, cause: String },
}

//! Error types for UI driving primitives

use thiserror::Error;

/// Failures reported by a [`crate::UiDriver`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// Locator matched nothing actionable
    #[error("Target not found: {0}")]
    TargetNotFound(String),

    /// Element exists but cannot receive input
    #[error("Target not interactable: {0}")]
    NotInteractable(String),

    /// Driver-side wait expired
    #[error("Driver timeout: {0}")]
    Timeout(String),

    /// Operation was cancelled or interrupted
    #[error("Operation interrupted: {0}")]
    Interrupted(String),

    /// Operation is not available in the current driving mode
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Transport to the browser or desktop failed
    #[error("Driver I/O error: {0}")]
    Io(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DriverError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DriverError::TargetNotFound(_)
                | DriverError::NotInteractable(_)
                | DriverError::Timeout(_)
                | DriverError::Io(_)
        )
    }
}

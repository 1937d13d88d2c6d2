use thiserror::Error;

use crate::SessionStatus;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("invalid login url pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("session recovery failed ({status:?} after recovery): {reason}")]
    RecoveryFailed {
        status: SessionStatus,
        reason: String,
    },
}

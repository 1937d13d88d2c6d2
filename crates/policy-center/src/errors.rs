use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("invalid policy: {0}")]
    Invalid(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("unknown policy profile '{0}' (expected strict, balanced or trusted)")]
    UnknownProfile(String),
    #[error("invalid rule '{rule}': {reason}")]
    InvalidRule { rule: String, reason: String },
}

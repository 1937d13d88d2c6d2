use action_locator::LocatorError;
use action_primitives::DriverError;
use autobot_core_types::FailureKind;
use session_health::SessionError;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum AdapterError {
    #[error("unknown adapter '{0}'")]
    UnknownAdapter(String),

    #[error("unknown action '{action}' for adapter '{adapter}'")]
    UnknownAction { adapter: String, action: String },

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error(transparent)]
    Selector(#[from] LocatorError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("driver: {0}")]
    Driver(#[from] DriverError),

    #[error("{message}")]
    Failed { message: String, permanent: bool },

    #[error("invalid site definition: {0}")]
    Definition(String),
}

impl AdapterError {
    pub fn failed(message: impl Into<String>) -> Self {
        AdapterError::Failed {
            message: message.into(),
            permanent: false,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        AdapterError::Failed {
            message: message.into(),
            permanent: true,
        }
    }

    /// Failure class reported to the executor and telemetry.
    pub fn kind(&self) -> FailureKind {
        match self {
            AdapterError::UnknownAdapter(_) | AdapterError::UnknownAction { .. } => {
                FailureKind::UnknownAction
            }
            AdapterError::InvalidParams(_) => FailureKind::InvalidParams,
            AdapterError::Selector(LocatorError::NotFound { .. }) => FailureKind::SelectorNotFound,
            AdapterError::Session(_) => FailureKind::SessionRecoveryFailed,
            AdapterError::Driver(DriverError::Timeout(_)) => FailureKind::ActionTimeout,
            AdapterError::Driver(DriverError::Interrupted(_)) => FailureKind::Cancelled,
            _ => FailureKind::AdapterError,
        }
    }

    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            AdapterError::Selector(err) => err.is_retryable(),
            AdapterError::Driver(err) => err.is_retryable(),
            AdapterError::Failed { permanent, .. } => !permanent,
            _ => false,
        }
    }
}

pub type AdapterResult<T> = Result<T, AdapterError>;

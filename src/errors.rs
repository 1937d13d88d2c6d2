//! Errors surfaced by the control surface and CLI

use action_flow::FlowError;
use autobot_core_types::{CoreError, FailureKind};
use autobot_policy_center::PolicyError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use confirm_broker::ConfirmError;
use serde_json::json;
use site_adapters::AdapterError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Flow(#[from] FlowError),

    #[error(transparent)]
    Confirm(#[from] ConfirmError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) | AppError::Core(_) | AppError::Policy(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Confirm(err) => confirm_status(err),
            AppError::Adapter(err) => match err.kind() {
                FailureKind::UnknownAction => StatusCode::NOT_FOUND,
                FailureKind::InvalidParams => StatusCode::BAD_REQUEST,
                _ => StatusCode::BAD_GATEWAY,
            },
            AppError::Flow(err) => match err {
                FlowError::InvalidPlan(_) | FlowError::Parse(_) => StatusCode::BAD_REQUEST,
                FlowError::Confirm(err) => confirm_status(err),
                FlowError::Denied(_) => StatusCode::FORBIDDEN,
                FlowError::SessionBusy => StatusCode::CONFLICT,
                FlowError::Action { kind, .. } => match kind {
                    FailureKind::UnknownAction => StatusCode::NOT_FOUND,
                    FailureKind::InvalidParams => StatusCode::BAD_REQUEST,
                    FailureKind::PolicyDenied => StatusCode::FORBIDDEN,
                    FailureKind::ActionTimeout => StatusCode::GATEWAY_TIMEOUT,
                    _ => StatusCode::BAD_GATEWAY,
                },
                FlowError::Adapter(_) | FlowError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for API clients.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) | AppError::Core(_) => "bad_request",
            AppError::NotFound(_) => "not_found",
            AppError::Policy(_) => "invalid_policy",
            AppError::Confirm(err) | AppError::Flow(FlowError::Confirm(err)) => confirm_code(err),
            AppError::Flow(FlowError::Denied(_)) => FailureKind::PolicyDenied.as_str(),
            AppError::Flow(FlowError::SessionBusy) => "session_busy",
            AppError::Flow(FlowError::Action { kind, .. }) => kind.as_str(),
            AppError::Flow(FlowError::InvalidPlan(_) | FlowError::Parse(_)) => "invalid_plan",
            AppError::Adapter(err) => err.kind().as_str(),
            AppError::Flow(_) | AppError::Internal(_) => "internal",
        }
    }
}

fn confirm_status(err: &ConfirmError) -> StatusCode {
    match err {
        ConfirmError::TokenNotFound(_) => StatusCode::NOT_FOUND,
        ConfirmError::TokenExpired(_) => StatusCode::GONE,
        ConfirmError::TokenAlreadyConsumed(_) | ConfirmError::TokenCancelled(_) => {
            StatusCode::CONFLICT
        }
        ConfirmError::InvalidConfig(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn confirm_code(err: &ConfirmError) -> &'static str {
    match err {
        ConfirmError::TokenNotFound(_) => "token_not_found",
        ConfirmError::TokenExpired(_) => "token_expired",
        ConfirmError::TokenAlreadyConsumed(_) => "token_already_consumed",
        ConfirmError::TokenCancelled(_) => "token_cancelled",
        ConfirmError::InvalidConfig(_) => "internal",
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (
            status,
            Json(json!({
                "success": false,
                "code": self.code(),
                "error": self.to_string(),
            })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_errors_map_to_distinct_statuses() {
        let cases = [
            (ConfirmError::TokenNotFound("t".into()), StatusCode::NOT_FOUND),
            (ConfirmError::TokenExpired("t".into()), StatusCode::GONE),
            (ConfirmError::TokenAlreadyConsumed("t".into()), StatusCode::CONFLICT),
            (ConfirmError::TokenCancelled("t".into()), StatusCode::CONFLICT),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(FlowError::from(err.clone())).status(), status);
            assert_eq!(AppError::from(err).status(), status);
        }
    }

    #[test]
    fn denial_is_forbidden() {
        let err = AppError::from(FlowError::Denied("mass message".into()));
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert_eq!(err.code(), "policy_denied");

        let busy = AppError::from(FlowError::SessionBusy);
        assert_eq!(busy.status(), StatusCode::CONFLICT);
        assert_eq!(busy.code(), "session_busy");
    }
}

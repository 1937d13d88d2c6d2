use autobot_core_types::Params;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::errors::AppError;
use crate::server::ServeState;

pub(crate) fn router() -> Router<ServeState> {
    Router::new()
        .route(
            "/v1/confirmations",
            get(list_handler).post(prepare_handler),
        )
        .route("/v1/confirmations/:token", get(get_handler))
        .route("/v1/confirmations/:token/confirm", post(confirm_handler))
        .route("/v1/confirmations/:token/cancel", post(cancel_handler))
}

#[derive(Debug, Deserialize)]
struct PrepareRequest {
    action: String,
    #[serde(default)]
    params: Params,
}

async fn prepare_handler(
    State(state): State<ServeState>,
    Json(request): Json<PrepareRequest>,
) -> Result<impl IntoResponse, AppError> {
    let prepared = state
        .context
        .prepare_confirmation(&request.action, request.params)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "token": prepared.token,
            "expires_at": prepared.expires_at,
            "binding": prepared.binding,
        })),
    ))
}

async fn list_handler(State(state): State<ServeState>) -> impl IntoResponse {
    Json(json!({
        "success": true,
        "pending": state.context.broker().pending(),
    }))
}

async fn get_handler(
    State(state): State<ServeState>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let entry = state
        .context
        .broker()
        .get(&token)
        .ok_or_else(|| AppError::NotFound(format!("confirmation token not found: {token}")))?;
    Ok(Json(json!({ "success": true, "confirmation": entry })))
}

async fn confirm_handler(
    State(state): State<ServeState>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state.context.executor().confirm_and_execute(&token).await?;
    info!(token = %token, "confirmation accepted");
    Ok(Json(json!({ "success": true, "result": outcome })))
}

async fn cancel_handler(
    State(state): State<ServeState>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let entry = state.context.broker().cancel(&token)?;
    Ok(Json(json!({ "success": true, "confirmation": entry })))
}

use action_flow::{Plan, RunState};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::errors::AppError;
use crate::server::ServeState;

pub(crate) fn router() -> Router<ServeState> {
    Router::new()
        .route("/v1/runs", get(list_handler).post(start_handler))
        .route("/v1/runs/:run_id", get(status_handler))
        .route("/v1/runs/:run_id/cancel", post(cancel_handler))
}

#[derive(Debug, Deserialize)]
struct StartRequest {
    plan: Plan,
    #[serde(default)]
    state: RunState,
}

async fn start_handler(
    State(state): State<ServeState>,
    Json(request): Json<StartRequest>,
) -> Result<impl IntoResponse, AppError> {
    let run_id = state.context.start_run(request.plan, request.state)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "success": true, "run_id": run_id })),
    ))
}

async fn list_handler(State(state): State<ServeState>) -> impl IntoResponse {
    Json(json!({ "success": true, "runs": state.context.runs() }))
}

async fn status_handler(
    State(state): State<ServeState>,
    Path(run_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let view = state
        .context
        .run_status(&run_id)
        .ok_or_else(|| AppError::NotFound(format!("unknown run: {run_id}")))?;
    Ok(Json(json!({ "success": true, "run": view })))
}

async fn cancel_handler(
    State(state): State<ServeState>,
    Path(run_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    if !state.context.cancel_run(&run_id) {
        return Err(AppError::NotFound(format!("unknown run: {run_id}")));
    }
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "success": true, "run_id": run_id, "cancel_requested": true })),
    ))
}

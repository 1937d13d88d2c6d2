use std::path::PathBuf;

use adapter_telemetry::render_prometheus;
use axum::{
    extract::State,
    http::{header, StatusCode},
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
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/v1/telemetry", get(telemetry_handler))
        .route("/v1/adapters", get(adapters_handler))
        .route("/v1/selectors/reload", post(reload_selectors_handler))
}

async fn health_handler(State(state): State<ServeState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.uptime_secs(),
        "profile": state.context.profile().current(),
        "pending_confirmations": state.context.broker().pending().len(),
    }))
}

async fn metrics_handler(State(state): State<ServeState>) -> impl IntoResponse {
    let body = render_prometheus(&state.context.telemetry().snapshot());
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

async fn telemetry_handler(State(state): State<ServeState>) -> impl IntoResponse {
    Json(state.context.telemetry().snapshot())
}

async fn adapters_handler(State(state): State<ServeState>) -> impl IntoResponse {
    Json(json!({
        "success": true,
        "adapters": state.context.catalog(),
    }))
}

#[derive(Debug, Default, Deserialize)]
struct ReloadRequest {
    #[serde(default)]
    path: Option<PathBuf>,
}

async fn reload_selectors_handler(
    State(state): State<ServeState>,
    body: Option<Json<ReloadRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let request = body.map(|Json(body)| body).unwrap_or_default();
    let entries = state.context.reload_selectors(request.path.as_deref())?;
    Ok(Json(json!({
        "success": true,
        "entries": entries,
    })))
}

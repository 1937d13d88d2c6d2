use autobot_core_types::Params;
use autobot_policy_center::PolicyProfile;
use axum::{extract::State, response::IntoResponse, routing::{get, post}, Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::errors::AppError;
use crate::server::ServeState;

pub(crate) fn router() -> Router<ServeState> {
    Router::new()
        .route("/v1/policy", get(policy_handler))
        .route("/v1/policy/profile", post(set_profile_handler))
        .route("/v1/policy/check", post(check_handler))
}

async fn policy_handler(State(state): State<ServeState>) -> impl IntoResponse {
    let policy = state.context.policy_config();
    Json(json!({
        "success": true,
        "profile": state.context.profile().state(),
        "rules": policy.effective_rules(),
        "history": policy.history,
    }))
}

#[derive(Debug, Deserialize)]
struct SetProfileRequest {
    profile: PolicyProfile,
    /// humantime duration; the previous profile comes back afterwards
    #[serde(default)]
    ttl: Option<String>,
}

async fn set_profile_handler(
    State(state): State<ServeState>,
    Json(request): Json<SetProfileRequest>,
) -> Result<impl IntoResponse, AppError> {
    let ttl = request
        .ttl
        .as_deref()
        .map(|raw| {
            humantime::parse_duration(raw)
                .map_err(|_| AppError::BadRequest(format!("invalid ttl '{raw}'")))
        })
        .transpose()?;
    let applied = state.context.set_profile(request.profile, ttl);
    Ok(Json(json!({
        "success": true,
        "profile": applied,
        "ttl": request.ttl,
    })))
}

#[derive(Debug, Deserialize)]
struct CheckRequest {
    action: String,
    #[serde(default)]
    params: Params,
}

async fn check_handler(
    State(state): State<ServeState>,
    Json(request): Json<CheckRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (spec, decision) = state.context.check_policy(&request.action, request.params)?;
    Ok(Json(json!({
        "success": true,
        "action": request.action,
        "sensitivity": spec.sensitivity,
        "profile": state.context.profile().current(),
        "decision": decision,
    })))
}

use axum::{http::Method, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

mod confirmations;
mod observe;
mod policy;
mod runs;

use super::state::ServeState;

pub fn build_router(state: ServeState) -> Router {
    Router::new()
        .merge(observe::router())
        .merge(policy::router())
        .merge(confirmations::router())
        .merge(runs::router())
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

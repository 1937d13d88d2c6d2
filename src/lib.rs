//! autobot: policy-gated automation runtime
//!
//! Library half of the `autobot` binary: configuration, application wiring
//! and the HTTP control surface.

pub mod app_context;
pub mod config;
pub mod errors;
pub mod server;

pub use app_context::{AppContext, RunPhase, RunView};
pub use config::AppConfig;
pub use errors::{AppError, AppResult};

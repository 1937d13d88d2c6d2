mod router;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::app_context::AppContext;

pub use router::build_router;
pub use state::ServeState;

/// Serve the control surface until Ctrl-C.
pub async fn serve(context: Arc<AppContext>, addr: SocketAddr) -> Result<()> {
    let sweep_every = humantime::parse_duration(&context.config().confirmation.sweep_interval)
        .unwrap_or(Duration::from_secs(30));
    let sweeper = spawn_sweeper(Arc::clone(&context), sweep_every);

    let app = build_router(ServeState::new(context));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Control surface listening on http://{}", addr);

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error");
    sweeper.abort();
    result
}

/// Expires confirmation tokens and forgets old finished runs.
fn spawn_sweeper(context: Arc<AppContext>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let expired = context.broker().sweep_expired();
            if expired > 0 {
                debug!(expired, "confirmation tokens swept");
            }
            context.sweep_runs();
        }
    })
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(?err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

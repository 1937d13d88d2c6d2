//! Process-wide tracing subscriber
//!
//! Installed at most once; later calls are no-ops that report whether this
//! call performed the installation.

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

static INIT: OnceCell<()> = OnceCell::new();

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingOptions {
    /// Fallback filter used when `RUST_LOG` is not set
    pub level: String,
    pub json: bool,
    pub ansi: bool,
}

impl Default for TracingOptions {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            ansi: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum TracingError {
    #[error("invalid log filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("failed to install subscriber: {0}")]
    Install(String),
}

/// Install the global subscriber. Returns `Ok(false)` if one was already set
/// by an earlier call.
pub fn init_tracing(options: &TracingOptions) -> Result<bool, TracingError> {
    if INIT.get().is_some() {
        return Ok(false);
    }

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&options.level).map_err(|err| TracingError::InvalidFilter {
            filter: options.level.clone(),
            reason: err.to_string(),
        })?,
    };

    let installed = if options.json {
        let layer = fmt::layer()
            .json()
            .with_current_span(false)
            .with_target(true)
            .with_writer(std::io::stderr);
        tracing::subscriber::set_global_default(Registry::default().with(filter).with(layer))
    } else {
        let layer = fmt::layer()
            .with_ansi(options.ansi)
            .with_target(false)
            .with_thread_ids(true)
            .with_writer(std::io::stderr);
        tracing::subscriber::set_global_default(Registry::default().with(filter).with(layer))
    };
    installed.map_err(|err| TracingError::Install(err.to_string()))?;

    Ok(INIT.set(()).is_ok())
}

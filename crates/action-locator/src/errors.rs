//! Error types for locator system

use thiserror::Error;

/// Locator error enumeration
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LocatorError {
    /// Every declared locator probed negative
    #[error("No locator matched '{logical_name}' on {site} (tried {})", .tried.join(", "))]
    NotFound {
        site: String,
        logical_name: String,
        tried: Vec<String>,
    },

    /// The catalog has no entry for this site/logical name
    #[error("No selectors configured for '{logical_name}' on {site}")]
    UnknownTarget { site: String, logical_name: String },

    /// No recipe with this name for the site
    #[error("No navigation recipe '{recipe}' for {site}")]
    UnknownRecipe { site: String, recipe: String },

    /// Catalog or recipe file could not be parsed or validated
    #[error("Invalid catalog: {0}")]
    InvalidCatalog(String),

    /// Reading a catalog file failed
    #[error("Catalog I/O error: {0}")]
    Io(String),
}

impl LocatorError {
    /// Exhaustion may clear up once the page settles; configuration errors never do.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LocatorError::NotFound { .. })
    }
}

impl From<std::io::Error> for LocatorError {
    fn from(err: std::io::Error) -> Self {
        LocatorError::Io(err.to_string())
    }
}

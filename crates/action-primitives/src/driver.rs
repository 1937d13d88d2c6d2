//! The UI driving capability
//!
//! Adapters never talk to a browser or the desktop directly. They receive a
//! [`UiDriver`] and issue probe/act calls through it, so a production binding
//! (CDP session, synthetic OS input) and a scripted fake are interchangeable.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::errors::DriverError;
use crate::types::ExecCtx;

#[async_trait]
pub trait UiDriver: Send + Sync {
    /// Whether locator-based driving is available. When false, adapters fall
    /// back to human-navigation recipes (hotkeys and typed input).
    fn supports_selectors(&self) -> bool;

    /// Test whether a locator currently matches something actionable.
    async fn probe(&self, locator: &str) -> Result<bool, DriverError>;

    async fn navigate(&self, ctx: &ExecCtx, url: &str) -> Result<(), DriverError>;

    async fn click(&self, ctx: &ExecCtx, locator: &str) -> Result<(), DriverError>;

    async fn fill(&self, ctx: &ExecCtx, locator: &str, text: &str) -> Result<(), DriverError>;

    async fn press(&self, ctx: &ExecCtx, key: &str) -> Result<(), DriverError>;

    async fn hotkey(&self, ctx: &ExecCtx, keys: &[String]) -> Result<(), DriverError>;

    /// Type into whatever currently holds focus.
    async fn type_text(&self, ctx: &ExecCtx, text: &str) -> Result<(), DriverError>;

    async fn read_texts(
        &self,
        ctx: &ExecCtx,
        locator: &str,
        limit: usize,
    ) -> Result<Vec<String>, DriverError>;

    async fn current_url(&self) -> Option<String>;

    /// Short visible-text excerpt of the current page or window.
    async fn page_excerpt(&self, max_chars: usize) -> Option<String>;

    /// Capture the current view; returns the stored path when supported.
    async fn capture(&self, label: &str) -> Result<Option<PathBuf>, DriverError>;
}

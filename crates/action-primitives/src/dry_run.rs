//! Driver that records calls instead of touching a real UI

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use tracing::debug;

use crate::driver::UiDriver;
use crate::errors::DriverError;
use crate::types::{DriverCall, ExecCtx};

#[derive(Default)]
struct DryRunState {
    url: Option<String>,
    excerpt: Option<String>,
    calls: Vec<DriverCall>,
    failures: HashMap<String, VecDeque<DriverError>>,
}

/// Records every interaction and answers probes from a configurable model.
///
/// Every locator matches unless listed as missing. Scripted failures can be
/// queued per locator (or per key for `press`) and are consumed one per call.
pub struct DryRunDriver {
    selectors: bool,
    missing: HashSet<String>,
    texts: HashMap<String, Vec<String>>,
    state: Mutex<DryRunState>,
}

impl Default for DryRunDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl DryRunDriver {
    pub fn new() -> Self {
        Self {
            selectors: true,
            missing: HashSet::new(),
            texts: HashMap::new(),
            state: Mutex::new(DryRunState::default()),
        }
    }

    /// Driver without selector support (desktop-style driving).
    pub fn keyboard_only() -> Self {
        Self {
            selectors: false,
            ..Self::new()
        }
    }

    pub fn with_missing<I, S>(mut self, locators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.missing.extend(locators.into_iter().map(Into::into));
        self
    }

    pub fn with_texts(mut self, locator: impl Into<String>, texts: Vec<String>) -> Self {
        self.texts.insert(locator.into(), texts);
        self
    }

    pub fn with_page(self, url: impl Into<String>, excerpt: impl Into<String>) -> Self {
        {
            let mut state = self.state.lock();
            state.url = Some(url.into());
            state.excerpt = Some(excerpt.into());
        }
        self
    }

    /// Queue a failure returned by the next act call on `target`.
    pub fn fail_next(&self, target: impl Into<String>, error: DriverError) {
        self.state
            .lock()
            .failures
            .entry(target.into())
            .or_default()
            .push_back(error);
    }

    pub fn set_page(&self, url: impl Into<String>, excerpt: impl Into<String>) {
        let mut state = self.state.lock();
        state.url = Some(url.into());
        state.excerpt = Some(excerpt.into());
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.state.lock().calls.clone()
    }

    fn act(&self, target: &str, call: DriverCall) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        if let Some(queue) = state.failures.get_mut(target) {
            if let Some(error) = queue.pop_front() {
                debug!(key = target, %error, "dry-run driver returning scripted failure");
                return Err(error);
            }
        }
        state.calls.push(call);
        Ok(())
    }

    fn check_cancel(ctx: &ExecCtx) -> Result<(), DriverError> {
        if ctx.is_cancelled() {
            return Err(DriverError::Interrupted(ctx.action_id.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl UiDriver for DryRunDriver {
    fn supports_selectors(&self) -> bool {
        self.selectors
    }

    async fn probe(&self, locator: &str) -> Result<bool, DriverError> {
        let matched = self.selectors && !self.missing.contains(locator);
        self.state.lock().calls.push(DriverCall::Probe {
            locator: locator.to_string(),
            matched,
        });
        Ok(matched)
    }

    async fn navigate(&self, ctx: &ExecCtx, url: &str) -> Result<(), DriverError> {
        Self::check_cancel(ctx)?;
        self.act(
            url,
            DriverCall::Navigate {
                url: url.to_string(),
            },
        )?;
        self.state.lock().url = Some(url.to_string());
        Ok(())
    }

    async fn click(&self, ctx: &ExecCtx, locator: &str) -> Result<(), DriverError> {
        Self::check_cancel(ctx)?;
        if self.missing.contains(locator) {
            return Err(DriverError::TargetNotFound(locator.to_string()));
        }
        self.act(
            locator,
            DriverCall::Click {
                locator: locator.to_string(),
            },
        )
    }

    async fn fill(&self, ctx: &ExecCtx, locator: &str, text: &str) -> Result<(), DriverError> {
        Self::check_cancel(ctx)?;
        if self.missing.contains(locator) {
            return Err(DriverError::TargetNotFound(locator.to_string()));
        }
        self.act(
            locator,
            DriverCall::Fill {
                locator: locator.to_string(),
                text: text.to_string(),
            },
        )
    }

    async fn press(&self, ctx: &ExecCtx, key: &str) -> Result<(), DriverError> {
        Self::check_cancel(ctx)?;
        self.act(
            key,
            DriverCall::Press {
                key: key.to_string(),
            },
        )
    }

    async fn hotkey(&self, ctx: &ExecCtx, keys: &[String]) -> Result<(), DriverError> {
        Self::check_cancel(ctx)?;
        self.act(
            &keys.join("+"),
            DriverCall::Hotkey {
                keys: keys.to_vec(),
            },
        )
    }

    async fn type_text(&self, ctx: &ExecCtx, text: &str) -> Result<(), DriverError> {
        Self::check_cancel(ctx)?;
        self.act(
            text,
            DriverCall::TypeText {
                text: text.to_string(),
            },
        )
    }

    async fn read_texts(
        &self,
        ctx: &ExecCtx,
        locator: &str,
        limit: usize,
    ) -> Result<Vec<String>, DriverError> {
        Self::check_cancel(ctx)?;
        self.act(
            locator,
            DriverCall::ReadTexts {
                locator: locator.to_string(),
            },
        )?;
        Ok(self
            .texts
            .get(locator)
            .map(|texts| texts.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn current_url(&self) -> Option<String> {
        self.state.lock().url.clone()
    }

    async fn page_excerpt(&self, max_chars: usize) -> Option<String> {
        self.state
            .lock()
            .excerpt
            .as_ref()
            .map(|text| text.chars().take(max_chars).collect())
    }

    async fn capture(&self, label: &str) -> Result<Option<PathBuf>, DriverError> {
        self.state.lock().calls.push(DriverCall::Capture {
            label: label.to_string(),
        });
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn probes_follow_missing_set() {
        let driver = DryRunDriver::new().with_missing([".gone"]);
        tokio_test::block_on(async {
            assert!(driver.probe(".here").await.unwrap());
            assert!(!driver.probe(".gone").await.unwrap());
        });
        assert_eq!(driver.calls().len(), 2);
    }

    #[test]
    fn keyboard_only_driver_never_matches() {
        let driver = DryRunDriver::keyboard_only();
        assert!(!driver.supports_selectors());
        assert!(!tokio_test::block_on(driver.probe("#anything")).unwrap());
    }

    #[test]
    fn scripted_failure_is_consumed_once() {
        let driver = DryRunDriver::new();
        let ctx = ExecCtx::detached(Duration::from_secs(5));
        driver.fail_next(".send", DriverError::Timeout("slow".into()));
        tokio_test::block_on(async {
            assert!(driver.click(&ctx, ".send").await.is_err());
            assert!(driver.click(&ctx, ".send").await.is_ok());
        });
        assert_eq!(
            driver.calls(),
            vec![DriverCall::Click {
                locator: ".send".into()
            }]
        );
    }

    #[test]
    fn navigate_updates_current_url() {
        let driver = DryRunDriver::new();
        let ctx = ExecCtx::detached(Duration::from_secs(5));
        tokio_test::block_on(async {
            driver.navigate(&ctx, "https://example.test").await.unwrap();
            assert_eq!(
                driver.current_url().await.as_deref(),
                Some("https://example.test")
            );
        });
    }
}

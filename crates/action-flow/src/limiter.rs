//! Dispatch pacing: a minimum gap between actions and a rolling per-minute cap

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const WINDOW: Duration = Duration::from_secs(60);
const MIN_WINDOW_WAIT: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// Zero disables the per-minute cap
    pub max_per_minute: u32,
    #[serde(with = "duration_str")]
    pub min_interval: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_per_minute: 45,
            min_interval: Duration::from_millis(80),
        }
    }
}

impl LimiterConfig {
    pub fn disabled() -> Self {
        Self {
            max_per_minute: 0,
            min_interval: Duration::ZERO,
        }
    }
}

#[derive(Default)]
struct Window {
    recent: VecDeque<Instant>,
    last: Option<Instant>,
}

pub struct ActionLimiter {
    config: LimiterConfig,
    window: Mutex<Window>,
}

impl ActionLimiter {
    pub fn new(config: LimiterConfig) -> Self {
        Self {
            config,
            window: Mutex::new(Window::default()),
        }
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Wait for a dispatch slot. Returns `false` when cancelled while waiting.
    pub async fn acquire(&self, cancel: &CancellationToken) -> bool {
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            let wait = match self.try_take(Instant::now()) {
                None => return true,
                Some(wait) => wait,
            };
            debug!(wait_ms = wait.as_millis() as u64, "action limiter pause");
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Claim a slot at `now`, or report how long to wait for one.
    fn try_take(&self, now: Instant) -> Option<Duration> {
        let mut window = self.window.lock();
        while let Some(front) = window.recent.front() {
            if now.saturating_duration_since(*front) >= WINDOW {
                window.recent.pop_front();
            } else {
                break;
            }
        }

        let mut wait = Duration::ZERO;
        if let Some(last) = window.last {
            let since = now.saturating_duration_since(last);
            if since < self.config.min_interval {
                wait = self.config.min_interval - since;
            }
        }
        let cap = self.config.max_per_minute as usize;
        if cap > 0 && window.recent.len() >= cap {
            if let Some(oldest) = window.recent.front() {
                let until_free = (*oldest + WINDOW).saturating_duration_since(now);
                wait = wait.max(until_free.max(MIN_WINDOW_WAIT));
            }
        }

        if wait.is_zero() {
            window.recent.push_back(now);
            window.last = Some(now);
            None
        } else {
            Some(wait)
        }
    }
}

impl Default for ActionLimiter {
    fn default() -> Self {
        Self::new(LimiterConfig::default())
    }
}

pub(crate) mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
    }
}

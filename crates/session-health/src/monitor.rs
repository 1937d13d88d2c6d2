use action_primitives::UiDriver;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::SessionError;

const EXCERPT_CHARS: usize = 4_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Healthy,
    LoginExpired,
    /// Nothing conclusive either way; callers proceed.
    Unknown,
}

/// Per-site markers used to classify the session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionProfile {
    /// Locators that only exist on a login prompt.
    pub login_markers: Vec<String>,
    /// Locators that only exist once signed in.
    pub authenticated_markers: Vec<String>,
    /// Regexes matched against the current URL.
    pub login_url_patterns: Vec<String>,
    /// Lowercase phrases searched in the visible page text.
    pub login_text_hints: Vec<String>,
    /// Treat a missing authenticated marker as a login signal on its own.
    pub require_authenticated_marker: bool,
    /// Adapter action invoked to restore the session.
    pub recovery_action: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum SessionSignal {
    LoginPromptVisible { locator: String },
    RedirectedToLogin { url: String },
    LoginTextHint { hint: String },
    AuthenticatedMarkerMissing,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: SessionStatus,
    pub signals: Vec<SessionSignal>,
    pub authenticated_marker: Option<String>,
}

pub struct SessionMonitor {
    profile: SessionProfile,
    url_patterns: Vec<Regex>,
}

impl SessionMonitor {
    pub fn new(profile: SessionProfile) -> Result<Self, SessionError> {
        let url_patterns = profile
            .login_url_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|err| SessionError::InvalidPattern {
                    pattern: pattern.clone(),
                    reason: err.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            profile,
            url_patterns,
        })
    }

    pub fn profile(&self) -> &SessionProfile {
        &self.profile
    }

    /// Fresh classification; nothing is cached between calls.
    pub async fn check(&self, driver: &dyn UiDriver) -> HealthReport {
        let mut signals = Vec::new();

        for locator in &self.profile.login_markers {
            if probe(driver, locator).await {
                signals.push(SessionSignal::LoginPromptVisible {
                    locator: locator.clone(),
                });
                break;
            }
        }

        if let Some(url) = driver.current_url().await {
            if self.url_patterns.iter().any(|re| re.is_match(&url)) {
                signals.push(SessionSignal::RedirectedToLogin { url });
            }
        }

        if !self.profile.login_text_hints.is_empty() {
            if let Some(excerpt) = driver.page_excerpt(EXCERPT_CHARS).await {
                let lowered = excerpt.to_lowercase();
                if let Some(hint) = self
                    .profile
                    .login_text_hints
                    .iter()
                    .find(|hint| lowered.contains(&hint.to_lowercase()))
                {
                    signals.push(SessionSignal::LoginTextHint { hint: hint.clone() });
                }
            }
        }

        let mut authenticated_marker = None;
        for locator in &self.profile.authenticated_markers {
            if probe(driver, locator).await {
                authenticated_marker = Some(locator.clone());
                break;
            }
        }
        if authenticated_marker.is_none() && self.profile.require_authenticated_marker {
            signals.push(SessionSignal::AuthenticatedMarkerMissing);
        }

        let status = if !signals.is_empty() {
            SessionStatus::LoginExpired
        } else if authenticated_marker.is_some() {
            SessionStatus::Healthy
        } else {
            SessionStatus::Unknown
        };

        debug!(?status, signals = signals.len(), "session check");
        HealthReport {
            status,
            signals,
            authenticated_marker,
        }
    }
}

async fn probe(driver: &dyn UiDriver, locator: &str) -> bool {
    match driver.probe(locator).await {
        Ok(matched) => matched,
        Err(err) => {
            debug!(locator, "session probe failed: {}", err);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use action_primitives::DryRunDriver;

    fn profile() -> SessionProfile {
        SessionProfile {
            login_markers: vec!["#login-form".into()],
            authenticated_markers: vec!["#side".into()],
            login_url_patterns: vec![r"/accounts/login".into()],
            login_text_hints: vec!["use whatsapp on your computer".into()],
            ..SessionProfile::default()
        }
    }

    #[tokio::test]
    async fn healthy_when_marker_present_and_no_signals() {
        let monitor = SessionMonitor::new(profile()).unwrap();
        let driver = DryRunDriver::new()
            .with_missing(["#login-form"])
            .with_page("https://web.whatsapp.com/", "Chats");
        let report = monitor.check(&driver).await;
        assert_eq!(report.status, SessionStatus::Healthy);
        assert_eq!(report.authenticated_marker.as_deref(), Some("#side"));
    }

    #[tokio::test]
    async fn any_single_signal_means_login_expired() {
        let monitor = SessionMonitor::new(profile()).unwrap();

        let redirected = DryRunDriver::new()
            .with_missing(["#login-form"])
            .with_page("https://site.test/accounts/login?next=/", "");
        let report = monitor.check(&redirected).await;
        assert_eq!(report.status, SessionStatus::LoginExpired);
        assert!(matches!(
            report.signals[0],
            SessionSignal::RedirectedToLogin { .. }
        ));

        let hinted = DryRunDriver::new()
            .with_missing(["#login-form"])
            .with_page("https://web.whatsapp.com/", "To use WhatsApp on your computer:");
        assert_eq!(monitor.check(&hinted).await.status, SessionStatus::LoginExpired);
    }

    #[tokio::test]
    async fn unknown_without_markers() {
        let monitor = SessionMonitor::new(profile()).unwrap();
        let driver = DryRunDriver::new()
            .with_missing(["#login-form", "#side"])
            .with_page("https://web.whatsapp.com/", "loading");
        assert_eq!(monitor.check(&driver).await.status, SessionStatus::Unknown);
    }

    #[tokio::test]
    async fn required_marker_turns_absence_into_signal() {
        let mut profile = profile();
        profile.require_authenticated_marker = true;
        let monitor = SessionMonitor::new(profile).unwrap();
        let driver = DryRunDriver::new().with_missing(["#login-form", "#side"]);
        let report = monitor.check(&driver).await;
        assert_eq!(report.status, SessionStatus::LoginExpired);
        assert_eq!(report.signals, vec![SessionSignal::AuthenticatedMarkerMissing]);
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let profile = SessionProfile {
            login_url_patterns: vec!["(".into()],
            ..SessionProfile::default()
        };
        assert!(SessionMonitor::new(profile).is_err());
    }
}

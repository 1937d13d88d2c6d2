//! Confirmation broker
//!
//! Sensitive actions are bound to a single-use token by `prepare` and only
//! run after `confirm`. Each token moves `Pending -> Consumed | Expired |
//! Cancelled` exactly once; the map's per-entry lock makes concurrent
//! confirms on one token race-free.

use std::sync::Arc;
use std::time::Duration;

use autobot_core_types::Params;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);

/// The exact action a token authorizes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub adapter: String,
    pub action: String,
    pub params: Params,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    Pending,
    Consumed,
    Expired,
    Cancelled,
}

/// Read-only view of a token.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingConfirmation {
    pub token: String,
    pub binding: Binding,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub state: TokenState,
    /// A suspended run is waiting on this token.
    pub awaited: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PreparedConfirmation {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub binding: Binding,
}

/// Delivered to a suspended run when its token resolves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    Confirmed,
    Cancelled,
    Expired,
}

/// What the confirming caller should do next.
#[derive(Clone, Debug, PartialEq)]
pub enum ConfirmOutcome {
    /// A suspended run was resumed and executes the action itself.
    Resumed(Binding),
    /// Nobody is waiting; the caller executes the bound action now.
    Execute(Binding),
}

impl ConfirmOutcome {
    pub fn binding(&self) -> &Binding {
        match self {
            ConfirmOutcome::Resumed(binding) | ConfirmOutcome::Execute(binding) => binding,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfirmError {
    #[error("confirmation token not found: {0}")]
    TokenNotFound(String),
    #[error("confirmation token expired: {0}")]
    TokenExpired(String),
    #[error("confirmation token already consumed: {0}")]
    TokenAlreadyConsumed(String),
    #[error("confirmation token was cancelled: {0}")]
    TokenCancelled(String),
    #[error("invalid broker configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationEventKind {
    Prepared,
    Confirmed,
    Expired,
    Cancelled,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfirmationEvent {
    pub token: String,
    pub adapter: String,
    pub action: String,
    pub kind: ConfirmationEventKind,
    pub timestamp: DateTime<Utc>,
}

struct Entry {
    binding: Binding,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    deadline: Instant,
    settled_at: Option<Instant>,
    state: TokenState,
    waiter: Option<oneshot::Sender<Resolution>>,
}

impl Entry {
    fn view(&self, token: &str) -> PendingConfirmation {
        PendingConfirmation {
            token: token.to_string(),
            binding: self.binding.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            state: self.state,
            awaited: self.waiter.is_some(),
        }
    }

    fn settle(&mut self, state: TokenState, now: Instant) -> Option<oneshot::Sender<Resolution>> {
        self.state = state;
        self.settled_at = Some(now);
        self.waiter.take()
    }

    fn terminal_error(&self, token: &str) -> Option<ConfirmError> {
        match self.state {
            TokenState::Pending => None,
            TokenState::Consumed => Some(ConfirmError::TokenAlreadyConsumed(token.to_string())),
            TokenState::Expired => Some(ConfirmError::TokenExpired(token.to_string())),
            TokenState::Cancelled => Some(ConfirmError::TokenCancelled(token.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct BrokerConfig {
    pub ttl: Duration,
    /// How long settled tokens are remembered so late confirms get a precise error.
    pub retention: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            retention: DEFAULT_RETENTION,
        }
    }
}

impl BrokerConfig {
    pub fn from_strings(ttl: &str, retention: &str) -> Result<Self, ConfirmError> {
        Ok(Self {
            ttl: parse_duration(ttl)?,
            retention: parse_duration(retention)?,
        })
    }
}

fn parse_duration(raw: &str) -> Result<Duration, ConfirmError> {
    let duration = humantime::parse_duration(raw.trim())
        .map_err(|_| ConfirmError::InvalidConfig(format!("invalid duration: {raw}")))?;
    if duration.is_zero() {
        return Err(ConfirmError::InvalidConfig(format!(
            "duration must be positive: {raw}"
        )));
    }
    Ok(duration)
}

/// In-memory token store. Tokens do not survive a restart.
pub struct ConfirmationBroker {
    entries: DashMap<String, Entry>,
    config: BrokerConfig,
    events: broadcast::Sender<ConfirmationEvent>,
}

impl Default for ConfirmationBroker {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

impl ConfirmationBroker {
    pub fn new(config: BrokerConfig) -> Self {
        let (events, _rx) = broadcast::channel(128);
        Self {
            entries: DashMap::new(),
            config,
            events,
        }
    }

    pub fn shared(config: BrokerConfig) -> Arc<Self> {
        Arc::new(Self::new(config))
    }

    pub fn ttl(&self) -> Duration {
        self.config.ttl
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConfirmationEvent> {
        self.events.subscribe()
    }

    /// Bind an action to a fresh token. Never executes anything.
    pub fn prepare(
        &self,
        adapter: impl Into<String>,
        action: impl Into<String>,
        params: Params,
    ) -> PreparedConfirmation {
        self.insert(
            Binding {
                adapter: adapter.into(),
                action: action.into(),
                params,
            },
            None,
        )
    }

    /// Like [`prepare`](Self::prepare), for a run that suspends until the
    /// token resolves.
    pub fn prepare_for_waiter(
        &self,
        binding: Binding,
    ) -> (PreparedConfirmation, oneshot::Receiver<Resolution>) {
        let (tx, rx) = oneshot::channel();
        (self.insert(binding, Some(tx)), rx)
    }

    fn insert(
        &self,
        binding: Binding,
        waiter: Option<oneshot::Sender<Resolution>>,
    ) -> PreparedConfirmation {
        let token = new_token();
        let created_at = Utc::now();
        let expires_at = created_at
            + chrono::Duration::from_std(self.config.ttl)
                .unwrap_or_else(|_| chrono::Duration::days(365));
        let entry = Entry {
            binding: binding.clone(),
            created_at,
            expires_at,
            deadline: Instant::now() + self.config.ttl,
            settled_at: None,
            state: TokenState::Pending,
            waiter,
        };
        self.entries.insert(token.clone(), entry);
        info!(
            token = %token,
            adapter = %binding.adapter,
            action = %binding.action,
            "confirmation prepared"
        );
        self.emit(&token, &binding, ConfirmationEventKind::Prepared);
        PreparedConfirmation {
            token,
            expires_at,
            binding,
        }
    }

    /// Consume the token. Succeeds at most once per token.
    pub fn confirm(&self, token: &str) -> Result<ConfirmOutcome, ConfirmError> {
        let now = Instant::now();
        let mut entry = self
            .entries
            .get_mut(token)
            .ok_or_else(|| ConfirmError::TokenNotFound(token.to_string()))?;

        if let Some(err) = entry.terminal_error(token) {
            return Err(err);
        }

        if now >= entry.deadline {
            if let Some(waiter) = entry.settle(TokenState::Expired, now) {
                let _ = waiter.send(Resolution::Expired);
            }
            let binding = entry.binding.clone();
            drop(entry);
            self.emit(token, &binding, ConfirmationEventKind::Expired);
            return Err(ConfirmError::TokenExpired(token.to_string()));
        }

        let binding = entry.binding.clone();
        let outcome = match entry.settle(TokenState::Consumed, now) {
            Some(waiter) => {
                if waiter.send(Resolution::Confirmed).is_err() {
                    // The suspended run already gave up; the action must not run.
                    entry.state = TokenState::Expired;
                    drop(entry);
                    warn!(token, "confirmation arrived after the run stopped waiting");
                    self.emit(token, &binding, ConfirmationEventKind::Expired);
                    return Err(ConfirmError::TokenExpired(token.to_string()));
                }
                ConfirmOutcome::Resumed(binding.clone())
            }
            None => ConfirmOutcome::Execute(binding.clone()),
        };
        drop(entry);

        info!(token, adapter = %binding.adapter, action = %binding.action, "confirmation consumed");
        self.emit(token, &binding, ConfirmationEventKind::Confirmed);
        Ok(outcome)
    }

    /// Reviewer declined the action.
    pub fn cancel(&self, token: &str) -> Result<PendingConfirmation, ConfirmError> {
        let now = Instant::now();
        let mut entry = self
            .entries
            .get_mut(token)
            .ok_or_else(|| ConfirmError::TokenNotFound(token.to_string()))?;
        if let Some(err) = entry.terminal_error(token) {
            return Err(err);
        }
        let state = if now >= entry.deadline {
            TokenState::Expired
        } else {
            TokenState::Cancelled
        };
        if let Some(waiter) = entry.settle(state, now) {
            let _ = waiter.send(match state {
                TokenState::Expired => Resolution::Expired,
                _ => Resolution::Cancelled,
            });
        }
        let view = entry.view(token);
        drop(entry);

        if state == TokenState::Expired {
            self.emit(token, &view.binding, ConfirmationEventKind::Expired);
            return Err(ConfirmError::TokenExpired(token.to_string()));
        }
        info!(token, "confirmation cancelled");
        self.emit(token, &view.binding, ConfirmationEventKind::Cancelled);
        Ok(view)
    }

    /// Called by a waiter that stops waiting (timeout, run cancelled).
    pub fn abandon(&self, token: &str) {
        let now = Instant::now();
        let binding = match self.entries.get_mut(token) {
            Some(mut entry) if entry.state == TokenState::Pending => {
                entry.settle(TokenState::Expired, now);
                entry.binding.clone()
            }
            _ => return,
        };
        debug!(token, "confirmation abandoned by waiter");
        self.emit(token, &binding, ConfirmationEventKind::Expired);
    }

    pub fn get(&self, token: &str) -> Option<PendingConfirmation> {
        self.entries.get(token).map(|entry| entry.view(token))
    }

    /// Tokens still awaiting a decision, oldest first.
    pub fn pending(&self) -> Vec<PendingConfirmation> {
        let now = Instant::now();
        let mut items: Vec<PendingConfirmation> = self
            .entries
            .iter()
            .filter(|entry| entry.state == TokenState::Pending && now < entry.deadline)
            .map(|entry| entry.view(entry.key()))
            .collect();
        items.sort_by_key(|item| item.created_at);
        items
    }

    /// Expire overdue tokens and forget settled ones past retention.
    /// Returns the number of tokens that expired in this sweep.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut expired = Vec::new();
        for mut entry in self.entries.iter_mut() {
            if entry.state == TokenState::Pending && now >= entry.deadline {
                if let Some(waiter) = entry.settle(TokenState::Expired, now) {
                    let _ = waiter.send(Resolution::Expired);
                }
                expired.push((entry.key().clone(), entry.binding.clone()));
            }
        }
        let retention = self.config.retention;
        self.entries.retain(|_, entry| match entry.settled_at {
            Some(settled) => now.saturating_duration_since(settled) < retention,
            None => true,
        });
        for (token, binding) in &expired {
            self.emit(token, binding, ConfirmationEventKind::Expired);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn emit(&self, token: &str, binding: &Binding, kind: ConfirmationEventKind) {
        let event = ConfirmationEvent {
            token: token.to_string(),
            adapter: binding.adapter.clone(),
            action: binding.action.clone(),
            kind,
            timestamp: Utc::now(),
        };
        if self.events.send(event).is_err() {
            debug!(token, ?kind, "no confirmation event subscribers");
        }
    }
}

/// 122 random bits, hex encoded; safe to show to a reviewer.
fn new_token() -> String {
    format!("cfm_{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params() -> Params {
        json!({"chat": "Mom", "text": "hi"}).as_object().cloned().unwrap()
    }

    #[test]
    fn tokens_are_unique_and_opaque() {
        let broker = ConfirmationBroker::default();
        let a = broker.prepare("whatsapp_web", "send_message_to_chat", params());
        let b = broker.prepare("whatsapp_web", "send_message_to_chat", params());
        assert_ne!(a.token, b.token);
        assert!(a.token.starts_with("cfm_"));
        assert_eq!(a.token.len(), 36);
    }

    #[test]
    fn confirm_without_waiter_hands_back_binding() {
        let broker = ConfirmationBroker::default();
        let prepared = broker.prepare("whatsapp_web", "send_message_to_chat", params());
        match broker.confirm(&prepared.token).unwrap() {
            ConfirmOutcome::Execute(binding) => {
                assert_eq!(binding.action, "send_message_to_chat");
                assert_eq!(binding.params, params());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(
            broker.get(&prepared.token).unwrap().state,
            TokenState::Consumed
        );
    }

    #[test]
    fn second_confirm_fails() {
        let broker = ConfirmationBroker::default();
        let prepared = broker.prepare("overleaf_web", "download_pdf", Params::new());
        broker.confirm(&prepared.token).unwrap();
        assert_eq!(
            broker.confirm(&prepared.token),
            Err(ConfirmError::TokenAlreadyConsumed(prepared.token.clone()))
        );
    }

    #[test]
    fn unknown_token() {
        let broker = ConfirmationBroker::default();
        assert!(matches!(
            broker.confirm("cfm_nope"),
            Err(ConfirmError::TokenNotFound(_))
        ));
    }

    #[test]
    fn cancelled_token_cannot_be_confirmed() {
        let broker = ConfirmationBroker::default();
        let prepared = broker.prepare("overleaf_web", "download_pdf", Params::new());
        broker.cancel(&prepared.token).unwrap();
        assert!(matches!(
            broker.confirm(&prepared.token),
            Err(ConfirmError::TokenCancelled(_))
        ));
        assert!(broker.pending().is_empty());
    }

    #[test]
    fn rejects_bad_durations() {
        assert!(BrokerConfig::from_strings("5m", "1h").is_ok());
        assert!(BrokerConfig::from_strings("soon", "1h").is_err());
        assert!(BrokerConfig::from_strings("0s", "1h").is_err());
    }
}

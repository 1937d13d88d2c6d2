//! Runtime-settable policy profile

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::model::{PolicyProfile, PolicySource};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileState {
    pub profile: PolicyProfile,
    pub source: PolicySource,
    pub revision: u64,
}

/// The one piece of policy state the executor reads before each step.
///
/// Cloning shares the same underlying value; changes apply to the next
/// evaluated step of every run holding a clone.
#[derive(Clone)]
pub struct ProfileHandle {
    tx: Arc<watch::Sender<ProfileState>>,
}

impl ProfileHandle {
    pub fn new(profile: PolicyProfile, source: PolicySource) -> Self {
        let (tx, _rx) = watch::channel(ProfileState {
            profile,
            source,
            revision: 0,
        });
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> PolicyProfile {
        self.tx.borrow().profile
    }

    pub fn state(&self) -> ProfileState {
        *self.tx.borrow()
    }

    pub fn set(&self, profile: PolicyProfile, source: PolicySource) -> ProfileState {
        let mut next = self.state();
        self.tx.send_modify(|state| {
            state.profile = profile;
            state.source = source;
            state.revision = state.revision.saturating_add(1);
            next = *state;
        });
        info!(profile = %profile, ?source, revision = next.revision, "policy profile set");
        next
    }

    /// Switch profile for `ttl`, then restore the previous one unless the
    /// profile was changed again in the meantime. Must run inside a runtime.
    pub fn set_for(&self, profile: PolicyProfile, ttl: Duration) -> ProfileState {
        let previous = self.state();
        let applied = self.set(profile, PolicySource::Runtime);
        let tx = Arc::clone(&self.tx);
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let mut restored = false;
            tx.send_if_modified(|state| {
                if state.revision != applied.revision {
                    return false;
                }
                state.profile = previous.profile;
                state.source = previous.source;
                state.revision = state.revision.saturating_add(1);
                restored = true;
                true
            });
            if restored {
                info!(profile = %previous.profile, "temporary policy profile expired");
            } else {
                debug!("temporary policy profile superseded before expiry");
            }
        });
        applied
    }

    pub fn subscribe(&self) -> watch::Receiver<ProfileState> {
        self.tx.subscribe()
    }
}

impl Default for ProfileHandle {
    fn default() -> Self {
        Self::new(PolicyProfile::default(), PolicySource::Builtin)
    }
}

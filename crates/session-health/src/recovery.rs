use action_primitives::UiDriver;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

use crate::errors::SessionError;
use crate::monitor::{SessionMonitor, SessionStatus};

/// One recovery attempt per step. Create a fresh budget for every step.
#[derive(Debug, Default)]
pub struct RecoveryBudget {
    spent: AtomicBool,
}

impl RecoveryBudget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true exactly once.
    pub fn try_consume(&self) -> bool {
        !self.spent.swap(true, Ordering::AcqRel)
    }

    pub fn is_spent(&self) -> bool {
        self.spent.load(Ordering::Acquire)
    }
}

/// Checks the session before an action and runs the recovery protocol.
pub struct SessionGuard<'a> {
    monitor: &'a SessionMonitor,
    driver: &'a dyn UiDriver,
}

impl<'a> SessionGuard<'a> {
    pub fn new(monitor: &'a SessionMonitor, driver: &'a dyn UiDriver) -> Self {
        Self { monitor, driver }
    }

    /// `Healthy` and `Unknown` pass through. `LoginExpired` triggers `recover`
    /// at most once per budget; the step may only continue if the re-check
    /// comes back `Healthy`.
    pub async fn ensure<F, Fut>(
        &self,
        budget: &RecoveryBudget,
        recover: F,
    ) -> Result<SessionStatus, SessionError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), String>>,
    {
        let report = self.monitor.check(self.driver).await;
        if report.status != SessionStatus::LoginExpired {
            return Ok(report.status);
        }

        if !budget.try_consume() {
            return Err(SessionError::RecoveryFailed {
                status: SessionStatus::LoginExpired,
                reason: "recovery already attempted for this step".to_string(),
            });
        }

        info!(signals = ?report.signals, "login expired, attempting recovery");
        if let Err(reason) = recover().await {
            warn!("session recovery action failed: {}", reason);
            return Err(SessionError::RecoveryFailed {
                status: SessionStatus::LoginExpired,
                reason,
            });
        }

        let after = self.monitor.check(self.driver).await;
        match after.status {
            SessionStatus::Healthy => {
                info!("session restored");
                Ok(SessionStatus::Healthy)
            }
            status => {
                warn!(?status, "session still unusable after recovery");
                Err(SessionError::RecoveryFailed {
                    status,
                    reason: "session not healthy after recovery".to_string(),
                })
            }
        }
    }
}

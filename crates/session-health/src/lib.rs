//! Session health monitoring
//!
//! Classifies whether the UI session behind an adapter is still usable and
//! guards the single recovery attempt allowed per step.

mod errors;
mod monitor;
mod recovery;

pub use errors::SessionError;
pub use monitor::{HealthReport, SessionMonitor, SessionProfile, SessionSignal, SessionStatus};
pub use recovery::{RecoveryBudget, SessionGuard};

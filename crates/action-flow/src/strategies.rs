//! What to do after a failed dispatch attempt

use autobot_core_types::FailureKind;

/// Next move after one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptMove {
    Retry,
    /// The step failed for good
    GiveUp,
}

/// `attempt` is 1-based; `allowed` is `retries + 1`.
pub fn after_failed_attempt(kind: FailureKind, transient: bool, attempt: u32, allowed: u32) -> AttemptMove {
    if kind == FailureKind::Cancelled || !transient || attempt >= allowed {
        AttemptMove::GiveUp
    } else {
        AttemptMove::Retry
    }
}

/// How a terminal step failure affects the rest of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepFailureMove {
    Continue,
    Abort,
    Cancel,
}

pub fn after_failed_step(kind: FailureKind, continue_on_error: bool) -> StepFailureMove {
    match kind {
        FailureKind::Cancelled => StepFailureMove::Cancel,
        _ if continue_on_error => StepFailureMove::Continue,
        _ => StepFailureMove::Abort,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retries_only_transient_failures_within_budget() {
        use AttemptMove::*;
        assert_eq!(after_failed_attempt(FailureKind::SelectorNotFound, true, 1, 2), Retry);
        assert_eq!(after_failed_attempt(FailureKind::SelectorNotFound, true, 2, 2), GiveUp);
        assert_eq!(after_failed_attempt(FailureKind::AdapterError, false, 1, 3), GiveUp);
        assert_eq!(after_failed_attempt(FailureKind::Cancelled, true, 1, 3), GiveUp);
    }

    #[test]
    fn cancellation_wins_over_continue_on_error() {
        assert_eq!(after_failed_step(FailureKind::Cancelled, true), StepFailureMove::Cancel);
        assert_eq!(after_failed_step(FailureKind::PolicyDenied, true), StepFailureMove::Continue);
        assert_eq!(after_failed_step(FailureKind::PolicyDenied, false), StepFailureMove::Abort);
    }
}

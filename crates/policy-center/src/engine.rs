//! Gate decisions

use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::time::Instant;
use tracing::debug;

use crate::errors::PolicyError;
use crate::history::HistoryEntry;
use crate::model::{Decision, PolicyProfile, PolicyRequest, RuleVerdict};
use crate::rules::{DenylistRule, DenylistRuleSpec};

/// Decide whether `request` may run.
///
/// Depends only on its arguments: identical inputs give identical decisions.
/// Hard denylist matches win under every profile.
pub fn evaluate(
    profile: PolicyProfile,
    request: &PolicyRequest,
    history: &[HistoryEntry],
    rules: &[DenylistRule],
    now: Instant,
) -> Decision {
    let mut suspicion: Option<String> = None;
    for rule in rules {
        match rule.check(request, history, now) {
            RuleVerdict::Blocked(reason) => return Decision::Deny { reason },
            RuleVerdict::Suspicious(reason) => {
                suspicion.get_or_insert(reason);
            }
            RuleVerdict::Clear => {}
        }
    }

    match profile {
        PolicyProfile::Strict if !request.sensitivity.is_read_only() => Decision::RequireConfirm {
            reason: format!(
                "strict profile requires confirmation for {} action {}.{}",
                request.sensitivity, request.adapter, request.action
            ),
        },
        PolicyProfile::Balanced if request.sensitivity.is_sensitive() => match suspicion {
            Some(reason) => Decision::RequireConfirm { reason },
            None => Decision::Allow,
        },
        _ => Decision::Allow,
    }
}

/// Holds the active rule set; rules can be swapped at runtime.
pub struct PolicyEngine {
    rules: ArcSwap<Vec<DenylistRule>>,
}

impl PolicyEngine {
    pub fn new(rules: Vec<DenylistRule>) -> Self {
        Self {
            rules: ArcSwap::from_pointee(rules),
        }
    }

    pub fn from_specs(specs: Vec<DenylistRuleSpec>) -> Result<Self, PolicyError> {
        Ok(Self::new(compile_rules(specs)?))
    }

    pub fn rules(&self) -> Arc<Vec<DenylistRule>> {
        self.rules.load_full()
    }

    pub fn replace_rules(&self, rules: Vec<DenylistRule>) {
        self.rules.store(Arc::new(rules));
    }

    pub fn evaluate(
        &self,
        profile: PolicyProfile,
        request: &PolicyRequest,
        history: &[HistoryEntry],
        now: Instant,
    ) -> Decision {
        let rules = self.rules.load();
        let decision = evaluate(profile, request, history, &rules, now);
        debug!(
            profile = %profile,
            adapter = %request.adapter,
            action = %request.action,
            ?decision,
            "policy evaluated"
        );
        decision
    }
}

pub fn compile_rules(specs: Vec<DenylistRuleSpec>) -> Result<Vec<DenylistRule>, PolicyError> {
    specs.into_iter().map(DenylistRule::try_from).collect()
}

//! Denylist rules
//!
//! Rules are written as [`DenylistRuleSpec`] in configuration (durations as
//! humantime strings, regexes as text) and compiled into [`DenylistRule`]
//! before use. Evaluation never mutates anything.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use autobot_core_types::{Params, Sensitivity};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::errors::PolicyError;
use crate::history::HistoryEntry;
use crate::model::{PolicyRequest, RuleVerdict};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenylistRuleSpec {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "any_pattern")]
    pub adapters: Vec<String>,
    #[serde(default = "any_pattern")]
    pub actions: Vec<String>,
    /// Restrict to these sensitivity classes; empty means all.
    #[serde(default)]
    pub sensitivities: Vec<Sensitivity>,
    /// Parameter names tried in order to identify the target (recipient).
    #[serde(default)]
    pub target_params: Vec<String>,
    /// Every listed parameter must match its regex for the rule to apply.
    #[serde(default)]
    pub param_patterns: BTreeMap<String, String>,
    #[serde(flatten)]
    pub kind: RuleKindSpec,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleKindSpec {
    /// Block whenever the rule applies.
    Pattern,
    /// Same target hit too often within the window.
    Repetition {
        threshold: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        soft_threshold: Option<u32>,
        window: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_interval: Option<String>,
    },
    /// Too many distinct targets within the window.
    Fanout {
        max_targets: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        soft_targets: Option<u32>,
        window: String,
    },
}

fn any_pattern() -> Vec<String> {
    vec!["*".to_string()]
}

#[derive(Clone, Debug)]
pub enum RuleKind {
    Pattern,
    Repetition {
        threshold: u32,
        soft_threshold: Option<u32>,
        window: Duration,
        min_interval: Option<Duration>,
    },
    Fanout {
        max_targets: u32,
        soft_targets: Option<u32>,
        window: Duration,
    },
}

#[derive(Clone, Debug)]
pub struct DenylistRule {
    pub id: String,
    adapters: Vec<String>,
    actions: Vec<String>,
    sensitivities: Vec<Sensitivity>,
    target_params: Vec<String>,
    param_patterns: Vec<(String, Regex)>,
    kind: RuleKind,
    spec: DenylistRuleSpec,
}

impl TryFrom<DenylistRuleSpec> for DenylistRule {
    type Error = PolicyError;

    fn try_from(spec: DenylistRuleSpec) -> Result<Self, Self::Error> {
        let invalid = |reason: String| PolicyError::InvalidRule {
            rule: spec.id.clone(),
            reason,
        };

        if spec.id.trim().is_empty() {
            return Err(PolicyError::Invalid("denylist rule without id".into()));
        }

        let param_patterns = spec
            .param_patterns
            .iter()
            .map(|(param, pattern)| {
                Regex::new(pattern)
                    .map(|re| (param.clone(), re))
                    .map_err(|err| invalid(format!("param '{param}': {err}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let kind = match &spec.kind {
            RuleKindSpec::Pattern => {
                if param_patterns.is_empty() {
                    return Err(invalid("pattern rule needs param_patterns".into()));
                }
                RuleKind::Pattern
            }
            RuleKindSpec::Repetition {
                threshold,
                soft_threshold,
                window,
                min_interval,
            } => {
                if *threshold == 0 {
                    return Err(invalid("threshold must be at least 1".into()));
                }
                if matches!(soft_threshold, Some(soft) if *soft == 0 || *soft >= *threshold) {
                    return Err(invalid("soft_threshold must be between 1 and threshold".into()));
                }
                RuleKind::Repetition {
                    threshold: *threshold,
                    soft_threshold: *soft_threshold,
                    window: parse_window(window).map_err(invalid)?,
                    min_interval: min_interval
                        .as_deref()
                        .map(parse_window)
                        .transpose()
                        .map_err(invalid)?,
                }
            }
            RuleKindSpec::Fanout {
                max_targets,
                soft_targets,
                window,
            } => {
                if spec.target_params.is_empty() {
                    return Err(invalid("fanout rule needs target_params".into()));
                }
                if matches!(soft_targets, Some(soft) if *soft >= *max_targets) {
                    return Err(invalid("soft_targets must be below max_targets".into()));
                }
                RuleKind::Fanout {
                    max_targets: *max_targets,
                    soft_targets: *soft_targets,
                    window: parse_window(window).map_err(invalid)?,
                }
            }
        };

        Ok(Self {
            id: spec.id.clone(),
            adapters: spec.adapters.clone(),
            actions: spec.actions.clone(),
            sensitivities: spec.sensitivities.clone(),
            target_params: spec.target_params.clone(),
            param_patterns,
            kind,
            spec,
        })
    }
}

fn parse_window(raw: &str) -> Result<Duration, String> {
    let duration =
        humantime::parse_duration(raw.trim()).map_err(|_| format!("invalid duration: {raw}"))?;
    if duration.is_zero() {
        return Err(format!("duration must be positive: {raw}"));
    }
    Ok(duration)
}

impl DenylistRule {
    pub fn spec(&self) -> &DenylistRuleSpec {
        &self.spec
    }

    pub fn kind(&self) -> &RuleKind {
        &self.kind
    }

    /// Whether the rule covers this request at all.
    pub fn applies_to(&self, request: &PolicyRequest) -> bool {
        self.matches_action(&request.adapter, &request.action)
            && (self.sensitivities.is_empty() || self.sensitivities.contains(&request.sensitivity))
            && self.param_patterns.iter().all(|(param, re)| {
                param_text(&request.params, param)
                    .map(|text| re.is_match(&text))
                    .unwrap_or(false)
            })
    }

    fn matches_action(&self, adapter: &str, action: &str) -> bool {
        self.adapters.iter().any(|p| pattern_matches(p, adapter))
            && self.actions.iter().any(|p| pattern_matches(p, action))
    }

    /// First configured target parameter present on `params`.
    pub fn target_of(&self, params: &Params) -> Option<String> {
        self.target_params
            .iter()
            .find_map(|name| param_text(params, name))
            .map(|text| text.trim().to_lowercase())
            .filter(|text| !text.is_empty())
    }

    pub fn check(
        &self,
        request: &PolicyRequest,
        history: &[HistoryEntry],
        now: Instant,
    ) -> RuleVerdict {
        if !self.applies_to(request) {
            return RuleVerdict::Clear;
        }

        match &self.kind {
            RuleKind::Pattern => RuleVerdict::Blocked(format!(
                "rule '{}' matched {}.{}",
                self.id, request.adapter, request.action
            )),
            RuleKind::Repetition {
                threshold,
                soft_threshold,
                window,
                min_interval,
            } => {
                let target = self.target_of(&request.params);
                if target.is_none() && !self.target_params.is_empty() {
                    return RuleVerdict::Clear;
                }
                let same_target: Vec<&HistoryEntry> = self
                    .recent(request, history, now, *window)
                    .filter(|entry| self.target_of(&entry.params) == target)
                    .collect();
                let label = target.as_deref().unwrap_or("(any)");

                if let (Some(min), Some(last)) = (min_interval, same_target.last()) {
                    let gap = now.saturating_duration_since(last.at);
                    if gap < *min {
                        return RuleVerdict::Blocked(format!(
                            "rule '{}': repeated {}.{} to {} after {:?} (minimum {:?})",
                            self.id, request.adapter, request.action, label, gap, min
                        ));
                    }
                }

                let count = same_target.len() as u32 + 1;
                if count >= *threshold {
                    RuleVerdict::Blocked(format!(
                        "rule '{}': {} {}.{} to {} within {}",
                        self.id,
                        count,
                        request.adapter,
                        request.action,
                        label,
                        humantime::format_duration(*window)
                    ))
                } else if matches!(soft_threshold, Some(soft) if count >= *soft) {
                    RuleVerdict::Suspicious(format!(
                        "rule '{}': {} {}.{} to {} within {}",
                        self.id,
                        count,
                        request.adapter,
                        request.action,
                        label,
                        humantime::format_duration(*window)
                    ))
                } else {
                    RuleVerdict::Clear
                }
            }
            RuleKind::Fanout {
                max_targets,
                soft_targets,
                window,
            } => {
                let Some(target) = self.target_of(&request.params) else {
                    return RuleVerdict::Clear;
                };
                let mut targets: HashSet<String> = self
                    .recent(request, history, now, *window)
                    .filter_map(|entry| self.target_of(&entry.params))
                    .collect();
                targets.insert(target);
                let distinct = targets.len() as u32;
                let message = format!(
                    "rule '{}': {}.{} reached {} distinct targets within {}",
                    self.id,
                    request.adapter,
                    request.action,
                    distinct,
                    humantime::format_duration(*window)
                );
                if distinct > *max_targets {
                    RuleVerdict::Blocked(message)
                } else if matches!(soft_targets, Some(soft) if distinct > *soft) {
                    RuleVerdict::Suspicious(message)
                } else {
                    RuleVerdict::Clear
                }
            }
        }
    }

    fn recent<'h>(
        &'h self,
        request: &'h PolicyRequest,
        history: &'h [HistoryEntry],
        now: Instant,
        window: Duration,
    ) -> impl Iterator<Item = &'h HistoryEntry> + 'h {
        history.iter().filter(move |entry| {
            entry.adapter == request.adapter
                && entry.action == request.action
                && entry.at <= now
                && now.duration_since(entry.at) <= window
        })
    }
}

/// `*` matches everything; a single `*` elsewhere splits prefix and suffix.
pub(crate) fn pattern_matches(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some((prefix, suffix)) = pattern.split_once('*') {
        if !suffix.contains('*') {
            return value.len() >= prefix.len() + suffix.len()
                && value.starts_with(prefix)
                && value.ends_with(suffix);
        }
    }
    value == pattern
}

fn param_text(params: &Params, name: &str) -> Option<String> {
    match params.get(name)? {
        serde_json::Value::Null => None,
        serde_json::Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

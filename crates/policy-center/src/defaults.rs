use std::collections::BTreeMap;

use crate::rules::{DenylistRuleSpec, RuleKindSpec};

/// Phrases that indicate a mass-messaging request.
pub const MASS_MESSAGE_KEYWORDS: &[&str] = &[
    "message all contacts",
    "bulk message",
    "blast message",
    "spam",
    "send to all",
];

const RECIPIENT_PARAMS: &[&str] = &["chat", "username", "recipient"];

/// Safety floor shipped with the binary. Thresholds are overridable.
pub fn default_rules() -> Vec<DenylistRuleSpec> {
    let recipients: Vec<String> = RECIPIENT_PARAMS.iter().map(|s| s.to_string()).collect();
    let send_actions = vec!["send_*".to_string()];

    let mut text_pattern = BTreeMap::new();
    text_pattern.insert(
        "text".to_string(),
        format!("(?i)({})", MASS_MESSAGE_KEYWORDS.join("|")),
    );

    vec![
        DenylistRuleSpec {
            id: "repeat-send-same-recipient".into(),
            description: Some("same recipient messaged repeatedly in a short interval".into()),
            adapters: vec!["*".into()],
            actions: send_actions.clone(),
            sensitivities: Vec::new(),
            target_params: recipients.clone(),
            param_patterns: BTreeMap::new(),
            kind: RuleKindSpec::Repetition {
                threshold: 3,
                soft_threshold: Some(2),
                window: "10s".into(),
                min_interval: None,
            },
        },
        DenylistRuleSpec {
            id: "bulk-recipient-fanout".into(),
            description: Some("one send action spread over many recipients".into()),
            adapters: vec!["*".into()],
            actions: send_actions.clone(),
            sensitivities: Vec::new(),
            target_params: recipients,
            param_patterns: BTreeMap::new(),
            kind: RuleKindSpec::Fanout {
                max_targets: 10,
                soft_targets: Some(3),
                window: "10m".into(),
            },
        },
        DenylistRuleSpec {
            id: "mass-message-text".into(),
            description: Some("message body asks for a bulk send".into()),
            adapters: vec!["*".into()],
            actions: send_actions,
            sensitivities: Vec::new(),
            target_params: Vec::new(),
            param_patterns: text_pattern,
            kind: RuleKindSpec::Pattern,
        },
    ]
}

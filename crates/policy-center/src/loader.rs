use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::defaults::default_rules;
use crate::engine::PolicyEngine;
use crate::errors::PolicyError;
use crate::history::{ActionHistory, DEFAULT_CAPACITY};
use crate::model::{PolicyProfile, PolicySource};
use crate::profile::ProfileHandle;
use crate::rules::DenylistRuleSpec;

const ENV_PREFIX: &str = "AUTOBOT_POLICY__";
const ENV_PROFILE: &str = "AUTOBOT_POLICY_PROFILE";
const ENV_JSON: &str = "AUTOBOT_POLICY_OVERRIDE_JSON";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub profile: PolicyProfile,
    /// Keep the shipped rules; configured rules with the same id replace them.
    pub include_default_rules: bool,
    pub rules: Vec<DenylistRuleSpec>,
    pub history: HistoryConfig,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            profile: PolicyProfile::default(),
            include_default_rules: true,
            rules: Vec::new(),
            history: HistoryConfig::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub retention: String,
    pub capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            retention: "1h".into(),
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl PolicyConfig {
    pub fn effective_rules(&self) -> Vec<DenylistRuleSpec> {
        let mut rules = if self.include_default_rules {
            default_rules()
        } else {
            Vec::new()
        };
        for rule in &self.rules {
            match rules.iter_mut().find(|existing| existing.id == rule.id) {
                Some(existing) => *existing = rule.clone(),
                None => rules.push(rule.clone()),
            }
        }
        rules
    }

    pub fn build_engine(&self) -> Result<PolicyEngine, PolicyError> {
        PolicyEngine::from_specs(self.effective_rules())
    }

    pub fn build_history(&self) -> Result<ActionHistory, PolicyError> {
        let retention: Duration = humantime::parse_duration(&self.history.retention)
            .map_err(|_| {
                PolicyError::Invalid(format!(
                    "invalid history retention: {}",
                    self.history.retention
                ))
            })?;
        Ok(ActionHistory::new(retention, self.history.capacity))
    }

    /// Fails on the first rule that does not compile.
    pub fn validate(&self) -> Result<(), PolicyError> {
        self.build_engine()?;
        self.build_history()?;
        Ok(())
    }
}

/// Loaded configuration plus where each overridden path came from.
#[derive(Clone, Debug)]
pub struct LoadedPolicy {
    pub config: PolicyConfig,
    pub provenance: HashMap<String, PolicySource>,
}

impl LoadedPolicy {
    pub fn profile_source(&self) -> PolicySource {
        self.provenance
            .get("profile")
            .copied()
            .unwrap_or(PolicySource::Builtin)
    }

    pub fn profile_handle(&self) -> ProfileHandle {
        ProfileHandle::new(self.config.profile, self.profile_source())
    }
}

#[derive(Debug, Default)]
pub struct LoadOptions {
    pub paths: Vec<PathBuf>,
    pub include_env: bool,
}

impl LoadOptions {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            paths: vec![path.into()],
            include_env: true,
        }
    }
}

pub fn load_policy(path: Option<&Path>) -> Result<LoadedPolicy, PolicyError> {
    let options = LoadOptions {
        paths: path.map(Path::to_path_buf).into_iter().collect(),
        include_env: true,
    };
    load_policy_with_base(PolicyConfig::default(), &options)
}

/// Layer files, then environment overrides, on top of `base`.
pub fn load_policy_with_base(
    base: PolicyConfig,
    options: &LoadOptions,
) -> Result<LoadedPolicy, PolicyError> {
    let mut tree =
        serde_json::to_value(&base).map_err(|err| PolicyError::Invalid(err.to_string()))?;
    let mut provenance = HashMap::new();

    for path in &options.paths {
        if path.exists() {
            for overlay in overlays_from_file(path)? {
                apply_overlay(&mut tree, &mut provenance, overlay);
            }
        }
    }

    if options.include_env {
        for overlay in overlays_from_env()? {
            apply_overlay(&mut tree, &mut provenance, overlay);
        }
    }

    let config: PolicyConfig =
        serde_json::from_value(tree).map_err(|err| PolicyError::Invalid(err.to_string()))?;
    config.validate()?;
    Ok(LoadedPolicy { config, provenance })
}

struct PolicyOverlay {
    path: Vec<String>,
    value: Value,
    source: PolicySource,
}

fn apply_overlay(
    tree: &mut Value,
    provenance: &mut HashMap<String, PolicySource>,
    overlay: PolicyOverlay,
) {
    let Some((last, parents)) = overlay.path.split_last() else {
        return;
    };
    let mut node = tree;
    for segment in parents {
        if !node.is_object() {
            *node = Value::Object(Default::default());
        }
        let Value::Object(map) = node else {
            return;
        };
        node = map
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Default::default()));
    }
    if !node.is_object() {
        *node = Value::Object(Default::default());
    }
    if let Value::Object(map) = node {
        map.insert(last.clone(), overlay.value);
        provenance.insert(overlay.path.join("."), overlay.source);
    }
}

fn overlays_from_file(path: &Path) -> Result<Vec<PolicyOverlay>, PolicyError> {
    let content = fs::read_to_string(path).map_err(|err| PolicyError::Io(format!("{}", err)))?;
    let yaml_value: serde_yaml::Value =
        serde_yaml::from_str(&content).map_err(|err| PolicyError::Invalid(format!("{}", err)))?;
    let json_value =
        serde_json::to_value(yaml_value).map_err(|err| PolicyError::Invalid(format!("{}", err)))?;
    Ok(top_level_overlays(json_value, PolicySource::File))
}

fn overlays_from_env() -> Result<Vec<PolicyOverlay>, PolicyError> {
    let mut overlays = Vec::new();

    if let Ok(raw_json) = env::var(ENV_JSON) {
        if !raw_json.trim().is_empty() {
            let json_value: Value = serde_json::from_str(&raw_json)
                .map_err(|err| PolicyError::Invalid(format!("{}", err)))?;
            overlays.extend(top_level_overlays(json_value, PolicySource::Env));
        }
    }

    let mut keyed: Vec<(String, String)> = env::vars()
        .filter(|(key, _)| key.starts_with(ENV_PREFIX))
        .collect();
    keyed.sort();
    for (key, raw) in keyed {
        let Some(stripped) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let path: Vec<String> = stripped
            .split("__")
            .filter(|segment| !segment.is_empty())
            .map(|segment| segment.to_ascii_lowercase())
            .collect();
        if path.is_empty() {
            continue;
        }
        overlays.push(PolicyOverlay {
            path,
            value: parse_env_value(&raw),
            source: PolicySource::Env,
        });
    }

    if let Ok(raw) = env::var(ENV_PROFILE) {
        if !raw.trim().is_empty() {
            let profile: PolicyProfile = raw.parse()?;
            overlays.push(PolicyOverlay {
                path: vec!["profile".into()],
                value: Value::String(profile.as_str().into()),
                source: PolicySource::Env,
            });
        }
    }

    Ok(overlays)
}

/// Objects merge key by key; anything else (including rule lists) replaces.
fn top_level_overlays(value: Value, source: PolicySource) -> Vec<PolicyOverlay> {
    fn walk(value: Value, prefix: Vec<String>, source: PolicySource, out: &mut Vec<PolicyOverlay>) {
        match value {
            Value::Object(map) => {
                for (key, value) in map {
                    let mut path = prefix.clone();
                    path.push(key.trim().to_ascii_lowercase());
                    walk(value, path, source, out);
                }
            }
            other if !prefix.is_empty() => out.push(PolicyOverlay {
                path: prefix,
                value: other,
                source,
            }),
            _ => {}
        }
    }

    let mut out = Vec::new();
    walk(value, Vec::new(), source, &mut out);
    out
}

fn parse_env_value(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    if let Ok(parsed) = serde_json::from_str::<Value>(raw) {
        return parsed;
    }
    Value::String(raw.to_string())
}

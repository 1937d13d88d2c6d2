//! Application configuration
//!
//! One YAML document, located at `--config` or
//! `<config_dir>/autobot/config.yaml`, layered over built-in defaults and then
//! overridden by `AUTOBOT__SECTION__KEY=value` environment variables.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use action_flow::ExecutorConfig;
use adapter_telemetry::{TelemetryConfig, TracingOptions};
use anyhow::{bail, Context, Result};
use autobot_policy_center::PolicyConfig;
use confirm_broker::BrokerConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

pub const ENV_PREFIX: &str = "AUTOBOT__";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Base policy; `policy_file` and `AUTOBOT_POLICY_*` are layered on top
    pub policy: PolicyConfig,
    pub policy_file: Option<PathBuf>,
    pub confirmation: ConfirmationConfig,
    pub executor: ExecutorConfig,
    pub telemetry: TelemetryConfig,
    pub selectors: SelectorsConfig,
    pub server: ServerConfig,
    pub runs: RunsConfig,
    pub logging: TracingOptions,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            policy: PolicyConfig::default(),
            policy_file: None,
            confirmation: ConfirmationConfig::default(),
            executor: ExecutorConfig::default(),
            telemetry: TelemetryConfig::default(),
            selectors: SelectorsConfig::default(),
            server: ServerConfig::default(),
            runs: RunsConfig::default(),
            logging: TracingOptions::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    pub ttl: String,
    /// How long settled tokens are kept for precise late-confirm errors
    pub retention: String,
    /// Interval of the background expiry sweep while serving
    pub sweep_interval: String,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            ttl: "5m".into(),
            retention: "1h".into(),
            sweep_interval: "30s".into(),
        }
    }
}

impl ConfirmationConfig {
    pub fn broker_config(&self) -> Result<BrokerConfig> {
        BrokerConfig::from_strings(&self.ttl, &self.retention)
            .context("invalid confirmation settings")
    }
}

/// Extra site definitions and selector/recipe override files.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorsConfig {
    pub sites_dir: Option<PathBuf>,
    pub overrides: Option<PathBuf>,
    pub recipes: Option<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8787".into(),
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> Result<SocketAddr> {
        self.bind
            .parse()
            .with_context(|| format!("invalid server bind address '{}'", self.bind))
    }
}

/// Bookkeeping for runs started through the control surface.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunsConfig {
    /// Finished runs older than this are forgotten
    pub retention: String,
    /// Finished runs kept at most; the oldest go first
    pub max_finished: usize,
}

impl Default for RunsConfig {
    fn default() -> Self {
        Self {
            retention: "1h".into(),
            max_finished: 100,
        }
    }
}

impl RunsConfig {
    pub fn retention(&self) -> Result<Duration> {
        humantime::parse_duration(self.retention.trim()).context("invalid runs.retention")
    }
}

impl AppConfig {
    /// Default location: `<config_dir>/autobot/config.yaml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("autobot").join("config.yaml"))
    }

    /// File (if present) plus environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => {
                if !path.exists() {
                    bail!("config file not found: {}", path.display());
                }
                Some(path.to_path_buf())
            }
            None => Self::default_path().filter(|p| p.exists()),
        };

        let mut config = match &path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file {}", path.display()))?;
                let config = Self::from_yaml_str(&raw)
                    .with_context(|| format!("failed to parse config file {}", path.display()))?;
                info!("Loaded configuration from: {}", path.display());
                config
            }
            None => {
                warn!("No config file found, using defaults");
                Self::default()
            }
        };

        config = config.with_env_overrides(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Apply `AUTOBOT__SECTION__KEY=value` pairs. Values parse as JSON when
    /// they can (numbers, booleans, objects) and as plain strings otherwise.
    pub fn with_env_overrides<I>(self, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut tree = serde_json::to_value(&self)?;
        let mut applied = 0;
        for (key, raw) in vars {
            let Some(path) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let segments: Vec<String> = path
                .split("__")
                .filter(|s| !s.is_empty())
                .map(|s| s.to_ascii_lowercase())
                .collect();
            if segments.is_empty() {
                continue;
            }
            let value = serde_json::from_str::<Value>(&raw).unwrap_or(Value::String(raw));
            set_path(&mut tree, &segments, value);
            applied += 1;
        }
        if applied == 0 {
            return Ok(self);
        }
        serde_json::from_value(tree).context("invalid AUTOBOT__ environment override")
    }

    pub fn validate(&self) -> Result<()> {
        self.confirmation.broker_config()?;
        humantime::parse_duration(&self.confirmation.sweep_interval)
            .context("invalid confirmation.sweep_interval")?;
        self.server.addr()?;
        self.runs.retention()?;
        self.policy.validate().context("invalid policy section")?;
        if self.executor.action_timeout.is_zero() {
            bail!("executor.action_timeout must be positive");
        }
        Ok(())
    }
}

fn set_path(tree: &mut Value, segments: &[String], value: Value) {
    let mut node = tree;
    for segment in &segments[..segments.len() - 1] {
        if !node.is_object() {
            *node = Value::Object(Default::default());
        }
        let Value::Object(map) = node else { return };
        node = map
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Default::default()));
    }
    if let Value::Object(map) = node {
        if let Some(last) = segments.last() {
            map.insert(last.clone(), value);
        }
    }
}

//! Built-in `engine` adapter: actions that act on the run itself

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use action_primitives::{DriverError, ExecCtx};
use adapter_telemetry::TelemetryCollector;
use async_trait::async_trait;
use autobot_core_types::{Params, Sensitivity};
use autobot_policy_center::{PolicyProfile, PolicySource, ProfileHandle};
use serde_json::{json, Value};
use site_adapters::{ActionOutput, ActionSpec, Adapter, AdapterError, AdapterResult};
use tracing::info;

pub const ENGINE_ADAPTER: &str = "engine";

pub struct EngineAdapter {
    profile: ProfileHandle,
    telemetry: Arc<TelemetryCollector>,
    catalog: BTreeMap<String, Vec<ActionSpec>>,
}

impl EngineAdapter {
    pub fn new(profile: ProfileHandle, telemetry: Arc<TelemetryCollector>) -> Self {
        Self {
            profile,
            telemetry,
            catalog: BTreeMap::new(),
        }
    }

    /// Action catalog reported by `list_actions`; the engine's own actions
    /// are always included.
    pub fn with_catalog(mut self, mut catalog: BTreeMap<String, Vec<ActionSpec>>) -> Self {
        catalog.insert(ENGINE_ADAPTER.to_string(), self.actions());
        self.catalog = catalog;
        self
    }

    async fn wait(&self, params: &Params, ctx: &ExecCtx) -> AdapterResult<ActionOutput> {
        let duration = wait_duration(params)?;
        if duration > ctx.remaining_time() {
            return Err(AdapterError::InvalidParams(format!(
                "wait of {} exceeds the step timeout; raise timeout_ms",
                humantime::format_duration(duration)
            )));
        }
        tokio::select! {
            _ = ctx.cancel_token.cancelled() => {
                Err(DriverError::Interrupted("wait cancelled".into()).into())
            }
            _ = tokio::time::sleep(duration) => {
                Ok(ActionOutput::value(json!(duration.as_secs_f64())))
            }
        }
    }

    fn log(&self, params: &Params, ctx: &ExecCtx) -> AdapterResult<ActionOutput> {
        let message = params
            .get("message")
            .map(text_of)
            .ok_or_else(|| AdapterError::InvalidParams("engine.log requires 'message'".into()))?;
        info!(run = %ctx.run_id, step = ctx.step_index + 1, "{}", message);
        Ok(ActionOutput::value(message))
    }

    fn set_policy(&self, params: &Params) -> AdapterResult<ActionOutput> {
        let raw = params
            .get("profile")
            .map(text_of)
            .ok_or_else(|| AdapterError::InvalidParams("engine.set_policy requires 'profile'".into()))?;
        let profile: PolicyProfile = raw
            .parse()
            .map_err(|err: autobot_policy_center::PolicyError| AdapterError::InvalidParams(err.to_string()))?;

        let state = match params.get("ttl").map(text_of) {
            Some(ttl) => {
                let ttl = humantime::parse_duration(ttl.trim()).map_err(|err| {
                    AdapterError::InvalidParams(format!("invalid ttl '{}': {}", ttl, err))
                })?;
                self.profile.set_for(profile, ttl)
            }
            None => self.profile.set(profile, PolicySource::Runtime),
        };
        info!(profile = %state.profile, "policy profile changed by plan step");
        Ok(ActionOutput::value(state.profile.as_str()))
    }

    fn list_actions(&self, params: &Params) -> AdapterResult<ActionOutput> {
        let listing = match params.get("adapter").map(text_of) {
            Some(name) => {
                let actions = self.catalog.get(&name).ok_or_else(|| {
                    AdapterError::InvalidParams(format!("unknown adapter '{}'", name))
                })?;
                let mut listing = serde_json::Map::new();
                listing.insert(name, json!(actions));
                Value::Object(listing)
            }
            None => json!(self.catalog),
        };
        info!(adapters = self.catalog.len(), "adapter action catalog listed");
        Ok(ActionOutput::value(listing))
    }

    fn telemetry(&self) -> AdapterResult<ActionOutput> {
        let snapshot = serde_json::to_value(self.telemetry.snapshot())
            .map_err(|err| AdapterError::permanent(err.to_string()))?;
        Ok(ActionOutput::value(snapshot))
    }
}

#[async_trait]
impl Adapter for EngineAdapter {
    fn name(&self) -> &str {
        ENGINE_ADAPTER
    }

    fn actions(&self) -> Vec<ActionSpec> {
        vec![
            ActionSpec::new("wait", "Pause the run (seconds or ms)", Sensitivity::ReadOnly),
            ActionSpec::new("log", "Write a message to the run log", Sensitivity::ReadOnly),
            ActionSpec::new(
                "set_policy",
                "Switch the policy profile, optionally for a ttl",
                Sensitivity::PolicyChange,
            ),
            ActionSpec::new("telemetry", "Export the adapter telemetry", Sensitivity::ReadOnly),
            ActionSpec::new(
                "list_actions",
                "List registered adapters and their actions",
                Sensitivity::ReadOnly,
            ),
        ]
    }

    async fn execute(&self, action: &str, params: &Params, ctx: &ExecCtx) -> AdapterResult<ActionOutput> {
        match action {
            "wait" => self.wait(params, ctx).await,
            "log" => self.log(params, ctx),
            "set_policy" => self.set_policy(params),
            "telemetry" => self.telemetry(),
            "list_actions" => self.list_actions(params),
            other => Err(AdapterError::UnknownAction {
                adapter: ENGINE_ADAPTER.to_string(),
                action: other.to_string(),
            }),
        }
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn wait_duration(params: &Params) -> AdapterResult<Duration> {
    let number = |key: &str| -> AdapterResult<Option<f64>> {
        match params.get(key) {
            None => Ok(None),
            Some(Value::Number(n)) => Ok(n.as_f64()),
            Some(Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| AdapterError::InvalidParams(format!("'{}' is not a number", key))),
            Some(_) => Err(AdapterError::InvalidParams(format!("'{}' is not a number", key))),
        }
    };

    let seconds = match (number("seconds")?, number("ms")?) {
        (Some(seconds), _) => seconds,
        (None, Some(ms)) => ms / 1000.0,
        (None, None) => {
            return Err(AdapterError::InvalidParams(
                "engine.wait requires 'seconds' or 'ms'".into(),
            ))
        }
    };
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(AdapterError::InvalidParams(format!(
            "wait must be a non-negative number, got {}",
            seconds
        )));
    }
    Ok(Duration::from_secs_f64(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use autobot_core_types::FailureKind;
    use tokio_util::sync::CancellationToken;

    fn adapter() -> EngineAdapter {
        EngineAdapter::new(
            ProfileHandle::new(PolicyProfile::Balanced, PolicySource::Builtin),
            Arc::new(TelemetryCollector::default()),
        )
    }

    fn params(value: Value) -> Params {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn set_policy_switches_profile() {
        let engine = adapter();
        let ctx = ExecCtx::detached(Duration::from_secs(5));
        let out = engine
            .execute("set_policy", &params(json!({"profile": "strict"})), &ctx)
            .await
            .unwrap();
        assert_eq!(out.value, json!("strict"));
        assert_eq!(engine.profile.current(), PolicyProfile::Strict);

        let err = engine
            .execute("set_policy", &params(json!({"profile": "loose"})), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::InvalidParams);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_is_cancellable() {
        let engine = adapter();
        let cancel = CancellationToken::new();
        let ctx = ExecCtx::new("run", 0, Duration::from_secs(60), cancel.clone());
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });
        let err = engine
            .execute("wait", &params(json!({"seconds": 30})), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Cancelled);
    }

    #[tokio::test]
    async fn list_actions_reports_catalog() {
        let mut catalog = BTreeMap::new();
        catalog.insert(
            "notes_web".to_string(),
            vec![ActionSpec::new("write", "Write a note", Sensitivity::Interactive)],
        );
        let engine = adapter().with_catalog(catalog);
        let ctx = ExecCtx::detached(Duration::from_secs(5));

        let all = engine.execute("list_actions", &Params::new(), &ctx).await.unwrap();
        assert_eq!(all.value["notes_web"][0]["name"], json!("write"));
        assert!(all.value["engine"]
            .as_array()
            .unwrap()
            .iter()
            .any(|spec| spec["name"] == json!("list_actions")));

        let one = engine
            .execute("list_actions", &params(json!({"adapter": "notes_web"})), &ctx)
            .await
            .unwrap();
        assert_eq!(one.value.as_object().unwrap().len(), 1);

        let err = engine
            .execute("list_actions", &params(json!({"adapter": "nope"})), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::InvalidParams);
    }

    #[tokio::test]
    async fn wait_longer_than_timeout_is_rejected() {
        let engine = adapter();
        let ctx = ExecCtx::detached(Duration::from_secs(1));
        let err = engine
            .execute("wait", &params(json!({"ms": "5000"})), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::InvalidParams);
    }
}

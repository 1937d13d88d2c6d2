//! Application context
//!
//! Wires site adapters, the selector registry, policy, confirmation broker,
//! telemetry and the plan executor from one [`AppConfig`], and tracks runs
//! started through the control surface.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use action_flow::{
    ExecutionResult, ExecutorServices, Plan, PlanExecutor, RunControl, RunState, RunStatus,
};
use action_locator::{NavRecipeBook, SelectorRegistry, SelectorResolver};
use action_primitives::{DryRunDriver, UiDriver};
use adapter_telemetry::TelemetryCollector;
use anyhow::{Context, Result};
use autobot_core_types::{ActionRef, Params, RunId};
use autobot_policy_center::{
    load_policy_with_base, Decision, LoadOptions, PolicyConfig, PolicyEngine, PolicyProfile,
    PolicyRequest, PolicySource, ProfileHandle, ProfileState,
};
use chrono::{DateTime, Utc};
use confirm_broker::{ConfirmationBroker, PreparedConfirmation};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use site_adapters::{
    build_registry, builtin_definitions, recipe_book, selector_catalog, ActionSpec,
    SiteDefinition, Surface,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};

pub struct AppContext {
    config: AppConfig,
    policy: PolicyConfig,
    executor: Arc<PlanExecutor>,
    selectors: Arc<SelectorRegistry>,
    runs: DashMap<String, RunEntry>,
    run_retention: Duration,
}

struct RunEntry {
    control: RunControl,
    plan: String,
    started_at: DateTime<Utc>,
    result: Arc<RwLock<Option<ExecutionResult>>>,
}

impl RunEntry {
    fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.result.read().as_ref().map(|result| result.finished_at)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Running,
    Finished,
}

#[derive(Clone, Debug, Serialize)]
pub struct RunView {
    pub run_id: String,
    pub plan: String,
    pub phase: RunPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
    pub cancel_requested: bool,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ExecutionResult>,
}

impl AppContext {
    pub fn build(config: AppConfig) -> Result<Self> {
        let definitions = load_definitions(config.selectors.sites_dir.as_deref())?;

        let selectors = Arc::new(SelectorRegistry::new(selector_catalog(&definitions)));
        if let Some(path) = &config.selectors.overrides {
            selectors
                .reload_from_path(path)
                .with_context(|| format!("failed to load selector overrides {}", path.display()))?;
        }

        let mut recipes = recipe_book(&definitions);
        if let Some(path) = &config.selectors.recipes {
            let extra = NavRecipeBook::load_from_path(path)
                .with_context(|| format!("failed to load recipes {}", path.display()))?;
            recipes.merge(extra);
        }

        let telemetry = Arc::new(TelemetryCollector::new(config.telemetry));
        let resolver = Arc::new(SelectorResolver::new(
            Arc::clone(&selectors),
            telemetry.clone(),
        ));

        let login_markers: Vec<String> = definitions
            .iter()
            .flat_map(SiteDefinition::login_markers)
            .collect();
        let mut drivers: HashMap<Surface, Arc<dyn UiDriver>> = HashMap::new();
        drivers.insert(
            Surface::Browser,
            Arc::new(DryRunDriver::new().with_missing(login_markers)),
        );
        drivers.insert(Surface::Desktop, Arc::new(DryRunDriver::keyboard_only()));

        let adapters = build_registry(definitions, &drivers, resolver, Arc::new(recipes))?;

        let options = LoadOptions {
            paths: config.policy_file.iter().cloned().collect(),
            include_env: true,
        };
        let loaded = load_policy_with_base(config.policy.clone(), &options)?;
        let services = ExecutorServices {
            policy: Arc::new(loaded.config.build_engine()?),
            history: Arc::new(loaded.config.build_history()?),
            profile: loaded.profile_handle(),
            broker: ConfirmationBroker::shared(config.confirmation.broker_config()?),
            telemetry,
        };
        info!(
            profile = %services.profile.current(),
            rules = services.policy.rules().len(),
            "policy loaded"
        );

        let executor = PlanExecutor::new(adapters, services, config.executor.clone())?;
        info!(adapters = executor.adapters().names().len(), "adapters registered");

        let run_retention = config.runs.retention()?;
        Ok(Self {
            config,
            policy: loaded.config,
            executor: Arc::new(executor),
            selectors,
            runs: DashMap::new(),
            run_retention,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn executor(&self) -> &Arc<PlanExecutor> {
        &self.executor
    }

    pub fn services(&self) -> &ExecutorServices {
        self.executor.services()
    }

    pub fn broker(&self) -> &Arc<ConfirmationBroker> {
        &self.services().broker
    }

    pub fn telemetry(&self) -> &Arc<TelemetryCollector> {
        &self.services().telemetry
    }

    pub fn profile(&self) -> &ProfileHandle {
        &self.services().profile
    }

    pub fn policy_engine(&self) -> &Arc<PolicyEngine> {
        &self.services().policy
    }

    /// Effective policy after file and environment layering.
    pub fn policy_config(&self) -> &PolicyConfig {
        &self.policy
    }

    pub fn catalog(&self) -> std::collections::BTreeMap<String, Vec<ActionSpec>> {
        self.executor.adapters().catalog()
    }

    /// Switch the profile, for `ttl` when given.
    pub fn set_profile(&self, profile: PolicyProfile, ttl: Option<Duration>) -> ProfileState {
        match ttl {
            Some(ttl) => self.profile().set_for(profile, ttl),
            None => self.profile().set(profile, PolicySource::Runtime),
        }
    }

    /// Evaluate a would-be dispatch against the current profile and history
    /// without recording it.
    pub fn check_policy(&self, action: &str, params: Params) -> AppResult<(ActionSpec, Decision)> {
        let action: ActionRef = action.parse()?;
        let spec = self.executor.adapters().spec(&action)?;
        let request = PolicyRequest::new(action.adapter, action.action, spec.sensitivity, params);
        let now = Instant::now();
        let decision = self.policy_engine().evaluate(
            self.profile().current(),
            &request,
            &self.services().history.snapshot(now),
            now,
        );
        Ok((spec, decision))
    }

    /// Bind an action to a confirmation token without executing it.
    pub fn prepare_confirmation(
        &self,
        action: &str,
        params: Params,
    ) -> AppResult<PreparedConfirmation> {
        let action: ActionRef = action.parse()?;
        self.executor.adapters().spec(&action)?;
        Ok(self.broker().prepare(action.adapter, action.action, params))
    }

    /// Re-read selector overrides from `path`, or from the configured file.
    pub fn reload_selectors(&self, path: Option<&Path>) -> AppResult<usize> {
        let path: PathBuf = match path {
            Some(path) => path.to_path_buf(),
            None => self.config.selectors.overrides.clone().ok_or_else(|| {
                AppError::BadRequest("no selector override file configured".into())
            })?,
        };
        self.selectors
            .reload_from_path(&path)
            .map_err(|err| AppError::BadRequest(err.to_string()))
    }

    /// Validate and start `plan` in the background.
    pub fn start_run(&self, plan: Plan, initial: RunState) -> AppResult<RunId> {
        self.executor.validate_plan(&plan)?;
        self.sweep_runs();

        let control = RunControl::new();
        let run_id = control.run_id().clone();
        let slot = Arc::new(RwLock::new(None));
        self.runs.insert(
            run_id.0.clone(),
            RunEntry {
                control: control.clone(),
                plan: plan.name.clone(),
                started_at: Utc::now(),
                result: Arc::clone(&slot),
            },
        );

        let executor = Arc::clone(&self.executor);
        tokio::spawn(async move {
            let result = executor.run_with_state(&plan, &control, initial).await;
            debug!(run = %result.run_id, status = ?result.status, "background run stored");
            *slot.write() = Some(result);
        });
        info!(run = %run_id, "run started");
        Ok(run_id)
    }

    pub fn run_status(&self, run_id: &str) -> Option<RunView> {
        self.runs.get(run_id).map(|entry| view_of(run_id, &entry))
    }

    pub fn runs(&self) -> Vec<RunView> {
        let mut views: Vec<RunView> = self
            .runs
            .iter()
            .map(|entry| view_of(entry.key(), entry.value()))
            .collect();
        views.sort_by_key(|view| view.started_at);
        views
    }

    /// Forget finished runs past retention, then the oldest finished runs
    /// beyond `runs.max_finished`. Returns how many were dropped.
    pub fn sweep_runs(&self) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.run_retention)
                .unwrap_or_else(|_| chrono::Duration::days(365));
        let mut finished: Vec<(DateTime<Utc>, String)> = self
            .runs
            .iter()
            .filter_map(|entry| entry.finished_at().map(|at| (at, entry.key().clone())))
            .collect();
        finished.sort();

        let over_cap = finished.len().saturating_sub(self.config.runs.max_finished);
        let mut dropped = 0;
        for (index, (finished_at, run_id)) in finished.iter().enumerate() {
            if index < over_cap || *finished_at <= cutoff {
                if self.runs.remove(run_id).is_some() {
                    dropped += 1;
                }
            }
        }
        if dropped > 0 {
            debug!(dropped, remaining = self.runs.len(), "finished runs swept");
        }
        dropped
    }

    /// Request cancellation; false when the run is unknown.
    pub fn cancel_run(&self, run_id: &str) -> bool {
        match self.runs.get(run_id) {
            Some(entry) => {
                entry.control.cancel();
                info!(run = run_id, "run cancellation requested");
                true
            }
            None => false,
        }
    }
}

fn view_of(run_id: &str, entry: &RunEntry) -> RunView {
    let result = entry.result.read().clone();
    RunView {
        run_id: run_id.to_string(),
        plan: entry.plan.clone(),
        phase: if result.is_some() {
            RunPhase::Finished
        } else {
            RunPhase::Running
        },
        status: result.as_ref().map(|result| result.status),
        cancel_requested: entry.control.is_cancelled(),
        started_at: entry.started_at,
        result,
    }
}

/// Built-in sites plus every `*.yaml`/`*.yml` under `sites_dir`. A file
/// whose site name matches a built-in replaces it.
fn load_definitions(sites_dir: Option<&Path>) -> Result<Vec<SiteDefinition>> {
    let mut definitions = builtin_definitions()?;
    let Some(dir) = sites_dir else {
        return Ok(definitions);
    };

    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read sites directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| {
            matches!(
                path.extension().and_then(|ext| ext.to_str()),
                Some("yaml" | "yml")
            )
        })
        .collect();
    paths.sort();

    for path in paths {
        let definition = SiteDefinition::load_from_path(&path)?;
        match definitions.iter_mut().find(|d| d.name == definition.name) {
            Some(existing) => {
                warn!(site = %definition.name, path = %path.display(), "site definition replaces built-in");
                *existing = definition;
            }
            None => {
                info!(site = %definition.name, path = %path.display(), "site definition loaded");
                definitions.push(definition);
            }
        }
    }
    Ok(definitions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: serde_json::Value) -> Params {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn builds_with_defaults() {
        let context = AppContext::build(AppConfig::default()).unwrap();
        let catalog = context.catalog();
        assert!(catalog.contains_key("whatsapp_web"));
        assert!(catalog.contains_key("engine"));
        assert_eq!(context.profile().current(), PolicyProfile::Balanced);
    }

    #[tokio::test]
    async fn check_policy_follows_profile() {
        let context = AppContext::build(AppConfig::default()).unwrap();
        let send = params(json!({"chat": "Ana", "text": "hi"}));

        let (_, decision) = context
            .check_policy("whatsapp_web.send_message_to_chat", send.clone())
            .unwrap();
        assert_eq!(decision, Decision::Allow);

        context.set_profile(PolicyProfile::Strict, None);
        let (spec, decision) = context
            .check_policy("whatsapp_web.send_message_to_chat", send)
            .unwrap();
        assert!(spec.sensitivity.is_sensitive());
        assert!(matches!(decision, Decision::RequireConfirm { .. }));
    }

    #[tokio::test]
    async fn prepare_rejects_unknown_actions() {
        let context = AppContext::build(AppConfig::default()).unwrap();
        assert!(context
            .prepare_confirmation("whatsapp_web.teleport", Params::new())
            .is_err());
        let prepared = context
            .prepare_confirmation("whatsapp_web.send_message_to_chat", Params::new())
            .unwrap();
        assert!(context.broker().get(&prepared.token).is_some());
    }

    async fn wait_finished(context: &AppContext, run_id: &RunId) {
        for _ in 0..300 {
            if context
                .run_status(&run_id.0)
                .is_some_and(|view| view.phase == RunPhase::Finished)
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("run {run_id} did not finish");
    }

    fn log_plan(message: &str) -> Plan {
        Plan::new(
            "note",
            vec![action_flow::Step::new("engine.log").with_param("message", message)],
        )
    }

    #[tokio::test]
    async fn oldest_finished_runs_are_evicted_beyond_the_cap() {
        let mut config = AppConfig::default();
        config.runs.max_finished = 1;
        let context = AppContext::build(config).unwrap();

        let first = context.start_run(log_plan("one"), RunState::new()).unwrap();
        wait_finished(&context, &first).await;
        let second = context.start_run(log_plan("two"), RunState::new()).unwrap();
        wait_finished(&context, &second).await;

        assert_eq!(context.sweep_runs(), 1);
        assert!(context.run_status(&first.0).is_none());
        assert!(context.run_status(&second.0).is_some());
    }

    #[tokio::test]
    async fn finished_runs_expire_after_retention() {
        let mut config = AppConfig::default();
        config.runs.retention = "30ms".into();
        let context = AppContext::build(config).unwrap();

        let run_id = context.start_run(log_plan("bye"), RunState::new()).unwrap();
        wait_finished(&context, &run_id).await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(context.sweep_runs(), 1);
        assert!(context.runs().is_empty());
    }

    #[test]
    fn sites_dir_adds_definitions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("notes.yaml"),
            r#"
name: notes_web
selectors:
  body: ["textarea"]
actions:
  write:
    description: Write a note
    required: [text]
    ops:
      - op: fill
        target: body
        text: "{text}"
"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("README.txt"), "ignored").unwrap();

        let definitions = load_definitions(Some(dir.path())).unwrap();
        assert!(definitions.iter().any(|d| d.name == "notes_web"));
        assert!(definitions.iter().any(|d| d.name == "whatsapp_web"));
    }
}

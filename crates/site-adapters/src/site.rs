use std::sync::Arc;

use action_locator::{
    fill_placeholders, play, DriverProbe, LocatorError, NavRecipeBook, ResolveScope,
    SelectorResolver,
};
use action_primitives::{ExecCtx, UiDriver};
use async_trait::async_trait;
use autobot_core_types::Params;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use session_health::{RecoveryBudget, SessionGuard, SessionMonitor};
use tracing::{debug, info, warn};

use crate::adapter::{ActionOutput, ActionSpec, Adapter, Diagnostics};
use crate::definition::{ActionDef, Op, SiteDefinition};
use crate::errors::{AdapterError, AdapterResult};

const MAX_INVOKE_DEPTH: usize = 4;
const EXCERPT_CHARS: usize = 600;

type StepKey = (String, usize);

#[derive(Default)]
struct Trace {
    value: Option<Value>,
    selector_used: Option<String>,
}

/// Adapter interpreted from a [`SiteDefinition`].
///
/// Every top-level action first checks the session (when the site declares
/// markers) and gets one recovery attempt per plan step.
pub struct SiteAdapter {
    definition: SiteDefinition,
    driver: Arc<dyn UiDriver>,
    resolver: Arc<SelectorResolver>,
    recipes: Arc<NavRecipeBook>,
    monitor: Option<SessionMonitor>,
    budget: Mutex<Option<(StepKey, Arc<RecoveryBudget>)>>,
}

impl SiteAdapter {
    pub fn new(
        definition: SiteDefinition,
        driver: Arc<dyn UiDriver>,
        resolver: Arc<SelectorResolver>,
        recipes: Arc<NavRecipeBook>,
    ) -> AdapterResult<Self> {
        definition.validate()?;
        let monitor = definition
            .session
            .clone()
            .map(SessionMonitor::new)
            .transpose()?;
        Ok(Self {
            definition,
            driver,
            resolver,
            recipes,
            monitor,
            budget: Mutex::new(None),
        })
    }

    pub fn definition(&self) -> &SiteDefinition {
        &self.definition
    }

    fn action_def(&self, action: &str) -> AdapterResult<&ActionDef> {
        self.definition
            .actions
            .get(action)
            .ok_or_else(|| AdapterError::UnknownAction {
                adapter: self.definition.name.clone(),
                action: action.to_string(),
            })
    }

    /// Budget shared by every attempt of the same run step.
    fn step_budget(&self, ctx: &ExecCtx) -> Arc<RecoveryBudget> {
        let key = (ctx.run_id.clone(), ctx.step_index);
        let mut slot = self.budget.lock();
        match slot.as_ref() {
            Some((current, budget)) if *current == key => Arc::clone(budget),
            _ => {
                let budget = Arc::new(RecoveryBudget::new());
                *slot = Some((key, Arc::clone(&budget)));
                budget
            }
        }
    }

    async fn ensure_session(&self, action: &str, ctx: &ExecCtx) -> AdapterResult<()> {
        let Some(monitor) = self.monitor.as_ref() else {
            return Ok(());
        };
        let recovery = monitor.profile().recovery_action.clone();
        if recovery.as_deref() == Some(action) {
            return Ok(());
        }

        let budget = self.step_budget(ctx);
        let guard = SessionGuard::new(monitor, self.driver.as_ref());
        let status = guard
            .ensure(&budget, move || async move {
                match recovery {
                    Some(recovery) => {
                        info!(adapter = %self.definition.name, action = %recovery, "running recovery action");
                        self.run_action(&recovery, &recovery, Params::new(), ctx, 1)
                            .await
                            .map(|_| ())
                            .map_err(|err| err.to_string())
                    }
                    None => Err("no recovery action configured".to_string()),
                }
            })
            .await?;
        debug!(adapter = %self.definition.name, ?status, "session check passed");
        Ok(())
    }

    fn run_action<'a>(
        &'a self,
        root: &'a str,
        action: &'a str,
        params: Params,
        ctx: &'a ExecCtx,
        depth: usize,
    ) -> BoxFuture<'a, AdapterResult<ActionOutput>> {
        Box::pin(async move {
            if depth > MAX_INVOKE_DEPTH {
                return Err(AdapterError::permanent(format!(
                    "{}.{} nests invocations too deeply",
                    self.definition.name, action
                )));
            }
            let def = self.action_def(action)?;
            let params = merge_defaults(&def.defaults, params);
            check_required(action, &def.required, &params)?;

            let ops = self.select_ops(def);
            let scope = ResolveScope::new(self.definition.name.clone(), root.to_string());
            let mut trace = Trace::default();
            self.run_ops(root, &scope, ops, &params, ctx, depth, &mut trace)
                .await?;

            let value = match (trace.value, def.message.as_ref()) {
                (Some(value), _) => value,
                (None, Some(message)) => Value::String(fill_placeholders(message, &params)),
                (None, None) => Value::Null,
            };
            Ok(ActionOutput {
                value,
                selector_used: trace.selector_used,
            })
        })
    }

    fn select_ops<'d>(&self, def: &'d ActionDef) -> &'d [Op] {
        let human = def.human.as_deref();
        if self.driver.supports_selectors() {
            if def.ops.is_empty() {
                human.unwrap_or(&[])
            } else {
                &def.ops
            }
        } else {
            human.unwrap_or(&def.ops)
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn run_ops<'a>(
        &'a self,
        root: &'a str,
        scope: &'a ResolveScope,
        ops: &'a [Op],
        params: &'a Params,
        ctx: &'a ExecCtx,
        depth: usize,
        trace: &'a mut Trace,
    ) -> BoxFuture<'a, AdapterResult<()>> {
        Box::pin(async move {
            for op in ops {
                if ctx.is_cancelled() {
                    return Err(AdapterError::Driver(
                        action_primitives::DriverError::Interrupted("action cancelled".into()),
                    ));
                }
                debug!(adapter = %self.definition.name, ?op, "op");
                match op {
                    Op::EnsureUrl { url } => {
                        let url = fill_placeholders(url, params);
                        let current = self.driver.current_url().await.unwrap_or_default();
                        if !current.starts_with(&url) {
                            self.driver.navigate(ctx, &url).await?;
                        }
                    }
                    Op::Navigate { url } => {
                        self.driver
                            .navigate(ctx, &fill_placeholders(url, params))
                            .await?;
                    }
                    Op::Click { target } => {
                        let locator = self.resolve(scope, target, trace).await?;
                        self.driver.click(ctx, &locator).await?;
                    }
                    Op::ClickWithText { target, text } => {
                        let locator = self.resolve(scope, target, trace).await?;
                        let text = fill_placeholders(text, params).replace('\'', "\\'");
                        self.driver
                            .click(ctx, &format!("{}:has-text('{}')", locator, text))
                            .await?;
                    }
                    Op::Fill { target, text } => {
                        let locator = self.resolve(scope, target, trace).await?;
                        self.driver
                            .fill(ctx, &locator, &fill_placeholders(text, params))
                            .await?;
                    }
                    Op::ClickIfPresent {
                        target,
                        otherwise,
                        required,
                    } => match self.resolve(scope, target, trace).await {
                        Ok(locator) => self.driver.click(ctx, &locator).await?,
                        Err(AdapterError::Selector(err @ LocatorError::NotFound { .. })) => {
                            if *required && otherwise.is_empty() {
                                return Err(err.into());
                            }
                            debug!(logical = %target, "optional target absent");
                            self.run_ops(root, scope, otherwise, params, ctx, depth, trace)
                                .await?;
                        }
                        Err(err) => return Err(err),
                    },
                    Op::Press { key } => self.driver.press(ctx, key).await?,
                    Op::Hotkey { keys } => self.driver.hotkey(ctx, keys).await?,
                    Op::TypeText { text } => {
                        self.driver
                            .type_text(ctx, &fill_placeholders(text, params))
                            .await?;
                    }
                    Op::Recipe { name } => {
                        let steps = self.recipes.render(&self.definition.name, name, params)?;
                        play(self.driver.as_ref(), ctx, &steps).await?;
                    }
                    Op::ReadTexts {
                        target,
                        limit_param,
                        default_limit,
                        from_end,
                        dedupe,
                    } => {
                        let limit = read_limit(params, limit_param, *default_limit)?;
                        let locator = self.resolve(scope, target, trace).await?;
                        let raw = self.driver.read_texts(ctx, &locator, usize::MAX).await?;
                        let texts = select_texts(raw, limit, *from_end, *dedupe);
                        trace.value = Some(Value::Array(
                            texts.into_iter().map(Value::String).collect(),
                        ));
                    }
                    Op::Invoke { action } => {
                        let output = self
                            .run_action(root, action, params.clone(), ctx, depth + 1)
                            .await?;
                        if output.selector_used.is_some() {
                            trace.selector_used = output.selector_used;
                        }
                    }
                }
            }
            Ok(())
        })
    }

    async fn resolve(
        &self,
        scope: &ResolveScope,
        logical_name: &str,
        trace: &mut Trace,
    ) -> AdapterResult<String> {
        if !self.driver.supports_selectors() {
            return Err(AdapterError::permanent(format!(
                "'{}' needs a selector-capable driver",
                logical_name
            )));
        }
        let resolved = self
            .resolver
            .resolve(scope, logical_name, &DriverProbe(self.driver.as_ref()))
            .await?;
        trace.selector_used = Some(resolved.locator.clone());
        Ok(resolved.locator)
    }
}

#[async_trait]
impl Adapter for SiteAdapter {
    fn name(&self) -> &str {
        &self.definition.name
    }

    fn actions(&self) -> Vec<ActionSpec> {
        self.definition
            .actions
            .iter()
            .map(|(name, def)| ActionSpec {
                name: name.clone(),
                description: def.description.clone(),
                sensitivity: def.sensitivity,
                required: def.required.clone(),
            })
            .collect()
    }

    async fn execute(
        &self,
        action: &str,
        params: &Params,
        ctx: &ExecCtx,
    ) -> AdapterResult<ActionOutput> {
        let def = self.action_def(action)?;
        if !def.skip_session_check {
            self.ensure_session(action, ctx).await?;
        }
        self.run_action(action, action, params.clone(), ctx, 0).await
    }

    async fn diagnostics(&self, label: &str) -> Diagnostics {
        let capture_path = match self.driver.capture(label).await {
            Ok(path) => path,
            Err(err) => {
                warn!(adapter = %self.definition.name, "capture failed: {}", err);
                None
            }
        };
        Diagnostics {
            target: self.driver.current_url().await,
            excerpt: self.driver.page_excerpt(EXCERPT_CHARS).await,
            capture_path,
        }
    }
}

fn merge_defaults(defaults: &Params, params: Params) -> Params {
    let mut merged = defaults.clone();
    merged.extend(params);
    merged
}

fn check_required(action: &str, required: &[String], params: &Params) -> AdapterResult<()> {
    for key in required {
        let present = match params.get(key) {
            Some(Value::String(text)) => !text.trim().is_empty(),
            Some(Value::Null) | None => false,
            Some(_) => true,
        };
        if !present {
            return Err(AdapterError::InvalidParams(format!(
                "{} requires param '{}'",
                action, key
            )));
        }
    }
    Ok(())
}

fn read_limit(params: &Params, key: &str, default: usize) -> AdapterResult<usize> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| AdapterError::InvalidParams(format!("'{}' must be a positive integer", key))),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| AdapterError::InvalidParams(format!("'{}' must be a positive integer", key))),
        Some(_) => Err(AdapterError::InvalidParams(format!(
            "'{}' must be a positive integer",
            key
        ))),
    }
}

fn select_texts(raw: Vec<String>, limit: usize, from_end: bool, dedupe: bool) -> Vec<String> {
    let mut texts: Vec<String> = raw
        .into_iter()
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .collect();
    if dedupe {
        let mut seen = std::collections::HashSet::new();
        texts.retain(|text| seen.insert(text.clone()));
    }
    if from_end {
        let skip = texts.len().saturating_sub(limit);
        texts.split_off(skip)
    } else {
        texts.truncate(limit);
        texts
    }
}

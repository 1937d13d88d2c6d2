//! Plan executor
//!
//! Runs the steps of a [`Plan`] in order against the adapter registry. Every
//! step passes through the policy engine first; steps that need a human
//! decision suspend on the confirmation broker until resolved, cancelled or
//! timed out. Dispatches are paced, bounded by a timeout, retried while the
//! failure is transient and recorded in telemetry attempt by attempt.
//!
//! All adapters drive one UI session, so a run holds the session for its
//! whole duration and later runs queue behind it.

use std::sync::Arc;
use std::time::Duration;

use action_primitives::ExecCtx;
use adapter_telemetry::{FailureDetail, Outcome, TelemetryCollector};
use autobot_core_types::{ActionRef, FailureKind, Params, RunId};
use autobot_policy_center::{ActionHistory, Decision, PolicyEngine, PolicyRequest, ProfileHandle};
use chrono::{DateTime, Utc};
use confirm_broker::{Binding, ConfirmOutcome, ConfirmationBroker, Resolution, TokenState};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use site_adapters::{AdapterError, AdapterRegistry};
use tokio::sync::{broadcast, oneshot, Mutex, MutexGuard};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine_adapter::{EngineAdapter, ENGINE_ADAPTER};
use crate::errors::FlowError;
use crate::limiter::{duration_str, ActionLimiter, LimiterConfig};
use crate::plan::{Plan, Step};
use crate::record::{ExecutionResult, RunStatus, StepError, StepOutcome, StepStatus};
use crate::state::{RunState, LAST_ERROR_KEY};
use crate::strategies::{after_failed_attempt, after_failed_step, AttemptMove, StepFailureMove};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Per-attempt dispatch timeout unless the step sets `timeout_ms`
    #[serde(with = "duration_str")]
    pub action_timeout: Duration,
    /// Pause between attempts unless the step sets `retry_delay_ms`
    #[serde(with = "duration_str")]
    pub retry_delay: Duration,
    /// Longest a run stays suspended on one confirmation; capped by the token ttl
    #[serde(with = "duration_str")]
    pub confirmation_wait: Duration,
    pub limiter: LimiterConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            action_timeout: Duration::from_secs(30),
            retry_delay: Duration::from_secs(1),
            confirmation_wait: Duration::from_secs(5 * 60),
            limiter: LimiterConfig::default(),
        }
    }
}

/// Shared services the executor consults; all of them outlive a single run.
#[derive(Clone)]
pub struct ExecutorServices {
    pub policy: Arc<PolicyEngine>,
    pub history: Arc<ActionHistory>,
    pub profile: ProfileHandle,
    pub broker: Arc<ConfirmationBroker>,
    pub telemetry: Arc<TelemetryCollector>,
}

/// Handle for cancelling a run from outside.
#[derive(Clone, Debug)]
pub struct RunControl {
    run_id: RunId,
    cancel: CancellationToken,
}

impl RunControl {
    pub fn new() -> Self {
        Self::with_run_id(RunId::new())
    }

    pub fn with_run_id(run_id: RunId) -> Self {
        Self {
            run_id,
            cancel: CancellationToken::new(),
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Progress notifications for subscribers (control surface, CLI).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: RunId,
        plan: String,
        total_steps: usize,
    },
    StepStarted {
        run_id: RunId,
        index: usize,
        action: String,
    },
    /// The run is suspended until `token` is confirmed or cancelled.
    AwaitingConfirmation {
        run_id: RunId,
        index: usize,
        token: String,
        adapter: String,
        action: String,
        reason: String,
        expires_at: DateTime<Utc>,
    },
    StepFinished {
        run_id: RunId,
        index: usize,
        action: String,
        status: StepStatus,
    },
    RunFinished {
        run_id: RunId,
        status: RunStatus,
        completed_steps: usize,
        total_steps: usize,
    },
}

/// Result of [`PlanExecutor::confirm_and_execute`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConfirmedExecution {
    /// A suspended run picked the action up and executes it itself.
    Resumed { binding: Binding },
    /// Nobody was waiting; the bound action ran here.
    Executed { binding: Binding, value: Value },
}

struct AttemptFailure {
    error: StepError,
    transient: bool,
}

enum DispatchError {
    Adapter(AdapterError),
    Timeout(Duration),
    Cancelled,
}

pub struct PlanExecutor {
    adapters: AdapterRegistry,
    services: ExecutorServices,
    limiter: ActionLimiter,
    config: ExecutorConfig,
    events: broadcast::Sender<RunEvent>,
    session: Mutex<()>,
}

impl PlanExecutor {
    /// Registers the built-in `engine` adapter unless one is already present.
    pub fn new(
        mut adapters: AdapterRegistry,
        services: ExecutorServices,
        config: ExecutorConfig,
    ) -> Result<Self, FlowError> {
        if adapters.get(ENGINE_ADAPTER).is_none() {
            let engine = EngineAdapter::new(services.profile.clone(), services.telemetry.clone())
                .with_catalog(adapters.catalog());
            adapters.register(Arc::new(engine))?;
        }
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            adapters,
            services,
            limiter: ActionLimiter::new(config.limiter.clone()),
            config,
            events,
            session: Mutex::new(()),
        })
    }

    pub fn adapters(&self) -> &AdapterRegistry {
        &self.adapters
    }

    pub fn services(&self) -> &ExecutorServices {
        &self.services
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.events.subscribe()
    }

    /// True while a run or a confirmed action holds the UI session.
    pub fn is_busy(&self) -> bool {
        self.session.try_lock().is_err()
    }

    /// Waits for the UI session in arrival order; `None` when cancelled first.
    async fn acquire_session(
        &self,
        run_id: &RunId,
        cancel: &CancellationToken,
    ) -> Option<MutexGuard<'_, ()>> {
        if let Ok(guard) = self.session.try_lock() {
            return Some(guard);
        }
        info!(run = %run_id, "UI session busy, run queued");
        tokio::select! {
            _ = cancel.cancelled() => None,
            guard = self.session.lock() => Some(guard),
        }
    }

    /// Structural validation plus a lookup of every step's action.
    pub fn validate_plan(&self, plan: &Plan) -> Result<(), FlowError> {
        plan.validate()?;
        for (index, step) in plan.steps.iter().enumerate() {
            let action = step.action_ref()?;
            self.adapters.spec(&action).map_err(|err| {
                FlowError::InvalidPlan(format!("step {}: {}", index + 1, err))
            })?;
        }
        Ok(())
    }

    pub async fn run(&self, plan: &Plan, control: &RunControl) -> ExecutionResult {
        self.run_with_state(plan, control, RunState::new()).await
    }

    /// Run with variables pre-seeded into the run state.
    pub async fn run_with_state(
        &self,
        plan: &Plan,
        control: &RunControl,
        initial: RunState,
    ) -> ExecutionResult {
        let run_id = control.run_id().clone();
        let started_at = Utc::now();
        let total = plan.steps.len();

        let session = self.acquire_session(&run_id, control.token()).await;
        self.services.telemetry.begin_run(&run_id.0);
        info!(run = %run_id, plan = %plan.name, steps = total, "plan started");
        self.emit(RunEvent::RunStarted {
            run_id: run_id.clone(),
            plan: plan.name.clone(),
            total_steps: total,
        });

        let mut state = initial;
        let mut outcomes: Vec<StepOutcome> = Vec::with_capacity(total);
        let mut completed = 0;
        let mut partial = false;
        let mut terminal: Option<(RunStatus, StepError)> = None;

        for (index, step) in plan.steps.iter().enumerate() {
            let label = step_label(index, total, step);
            let mut outcome = StepOutcome::new(
                index,
                step.id.clone(),
                step.action.clone(),
                step.attempts_allowed(),
            )
            .with_description(step.description.clone());

            if session.is_none() || control.is_cancelled() {
                info!(run = %run_id, "{} not started: run cancelled", label);
                terminal = Some((
                    RunStatus::Cancelled,
                    StepError::new(FailureKind::Cancelled, "run cancelled"),
                ));
                break;
            }

            if let Some(condition) = &step.condition {
                if !condition.evaluate(&state) {
                    info!(run = %run_id, "{} skipped (condition=false)", label);
                    outcome = outcome.start().skipped().finish();
                    completed += 1;
                    self.emit_step_finished(&run_id, &outcome);
                    outcomes.push(outcome);
                    continue;
                }
            }

            info!(run = %run_id, "{}", label);
            self.emit(RunEvent::StepStarted {
                run_id: run_id.clone(),
                index,
                action: step.action.clone(),
            });

            let params = state.render_map(&step.params);
            outcome = outcome.start();
            outcome.params = params.clone();

            match self
                .execute_step(&run_id, index, step, &params, control, &mut outcome)
                .await
            {
                Ok(value) => {
                    if let Some(key) = &step.save_as {
                        state.insert(key.clone(), value.clone());
                    }
                    outcome = outcome.with_success(value).finish();
                    completed += 1;
                    debug!(run = %run_id, step = index + 1, "step ok");
                }
                Err(error) => {
                    state.insert(LAST_ERROR_KEY, Value::String(error.cause.clone()));
                    match after_failed_step(error.kind, step.continue_on_error) {
                        StepFailureMove::Continue => {
                            warn!(run = %run_id, kind = %error.kind, "{} failed, continuing: {}", label, error.cause);
                            outcome = outcome.with_error(StepStatus::FailedContinue, error).finish();
                            completed += 1;
                            partial = true;
                        }
                        StepFailureMove::Abort => {
                            warn!(run = %run_id, kind = %error.kind, "{} failed: {}", label, error.cause);
                            outcome = outcome.with_error(StepStatus::Failed, error.clone()).finish();
                            terminal = Some((RunStatus::Failed, error));
                        }
                        StepFailureMove::Cancel => {
                            info!(run = %run_id, "{} cancelled", label);
                            outcome = outcome.with_error(StepStatus::Cancelled, error.clone()).finish();
                            terminal = Some((RunStatus::Cancelled, error));
                        }
                    }
                }
            }

            self.emit_step_finished(&run_id, &outcome);
            outcomes.push(outcome);
            if terminal.is_some() {
                break;
            }
        }

        for (index, step) in plan.steps.iter().enumerate().skip(outcomes.len()) {
            outcomes.push(
                StepOutcome::new(index, step.id.clone(), step.action.clone(), step.attempts_allowed())
                    .with_description(step.description.clone()),
            );
        }

        let (status, error) = match terminal {
            Some((status, error)) => (status, Some(error)),
            None if partial => (RunStatus::PartiallySucceeded, None),
            None => (RunStatus::Succeeded, None),
        };
        let success = matches!(status, RunStatus::Succeeded | RunStatus::PartiallySucceeded);

        self.services.telemetry.end_run(&run_id.0);
        drop(session);

        if success {
            info!(run = %run_id, ?status, completed, total, "plan finished");
        } else {
            warn!(run = %run_id, ?status, completed, total, "plan stopped");
        }
        self.emit(RunEvent::RunFinished {
            run_id: run_id.clone(),
            status,
            completed_steps: completed,
            total_steps: total,
        });

        ExecutionResult {
            run_id,
            plan_name: plan.name.clone(),
            success,
            status,
            completed_steps: completed,
            total_steps: total,
            run_state: state,
            step_outcomes: outcomes,
            error,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Confirm a token and, when no run is waiting on it, execute the bound
    /// action once.
    ///
    /// Executing needs the UI session; while a run holds it a token without
    /// a waiter is left pending and [`FlowError::SessionBusy`] is returned.
    pub async fn confirm_and_execute(&self, token: &str) -> Result<ConfirmedExecution, FlowError> {
        let session = self.session.try_lock().ok();
        if session.is_none() {
            let executes_here = self
                .services
                .broker
                .get(token)
                .is_some_and(|view| view.state == TokenState::Pending && !view.awaited);
            if executes_here {
                return Err(FlowError::SessionBusy);
            }
        }

        let binding = match self.services.broker.confirm(token)? {
            ConfirmOutcome::Resumed(binding) => return Ok(ConfirmedExecution::Resumed { binding }),
            ConfirmOutcome::Execute(binding) => binding,
        };
        // Waiters are attached at prepare time only, so `Execute` implies the
        // pre-check above found no waiter and took the session.
        let Some(_session) = session else {
            return Err(FlowError::SessionBusy);
        };

        let action = ActionRef::new(binding.adapter.clone(), binding.action.clone());
        let spec = self.adapters.spec(&action).map_err(|err| FlowError::Action {
            kind: err.kind(),
            cause: err.to_string(),
        })?;
        let request = PolicyRequest::new(
            action.adapter.clone(),
            action.action.clone(),
            spec.sensitivity,
            binding.params.clone(),
        );
        let now = Instant::now();
        let decision = self.services.policy.evaluate(
            self.services.profile.current(),
            &request,
            &self.services.history.snapshot(now),
            now,
        );
        if let Decision::Deny { reason } = decision {
            warn!(token, %reason, "confirmed action blocked by denylist");
            return Err(FlowError::Denied(reason));
        }

        let cancel = CancellationToken::new();
        if !self.limiter.acquire(&cancel).await {
            return Err(FlowError::Action {
                kind: FailureKind::Cancelled,
                cause: "dispatch cancelled".into(),
            });
        }
        self.services.history.record(&request, Instant::now());
        info!(token, action = %action, "executing confirmed action");

        let run_id = RunId(format!("confirm-{}", token));
        self.services.telemetry.begin_run(&run_id.0);
        let dispatched = self
            .dispatch_once(&run_id, 0, 1, &action, &binding.params, self.config.action_timeout, &cancel)
            .await;
        self.services.telemetry.end_run(&run_id.0);
        let value = dispatched.map_err(|failure| FlowError::Action {
            kind: failure.error.kind,
            cause: failure.error.cause,
        })?;
        Ok(ConfirmedExecution::Executed { binding, value })
    }

    async fn execute_step(
        &self,
        run_id: &RunId,
        index: usize,
        step: &Step,
        params: &Params,
        control: &RunControl,
        outcome: &mut StepOutcome,
    ) -> Result<Value, StepError> {
        let action = step
            .action_ref()
            .map_err(|err| StepError::new(FailureKind::UnknownAction, err.to_string()))?;
        let spec = self
            .adapters
            .spec(&action)
            .map_err(|err| StepError::new(err.kind(), err.to_string()))?;

        let request = PolicyRequest::new(
            action.adapter.clone(),
            action.action.clone(),
            spec.sensitivity,
            params.clone(),
        );
        self.authorize(run_id, index, &request, control, outcome).await?;
        self.services.history.record(&request, Instant::now());

        let allowed = step.attempts_allowed();
        let timeout = step.timeout().unwrap_or(self.config.action_timeout);
        let delay = step.retry_delay().unwrap_or(self.config.retry_delay);

        let mut attempt = 0;
        loop {
            attempt += 1;
            if !self.limiter.acquire(control.token()).await {
                return Err(StepError::new(FailureKind::Cancelled, "run cancelled"));
            }
            outcome.attempts_used = attempt;

            let failure = match self
                .dispatch_once(run_id, index, attempt, &action, params, timeout, control.token())
                .await
            {
                Ok(value) => return Ok(value),
                Err(failure) => failure,
            };

            match after_failed_attempt(failure.error.kind, failure.transient, attempt, allowed) {
                AttemptMove::GiveUp => return Err(failure.error),
                AttemptMove::Retry => {
                    warn!(
                        run = %run_id,
                        step = index + 1,
                        attempt,
                        allowed,
                        kind = %failure.error.kind,
                        "attempt failed, retrying in {}: {}",
                        humantime::format_duration(delay),
                        failure.error.cause
                    );
                    tokio::select! {
                        _ = control.token().cancelled() => {
                            return Err(StepError::new(FailureKind::Cancelled, "run cancelled"));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn authorize(
        &self,
        run_id: &RunId,
        index: usize,
        request: &PolicyRequest,
        control: &RunControl,
        outcome: &mut StepOutcome,
    ) -> Result<(), StepError> {
        let now = Instant::now();
        let profile = self.services.profile.current();
        let decision = self.services.policy.evaluate(
            profile,
            request,
            &self.services.history.snapshot(now),
            now,
        );

        match decision {
            Decision::Allow => Ok(()),
            Decision::Deny { reason } => Err(StepError::new(FailureKind::PolicyDenied, reason)),
            Decision::RequireConfirm { reason } => {
                self.await_confirmation(run_id, index, request, reason, control, outcome)
                    .await
            }
        }
    }

    async fn await_confirmation(
        &self,
        run_id: &RunId,
        index: usize,
        request: &PolicyRequest,
        reason: String,
        control: &RunControl,
        outcome: &mut StepOutcome,
    ) -> Result<(), StepError> {
        let broker = &self.services.broker;
        let (prepared, mut resolution) = broker.prepare_for_waiter(Binding {
            adapter: request.adapter.clone(),
            action: request.action.clone(),
            params: request.params.clone(),
        });
        let token = prepared.token.clone();
        outcome.confirmation_token = Some(token.clone());

        info!(run = %run_id, step = index + 1, %token, %reason, "awaiting confirmation");
        self.emit(RunEvent::AwaitingConfirmation {
            run_id: run_id.clone(),
            index,
            token: token.clone(),
            adapter: request.adapter.clone(),
            action: request.action.clone(),
            reason,
            expires_at: prepared.expires_at,
        });

        let wait = self.config.confirmation_wait.min(broker.ttl());
        tokio::select! {
            _ = control.token().cancelled() => {
                stop_waiting(&mut resolution);
                broker.abandon(&token);
                Err(StepError::new(FailureKind::Cancelled, "run cancelled while awaiting confirmation"))
            }
            resolved = tokio::time::timeout(wait, &mut resolution) => match resolved {
                Ok(Ok(Resolution::Confirmed)) => {
                    info!(run = %run_id, step = index + 1, %token, "confirmation received");
                    Ok(())
                }
                Ok(Ok(Resolution::Cancelled)) => Err(StepError::new(
                    FailureKind::ConfirmationTimeout,
                    "confirmation declined by reviewer",
                )),
                Ok(Ok(Resolution::Expired)) | Ok(Err(_)) => Err(StepError::new(
                    FailureKind::ConfirmationExpired,
                    format!("confirmation token {} expired", token),
                )),
                Err(_) => {
                    if stop_waiting(&mut resolution) == Some(Resolution::Confirmed) {
                        info!(run = %run_id, step = index + 1, %token, "confirmation received at the deadline");
                        return Ok(());
                    }
                    broker.abandon(&token);
                    Err(StepError::new(
                        FailureKind::ConfirmationTimeout,
                        format!("no confirmation within {}", humantime::format_duration(wait)),
                    ))
                }
            }
        }
    }

    /// One attempt: dispatch under a timeout, then record it in telemetry.
    #[allow(clippy::too_many_arguments)]
    async fn dispatch_once(
        &self,
        run_id: &RunId,
        index: usize,
        attempt: u32,
        action: &ActionRef,
        params: &Params,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Value, AttemptFailure> {
        let ctx = ExecCtx::new(run_id.to_string(), index, timeout, cancel.child_token());
        let started = Instant::now();
        let run = run_id.0.as_str();

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(DispatchError::Cancelled),
            dispatched = tokio::time::timeout(timeout, self.adapters.dispatch(action, params, &ctx)) => {
                match dispatched {
                    Ok(result) => result.map_err(DispatchError::Adapter),
                    Err(_) => Err(DispatchError::Timeout(timeout)),
                }
            }
        };
        let elapsed = started.elapsed();
        let telemetry = &self.services.telemetry;

        let (kind, cause, transient) = match result {
            Ok(output) => {
                telemetry.record(
                    run,
                    &action.adapter,
                    &action.action,
                    &Outcome::Success,
                    elapsed,
                    output.selector_used.as_deref(),
                );
                return Ok(output.value);
            }
            Err(DispatchError::Adapter(err)) => (err.kind(), err.to_string(), err.is_transient()),
            Err(DispatchError::Timeout(limit)) => (
                FailureKind::ActionTimeout,
                format!("no result within {}", humantime::format_duration(limit)),
                true,
            ),
            Err(DispatchError::Cancelled) => (
                FailureKind::Cancelled,
                "run cancelled during dispatch".to_string(),
                false,
            ),
        };

        let mut detail = FailureDetail {
            cause: cause.clone(),
            ..FailureDetail::default()
        };
        if kind != FailureKind::Cancelled {
            let label = format!("{}_{}_step{}_attempt{}", action.adapter, action.action, index + 1, attempt);
            let diagnostics = self.adapters.diagnostics(&action.adapter, &label).await;
            detail.target = diagnostics.target;
            detail.excerpt = diagnostics.excerpt;
            detail.capture_path = diagnostics.capture_path;
        }
        let snapshot = telemetry.record(
            run,
            &action.adapter,
            &action.action,
            &Outcome::Failure { kind, detail },
            elapsed,
            None,
        );

        Err(AttemptFailure {
            error: StepError::new(kind, cause).with_snapshot(snapshot),
            transient,
        })
    }

    fn emit(&self, event: RunEvent) {
        let _ = self.events.send(event);
    }

    fn emit_step_finished(&self, run_id: &RunId, outcome: &StepOutcome) {
        self.emit(RunEvent::StepFinished {
            run_id: run_id.clone(),
            index: outcome.index,
            action: outcome.action.clone(),
            status: outcome.status,
        });
    }
}

/// Closes the channel so a late confirm fails instead of resuming nobody,
/// then returns whatever was delivered before the close.
fn stop_waiting(resolution: &mut oneshot::Receiver<Resolution>) -> Option<Resolution> {
    resolution.close();
    resolution.try_recv().ok()
}

fn step_label(index: usize, total: usize, step: &Step) -> String {
    let name = if step.description.is_empty() {
        step.action.as_str()
    } else {
        step.description.as_str()
    };
    format!("[{}/{}] {}", index + 1, total, name)
}

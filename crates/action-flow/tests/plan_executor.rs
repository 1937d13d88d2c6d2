use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use action_flow::{
    ConfirmedExecution, ExecutorConfig, ExecutorServices, FlowError, LimiterConfig, Plan,
    PlanExecutor, RunControl, RunEvent, RunRecord, RunStatus, Step, StepStatus,
};
use action_primitives::ExecCtx;
use adapter_telemetry::TelemetryCollector;
use async_trait::async_trait;
use autobot_core_types::{FailureKind, Params, Sensitivity};
use autobot_policy_center::{
    default_rules, ActionHistory, PolicyEngine, PolicyProfile, PolicySource, ProfileHandle,
};
use confirm_broker::{BrokerConfig, ConfirmError, ConfirmationBroker, TokenState};
use parking_lot::Mutex;
use serde_json::{json, Value};
use site_adapters::{ActionOutput, ActionSpec, Adapter, AdapterError, AdapterRegistry, AdapterResult};

/// Adapter whose failures are queued up front.
struct ScriptedAdapter {
    failures: Mutex<HashMap<String, VecDeque<AdapterError>>>,
    calls: Mutex<Vec<(String, Params)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedAdapter {
    fn new() -> Self {
        Self {
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    fn fail_next(&self, action: &str, times: usize, error: AdapterError) {
        let mut failures = self.failures.lock();
        let queue = failures.entry(action.to_string()).or_default();
        for _ in 0..times {
            queue.push_back(error.clone());
        }
    }

    fn calls_to(&self, action: &str) -> Vec<Params> {
        self.calls
            .lock()
            .iter()
            .filter(|(name, _)| name == action)
            .map(|(_, params)| params.clone())
            .collect()
    }
}

#[async_trait]
impl Adapter for ScriptedAdapter {
    fn name(&self) -> &str {
        "app"
    }

    fn actions(&self) -> Vec<ActionSpec> {
        vec![
            ActionSpec::new("read", "read something", Sensitivity::ReadOnly),
            ActionSpec::new("click", "click something", Sensitivity::Interactive),
            ActionSpec::new("send_message", "send a message", Sensitivity::MessageSend),
            ActionSpec::new("hang", "never finishes", Sensitivity::ReadOnly),
            ActionSpec::new("slow", "takes a moment", Sensitivity::Interactive),
        ]
    }

    async fn execute(&self, action: &str, params: &Params, _ctx: &ExecCtx) -> AdapterResult<ActionOutput> {
        self.calls.lock().push((action.to_string(), params.clone()));
        if action == "hang" {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if action == "slow" {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        let failure = self
            .failures
            .lock()
            .get_mut(action)
            .and_then(|queue| queue.pop_front());
        if let Some(error) = failure {
            return Err(error);
        }
        let value = params.get("text").cloned().unwrap_or_else(|| json!(action));
        Ok(ActionOutput::value(value))
    }
}

struct Harness {
    executor: Arc<PlanExecutor>,
    adapter: Arc<ScriptedAdapter>,
    services: ExecutorServices,
}

fn harness(profile: PolicyProfile) -> Harness {
    let adapter = Arc::new(ScriptedAdapter::new());
    let mut registry = AdapterRegistry::new();
    registry
        .register(adapter.clone() as Arc<dyn Adapter>)
        .unwrap();

    let services = ExecutorServices {
        policy: Arc::new(PolicyEngine::from_specs(default_rules()).unwrap()),
        history: Arc::new(ActionHistory::default()),
        profile: ProfileHandle::new(profile, PolicySource::Runtime),
        broker: ConfirmationBroker::shared(BrokerConfig::default()),
        telemetry: Arc::new(TelemetryCollector::default()),
    };
    let config = ExecutorConfig {
        action_timeout: Duration::from_secs(2),
        retry_delay: Duration::from_millis(10),
        confirmation_wait: Duration::from_secs(3),
        limiter: LimiterConfig::disabled(),
    };
    let executor = PlanExecutor::new(registry, services.clone(), config).unwrap();
    Harness {
        executor: Arc::new(executor),
        adapter,
        services,
    }
}

fn send(chat: &str, text: &str) -> Step {
    Step::new("app.send_message")
        .with_param("chat", chat)
        .with_param("text", text)
}

#[tokio::test]
async fn transient_failure_is_retried_and_plan_succeeds() {
    let h = harness(PolicyProfile::Balanced);
    h.adapter.fail_next("click", 1, AdapterError::failed("element detached"));

    let plan = Plan::new(
        "retry",
        vec![
            Step::new("app.read"),
            Step::new("app.click").with_retries(1, Duration::from_millis(5)),
            Step::new("app.read"),
        ],
    );
    let result = h.executor.run(&plan, &RunControl::new()).await;

    assert!(result.success);
    assert_eq!(result.status, RunStatus::Succeeded);
    assert_eq!(result.completed_steps, 3);
    assert_eq!(result.step_outcomes[1].attempts_used, 2);
    assert_eq!(h.adapter.calls_to("click").len(), 2);

    let telemetry = h.services.telemetry.snapshot();
    let click = telemetry.action("app", "click").unwrap();
    assert_eq!((click.successes, click.failures), (1, 1));
}

#[tokio::test]
async fn exhausted_retry_budget_records_every_attempt() {
    let h = harness(PolicyProfile::Balanced);
    h.adapter.fail_next("click", 10, AdapterError::failed("still broken"));

    let plan = Plan::new(
        "exhaust",
        vec![
            Step::new("app.click").with_retries(2, Duration::from_millis(1)),
            Step::new("app.read"),
        ],
    );
    let result = h.executor.run(&plan, &RunControl::new()).await;

    assert!(!result.success);
    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.completed_steps, 0);
    let first = &result.step_outcomes[0];
    assert_eq!(first.status, StepStatus::Failed);
    assert_eq!(first.attempts_used, 3);
    assert_eq!(first.error.as_ref().unwrap().kind, FailureKind::AdapterError);
    assert_eq!(result.step_outcomes[1].status, StepStatus::NotRun);
    assert_eq!(result.run_state.get("last_error"), Some(&json!("still broken")));
    assert!(h.adapter.calls_to("read").is_empty());

    let telemetry = h.services.telemetry.snapshot();
    let click = telemetry.action("app", "click").unwrap();
    assert_eq!(click.successes + click.failures, 3);
}

#[tokio::test]
async fn permanent_failure_is_not_retried() {
    let h = harness(PolicyProfile::Balanced);
    h.adapter.fail_next("click", 1, AdapterError::permanent("wrong page"));

    let plan = Plan::new(
        "permanent",
        vec![Step::new("app.click").with_retries(3, Duration::from_millis(1))],
    );
    let result = h.executor.run(&plan, &RunControl::new()).await;

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.step_outcomes[0].attempts_used, 1);
}

#[tokio::test(start_paused = true)]
async fn strict_sensitive_step_times_out_without_confirmation() {
    let h = harness(PolicyProfile::Strict);
    let plan = Plan::new(
        "strict",
        vec![Step::new("app.read"), send("Ana", "hello"), Step::new("app.read")],
    );

    let result = h.executor.run(&plan, &RunControl::new()).await;

    assert!(!result.success);
    assert_eq!(result.completed_steps, 1);
    let error = result.error.as_ref().unwrap();
    assert_eq!(error.kind, FailureKind::ConfirmationTimeout);
    assert!(h.adapter.calls_to("send_message").is_empty());
    assert_eq!(result.step_outcomes[2].status, StepStatus::NotRun);

    let token = result.step_outcomes[1].confirmation_token.clone().unwrap();
    assert_eq!(h.services.broker.get(&token).unwrap().state, TokenState::Expired);
    assert!(matches!(
        h.executor.confirm_and_execute(&token).await,
        Err(FlowError::Confirm(ConfirmError::TokenExpired(_)))
    ));
}

#[tokio::test]
async fn confirmation_resumes_suspended_run() {
    let h = harness(PolicyProfile::Strict);
    let mut events = h.executor.subscribe();
    let plan = Plan::new("confirm", vec![send("Ana", "hello")]);

    let executor = Arc::clone(&h.executor);
    let run = tokio::spawn(async move { executor.run(&plan, &RunControl::new()).await });

    let token = loop {
        match events.recv().await.unwrap() {
            RunEvent::AwaitingConfirmation { token, action, .. } => {
                assert_eq!(action, "send_message");
                break token;
            }
            _ => continue,
        }
    };
    assert!(h.adapter.calls_to("send_message").is_empty());

    let confirmed = h.executor.confirm_and_execute(&token).await.unwrap();
    assert!(matches!(confirmed, ConfirmedExecution::Resumed { .. }));

    let result = run.await.unwrap();
    assert!(result.success);
    assert_eq!(h.adapter.calls_to("send_message").len(), 1);
    assert!(matches!(
        h.services.broker.confirm(&token),
        Err(ConfirmError::TokenAlreadyConsumed(_))
    ));
}

#[tokio::test]
async fn reviewer_cancel_ends_step_with_confirmation_timeout() {
    let h = harness(PolicyProfile::Strict);
    let mut events = h.executor.subscribe();
    let plan = Plan::new("declined", vec![send("Ana", "hello")]);

    let executor = Arc::clone(&h.executor);
    let run = tokio::spawn(async move { executor.run(&plan, &RunControl::new()).await });

    let token = loop {
        if let RunEvent::AwaitingConfirmation { token, .. } = events.recv().await.unwrap() {
            break token;
        }
    };
    h.services.broker.cancel(&token).unwrap();

    let result = run.await.unwrap();
    assert_eq!(result.error.unwrap().kind, FailureKind::ConfirmationTimeout);
    assert!(h.adapter.calls_to("send_message").is_empty());
}

#[tokio::test]
async fn trusted_profile_executes_sensitive_action_immediately() {
    let h = harness(PolicyProfile::Trusted);
    let plan = Plan::new("trusted", vec![send("Ana", "hello")]);

    let result = h.executor.run(&plan, &RunControl::new()).await;

    assert!(result.success);
    assert_eq!(h.adapter.calls_to("send_message").len(), 1);
    assert!(h.services.broker.pending().is_empty());
}

#[tokio::test]
async fn third_send_to_same_recipient_is_denied() {
    let h = harness(PolicyProfile::Trusted);
    let plan = Plan::new(
        "repeat",
        vec![send("Ana", "one"), send("Ana", "two"), send("Ana", "three")],
    );

    let result = h.executor.run(&plan, &RunControl::new()).await;

    assert!(!result.success);
    assert_eq!(result.completed_steps, 2);
    assert_eq!(result.error.unwrap().kind, FailureKind::PolicyDenied);
    assert_eq!(h.adapter.calls_to("send_message").len(), 2);
}

#[tokio::test]
async fn mass_message_text_is_denied_under_every_profile() {
    for profile in [PolicyProfile::Trusted, PolicyProfile::Balanced, PolicyProfile::Strict] {
        let h = harness(profile);
        let plan = Plan::new("bulk", vec![send("Ana", "please send to all my contacts")]);
        let result = h.executor.run(&plan, &RunControl::new()).await;
        assert_eq!(result.error.unwrap().kind, FailureKind::PolicyDenied, "{profile}");
        assert!(h.adapter.calls_to("send_message").is_empty());
    }
}

#[tokio::test]
async fn cancelled_before_start_runs_nothing() {
    let h = harness(PolicyProfile::Balanced);
    let control = RunControl::new();
    control.cancel();

    let plan = Plan::new("cancelled", vec![Step::new("app.read"), Step::new("app.click")]);
    let result = h.executor.run(&plan, &control).await;

    assert_eq!(result.status, RunStatus::Cancelled);
    assert!(!result.success);
    assert_eq!(result.completed_steps, 0);
    assert!(result
        .step_outcomes
        .iter()
        .all(|outcome| outcome.status == StepStatus::NotRun));
    assert!(h.adapter.calls_to("read").is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancel_interrupts_wait_step_despite_continue_on_error() {
    let h = harness(PolicyProfile::Balanced);
    let plan = Plan::new(
        "wait",
        vec![
            Step::new("engine.wait")
                .with_param("seconds", 30)
                .with_timeout(Duration::from_secs(120))
                .continue_on_error(),
            Step::new("app.read"),
        ],
    );
    let control = RunControl::new();

    let executor = Arc::clone(&h.executor);
    let run_control = control.clone();
    let run = tokio::spawn(async move { executor.run(&plan, &run_control).await });

    tokio::time::sleep(Duration::from_secs(1)).await;
    control.cancel();

    let result = run.await.unwrap();
    assert_eq!(result.status, RunStatus::Cancelled);
    assert_eq!(result.step_outcomes[0].status, StepStatus::Cancelled);
    assert_eq!(result.step_outcomes[1].status, StepStatus::NotRun);
    assert!(h.adapter.calls_to("read").is_empty());
}

#[tokio::test]
async fn continue_on_error_marks_run_partial() {
    let h = harness(PolicyProfile::Balanced);
    h.adapter.fail_next("click", 1, AdapterError::permanent("button disabled"));

    let plan = Plan::new(
        "partial",
        vec![
            Step::new("app.read"),
            Step::new("app.click").continue_on_error(),
            Step::new("app.read").with_param("text", "{last_error}").save_as("seen"),
        ],
    );
    let result = h.executor.run(&plan, &RunControl::new()).await;

    assert!(result.success);
    assert_eq!(result.status, RunStatus::PartiallySucceeded);
    assert_eq!(result.completed_steps, 3);
    assert_eq!(result.step_outcomes[1].status, StepStatus::FailedContinue);
    assert_eq!(result.run_state.get("seen"), Some(&json!("button disabled")));
}

#[tokio::test]
async fn conditions_and_templating_use_run_state() {
    let h = harness(PolicyProfile::Balanced);
    let plan = Plan::from_yaml_str(
        r#"
name: templated
steps:
  - action: app.read
    args: { text: "Ana" }
    save_as: name
  - action: app.click
    condition: "!name"
  - action: app.click
    condition: "name == Ana"
    params: { text: "hi {name}" }
    save_as: greeting
"#,
    )
    .unwrap();

    let result = h.executor.run(&plan, &RunControl::new()).await;

    assert!(result.success);
    assert_eq!(result.completed_steps, 3);
    assert_eq!(result.step_outcomes[1].status, StepStatus::Skipped);
    let clicks = h.adapter.calls_to("click");
    assert_eq!(clicks.len(), 1);
    assert_eq!(clicks[0]["text"], "hi Ana");
    assert_eq!(result.run_state.get("greeting"), Some(&Value::from("hi Ana")));
}

#[tokio::test]
async fn unknown_action_fails_without_retry() {
    let h = harness(PolicyProfile::Balanced);
    let plan = Plan::new(
        "unknown",
        vec![Step::new("app.fly").with_retries(3, Duration::from_millis(1))],
    );
    assert!(h.executor.validate_plan(&plan).is_err());

    let result = h.executor.run(&plan, &RunControl::new()).await;
    let outcome = &result.step_outcomes[0];
    assert_eq!(outcome.error.as_ref().unwrap().kind, FailureKind::UnknownAction);
    assert_eq!(outcome.attempts_used, 0);
}

#[tokio::test(start_paused = true)]
async fn dispatch_timeout_is_transient() {
    let h = harness(PolicyProfile::Balanced);
    let plan = Plan::new(
        "timeout",
        vec![Step::new("app.hang")
            .with_timeout(Duration::from_millis(100))
            .with_retries(1, Duration::from_millis(1))],
    );

    let result = h.executor.run(&plan, &RunControl::new()).await;

    let outcome = &result.step_outcomes[0];
    assert_eq!(outcome.error.as_ref().unwrap().kind, FailureKind::ActionTimeout);
    assert_eq!(outcome.attempts_used, 2);
    assert_eq!(h.adapter.calls_to("hang").len(), 2);
}

#[tokio::test]
async fn confirm_and_execute_runs_prepared_action_once() {
    let h = harness(PolicyProfile::Strict);
    let mut params = Params::new();
    params.insert("chat".into(), json!("Ana"));
    params.insert("text".into(), json!("approved"));
    let prepared = h.services.broker.prepare("app", "send_message", params);

    let executed = h.executor.confirm_and_execute(&prepared.token).await.unwrap();
    match executed {
        ConfirmedExecution::Executed { value, .. } => assert_eq!(value, json!("approved")),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(matches!(
        h.executor.confirm_and_execute(&prepared.token).await,
        Err(FlowError::Confirm(ConfirmError::TokenAlreadyConsumed(_)))
    ));
    assert_eq!(h.adapter.calls_to("send_message").len(), 1);
}

#[tokio::test]
async fn set_policy_step_changes_profile_for_later_steps() {
    let h = harness(PolicyProfile::Trusted);
    let plan = Plan::new(
        "tighten",
        vec![Step::new("engine.set_policy").with_param("profile", "strict")],
    );

    let result = h.executor.run(&plan, &RunControl::new()).await;

    assert!(result.success);
    assert_eq!(h.services.profile.current(), PolicyProfile::Strict);
}

#[tokio::test]
async fn run_record_is_written_as_json() {
    let h = harness(PolicyProfile::Balanced);
    let plan = Plan::new("record", vec![Step::new("app.read").save_as("value")]);
    let result = h.executor.run(&plan, &RunControl::new()).await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("runs").join("record.json");
    let record = RunRecord::new(result, "", h.services.telemetry.snapshot());
    tokio_test::assert_ok!(record.write_json(&path));

    let written: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written["plan_name"], "record");
    assert_eq!(written["status"], "succeeded");
    assert_eq!(written["run_state"]["value"], "read");
    assert_eq!(written["step_outcomes"][0]["status"], "ok");
    assert!(written["telemetry"]["actions"].is_array());
}

#[tokio::test]
async fn concurrent_runs_take_turns_on_the_ui_session() {
    let h = harness(PolicyProfile::Balanced);
    let slow = |tag: &str| Step::new("app.slow").with_param("text", tag);
    let first = Plan::new("first", vec![slow("a1"), slow("a2")]);
    let second = Plan::new("second", vec![slow("b1"), slow("b2")]);

    let first_control = RunControl::new();
    let second_control = RunControl::new();
    let (a, b) = tokio::join!(
        h.executor.run(&first, &first_control),
        h.executor.run(&second, &second_control)
    );

    assert!(a.success && b.success);
    assert_eq!(h.adapter.max_in_flight.load(Ordering::SeqCst), 1);
    let order: Vec<Value> = h
        .adapter
        .calls_to("slow")
        .iter()
        .map(|params| params["text"].clone())
        .collect();
    assert_eq!(order, vec![json!("a1"), json!("a2"), json!("b1"), json!("b2")]);
}

#[tokio::test]
async fn confirmed_action_waits_for_the_active_run() {
    let h = harness(PolicyProfile::Strict);
    let mut events = h.executor.subscribe();
    let plan = Plan::new("holding", vec![send("Ana", "hello")]);

    let executor = Arc::clone(&h.executor);
    let run = tokio::spawn(async move { executor.run(&plan, &RunControl::new()).await });
    let run_token = loop {
        if let RunEvent::AwaitingConfirmation { token, .. } = events.recv().await.unwrap() {
            break token;
        }
    };
    assert!(h.executor.is_busy());

    let mut params = Params::new();
    params.insert("chat".into(), json!("Bo"));
    params.insert("text".into(), json!("later"));
    let prepared = h.services.broker.prepare("app", "send_message", params);
    assert!(matches!(
        h.executor.confirm_and_execute(&prepared.token).await,
        Err(FlowError::SessionBusy)
    ));
    assert_eq!(
        h.services.broker.get(&prepared.token).unwrap().state,
        TokenState::Pending
    );

    let resumed = h.executor.confirm_and_execute(&run_token).await.unwrap();
    assert!(matches!(resumed, ConfirmedExecution::Resumed { .. }));
    assert!(run.await.unwrap().success);
    assert!(!h.executor.is_busy());

    let executed = h.executor.confirm_and_execute(&prepared.token).await.unwrap();
    assert!(matches!(executed, ConfirmedExecution::Executed { .. }));
    assert_eq!(h.adapter.calls_to("send_message").len(), 2);
}

#[tokio::test]
async fn queued_run_cancelled_before_it_gets_the_session() {
    let h = harness(PolicyProfile::Strict);
    let mut events = h.executor.subscribe();
    let holding = Plan::new("holding", vec![send("Ana", "hello")]);
    let executor = Arc::clone(&h.executor);
    let first = tokio::spawn(async move { executor.run(&holding, &RunControl::new()).await });
    let token = loop {
        if let RunEvent::AwaitingConfirmation { token, .. } = events.recv().await.unwrap() {
            break token;
        }
    };

    let queued = RunControl::new();
    let plan = Plan::new("queued", vec![Step::new("app.read")]);
    let executor = Arc::clone(&h.executor);
    let control = queued.clone();
    let second = tokio::spawn(async move { executor.run(&plan, &control).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    queued.cancel();

    let result = second.await.unwrap();
    assert_eq!(result.status, RunStatus::Cancelled);
    assert_eq!(result.completed_steps, 0);
    assert!(h.adapter.calls_to("read").is_empty());

    h.services.broker.cancel(&token).unwrap();
    assert!(!first.await.unwrap().success);
}

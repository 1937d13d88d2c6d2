use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use action_locator::{NoopObserver, SelectorRegistry, SelectorResolver};
use action_primitives::{DriverCall, DryRunDriver, ExecCtx, UiDriver};
use autobot_core_types::{ActionRef, FailureKind, Params};
use serde_json::{json, Value};
use site_adapters::{
    build_registry, builtin_definitions, recipe_book, selector_catalog, AdapterError,
    AdapterRegistry, Surface,
};
use tokio_util::sync::CancellationToken;

fn login_markers() -> Vec<String> {
    builtin_definitions()
        .unwrap()
        .iter()
        .flat_map(|definition| definition.login_markers())
        .collect()
}

fn registry_with(web: Arc<DryRunDriver>, desktop: Arc<DryRunDriver>) -> AdapterRegistry {
    let definitions = builtin_definitions().unwrap();
    let selectors = Arc::new(SelectorRegistry::new(selector_catalog(&definitions)));
    let resolver = Arc::new(SelectorResolver::new(selectors, Arc::new(NoopObserver)));
    let recipes = Arc::new(recipe_book(&definitions));
    let mut drivers: HashMap<Surface, Arc<dyn UiDriver>> = HashMap::new();
    drivers.insert(Surface::Browser, web);
    drivers.insert(Surface::Desktop, desktop);
    build_registry(definitions, &drivers, resolver, recipes).unwrap()
}

fn ctx(step: usize) -> ExecCtx {
    ExecCtx::new("run-test", step, Duration::from_secs(5), CancellationToken::new())
}

fn params(value: Value) -> Params {
    value.as_object().cloned().unwrap()
}

fn actions(driver: &DryRunDriver) -> Vec<DriverCall> {
    driver
        .calls()
        .into_iter()
        .filter(|call| !matches!(call, DriverCall::Probe { .. }))
        .collect()
}

#[tokio::test]
async fn send_message_to_chat_drives_search_type_and_send() {
    let web = Arc::new(DryRunDriver::new().with_missing(login_markers()));
    let registry = registry_with(Arc::clone(&web), Arc::new(DryRunDriver::keyboard_only()));

    let output = registry
        .dispatch(
            &ActionRef::new("whatsapp_web", "send_message_to_chat"),
            &params(json!({"chat": "Ana", "text": "hello"})),
            &ctx(0),
        )
        .await
        .unwrap();

    assert_eq!(output.value, json!("Message sent to chat: Ana"));
    assert!(output.selector_used.is_some());
    assert_eq!(
        actions(&web),
        vec![
            DriverCall::Navigate {
                url: "https://web.whatsapp.com".into()
            },
            DriverCall::Fill {
                locator: "div[contenteditable='true'][data-tab='3']".into(),
                text: "Ana".into()
            },
            DriverCall::Press { key: "Enter".into() },
            DriverCall::Fill {
                locator: "footer div[contenteditable='true'][data-tab='10']".into(),
                text: "hello".into()
            },
            DriverCall::Press { key: "Enter".into() },
        ]
    );
}

#[tokio::test]
async fn falls_back_when_primary_locator_is_gone() {
    let mut missing = login_markers();
    missing.push("div[contenteditable='true'][data-tab='3']".to_string());
    let web = Arc::new(DryRunDriver::new().with_missing(missing));
    let registry = registry_with(Arc::clone(&web), Arc::new(DryRunDriver::keyboard_only()));

    let output = registry
        .dispatch(
            &ActionRef::new("whatsapp_web", "open_chat"),
            &params(json!({"chat": "Ana"})),
            &ctx(0),
        )
        .await
        .unwrap();

    assert_eq!(
        output.selector_used.as_deref(),
        Some("div[role='textbox'][title='Search input textbox']")
    );
}

#[tokio::test]
async fn read_recent_messages_keeps_the_last_entries() {
    let texts = (1..=8).map(|i| format!("message {i}")).collect();
    let web = Arc::new(
        DryRunDriver::new()
            .with_missing(login_markers())
            .with_texts(
                "div.message-in span.selectable-text, div.message-out span.selectable-text",
                texts,
            ),
    );
    let registry = registry_with(web, Arc::new(DryRunDriver::keyboard_only()));

    let output = registry
        .dispatch(
            &ActionRef::new("whatsapp_web", "read_recent_messages"),
            &params(json!({"limit": 3})),
            &ctx(0),
        )
        .await
        .unwrap();
    assert_eq!(output.value, json!(["message 6", "message 7", "message 8"]));
}

#[tokio::test]
async fn expired_session_gets_one_recovery_per_step() {
    // Login markers stay visible, so recovery cannot succeed.
    let web = Arc::new(DryRunDriver::new());
    let registry = registry_with(Arc::clone(&web), Arc::new(DryRunDriver::keyboard_only()));
    let action = ActionRef::new("whatsapp_web", "open_chat");
    let chat = params(json!({"chat": "Ana"}));

    let err = registry.dispatch(&action, &chat, &ctx(2)).await.unwrap_err();
    assert!(matches!(err, AdapterError::Session(_)));
    assert_eq!(err.kind(), FailureKind::SessionRecoveryFailed);
    assert!(!err.is_transient());
    let clicks_after_first = actions(&web).len();
    assert_eq!(
        actions(&web),
        vec![DriverCall::Click {
            locator: "button:has-text('Continue with Google')".into()
        }]
    );

    // Same step again: the budget is spent, no second recovery click.
    registry.dispatch(&action, &chat, &ctx(2)).await.unwrap_err();
    assert_eq!(actions(&web).len(), clicks_after_first);

    // Next step gets a fresh budget.
    registry.dispatch(&action, &chat, &ctx(3)).await.unwrap_err();
    assert_eq!(actions(&web).len(), clicks_after_first + 1);
}

#[tokio::test]
async fn desktop_actions_replay_keyboard_recipes() {
    let desktop = Arc::new(DryRunDriver::keyboard_only());
    let registry = registry_with(Arc::new(DryRunDriver::new()), Arc::clone(&desktop));

    registry
        .dispatch(
            &ActionRef::new("vscode_desktop", "open_file"),
            &params(json!({"path": "src/main.rs"})),
            &ctx(0),
        )
        .await
        .unwrap();

    assert_eq!(
        actions(&desktop),
        vec![
            DriverCall::Hotkey {
                keys: vec!["ctrl".into(), "p".into()]
            },
            DriverCall::TypeText {
                text: "src/main.rs".into()
            },
            DriverCall::Press { key: "enter".into() },
        ]
    );
}

#[tokio::test]
async fn parameter_and_catalog_errors_are_permanent() {
    let registry = registry_with(
        Arc::new(DryRunDriver::new().with_missing(login_markers())),
        Arc::new(DryRunDriver::keyboard_only()),
    );

    let err = registry
        .dispatch(
            &ActionRef::new("instagram_web", "send_message_to_user"),
            &params(json!({"username": "ana"})),
            &ctx(0),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), FailureKind::InvalidParams);
    assert!(!err.is_transient());

    let err = registry
        .dispatch(&ActionRef::new("whatsapp_web", "fly"), &Params::new(), &ctx(0))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), FailureKind::UnknownAction);
}

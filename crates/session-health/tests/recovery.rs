use action_primitives::{DryRunDriver, ExecCtx, UiDriver};
use session_health::{
    RecoveryBudget, SessionError, SessionGuard, SessionMonitor, SessionProfile, SessionStatus,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn monitor() -> SessionMonitor {
    SessionMonitor::new(SessionProfile {
        authenticated_markers: vec!["#side".into()],
        login_url_patterns: vec![r"accounts\.google\.com".into()],
        recovery_action: Some("attempt_google_continue_login".into()),
        ..SessionProfile::default()
    })
    .unwrap()
}

#[tokio::test]
async fn healthy_session_skips_recovery() {
    let monitor = monitor();
    let driver = DryRunDriver::new().with_page("https://web.whatsapp.com", "");
    let guard = SessionGuard::new(&monitor, &driver);
    let calls = AtomicUsize::new(0);

    let status = guard
        .ensure(&RecoveryBudget::new(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(status, SessionStatus::Healthy);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn recovery_that_restores_session_passes() {
    let monitor = monitor();
    let driver = DryRunDriver::new().with_page("https://accounts.google.com/signin", "");
    let guard = SessionGuard::new(&monitor, &driver);

    let status = guard
        .ensure(&RecoveryBudget::new(), || async {
            let ctx = ExecCtx::detached(Duration::from_secs(1));
            driver
                .navigate(&ctx, "https://web.whatsapp.com")
                .await
                .map_err(|e| e.to_string())
        })
        .await
        .unwrap();

    assert_eq!(status, SessionStatus::Healthy);
}

#[tokio::test]
async fn failed_recovery_is_fatal_and_runs_once() {
    let monitor = monitor();
    let driver = DryRunDriver::new().with_page("https://accounts.google.com/signin", "");
    let guard = SessionGuard::new(&monitor, &driver);
    let budget = RecoveryBudget::new();
    let calls = AtomicUsize::new(0);

    let first = guard
        .ensure(&budget, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;
    assert!(matches!(first, Err(SessionError::RecoveryFailed { .. })));

    let second = guard
        .ensure(&budget, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;
    assert!(matches!(second, Err(SessionError::RecoveryFailed { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use super::*;
use crate::test_support::{
    epoch_secs, make_access_token, refresh_ok_body, spawn_mock_backend, MockBackend,
    MockBackendConfig,
};

fn manager_for(mock: &MockBackend, dir: &tempfile::TempDir) -> Arc<SessionManager> {
    SessionManager::new(
        CredentialStore::new(dir.path()),
        BackendClient::new(&mock.url()),
        DEFAULT_REFRESH_THRESHOLD_SECS,
    )
}

fn redirect_with(access: &str, refresh: &str) -> String {
    format!("http://localhost:3000/?success=true&accessToken={access}&refreshToken={refresh}")
}

async fn wait_for_logout(rx: &mut broadcast::Receiver<SessionEvent>) -> LogoutReason {
    loop {
        match tokio::time::timeout(Duration::from_secs(3), rx.recv()).await {
            Ok(Ok(SessionEvent::LoggedOut { reason })) => return reason,
            Ok(Ok(_)) | Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(e)) => panic!("event channel closed: {e}"),
            Err(_) => panic!("timed out waiting for the logout event"),
        }
    }
}

async fn wait_for_refreshed(rx: &mut broadcast::Receiver<SessionEvent>) -> u64 {
    loop {
        match tokio::time::timeout(Duration::from_secs(3), rx.recv()).await {
            Ok(Ok(SessionEvent::Refreshed { remaining_secs })) => return remaining_secs,
            Ok(Ok(_)) | Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(e)) => panic!("event channel closed: {e}"),
            Err(_) => panic!("timed out waiting for the refreshed event"),
        }
    }
}

#[tokio::test]
async fn bootstrap_fresh_login() {
    let mock = spawn_mock_backend(MockBackendConfig::default()).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let mgr = manager_for(&mock, &dir);
    let token = make_access_token("42", epoch_secs() + 3600);

    let session = mgr.bootstrap(Some(&redirect_with(&token, "r-1"))).await;

    assert!(session.authenticated());
    assert_eq!(session.profile.as_ref().map(|p| p.id), Some(42));
    assert!(
        (3595..=3600).contains(&session.remaining_secs),
        "remaining {} not near 3600",
        session.remaining_secs
    );
    assert_eq!(mgr.store().load_access().as_deref(), Some(token.as_str()));
    assert_eq!(mgr.store().load_refresh().as_deref(), Some("r-1"));
    assert_eq!(mock.user_calls.load(Ordering::Relaxed), 1);
    assert_eq!(mock.refresh_calls.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn bootstrap_redeems_stored_refresh_credential() {
    let fresh = make_access_token("42", epoch_secs() + 3600);
    let mock = spawn_mock_backend(MockBackendConfig {
        refresh_responses: vec![(200, refresh_ok_body(&fresh, "r-2"))],
        ..Default::default()
    })
    .await;
    let dir = tempfile::tempdir().expect("tempdir");
    let mgr = manager_for(&mock, &dir);
    mgr.store().save("", "r-1").expect("seed refresh credential");

    let session = mgr.bootstrap(None).await;

    assert!(session.authenticated());
    assert_eq!(mock.refresh_calls.load(Ordering::Relaxed), 1);
    assert_eq!(mgr.store().load_access().as_deref(), Some(fresh.as_str()));
    assert_eq!(mgr.store().load_refresh().as_deref(), Some("r-2"));
}

#[tokio::test]
async fn bootstrap_without_credentials_is_unauthenticated() {
    let mock = spawn_mock_backend(MockBackendConfig::default()).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let mgr = manager_for(&mock, &dir);

    let session = mgr.bootstrap(None).await;

    assert!(!session.authenticated());
    assert_eq!(session.state, SessionState::Unauthenticated);
    assert!(session.last_error.is_none());
    assert_eq!(mock.user_calls.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn bootstrap_clears_store_when_refresh_rejected() {
    let mock = spawn_mock_backend(MockBackendConfig {
        refresh_responses: vec![(401, "denied".to_owned())],
        ..Default::default()
    })
    .await;
    let dir = tempfile::tempdir().expect("tempdir");
    let mgr = manager_for(&mock, &dir);
    mgr.store().save("", "dead-refresh").expect("seed refresh credential");

    let session = mgr.bootstrap(None).await;

    assert!(!session.authenticated());
    assert_eq!(session.last_error, Some(TokenErrorKind::RefreshDenied));
    assert!(mgr.store().load_refresh().is_none());
}

#[tokio::test]
async fn bootstrap_classifies_validator_rejection() {
    let cases = [
        (make_access_token("42", epoch_secs() - 100), TokenErrorKind::Expired),
        (make_access_token("42", epoch_secs() + 3600), TokenErrorKind::RejectedOther),
        ("not-a-credential".to_owned(), TokenErrorKind::DecodeMalformed),
    ];
    for (token, expected) in cases {
        let mock = spawn_mock_backend(MockBackendConfig {
            user_status: 401,
            ..Default::default()
        })
        .await;
        let dir = tempfile::tempdir().expect("tempdir");
        let mgr = manager_for(&mock, &dir);

        let session = mgr.bootstrap(Some(&redirect_with(&token, "r-1"))).await;

        assert!(!session.authenticated());
        assert_eq!(session.last_error, Some(expected));
        assert!(mgr.store().load_access().is_none(), "store must be cleared");
    }
}

#[tokio::test]
async fn bootstrap_without_server_time_uses_local_clock() {
    let mock = spawn_mock_backend(MockBackendConfig::default()).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let mgr = manager_for(&mock, &dir);
    let token = make_access_token("42", epoch_secs() + 3600);

    let session = mgr.bootstrap(Some(&redirect_with(&token, "r-1"))).await;

    assert!(session.authenticated());
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(mgr.clock().offset_ms(), 0);
}

#[tokio::test]
async fn countdown_triggers_exactly_one_proactive_refresh() {
    let fresh = make_access_token("42", epoch_secs() + 3600);
    let mock = spawn_mock_backend(MockBackendConfig {
        refresh_responses: vec![(200, refresh_ok_body(&fresh, "r-2"))],
        ..Default::default()
    })
    .await;
    let dir = tempfile::tempdir().expect("tempdir");
    let mgr = manager_for(&mock, &dir);
    let mut events = mgr.subscribe();
    let near_expiry = make_access_token("42", epoch_secs() + 9);

    let session = mgr.bootstrap(Some(&redirect_with(&near_expiry, "r-1"))).await;
    assert!(session.authenticated());

    let remaining = wait_for_refreshed(&mut events).await;
    assert!(remaining > DEFAULT_REFRESH_THRESHOLD_SECS, "remaining {remaining} too low");
    assert_eq!(mgr.store().load_access().as_deref(), Some(fresh.as_str()));
    assert_eq!(mgr.store().load_refresh().as_deref(), Some("r-2"));

    // Well above the threshold now: no further refreshes on later ticks.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(mock.refresh_calls.load(Ordering::Relaxed), 1);
    assert!(mgr.session().await.authenticated());
}

#[tokio::test]
async fn concurrent_refresh_triggers_collapse_to_one_call() {
    let fresh = make_access_token("42", epoch_secs() + 3600);
    let mock = spawn_mock_backend(MockBackendConfig {
        refresh_responses: vec![(200, refresh_ok_body(&fresh, "r-2"))],
        refresh_delay_ms: 200,
        ..Default::default()
    })
    .await;
    let dir = tempfile::tempdir().expect("tempdir");
    let mgr = manager_for(&mock, &dir);
    let token = make_access_token("42", epoch_secs() + 3600);
    mgr.bootstrap(Some(&redirect_with(&token, "r-1"))).await;

    tokio::join!(mgr.refresh(), mgr.refresh());

    assert_eq!(mock.refresh_calls.load(Ordering::Relaxed), 1);
    assert_eq!(mgr.store().load_access().as_deref(), Some(fresh.as_str()));
}

#[tokio::test]
async fn manual_refresh_replaces_pair_and_profile() {
    let fresh = make_access_token("42", epoch_secs() + 3600);
    let mock = spawn_mock_backend(MockBackendConfig {
        refresh_responses: vec![(200, refresh_ok_body(&fresh, "r-2"))],
        ..Default::default()
    })
    .await;
    let dir = tempfile::tempdir().expect("tempdir");
    let mgr = manager_for(&mock, &dir);
    let token = make_access_token("42", epoch_secs() + 3600);
    mgr.bootstrap(Some(&redirect_with(&token, "r-1"))).await;

    mgr.refresh().await;

    let session = mgr.session().await;
    assert_eq!(session.state, SessionState::Authenticated);
    assert!(session.profile.is_some());
    assert_eq!(mgr.store().load_access().as_deref(), Some(fresh.as_str()));
    // Bootstrap validation plus the post-refresh profile fetch.
    assert_eq!(mock.user_calls.load(Ordering::Relaxed), 2);
}

#[tokio::test]
async fn transient_refresh_failure_leaves_session_intact() {
    let mock = spawn_mock_backend(MockBackendConfig {
        refresh_responses: vec![(500, "boom".to_owned())],
        ..Default::default()
    })
    .await;
    let dir = tempfile::tempdir().expect("tempdir");
    let mgr = manager_for(&mock, &dir);
    let token = make_access_token("42", epoch_secs() + 3600);
    mgr.bootstrap(Some(&redirect_with(&token, "r-1"))).await;

    mgr.refresh().await;

    let session = mgr.session().await;
    assert!(session.authenticated());
    assert_eq!(session.last_error, Some(TokenErrorKind::RefreshTransient));
    assert_eq!(mgr.store().load_access().as_deref(), Some(token.as_str()));
    assert_eq!(mgr.store().load_refresh().as_deref(), Some("r-1"));
    assert_eq!(mock.logout_calls.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn denied_refresh_forces_logout() {
    let mock = spawn_mock_backend(MockBackendConfig {
        refresh_responses: vec![(401, "invalid".to_owned())],
        ..Default::default()
    })
    .await;
    let dir = tempfile::tempdir().expect("tempdir");
    let mgr = manager_for(&mock, &dir);
    let token = make_access_token("42", epoch_secs() + 3600);
    mgr.bootstrap(Some(&redirect_with(&token, "r-1"))).await;
    let mut events = mgr.subscribe();

    mgr.refresh().await;

    assert_eq!(wait_for_logout(&mut events).await, LogoutReason::RefreshDenied);
    let session = mgr.session().await;
    assert_eq!(session.state, SessionState::Unauthenticated);
    assert!(mgr.store().load_access().is_none());
    assert!(mgr.countdown.lock().await.is_none(), "countdown must be cancelled");
    assert_eq!(mock.logout_calls.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn confirmed_expiry_logs_out() {
    let mock = spawn_mock_backend(MockBackendConfig::default()).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let mgr = manager_for(&mock, &dir);
    let token = make_access_token("42", epoch_secs() + 3600);
    mgr.bootstrap(Some(&redirect_with(&token, "r-1"))).await;
    let mut events = mgr.subscribe();

    // The credential the countdown reads goes stale behind its back.
    let expired = make_access_token("42", epoch_secs() - 5);
    mgr.store().save(&expired, "r-1").expect("save expired");

    assert_eq!(wait_for_logout(&mut events).await, LogoutReason::Expired);
    let session = mgr.session().await;
    assert_eq!(session.state, SessionState::Unauthenticated);
    assert!(mgr.store().load_access().is_none());
    assert_eq!(mock.refresh_calls.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn second_check_spares_a_freshly_refreshed_credential() {
    let mock = spawn_mock_backend(MockBackendConfig::default()).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let mgr = manager_for(&mock, &dir);

    let expired = make_access_token("42", epoch_secs() - 5);
    mgr.store().save(&expired, "r-1").expect("save expired");
    assert!(mgr.confirm_expired());

    // A refresh that landed between the tick's first read and the second
    // check replaces the stored credential with a live one.
    let fresh = make_access_token("42", epoch_secs() + 3600);
    mgr.store().save(&fresh, "r-2").expect("save fresh");
    assert!(!mgr.confirm_expired());
}

#[tokio::test]
async fn decode_failure_during_countdown_is_not_fatal() {
    let mock = spawn_mock_backend(MockBackendConfig::default()).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let mgr = manager_for(&mock, &dir);
    {
        let mut session = mgr.session.write().await;
        session.state = SessionState::Authenticated;
    }
    mgr.store().save("garbage", "r-1").expect("save garbage");

    mgr.tick().await;

    let session = mgr.session().await;
    assert!(session.authenticated(), "decode failure must not log out by itself");
    assert_eq!(session.last_error, Some(TokenErrorKind::DecodeMalformed));
    assert_eq!(mock.logout_calls.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn decode_failure_releases_the_refresh_guard() {
    let fresh = make_access_token("42", epoch_secs() + 3600);
    let mock = spawn_mock_backend(MockBackendConfig {
        refresh_responses: vec![(200, refresh_ok_body(&fresh, "r-2"))],
        ..Default::default()
    })
    .await;
    let dir = tempfile::tempdir().expect("tempdir");
    let mgr = manager_for(&mock, &dir);
    let token = make_access_token("42", epoch_secs() + 3600);
    mgr.bootstrap(Some(&redirect_with(&token, "r-1"))).await;

    // Wedge a malformed credential in, then refresh manually: the guard
    // must be free again afterwards for the next trigger.
    mgr.store().save("garbage", "r-1").expect("save garbage");
    mgr.tick().await;
    mgr.refresh().await;
    assert!(!mgr.refresh_inflight.load(Ordering::SeqCst));
    assert_eq!(mgr.store().load_access().as_deref(), Some(fresh.as_str()));
}

#[tokio::test]
async fn explicit_logout_clears_everything() {
    let mock = spawn_mock_backend(MockBackendConfig::default()).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let mgr = manager_for(&mock, &dir);
    let token = make_access_token("42", epoch_secs() + 3600);
    mgr.bootstrap(Some(&redirect_with(&token, "r-1"))).await;
    let mut events = mgr.subscribe();

    mgr.logout().await;

    assert_eq!(wait_for_logout(&mut events).await, LogoutReason::Requested);
    let session = mgr.session().await;
    assert_eq!(session.state, SessionState::Unauthenticated);
    assert!(session.profile.is_none());
    assert!(session.last_error.is_none());
    assert_eq!(session.remaining_secs, 0);
    assert!(mgr.store().load_access().is_none());
    assert!(mgr.store().load_refresh().is_none());
    assert!(mgr.countdown.lock().await.is_none(), "countdown must be cancelled");
    assert_eq!(mock.logout_calls.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn logout_proceeds_when_notification_fails() {
    let mock = spawn_mock_backend(MockBackendConfig::default()).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let mgr = manager_for(&mock, &dir);
    let token = make_access_token("42", epoch_secs() + 3600);
    mgr.bootstrap(Some(&redirect_with(&token, "r-1"))).await;

    // Swap in a dead backend so the logout notification fails.
    let dead = SessionManager::new(
        CredentialStore::new(dir.path()),
        BackendClient::new("http://127.0.0.1:9"),
        DEFAULT_REFRESH_THRESHOLD_SECS,
    );
    {
        let mut session = dead.session.write().await;
        session.state = SessionState::Authenticated;
    }
    dead.logout().await;

    assert_eq!(dead.session().await.state, SessionState::Unauthenticated);
    assert!(dead.store().load_access().is_none());
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: token builders and a scripted mock backend.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use tokio::net::TcpListener;

/// Assert that an expression evaluates to `Err` whose Display output
/// contains the given substring.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}

/// Install the process-wide rustls crypto provider once, mirroring `main`.
///
/// `reqwest` is built with the `rustls-no-provider` feature, so constructing
/// any `reqwest::Client` panics until a provider is installed. Tests build
/// clients directly, so they must install it themselves.
pub fn ensure_crypto_provider() {
    use std::sync::Once;
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Local wall-clock time, seconds since epoch.
pub fn epoch_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

/// Build an unsigned JWT-shaped access credential with the given subject and
/// absolute expiry (seconds since epoch).
pub fn make_access_token(subject: &str, expires_at_secs: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(
        serde_json::json!({ "sub": subject, "exp": expires_at_secs, "type": "access" })
            .to_string(),
    );
    format!("{header}.{payload}.sig")
}

/// JSON body of a successful refresh response.
pub fn refresh_ok_body(access_token: &str, refresh_token: &str) -> String {
    serde_json::json!({ "accessToken": access_token, "refreshToken": refresh_token }).to_string()
}

/// Behavior script for [`spawn_mock_backend`].
pub struct MockBackendConfig {
    /// `(status, body)` script for `/api/refresh`; the last entry repeats.
    pub refresh_responses: Vec<(u16, String)>,
    /// Artificial latency for `/api/refresh`, to widen in-flight windows.
    pub refresh_delay_ms: u64,
    /// Status for `/api/user`; 200 serves a canned profile.
    pub user_status: u16,
    /// Skew added to local time by `/api/time`; `None` omits the route.
    pub server_skew_ms: Option<i64>,
}

impl Default for MockBackendConfig {
    fn default() -> Self {
        Self {
            refresh_responses: vec![],
            refresh_delay_ms: 0,
            user_status: 200,
            server_skew_ms: None,
        }
    }
}

/// A scripted backend double covering the four consumed endpoints.
pub struct MockBackend {
    pub addr: SocketAddr,
    pub user_calls: Arc<AtomicU32>,
    pub refresh_calls: Arc<AtomicU32>,
    pub logout_calls: Arc<AtomicU32>,
}

impl MockBackend {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

/// Start a mock backend on an ephemeral port.
pub async fn spawn_mock_backend(cfg: MockBackendConfig) -> MockBackend {
    ensure_crypto_provider();
    let user_calls = Arc::new(AtomicU32::new(0));
    let refresh_calls = Arc::new(AtomicU32::new(0));
    let logout_calls = Arc::new(AtomicU32::new(0));

    let mut app = Router::new()
        .route(
            "/api/user",
            get({
                let calls = Arc::clone(&user_calls);
                let status = cfg.user_status;
                move || {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.fetch_add(1, Ordering::Relaxed);
                        if status == 200 {
                            (
                                StatusCode::OK,
                                r#"{"id":42,"nickname":"tester","email":"tester@example.com"}"#
                                    .to_owned(),
                            )
                        } else {
                            (
                                StatusCode::from_u16(status)
                                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                                "denied".to_owned(),
                            )
                        }
                    }
                }
            }),
        )
        .route(
            "/api/refresh",
            post({
                let calls = Arc::clone(&refresh_calls);
                let responses = Arc::new(cfg.refresh_responses);
                let delay_ms = cfg.refresh_delay_ms;
                move || {
                    let calls = Arc::clone(&calls);
                    let responses = Arc::clone(&responses);
                    async move {
                        let idx = calls.fetch_add(1, Ordering::Relaxed) as usize;
                        if delay_ms > 0 {
                            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        }
                        let (status, body) = responses
                            .get(idx)
                            .or_else(|| responses.last())
                            .cloned()
                            .unwrap_or((500, "{}".to_owned()));
                        (
                            StatusCode::from_u16(status)
                                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                            body,
                        )
                    }
                }
            }),
        )
        .route(
            "/api/logout",
            post({
                let calls = Arc::clone(&logout_calls);
                move || {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.fetch_add(1, Ordering::Relaxed);
                        (StatusCode::OK, r#"{"message":"logged out"}"#.to_owned())
                    }
                }
            }),
        );

    if let Some(skew) = cfg.server_skew_ms {
        app = app.route(
            "/api/time",
            get(move || async move {
                let now_ms = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_millis() as i64;
                (StatusCode::OK, format!(r#"{{"serverTime":{}}}"#, now_ms + skew))
            }),
        );
    }

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    MockBackend { addr, user_calls, refresh_calls, logout_calls }
}

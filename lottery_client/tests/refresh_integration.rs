//! Integration tests for the client's refresh handling.
//!
//! A mock axum server hands out a stale access token on login and answers
//! `401` to it, so every concurrent call has to go through the refresh path.

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use lottery_client::api_client::{ApiClient, ClientError};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const CALLERS: usize = 8;

#[derive(Clone)]
struct MockServer {
    refresh_calls: Arc<AtomicUsize>,
    unauthorized: Arc<AtomicUsize>,
    refresh_succeeds: bool,
}

impl MockServer {
    fn new(refresh_succeeds: bool) -> Self {
        Self {
            refresh_calls: Arc::new(AtomicUsize::new(0)),
            unauthorized: Arc::new(AtomicUsize::new(0)),
            refresh_succeeds,
        }
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": "Authentication required", "code": "unauthorized"})),
    )
        .into_response()
}

async fn login() -> Response {
    (
        [(
            header::SET_COOKIE,
            "refreshToken=first; HttpOnly; Secure; SameSite=None; Path=/",
        )],
        Json(json!({
            "access_token": "stale",
            "token_type": "Bearer",
            "expires_in": 900,
            "account_id": 1,
            "roles": ["member"],
        })),
    )
        .into_response()
}

async fn devices(State(mock): State<MockServer>, headers: HeaderMap) -> Response {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if bearer == Some("Bearer fresh") {
        return Json(json!([])).into_response();
    }
    mock.unauthorized.fetch_add(1, Ordering::SeqCst);
    unauthorized()
}

async fn refresh(State(mock): State<MockServer>, headers: HeaderMap) -> Response {
    mock.refresh_calls.fetch_add(1, Ordering::SeqCst);

    // Hold the refresh open until every caller has seen its 401
    for _ in 0..500 {
        if mock.unauthorized.load(Ordering::SeqCst) >= CALLERS {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    let cookie = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !mock.refresh_succeeds || cookie != "refreshToken=first" {
        return unauthorized();
    }

    (
        [(
            header::SET_COOKIE,
            "refreshToken=second; HttpOnly; Secure; SameSite=None; Path=/",
        )],
        Json(json!({
            "access_token": "fresh",
            "token_type": "Bearer",
            "expires_in": 900,
            "account_id": 1,
            "roles": ["member"],
        })),
    )
        .into_response()
}

async fn spawn_mock(mock: MockServer) -> String {
    let app = Router::new()
        .route("/api/v1/auth/login", post(login))
        .route("/api/v1/auth/refresh", post(refresh))
        .route("/api/v1/devices", get(devices))
        .with_state(mock);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}")
}

async fn logged_in_client(mock: &MockServer) -> Arc<ApiClient> {
    let base_url = spawn_mock(mock.clone()).await;
    let client = Arc::new(ApiClient::new(base_url));
    client
        .login("member1", "Jackpot2026", Some("laptop"))
        .await
        .unwrap();
    client
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_unauthorized_calls_share_one_refresh() {
    let mock = MockServer::new(true);
    let client = logged_in_client(&mock).await;

    let mut handles = Vec::new();
    for _ in 0..CALLERS {
        let client = client.clone();
        handles.push(tokio::spawn(async move { client.list_devices().await }));
    }

    for handle in handles {
        let devices = handle.await.unwrap().expect("retried call should succeed");
        assert!(devices.is_empty());
    }

    assert_eq!(mock.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(mock.unauthorized.load(Ordering::SeqCst), CALLERS);

    let session = client.session().unwrap();
    assert_eq!(session.access_token, "fresh");
    assert_eq!(session.refresh_token, "second");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_refresh_rejects_every_caller_and_clears_session() {
    let mock = MockServer::new(false);
    let client = logged_in_client(&mock).await;

    let mut handles = Vec::new();
    for _ in 0..CALLERS {
        let client = client.clone();
        handles.push(tokio::spawn(async move { client.list_devices().await }));
    }

    for handle in handles {
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(ClientError::SessionExpired)));
    }

    // The refresh call's own 401 does not start another refresh
    assert_eq!(mock.refresh_calls.load(Ordering::SeqCst), 1);
    assert!(!client.is_logged_in());
}

#[tokio::test]
async fn test_login_stores_cookie_credential() {
    let mock = MockServer::new(true);
    let client = logged_in_client(&mock).await;

    let session = client.session().unwrap();
    assert_eq!(session.account_id, 1);
    assert_eq!(session.access_token, "stale");
    assert_eq!(session.refresh_token, "first");
    assert_eq!(session.roles, vec!["member".to_string()]);
}

#[tokio::test]
async fn test_connection_refused() {
    // Nothing listens on the discard port
    let client = ApiClient::new("http://127.0.0.1:9");

    let result = client.login("member1", "Jackpot2026", None).await;

    assert!(matches!(result, Err(ClientError::Http(_))));
    assert!(!client.is_logged_in());
}

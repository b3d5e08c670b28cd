//! Integration tests for the HTTP session API.
//!
//! Drives the full router with `oneshot` requests over an in-memory store and
//! a manual clock, checking status codes, error codes and the refresh cookie.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use chrono::{Duration, Utc};
use cookie::Cookie;
use cookie::time::OffsetDateTime;
use http_body_util::BodyExt;
use lottery::auth::{Argon2Hasher, CredentialHasher, NewAccount, Role, SessionConfig};
use lottery::clock::{Clock, ManualClock};
use lottery::db::{AccountRepository, MemoryAuthRepository};
use lottery_server::api::{AppState, create_router};
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::sync::Arc;
use tower::ServiceExt; // For `oneshot` method

const JWT_SECRET: &str = "server_test_secret_0123456789abcdef";
const PASSWORD: &str = "Jackpot2026";

struct TestServer {
    app: Router,
    state: AppState,
    store: Arc<MemoryAuthRepository>,
    hasher: Arc<Argon2Hasher>,
    clock: Arc<ManualClock>,
}

/// Helper to create the router over a fresh in-memory store
fn create_test_server() -> TestServer {
    let store = Arc::new(MemoryAuthRepository::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    // Minimal Argon2 cost keeps the suite fast
    let hasher = Arc::new(
        Argon2Hasher::with_cost("server_test_pepper".to_string(), 8, 1, 1)
            .expect("valid argon2 params"),
    );

    let state = AppState::new(
        store.clone(),
        hasher.clone(),
        JWT_SECRET,
        SessionConfig::default(),
        clock.clone(),
        true,
    )
    .expect("valid state");

    TestServer {
        app: create_router(state.clone()),
        state,
        store,
        hasher,
        clock,
    }
}

/// Response parts the tests look at
struct Reply {
    status: StatusCode,
    set_cookie: Option<String>,
    body: Value,
}

impl Reply {
    fn refresh_cookie(&self) -> Cookie<'static> {
        let raw = self.set_cookie.clone().expect("Set-Cookie header");
        Cookie::parse(raw).expect("parsable cookie")
    }

    fn access_token(&self) -> String {
        self.body["access_token"]
            .as_str()
            .expect("access_token in body")
            .to_string()
    }
}

async fn send(server: &TestServer, request: Request<Body>) -> Reply {
    let response = server.app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .map(|v| v.to_str().unwrap().to_string());
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };

    Reply {
        status,
        set_cookie,
        body,
    }
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn refresh_request(cookie_value: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/auth/refresh")
        .header(header::COOKIE, format!("refreshToken={cookie_value}"))
        .body(Body::empty())
        .unwrap()
}

fn authorized(method: &str, uri: &str, access_token: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {access_token}"))
        .body(Body::empty())
        .unwrap()
}

async fn register(server: &TestServer, username: &str) -> Reply {
    send(
        server,
        post_json(
            "/api/v1/auth/register",
            json!({"username": username, "password": PASSWORD}),
        ),
    )
    .await
}

async fn login(server: &TestServer, username: &str, label: &str) -> Reply {
    send(
        server,
        post_json(
            "/api/v1/auth/login",
            json!({"username": username, "password": PASSWORD, "device_label": label}),
        ),
    )
    .await
}

// ============================================================================
// Health Check Tests
// ============================================================================

#[tokio::test]
async fn test_health_check_endpoint() {
    let server = create_test_server();

    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let reply = send(&server, request).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["status"], "healthy");
}

// ============================================================================
// Session Lifecycle Tests
// ============================================================================

#[tokio::test]
async fn test_login_refresh_and_expiry() {
    let server = create_test_server();

    let registered = register(&server, "member_one").await;
    assert_eq!(registered.status, StatusCode::CREATED);
    assert!(registered.set_cookie.is_none());
    let account_id = registered.body["account_id"].as_i64().unwrap();

    let logged_in = login(&server, "member_one", "laptop").await;
    assert_eq!(logged_in.status, StatusCode::OK);
    assert_eq!(logged_in.body["token_type"], "Bearer");
    assert_eq!(logged_in.body["expires_in"], 15 * 60);
    assert!(logged_in.body.get("refresh_token").is_none());

    let first = logged_in.refresh_cookie();
    assert_eq!(first.name(), "refreshToken");
    assert_eq!(first.http_only(), Some(true));
    assert_eq!(first.secure(), Some(true));
    assert_eq!(first.same_site(), Some(cookie::SameSite::None));
    assert_eq!(first.path(), Some("/"));
    assert!(
        first
            .expires_datetime()
            .is_some_and(|at| at > OffsetDateTime::now_utc())
    );

    let refreshed = send(&server, refresh_request(first.value())).await;
    assert_eq!(refreshed.status, StatusCode::OK);
    let second = refreshed.refresh_cookie();
    assert_ne!(second.value(), first.value());
    assert_eq!(second.expires_datetime(), first.expires_datetime());

    // The presented token is revoked and points at its replacement
    let tokens = server.state.sessions.credentials().list(account_id).await.unwrap();
    assert_eq!(tokens.len(), 2);
    let old = tokens.iter().find(|t| t.token == first.value()).unwrap();
    let new = tokens.iter().find(|t| t.token == second.value()).unwrap();
    assert!(old.revoked_at.is_some());
    assert_eq!(old.replaced_by_token_id, Some(new.id));
    assert!(new.revoked_at.is_none());

    let replayed = send(&server, refresh_request(first.value())).await;
    assert_eq!(replayed.status, StatusCode::UNAUTHORIZED);
    assert_eq!(replayed.body["code"], "unauthorized");

    server.clock.advance(Duration::days(7) + Duration::seconds(1));
    let expired = send(&server, refresh_request(second.value())).await;
    assert_eq!(expired.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_refresh_without_cookie_is_unauthorized() {
    let server = create_test_server();

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/auth/refresh")
        .body(Body::empty())
        .unwrap();
    let reply = send(&server, request).await;

    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert!(reply.set_cookie.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_refresh_has_one_winner() {
    let server = Arc::new(create_test_server());
    register(&server, "racer").await;
    let cookie = login(&server, "racer", "phone").await.refresh_cookie();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let server = server.clone();
        let value = cookie.value().to_string();
        handles.push(tokio::spawn(async move {
            send(&server, refresh_request(&value)).await.status
        }));
    }

    let mut ok = 0;
    for handle in handles {
        match handle.await.unwrap() {
            StatusCode::OK => ok += 1,
            status => assert_eq!(status, StatusCode::UNAUTHORIZED),
        }
    }
    assert_eq!(ok, 1);
}

#[tokio::test]
async fn test_wrong_password_and_unknown_user_look_the_same() {
    let server = create_test_server();
    register(&server, "member_two").await;

    let wrong_password = send(
        &server,
        post_json(
            "/api/v1/auth/login",
            json!({"username": "member_two", "password": "Wrong2026x"}),
        ),
    )
    .await;
    let unknown_user = login(&server, "nobody_here", "laptop").await;

    assert_eq!(wrong_password.status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_user.status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong_password.body, unknown_user.body);
}

#[tokio::test]
async fn test_register_rejects_duplicates_and_weak_passwords() {
    let server = create_test_server();
    assert_eq!(register(&server, "dup_user").await.status, StatusCode::CREATED);

    let duplicate = register(&server, "dup_user").await;
    assert_eq!(duplicate.status, StatusCode::CONFLICT);
    assert_eq!(duplicate.body["code"], "username_taken");

    let weak = send(
        &server,
        post_json(
            "/api/v1/auth/register",
            json!({"username": "weak_user", "password": "short"}),
        ),
    )
    .await;
    assert_eq!(weak.status, StatusCode::BAD_REQUEST);
    assert_eq!(weak.body["code"], "invalid_input");
}

// ============================================================================
// Device Tests
// ============================================================================

#[tokio::test]
async fn test_device_cap_returns_conflict() {
    let server = create_test_server();
    register(&server, "collector").await;

    for i in 0..5 {
        let reply = login(&server, "collector", &format!("device-{i}")).await;
        assert_eq!(reply.status, StatusCode::OK);
    }

    let rejected = login(&server, "collector", "device-5").await;
    assert_eq!(rejected.status, StatusCode::CONFLICT);
    assert_eq!(rejected.body["code"], "too_many_devices");
    assert!(rejected.set_cookie.is_none());

    // A known device is not a new device
    let again = login(&server, "collector", "device-0").await;
    assert_eq!(again.status, StatusCode::OK);
}

#[tokio::test]
async fn test_relogin_replaces_device_credential() {
    let server = create_test_server();
    let account_id = register(&server, "dave").await.body["account_id"]
        .as_i64()
        .unwrap();

    let first = login(&server, "dave", "Device1").await;
    let second = login(&server, "dave", "Device1").await;
    assert_eq!(second.status, StatusCode::OK);

    let stale = send(&server, refresh_request(first.refresh_cookie().value())).await;
    assert_eq!(stale.status, StatusCode::UNAUTHORIZED);
    let live = send(&server, refresh_request(second.refresh_cookie().value())).await;
    assert_eq!(live.status, StatusCode::OK);

    let now = server.clock.now();
    let tokens = server.state.sessions.credentials().list(account_id).await.unwrap();
    assert_eq!(tokens.iter().filter(|t| t.is_active(now)).count(), 1);
}

#[tokio::test]
async fn test_revoked_device_leaves_audit_rows() {
    let server = create_test_server();
    let account_id = register(&server, "auditor").await.body["account_id"]
        .as_i64()
        .unwrap();
    let laptop = login(&server, "auditor", "laptop").await;
    let phone = login(&server, "auditor", "phone").await;

    let devices = server.state.sessions.list_devices(account_id).await.unwrap();
    let phone_id = devices
        .iter()
        .find(|d| d.device.label == "phone")
        .map(|d| d.device.id)
        .unwrap();

    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/api/v1/devices/{phone_id}"))
        .header(header::AUTHORIZATION, format!("Bearer {}", laptop.access_token()))
        .header("x-forwarded-for", "198.51.100.4")
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&server, request).await.status, StatusCode::NO_CONTENT);

    let tokens = server.state.sessions.credentials().list(account_id).await.unwrap();
    let row = tokens
        .iter()
        .find(|t| t.token == phone.refresh_cookie().value())
        .expect("revoked row is kept");
    assert_eq!(row.device_id, None);
    assert!(row.revoked_at.is_some());
    assert_eq!(row.revoked_by_ip.as_deref(), Some("198.51.100.4"));
    assert_eq!(
        server
            .state
            .sessions
            .credentials()
            .owner_of(&row.token)
            .await
            .unwrap(),
        Some(account_id)
    );
}

#[tokio::test]
async fn test_list_and_revoke_devices() {
    let server = create_test_server();
    register(&server, "owner").await;
    let laptop = login(&server, "owner", "laptop").await;
    let phone = login(&server, "owner", "phone").await;
    let access = laptop.access_token();

    let listed = send(&server, authorized("GET", "/api/v1/devices", &access)).await;
    assert_eq!(listed.status, StatusCode::OK);
    let devices = listed.body.as_array().unwrap();
    assert_eq!(devices.len(), 2);
    assert!(devices.iter().all(|d| !d["session_expires_at"].is_null()));

    let phone_id = devices
        .iter()
        .find(|d| d["label"] == "phone")
        .and_then(|d| d["id"].as_i64())
        .unwrap();

    let revoked = send(
        &server,
        authorized("DELETE", &format!("/api/v1/devices/{phone_id}"), &access),
    )
    .await;
    assert_eq!(revoked.status, StatusCode::NO_CONTENT);

    let phone_refresh = send(&server, refresh_request(phone.refresh_cookie().value())).await;
    assert_eq!(phone_refresh.status, StatusCode::UNAUTHORIZED);

    let missing = send(
        &server,
        authorized("DELETE", &format!("/api/v1/devices/{phone_id}"), &access),
    )
    .await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
    assert_eq!(missing.body["code"], "not_found");
}

#[tokio::test]
async fn test_cannot_revoke_another_accounts_device() {
    let server = create_test_server();
    register(&server, "alice").await;
    register(&server, "mallory").await;
    let alice = login(&server, "alice", "laptop").await;
    let mallory = login(&server, "mallory", "laptop").await;

    let listed = send(
        &server,
        authorized("GET", "/api/v1/devices", &alice.access_token()),
    )
    .await;
    let alice_device = listed.body[0]["id"].as_i64().unwrap();

    let attempt = send(
        &server,
        authorized(
            "DELETE",
            &format!("/api/v1/devices/{alice_device}"),
            &mallory.access_token(),
        ),
    )
    .await;
    assert_eq!(attempt.status, StatusCode::NOT_FOUND);

    let still_works = send(&server, refresh_request(alice.refresh_cookie().value())).await;
    assert_eq!(still_works.status, StatusCode::OK);
}

// ============================================================================
// Logout and Protected Route Tests
// ============================================================================

#[tokio::test]
async fn test_logout_clears_cookie_and_ends_device_session() {
    let server = create_test_server();
    register(&server, "leaver").await;
    let laptop = login(&server, "leaver", "laptop").await;
    let phone = login(&server, "leaver", "phone").await;
    let cookie = laptop.refresh_cookie();

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/auth/logout")
        .header(header::AUTHORIZATION, format!("Bearer {}", laptop.access_token()))
        .header(header::COOKIE, format!("refreshToken={}", cookie.value()))
        .body(Body::empty())
        .unwrap();
    let reply = send(&server, request).await;

    assert_eq!(reply.status, StatusCode::NO_CONTENT);
    let cleared = reply.refresh_cookie();
    assert_eq!(cleared.value(), "");
    assert!(
        cleared
            .expires_datetime()
            .is_some_and(|at| at < OffsetDateTime::now_utc())
    );

    let laptop_refresh = send(&server, refresh_request(cookie.value())).await;
    assert_eq!(laptop_refresh.status, StatusCode::UNAUTHORIZED);
    let phone_refresh = send(&server, refresh_request(phone.refresh_cookie().value())).await;
    assert_eq!(phone_refresh.status, StatusCode::OK);

    // Logging out again is harmless
    let again = send(
        &server,
        authorized("POST", "/api/v1/auth/logout", &laptop.access_token()),
    )
    .await;
    assert_eq!(again.status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_me_requires_valid_access_token() {
    let server = create_test_server();
    register(&server, "curious").await;
    let session = login(&server, "curious", "laptop").await;

    let me = send(&server, authorized("GET", "/api/v1/auth/me", &session.access_token())).await;
    assert_eq!(me.status, StatusCode::OK);
    assert_eq!(me.body["account_id"], session.body["account_id"]);
    assert_eq!(me.body["roles"], json!(["member"]));
    assert_eq!(me.body["issuer"], "lottery");

    let anonymous = Request::builder()
        .uri("/api/v1/auth/me")
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&server, anonymous).await.status, StatusCode::UNAUTHORIZED);

    let garbage = send(&server, authorized("GET", "/api/v1/auth/me", "not-a-jwt")).await;
    assert_eq!(garbage.status, StatusCode::UNAUTHORIZED);

    server.clock.advance(Duration::minutes(16));
    let stale = send(&server, authorized("GET", "/api/v1/auth/me", &session.access_token())).await;
    assert_eq!(stale.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let server = create_test_server();

    let request = Request::builder()
        .uri("/health")
        .header("x-request-id", "trace-me-42")
        .body(Body::empty())
        .unwrap();
    let response = server.app.clone().oneshot(request).await.unwrap();

    assert_eq!(response.headers()["x-request-id"], "trace-me-42");
}

// ============================================================================
// Admin Tests
// ============================================================================

async fn seed_admin(server: &TestServer, username: &str) {
    server
        .store
        .create_account(NewAccount {
            username: username.to_string(),
            password_hash: server.hasher.hash(PASSWORD).unwrap(),
            roles: BTreeSet::from([Role::Member, Role::Admin]),
            created_at: server.clock.now(),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_admin_routes_require_admin_role() {
    let server = create_test_server();
    let member_id = register(&server, "plain_member").await.body["account_id"]
        .as_i64()
        .unwrap();
    let member = login(&server, "plain_member", "laptop").await;

    let forbidden = send(
        &server,
        authorized(
            "POST",
            &format!("/api/v1/admin/accounts/{member_id}/deactivate"),
            &member.access_token(),
        ),
    )
    .await;
    assert_eq!(forbidden.status, StatusCode::FORBIDDEN);
    assert_eq!(forbidden.body["code"], "forbidden");
}

#[tokio::test]
async fn test_deactivated_account_cannot_login_or_refresh() {
    let server = create_test_server();
    seed_admin(&server, "back_office").await;
    let admin = login(&server, "back_office", "desk").await;
    assert_eq!(admin.status, StatusCode::OK);

    let member_id = register(&server, "suspended").await.body["account_id"]
        .as_i64()
        .unwrap();
    let member = login(&server, "suspended", "laptop").await;

    let deactivated = send(
        &server,
        authorized(
            "POST",
            &format!("/api/v1/admin/accounts/{member_id}/deactivate"),
            &admin.access_token(),
        ),
    )
    .await;
    assert_eq!(deactivated.status, StatusCode::NO_CONTENT);

    assert_eq!(
        login(&server, "suspended", "laptop").await.status,
        StatusCode::UNAUTHORIZED
    );
    let refresh = send(&server, refresh_request(member.refresh_cookie().value())).await;
    assert_eq!(refresh.status, StatusCode::UNAUTHORIZED);

    let activated = send(
        &server,
        authorized(
            "POST",
            &format!("/api/v1/admin/accounts/{member_id}/activate"),
            &admin.access_token(),
        ),
    )
    .await;
    assert_eq!(activated.status, StatusCode::NO_CONTENT);
    assert_eq!(
        login(&server, "suspended", "laptop").await.status,
        StatusCode::OK
    );

    let unknown = send(
        &server,
        authorized(
            "POST",
            "/api/v1/admin/accounts/999999/activate",
            &admin.access_token(),
        ),
    )
    .await;
    assert_eq!(unknown.status, StatusCode::NOT_FOUND);
}

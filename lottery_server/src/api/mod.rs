//! HTTP API for the lottery session service.
//!
//! # Modules
//!
//! - [`auth`]: Register, login, refresh, logout and the current principal
//! - [`devices`]: The caller's devices
//! - [`admin`]: Account activation (admin role)
//! - [`middleware`]: Bearer authentication and role checks
//!
//! # Endpoints Overview
//!
//! ```text
//! GET    /health                                   - Store health (public)
//! POST   /api/v1/auth/register                     - Register account (public)
//! POST   /api/v1/auth/login                        - Login (public)
//! POST   /api/v1/auth/refresh                      - Rotate refresh cookie (public, cookie)
//! POST   /api/v1/auth/logout                       - End this device's session (auth required)
//! GET    /api/v1/auth/me                           - Access token claims (auth required)
//! GET    /api/v1/devices                           - List devices (auth required)
//! DELETE /api/v1/devices/{device_id}               - Revoke a device (auth required)
//! POST   /api/v1/admin/accounts/{id}/activate      - Activate account (admin)
//! POST   /api/v1/admin/accounts/{id}/deactivate    - Deactivate account (admin)
//! ```
//!
//! # CORS
//!
//! CORS is configured permissively for development. In production, configure
//! appropriate origins, methods, and headers.

pub mod admin;
pub mod auth;
pub mod client;
pub mod devices;
pub mod error;
pub mod middleware;
pub mod request_id;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{delete, get, post},
};
use lottery::{
    auth::{AuthResult, CredentialHasher, SessionConfig, SessionManager},
    clock::Clock,
    db::AuthStore,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Application state shared across all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub store: Arc<dyn AuthStore>,
    /// Mark the refresh cookie `Secure`
    pub cookie_secure: bool,
}

impl AppState {
    /// Build the session manager over `store` and wrap it for the router
    ///
    /// # Errors
    ///
    /// * `AuthError::Configuration` - Invalid signing secret or session settings
    pub fn new<S>(
        store: Arc<S>,
        hasher: Arc<dyn CredentialHasher>,
        jwt_secret: &str,
        session: SessionConfig,
        clock: Arc<dyn Clock>,
        cookie_secure: bool,
    ) -> AuthResult<Self>
    where
        S: AuthStore + 'static,
    {
        let sessions = SessionManager::new(store.clone(), hasher, jwt_secret, session, clock)?;
        Ok(Self {
            sessions: Arc::new(sessions),
            store,
            cookie_secure,
        })
    }
}

/// Create the complete API router with all endpoints and middleware.
///
/// # Example
///
/// ```rust,no_run
/// # use lottery_server::api::{create_router, AppState};
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// # let state: AppState = unimplemented!();
/// let app = create_router(state);
/// let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
/// axum::serve(listener, app).await?;
/// # Ok(())
/// # }
/// ```
pub fn create_router(state: AppState) -> Router {
    let v1_routes = create_v1_router(state.clone());

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", v1_routes)
        .layer(axum::middleware::from_fn(request_id::request_id_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Create API v1 router with all versioned endpoints.
fn create_v1_router(state: AppState) -> Router<AppState> {
    // Public routes (no authentication middleware); refresh authenticates by cookie
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh));

    // Layers run bottom-up, so `require_admin` sees the claims
    let admin_routes = Router::new()
        .route(
            "/admin/accounts/{account_id}/activate",
            post(admin::activate_account),
        )
        .route(
            "/admin/accounts/{account_id}/deactivate",
            post(admin::deactivate_account),
        )
        .route_layer(axum::middleware::from_fn(middleware::require_admin));

    let protected_routes = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me))
        .route("/devices", get(devices::list_devices))
        .route("/devices/{device_id}", delete(devices::revoke_device))
        .merge(admin_routes)
        .route_layer(axum::middleware::from_fn_with_state(
            state,
            middleware::auth_middleware,
        ));

    Router::new().merge(public_routes).merge(protected_routes)
}

/// Health check endpoint for monitoring and load balancers.
///
/// Returns `200 OK` when the store answers, `503 Service Unavailable` otherwise.
///
/// ```bash
/// curl http://localhost:8080/health
/// # {"status":"healthy","store":true,"version":"0.1.0","timestamp":"2026-01-01T10:30:00Z"}
/// ```
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let store_healthy = match state.store.health_check().await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(error = %e, "Store health check failed");
            false
        }
    };

    let status_code = if store_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = json!({
        "status": if store_healthy { "healthy" } else { "unhealthy" },
        "version": env!("CARGO_PKG_VERSION"),
        "store": store_healthy,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    (status_code, Json(response))
}

//! Device management handlers.

use axum::{
    Json,
    extract::{Extension, Path, State},
    http::StatusCode,
};
use lottery::auth::{AccessClaims, DeviceId, DeviceSummary};

use super::{AppState, client::ClientContext, error::ApiError};
use crate::logging::log_security_event;

/// List the caller's devices with the expiry of each live session.
pub async fn list_devices(
    State(state): State<AppState>,
    Extension(claims): Extension<AccessClaims>,
) -> Result<Json<Vec<DeviceSummary>>, ApiError> {
    let devices = state.sessions.list_devices(claims.account_id()?).await?;
    Ok(Json(devices))
}

/// Revoke one of the caller's devices.
///
/// # Errors
///
/// - `404 Not Found`: Unknown device, or a device of another account
pub async fn revoke_device(
    State(state): State<AppState>,
    Extension(claims): Extension<AccessClaims>,
    client: ClientContext,
    Path(device_id): Path<DeviceId>,
) -> Result<StatusCode, ApiError> {
    let account_id = claims.account_id()?;
    state
        .sessions
        .revoke_device(account_id, device_id, client.info())
        .await?;
    log_security_event(
        "device_revoked",
        Some(account_id),
        client.ip(),
        &format!("Device {device_id} revoked"),
    );
    Ok(StatusCode::NO_CONTENT)
}

//! Back-office account administration.

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
};
use lottery::auth::{AccessClaims, AccountId};

use super::{AppState, error::ApiError};

/// Re-enable login and refresh for an account.
pub async fn activate_account(
    State(state): State<AppState>,
    Extension(claims): Extension<AccessClaims>,
    Path(account_id): Path<AccountId>,
) -> Result<StatusCode, ApiError> {
    set_active(&state, &claims, account_id, true).await
}

/// Block login and refresh for an account.
///
/// Outstanding access tokens stay valid until they expire.
pub async fn deactivate_account(
    State(state): State<AppState>,
    Extension(claims): Extension<AccessClaims>,
    Path(account_id): Path<AccountId>,
) -> Result<StatusCode, ApiError> {
    set_active(&state, &claims, account_id, false).await
}

async fn set_active(
    state: &AppState,
    claims: &AccessClaims,
    account_id: AccountId,
    active: bool,
) -> Result<StatusCode, ApiError> {
    state.sessions.set_account_active(account_id, active).await?;
    tracing::info!(
        admin = %claims.sub,
        account_id,
        active,
        "Account status changed"
    );
    Ok(StatusCode::NO_CONTENT)
}

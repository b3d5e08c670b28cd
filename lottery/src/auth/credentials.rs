//! Refresh token issuance and single-use rotation.

use super::{
    errors::{AuthError, AuthResult},
    models::{AccountId, DeviceId, NewRefreshToken, RefreshToken},
};
use crate::clock::Clock;
use crate::db::RefreshTokenRepository;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Duration;
use rand::RngCore;
use std::sync::Arc;

/// Random bytes behind every refresh token
pub const REFRESH_TOKEN_BYTES: usize = 64;

/// Generate an opaque refresh token value
///
/// 64 bytes from the thread-local CSPRNG, URL-safe base64 without padding.
pub fn generate_token() -> String {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Persists refresh tokens as forward-linked rotation chains
#[derive(Clone)]
pub struct CredentialStore {
    repo: Arc<dyn RefreshTokenRepository>,
    clock: Arc<dyn Clock>,
    lifetime: Duration,
    sliding: bool,
}

impl CredentialStore {
    /// # Arguments
    ///
    /// * `lifetime` - Lifetime of a freshly issued chain
    /// * `sliding` - Restart `lifetime` on every rotation instead of keeping
    ///   the chain's original expiry
    pub fn new(
        repo: Arc<dyn RefreshTokenRepository>,
        clock: Arc<dyn Clock>,
        lifetime: Duration,
        sliding: bool,
    ) -> Self {
        Self {
            repo,
            clock,
            lifetime,
            sliding,
        }
    }

    /// Start a new chain for the account's device
    ///
    /// Any chain the device still holds is revoked in the same step, so the
    /// device ends up with exactly one active credential. A token without a
    /// device is simply inserted.
    pub async fn issue_refresh(
        &self,
        account_id: AccountId,
        device_id: Option<DeviceId>,
        revoked_by_ip: Option<&str>,
    ) -> AuthResult<RefreshToken> {
        let now = self.clock.now();
        let token = NewRefreshToken {
            account_id,
            device_id,
            token: generate_token(),
            created_at: now,
            expires_at: now + self.lifetime,
        };

        match device_id {
            Some(device_id) => {
                let issued = self
                    .repo
                    .replace_device_tokens(device_id, token, revoked_by_ip)
                    .await?;
                log::debug!(
                    "Issued refresh token {} for account {} on device {}",
                    issued.id,
                    account_id,
                    device_id
                );
                Ok(issued)
            }
            None => self.repo.insert_refresh_token(token).await,
        }
    }

    /// Exchange `presented` for its successor
    ///
    /// The presented token is revoked and linked to the replacement in one
    /// atomic step. Exactly one of any number of concurrent callers presenting
    /// the same token succeeds.
    ///
    /// # Errors
    ///
    /// * `AuthError::InvalidRefreshToken` - Unknown, revoked or expired token,
    ///   or a concurrent rotation got there first
    pub async fn rotate(
        &self,
        presented: &str,
        revoked_by_ip: Option<&str>,
    ) -> AuthResult<RefreshToken> {
        let now = self.clock.now();
        let Some(current) = self.repo.find_refresh_token(presented).await? else {
            return Err(AuthError::InvalidRefreshToken);
        };

        if let Some(revoked_at) = current.revoked_at {
            log::warn!(
                "Revoked refresh token {} presented again (account {}, device {:?}, revoked at {}, from {})",
                current.id,
                current.account_id,
                current.device_id,
                revoked_at,
                revoked_by_ip.unwrap_or("unknown")
            );
            return Err(AuthError::InvalidRefreshToken);
        }
        if current.expires_at <= now {
            return Err(AuthError::InvalidRefreshToken);
        }

        let expires_at = if self.sliding {
            now + self.lifetime
        } else {
            current.expires_at
        };
        let replacement = NewRefreshToken {
            account_id: current.account_id,
            device_id: current.device_id,
            token: generate_token(),
            created_at: now,
            expires_at,
        };

        match self
            .repo
            .rotate_refresh_token(current.id, replacement, revoked_by_ip)
            .await?
        {
            Some(next) => {
                log::debug!(
                    "Rotated refresh token {} -> {} for account {}",
                    current.id,
                    next.id,
                    current.account_id
                );
                Ok(next)
            }
            None => {
                log::warn!(
                    "Concurrent rotation of refresh token {} for account {} lost the race",
                    current.id,
                    current.account_id
                );
                Err(AuthError::InvalidRefreshToken)
            }
        }
    }

    /// Look up a token that is still usable, without rotating it
    pub async fn find_active(&self, presented: &str) -> AuthResult<Option<RefreshToken>> {
        let now = self.clock.now();
        Ok(self
            .repo
            .find_refresh_token(presented)
            .await?
            .filter(|t| t.is_active(now)))
    }

    /// Account a token was issued to, whatever state the token is in
    pub async fn owner_of(&self, presented: &str) -> AuthResult<Option<AccountId>> {
        Ok(self
            .repo
            .find_refresh_token(presented)
            .await?
            .map(|t| t.account_id))
    }

    /// Most recent active token of the device's chain
    pub async fn latest_active_for_device(
        &self,
        account_id: AccountId,
        device_id: DeviceId,
    ) -> AuthResult<Option<RefreshToken>> {
        self.repo
            .latest_active_refresh_token(account_id, Some(device_id), self.clock.now())
            .await
    }

    /// Every token row of the account, oldest first
    pub async fn list(&self, account_id: AccountId) -> AuthResult<Vec<RefreshToken>> {
        self.repo.list_refresh_tokens(account_id).await
    }
}

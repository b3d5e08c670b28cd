//! Device registry: fingerprinting, the per-account cap and device cleanup.

use super::{
    errors::{AuthError, AuthResult},
    models::{AccountId, ClientInfo, Device, DeviceId, NewDevice},
};
use crate::clock::Clock;
use crate::db::DeviceRepository;
use chrono::Duration;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Label used when the client does not name its device
pub const DEFAULT_DEVICE_LABEL: &str = "default";

/// Devices used this recently are never purged as stale
pub const STALE_DEVICE_GRACE_SECS: i64 = 60;

const FIELD_SEPARATOR: [u8; 1] = [0x1f];

/// Deterministic identity key for an (account, label, user agent) triple
///
/// Returns the lowercase hex SHA-256 digest. The value identifies a device
/// row; it is not a secret.
pub fn fingerprint(account_id: AccountId, label: &str, user_agent: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(account_id.to_string().as_bytes());
    hasher.update(FIELD_SEPARATOR);
    hasher.update(label.as_bytes());
    hasher.update(FIELD_SEPARATOR);
    hasher.update(user_agent.unwrap_or_default().as_bytes());
    hex::encode(hasher.finalize())
}

/// Maps fingerprints to persisted devices and enforces the device cap
#[derive(Clone)]
pub struct DeviceRegistry {
    repo: Arc<dyn DeviceRepository>,
    clock: Arc<dyn Clock>,
    max_devices: usize,
}

impl DeviceRegistry {
    pub fn new(repo: Arc<dyn DeviceRepository>, clock: Arc<dyn Clock>, max_devices: usize) -> Self {
        Self {
            repo,
            clock,
            max_devices,
        }
    }

    /// Find the caller's device or register a new one
    ///
    /// A known fingerprint only refreshes `last_used_at` and the user agent,
    /// so it never trips the cap. A new fingerprint first purges stale devices
    /// and then inserts under the cap.
    ///
    /// # Errors
    ///
    /// * `AuthError::TooManyDevices` - Account already holds `max_devices`
    pub async fn get_or_create_device(
        &self,
        account_id: AccountId,
        label: Option<&str>,
        client: &ClientInfo,
    ) -> AuthResult<Device> {
        let label = label
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or(DEFAULT_DEVICE_LABEL);
        let user_agent = client.user_agent.as_deref();
        let key = fingerprint(account_id, label, user_agent);
        let now = self.clock.now();

        if let Some(device) = self.repo.find_device_by_fingerprint(account_id, &key).await? {
            return self.repo.touch_device(device.id, user_agent, now).await;
        }

        if let Err(e) = self.purge_stale(account_id).await {
            log::warn!("Stale device purge failed for account {}: {}", account_id, e);
        }

        let device = self
            .repo
            .insert_device_within_cap(
                NewDevice {
                    account_id,
                    fingerprint: key,
                    label: label.to_string(),
                    user_agent: client.user_agent.clone(),
                    created_ip: client.ip.clone(),
                    created_at: now,
                },
                self.max_devices,
            )
            .await?;

        log::info!("Registered device {} for account {}", device.id, account_id);
        Ok(device)
    }

    /// Delete every device of the account without an active refresh token
    ///
    /// Returns the number of devices removed.
    pub async fn purge_stale(&self, account_id: AccountId) -> AuthResult<u64> {
        let now = self.clock.now();
        let idle_before = now - Duration::seconds(STALE_DEVICE_GRACE_SECS);
        let purged = self
            .repo
            .delete_stale_devices(account_id, now, idle_before)
            .await?;

        if purged > 0 {
            log::debug!("Purged {} stale devices of account {}", purged, account_id);
        }
        Ok(purged)
    }

    /// Revoke the device's refresh tokens and delete it, looked up by fingerprint
    ///
    /// # Errors
    ///
    /// * `AuthError::DeviceNotFound` - No device with that fingerprint
    pub async fn revoke_device(
        &self,
        account_id: AccountId,
        fingerprint: &str,
        revoked_by_ip: Option<&str>,
    ) -> AuthResult<u64> {
        let device = self
            .repo
            .find_device_by_fingerprint(account_id, fingerprint)
            .await?
            .ok_or(AuthError::DeviceNotFound)?;

        self.revoke(device, revoked_by_ip).await
    }

    /// Same as [`Self::revoke_device`] but addressed by device ID
    ///
    /// A device owned by another account is reported as not found.
    pub async fn revoke_device_by_id(
        &self,
        account_id: AccountId,
        device_id: DeviceId,
        revoked_by_ip: Option<&str>,
    ) -> AuthResult<u64> {
        let device = self
            .repo
            .find_device(account_id, device_id)
            .await?
            .ok_or(AuthError::DeviceNotFound)?;

        self.revoke(device, revoked_by_ip).await
    }

    pub async fn find_device(
        &self,
        account_id: AccountId,
        device_id: DeviceId,
    ) -> AuthResult<Option<Device>> {
        self.repo.find_device(account_id, device_id).await
    }

    pub async fn list_devices(&self, account_id: AccountId) -> AuthResult<Vec<Device>> {
        self.repo.list_devices(account_id).await
    }

    pub fn max_devices(&self) -> usize {
        self.max_devices
    }

    async fn revoke(&self, device: Device, revoked_by_ip: Option<&str>) -> AuthResult<u64> {
        let revoked = self
            .repo
            .revoke_and_delete_device(device.id, self.clock.now(), revoked_by_ip)
            .await?;

        log::info!(
            "Revoked device {} of account {} ({} refresh tokens)",
            device.id,
            device.account_id,
            revoked
        );
        Ok(revoked)
    }
}

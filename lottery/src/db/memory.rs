//! In-process implementation of the auth repositories.
//!
//! One async mutex guards all three tables, so every trait method is atomic
//! in the same sense a Postgres transaction is. Used by the test suites and by
//! the server's `--in-memory` development mode.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::Mutex;

use super::repository::{AccountRepository, AuthStore, DeviceRepository, RefreshTokenRepository};
use crate::auth::{
    Account, AccountId, AccountRecord, AuthError, AuthResult, Device, DeviceId, NewAccount,
    NewDevice, NewRefreshToken, RefreshToken, RefreshTokenId,
};

#[derive(Default)]
struct Tables {
    last_account_id: AccountId,
    last_device_id: DeviceId,
    last_token_id: RefreshTokenId,
    accounts: BTreeMap<AccountId, AccountRecord>,
    devices: BTreeMap<DeviceId, Device>,
    tokens: BTreeMap<RefreshTokenId, RefreshToken>,
}

impl Tables {
    fn insert_token(&mut self, token: NewRefreshToken) -> AuthResult<RefreshToken> {
        if self.tokens.values().any(|t| t.token == token.token) {
            return Err(AuthError::Configuration(
                "duplicate refresh token value".to_string(),
            ));
        }
        if token
            .device_id
            .is_some_and(|device_id| !self.devices.contains_key(&device_id))
        {
            return Err(AuthError::DeviceNotFound);
        }

        self.last_token_id += 1;
        let row = RefreshToken {
            id: self.last_token_id,
            account_id: token.account_id,
            device_id: token.device_id,
            token: token.token,
            created_at: token.created_at,
            expires_at: token.expires_at,
            revoked_at: None,
            revoked_by_ip: None,
            replaced_by_token_id: None,
        };
        self.tokens.insert(row.id, row.clone());
        Ok(row)
    }

    fn device_has_active_token(&self, device_id: DeviceId, now: DateTime<Utc>) -> bool {
        self.tokens
            .values()
            .any(|t| t.device_id == Some(device_id) && t.is_active(now))
    }

    /// Mirrors `ON DELETE SET NULL` from devices to refresh_tokens
    fn delete_device(&mut self, device_id: DeviceId) -> bool {
        if self.devices.remove(&device_id).is_none() {
            return false;
        }
        for token in self.tokens.values_mut() {
            if token.device_id == Some(device_id) {
                token.device_id = None;
            }
        }
        true
    }
}

/// Repository backed by in-process maps
#[derive(Default)]
pub struct MemoryAuthRepository {
    tables: Mutex<Tables>,
}

impl MemoryAuthRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountRepository for MemoryAuthRepository {
    async fn create_account(&self, account: NewAccount) -> AuthResult<Account> {
        let mut tables = self.tables.lock().await;
        if tables
            .accounts
            .values()
            .any(|r| r.account.username == account.username)
        {
            return Err(AuthError::UsernameTaken);
        }

        tables.last_account_id += 1;
        let created = Account {
            id: tables.last_account_id,
            username: account.username,
            roles: account.roles,
            is_active: true,
            created_at: account.created_at,
            last_login: None,
        };
        tables.accounts.insert(
            created.id,
            AccountRecord {
                account: created.clone(),
                password_hash: account.password_hash,
            },
        );
        Ok(created)
    }

    async fn find_account_by_username(&self, username: &str) -> AuthResult<Option<AccountRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .accounts
            .values()
            .find(|r| r.account.username == username)
            .cloned())
    }

    async fn find_account(&self, account_id: AccountId) -> AuthResult<Option<Account>> {
        let tables = self.tables.lock().await;
        Ok(tables.accounts.get(&account_id).map(|r| r.account.clone()))
    }

    async fn record_login(&self, account_id: AccountId, at: DateTime<Utc>) -> AuthResult<()> {
        let mut tables = self.tables.lock().await;
        if let Some(record) = tables.accounts.get_mut(&account_id) {
            record.account.last_login = Some(at);
        }
        Ok(())
    }

    async fn set_account_active(&self, account_id: AccountId, active: bool) -> AuthResult<()> {
        let mut tables = self.tables.lock().await;
        let record = tables
            .accounts
            .get_mut(&account_id)
            .ok_or(AuthError::AccountNotFound)?;
        record.account.is_active = active;
        Ok(())
    }
}

#[async_trait]
impl DeviceRepository for MemoryAuthRepository {
    async fn find_device_by_fingerprint(
        &self,
        account_id: AccountId,
        fingerprint: &str,
    ) -> AuthResult<Option<Device>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .devices
            .values()
            .find(|d| d.account_id == account_id && d.fingerprint == fingerprint)
            .cloned())
    }

    async fn find_device(
        &self,
        account_id: AccountId,
        device_id: DeviceId,
    ) -> AuthResult<Option<Device>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .devices
            .get(&device_id)
            .filter(|d| d.account_id == account_id)
            .cloned())
    }

    async fn list_devices(&self, account_id: AccountId) -> AuthResult<Vec<Device>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .devices
            .values()
            .filter(|d| d.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn touch_device(
        &self,
        device_id: DeviceId,
        user_agent: Option<&str>,
        at: DateTime<Utc>,
    ) -> AuthResult<Device> {
        let mut tables = self.tables.lock().await;
        let device = tables
            .devices
            .get_mut(&device_id)
            .ok_or(AuthError::DeviceNotFound)?;
        device.last_used_at = at;
        if let Some(ua) = user_agent {
            device.user_agent = Some(ua.to_string());
        }
        Ok(device.clone())
    }

    async fn insert_device_within_cap(&self, device: NewDevice, cap: usize) -> AuthResult<Device> {
        let mut tables = self.tables.lock().await;
        if !tables.accounts.contains_key(&device.account_id) {
            return Err(AuthError::AccountNotFound);
        }

        if let Some(existing) = tables
            .devices
            .values_mut()
            .find(|d| d.account_id == device.account_id && d.fingerprint == device.fingerprint)
        {
            existing.last_used_at = device.created_at;
            if device.user_agent.is_some() {
                existing.user_agent = device.user_agent;
            }
            return Ok(existing.clone());
        }

        let count = tables
            .devices
            .values()
            .filter(|d| d.account_id == device.account_id)
            .count();
        if count >= cap {
            return Err(AuthError::TooManyDevices { limit: cap });
        }

        tables.last_device_id += 1;
        let created = Device {
            id: tables.last_device_id,
            account_id: device.account_id,
            fingerprint: device.fingerprint,
            label: device.label,
            user_agent: device.user_agent,
            created_ip: device.created_ip,
            created_at: device.created_at,
            last_used_at: device.created_at,
        };
        tables.devices.insert(created.id, created.clone());
        Ok(created)
    }

    async fn delete_stale_devices(
        &self,
        account_id: AccountId,
        now: DateTime<Utc>,
        idle_before: DateTime<Utc>,
    ) -> AuthResult<u64> {
        let mut tables = self.tables.lock().await;
        let stale: Vec<DeviceId> = tables
            .devices
            .values()
            .filter(|d| d.account_id == account_id && d.last_used_at < idle_before)
            .filter(|d| !tables.device_has_active_token(d.id, now))
            .map(|d| d.id)
            .collect();

        for device_id in &stale {
            tables.delete_device(*device_id);
        }
        Ok(stale.len() as u64)
    }

    async fn revoke_and_delete_device(
        &self,
        device_id: DeviceId,
        at: DateTime<Utc>,
        revoked_by_ip: Option<&str>,
    ) -> AuthResult<u64> {
        let mut tables = self.tables.lock().await;
        if !tables.devices.contains_key(&device_id) {
            return Err(AuthError::DeviceNotFound);
        }

        let mut revoked = 0;
        for token in tables.tokens.values_mut() {
            if token.device_id == Some(device_id) && token.revoked_at.is_none() {
                token.revoked_at = Some(at);
                token.revoked_by_ip = revoked_by_ip.map(str::to_string);
                revoked += 1;
            }
        }
        tables.delete_device(device_id);
        Ok(revoked)
    }
}

#[async_trait]
impl RefreshTokenRepository for MemoryAuthRepository {
    async fn insert_refresh_token(&self, token: NewRefreshToken) -> AuthResult<RefreshToken> {
        self.tables.lock().await.insert_token(token)
    }

    async fn replace_device_tokens(
        &self,
        device_id: DeviceId,
        token: NewRefreshToken,
        revoked_by_ip: Option<&str>,
    ) -> AuthResult<RefreshToken> {
        let mut tables = self.tables.lock().await;
        if !tables.devices.contains_key(&device_id) {
            return Err(AuthError::DeviceNotFound);
        }

        let issued = tables.insert_token(NewRefreshToken {
            device_id: Some(device_id),
            ..token
        })?;
        for row in tables.tokens.values_mut() {
            if row.device_id == Some(device_id) && row.id != issued.id && row.revoked_at.is_none() {
                row.revoked_at = Some(issued.created_at);
                row.revoked_by_ip = revoked_by_ip.map(str::to_string);
            }
        }
        Ok(issued)
    }

    async fn find_refresh_token(&self, token: &str) -> AuthResult<Option<RefreshToken>> {
        let tables = self.tables.lock().await;
        Ok(tables.tokens.values().find(|t| t.token == token).cloned())
    }

    async fn latest_active_refresh_token(
        &self,
        account_id: AccountId,
        device_id: Option<DeviceId>,
        now: DateTime<Utc>,
    ) -> AuthResult<Option<RefreshToken>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .tokens
            .values()
            .filter(|t| t.account_id == account_id && t.is_active(now))
            .filter(|t| device_id.is_none() || t.device_id == device_id)
            .max_by_key(|t| (t.created_at, t.id))
            .cloned())
    }

    async fn rotate_refresh_token(
        &self,
        current_id: RefreshTokenId,
        replacement: NewRefreshToken,
        revoked_by_ip: Option<&str>,
    ) -> AuthResult<Option<RefreshToken>> {
        let mut tables = self.tables.lock().await;
        let now = replacement.created_at;

        match tables.tokens.get(&current_id) {
            Some(current) if current.is_active(now) => {}
            _ => return Ok(None),
        }

        let next = tables.insert_token(replacement)?;
        if let Some(current) = tables.tokens.get_mut(&current_id) {
            current.revoked_at = Some(now);
            current.revoked_by_ip = revoked_by_ip.map(str::to_string);
            current.replaced_by_token_id = Some(next.id);
        }
        Ok(Some(next))
    }

    async fn list_refresh_tokens(&self, account_id: AccountId) -> AuthResult<Vec<RefreshToken>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .tokens
            .values()
            .filter(|t| t.account_id == account_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AuthStore for MemoryAuthRepository {
    async fn health_check(&self) -> AuthResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use chrono::Duration;
    use std::collections::BTreeSet;

    async fn seed_account(repo: &MemoryAuthRepository) -> Account {
        repo.create_account(NewAccount {
            username: "alice".to_string(),
            password_hash: "hash".to_string(),
            roles: BTreeSet::from([Role::Member]),
            created_at: Utc::now(),
        })
        .await
        .unwrap()
    }

    fn new_device(account_id: AccountId, fingerprint: &str, at: DateTime<Utc>) -> NewDevice {
        NewDevice {
            account_id,
            fingerprint: fingerprint.to_string(),
            label: "phone".to_string(),
            user_agent: Some("UA".to_string()),
            created_ip: Some("10.0.0.1".to_string()),
            created_at: at,
        }
    }

    fn new_token(account_id: AccountId, device_id: DeviceId, value: &str, at: DateTime<Utc>) -> NewRefreshToken {
        NewRefreshToken {
            account_id,
            device_id: Some(device_id),
            token: value.to_string(),
            created_at: at,
            expires_at: at + Duration::days(7),
        }
    }

    #[tokio::test]
    async fn test_duplicate_username_is_rejected() {
        let repo = MemoryAuthRepository::new();
        seed_account(&repo).await;
        let result = repo
            .create_account(NewAccount {
                username: "alice".to_string(),
                password_hash: "other".to_string(),
                roles: BTreeSet::from([Role::Member]),
                created_at: Utc::now(),
            })
            .await;
        assert!(matches!(result, Err(AuthError::UsernameTaken)));
    }

    #[tokio::test]
    async fn test_rotation_only_succeeds_once() {
        let repo = MemoryAuthRepository::new();
        let account = seed_account(&repo).await;
        let now = Utc::now();
        let device = repo
            .insert_device_within_cap(new_device(account.id, "fp", now), 5)
            .await
            .unwrap();
        let first = repo
            .insert_refresh_token(new_token(account.id, device.id, "one", now))
            .await
            .unwrap();

        let second = repo
            .rotate_refresh_token(first.id, new_token(account.id, device.id, "two", now), None)
            .await
            .unwrap()
            .expect("first rotation wins");
        let lost = repo
            .rotate_refresh_token(first.id, new_token(account.id, device.id, "three", now), None)
            .await
            .unwrap();
        assert!(lost.is_none());

        let rows = repo.list_refresh_tokens(account.id).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].replaced_by_token_id, Some(second.id));
    }

    #[tokio::test]
    async fn test_deleting_device_keeps_revoked_tokens_detached() {
        let repo = MemoryAuthRepository::new();
        let account = seed_account(&repo).await;
        let now = Utc::now();
        let device = repo
            .insert_device_within_cap(new_device(account.id, "fp", now), 5)
            .await
            .unwrap();
        repo.insert_refresh_token(new_token(account.id, device.id, "one", now))
            .await
            .unwrap();

        let revoked = repo
            .revoke_and_delete_device(device.id, now, Some("10.0.0.2"))
            .await
            .unwrap();
        assert_eq!(revoked, 1);
        assert!(repo.list_devices(account.id).await.unwrap().is_empty());

        let row = repo.find_refresh_token("one").await.unwrap().unwrap();
        assert_eq!(row.device_id, None);
        assert_eq!(row.revoked_at, Some(now));
        assert_eq!(row.revoked_by_ip.as_deref(), Some("10.0.0.2"));
        assert!(!row.is_active(now));
    }

    #[tokio::test]
    async fn test_replacing_device_tokens_leaves_one_active() {
        let repo = MemoryAuthRepository::new();
        let account = seed_account(&repo).await;
        let now = Utc::now();
        let device = repo
            .insert_device_within_cap(new_device(account.id, "fp", now), 5)
            .await
            .unwrap();
        let other = repo
            .insert_device_within_cap(new_device(account.id, "other", now), 5)
            .await
            .unwrap();
        repo.insert_refresh_token(new_token(account.id, other.id, "elsewhere", now))
            .await
            .unwrap();

        for value in ["one", "two", "three"] {
            repo.replace_device_tokens(
                device.id,
                new_token(account.id, device.id, value, now),
                Some("10.0.0.3"),
            )
            .await
            .unwrap();
        }

        let rows = repo.list_refresh_tokens(account.id).await.unwrap();
        let active: Vec<_> = rows
            .iter()
            .filter(|t| t.device_id == Some(device.id) && t.is_active(now))
            .collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].token, "three");

        let replaced = repo.find_refresh_token("one").await.unwrap().unwrap();
        assert_eq!(replaced.replaced_by_token_id, None);
        assert_eq!(replaced.revoked_by_ip.as_deref(), Some("10.0.0.3"));

        // other devices keep their sessions
        let untouched = repo.find_refresh_token("elsewhere").await.unwrap().unwrap();
        assert!(untouched.is_active(now));
    }

    #[tokio::test]
    async fn test_replacing_tokens_of_unknown_device_fails() {
        let repo = MemoryAuthRepository::new();
        let account = seed_account(&repo).await;
        let now = Utc::now();

        let result = repo
            .replace_device_tokens(42, new_token(account.id, 42, "one", now), None)
            .await;
        assert!(matches!(result, Err(AuthError::DeviceNotFound)));
        assert!(repo.list_refresh_tokens(account.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cap_counts_only_the_owning_account() {
        let repo = MemoryAuthRepository::new();
        let account = seed_account(&repo).await;
        let now = Utc::now();
        repo.insert_device_within_cap(new_device(account.id, "a", now), 1)
            .await
            .unwrap();

        let again = repo
            .insert_device_within_cap(new_device(account.id, "a", now), 1)
            .await;
        assert!(again.is_ok(), "known fingerprint is never capped");

        let result = repo
            .insert_device_within_cap(new_device(account.id, "b", now), 1)
            .await;
        assert!(matches!(result, Err(AuthError::TooManyDevices { limit: 1 })));
    }
}

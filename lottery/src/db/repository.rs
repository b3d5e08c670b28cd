//! Repository trait definitions for testability and dependency injection.
//!
//! The session subsystem never talks to a pool directly; it goes through the
//! traits below. [`PgAuthRepository`] is the production implementation and
//! relies on Postgres transactions and unique constraints for every
//! atomicity guarantee. [`super::memory::MemoryAuthRepository`] mirrors the
//! same contracts in process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use std::collections::BTreeSet;

use super::timeouts::{TimeoutError, with_default_timeout, with_transaction_timeout};
use crate::auth::{
    Account, AccountId, AccountRecord, AuthError, AuthResult, Device, DeviceId, NewAccount,
    NewDevice, NewRefreshToken, RefreshToken, RefreshTokenId, Role,
};

/// Account lookups and admin mutations
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Create a new account
    ///
    /// Fails with `AuthError::UsernameTaken` on a duplicate username.
    async fn create_account(&self, account: NewAccount) -> AuthResult<Account>;

    /// Find account and password hash by username
    async fn find_account_by_username(&self, username: &str) -> AuthResult<Option<AccountRecord>>;

    /// Find account by ID
    async fn find_account(&self, account_id: AccountId) -> AuthResult<Option<Account>>;

    /// Update account's last login timestamp
    async fn record_login(&self, account_id: AccountId, at: DateTime<Utc>) -> AuthResult<()>;

    /// Activate or deactivate an account
    async fn set_account_active(&self, account_id: AccountId, active: bool) -> AuthResult<()>;
}

/// Device rows keyed by (account, fingerprint)
#[async_trait]
pub trait DeviceRepository: Send + Sync {
    /// Find a device by its fingerprint
    async fn find_device_by_fingerprint(
        &self,
        account_id: AccountId,
        fingerprint: &str,
    ) -> AuthResult<Option<Device>>;

    /// Find a device by ID, scoped to its owner
    async fn find_device(
        &self,
        account_id: AccountId,
        device_id: DeviceId,
    ) -> AuthResult<Option<Device>>;

    /// All devices of an account, oldest first
    async fn list_devices(&self, account_id: AccountId) -> AuthResult<Vec<Device>>;

    /// Refresh `last_used_at` (and `user_agent` when given)
    async fn touch_device(
        &self,
        device_id: DeviceId,
        user_agent: Option<&str>,
        at: DateTime<Utc>,
    ) -> AuthResult<Device>;

    /// Insert a device unless the account already holds `cap` devices
    ///
    /// Runs as one transaction serialized per account. A device with the same
    /// fingerprint that appeared concurrently is touched and returned instead
    /// of inserted.
    ///
    /// # Errors
    ///
    /// * `AuthError::TooManyDevices` - Account is at or over `cap`
    /// * `AuthError::AccountNotFound` - Account row missing
    async fn insert_device_within_cap(&self, device: NewDevice, cap: usize) -> AuthResult<Device>;

    /// Delete devices that have no active refresh token at `now` and were
    /// last used before `idle_before`
    async fn delete_stale_devices(
        &self,
        account_id: AccountId,
        now: DateTime<Utc>,
        idle_before: DateTime<Utc>,
    ) -> AuthResult<u64>;

    /// Revoke every unrevoked refresh token linked to the device and delete
    /// the device, atomically. Returns the number of tokens revoked.
    ///
    /// # Errors
    ///
    /// * `AuthError::DeviceNotFound` - No such device
    async fn revoke_and_delete_device(
        &self,
        device_id: DeviceId,
        at: DateTime<Utc>,
        revoked_by_ip: Option<&str>,
    ) -> AuthResult<u64>;
}

/// Refresh token rows forming rotation chains
#[async_trait]
pub trait RefreshTokenRepository: Send + Sync {
    /// Persist a new refresh token
    async fn insert_refresh_token(&self, token: NewRefreshToken) -> AuthResult<RefreshToken>;

    /// Revoke every live token of `device_id` and insert `token` in its place
    ///
    /// `token.created_at` is used as the revocation time. Revoked rows keep
    /// `replaced_by_token_id` unset since a fresh login starts a new chain
    /// instead of continuing the old one. Afterwards `token` is the device's
    /// only active credential.
    ///
    /// # Errors
    ///
    /// * `AuthError::DeviceNotFound` - No such device
    async fn replace_device_tokens(
        &self,
        device_id: DeviceId,
        token: NewRefreshToken,
        revoked_by_ip: Option<&str>,
    ) -> AuthResult<RefreshToken>;

    /// Exact lookup by token value, regardless of state
    async fn find_refresh_token(&self, token: &str) -> AuthResult<Option<RefreshToken>>;

    /// Most recently created active token of the account, optionally
    /// restricted to one device
    async fn latest_active_refresh_token(
        &self,
        account_id: AccountId,
        device_id: Option<DeviceId>,
        now: DateTime<Utc>,
    ) -> AuthResult<Option<RefreshToken>>;

    /// Atomically revoke `current_id` and insert `replacement` linked from it
    ///
    /// `replacement.created_at` is used as the revocation time. Returns
    /// `None` (and changes nothing) when `current_id` is no longer active,
    /// which is how the loser of a concurrent rotation finds out.
    async fn rotate_refresh_token(
        &self,
        current_id: RefreshTokenId,
        replacement: NewRefreshToken,
        revoked_by_ip: Option<&str>,
    ) -> AuthResult<Option<RefreshToken>>;

    /// Every token row of an account, oldest first
    async fn list_refresh_tokens(&self, account_id: AccountId) -> AuthResult<Vec<RefreshToken>>;
}

/// Everything the session subsystem needs from persistence
#[async_trait]
pub trait AuthStore: AccountRepository + DeviceRepository + RefreshTokenRepository {
    /// Check that the backing store answers
    async fn health_check(&self) -> AuthResult<()>;
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn account_from_row(row: &PgRow) -> AuthResult<Account> {
    let roles: Vec<String> = row.try_get("roles")?;
    let roles = roles
        .iter()
        .map(|r| r.parse())
        .collect::<AuthResult<BTreeSet<Role>>>()?;

    Ok(Account {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        roles,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        last_login: row.try_get("last_login")?,
    })
}

fn device_from_row(row: &PgRow) -> AuthResult<Device> {
    Ok(Device {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        fingerprint: row.try_get("fingerprint")?,
        label: row.try_get("label")?,
        user_agent: row.try_get("user_agent")?,
        created_ip: row.try_get("created_ip")?,
        created_at: row.try_get("created_at")?,
        last_used_at: row.try_get("last_used_at")?,
    })
}

fn refresh_token_from_row(row: &PgRow) -> AuthResult<RefreshToken> {
    Ok(RefreshToken {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        device_id: row.try_get("device_id")?,
        token: row.try_get("token")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
        revoked_at: row.try_get("revoked_at")?,
        revoked_by_ip: row.try_get("revoked_by_ip")?,
        replaced_by_token_id: row.try_get("replaced_by_token_id")?,
    })
}

/// Default PostgreSQL implementation of the auth repositories
#[derive(Clone)]
pub struct PgAuthRepository {
    pool: PgPool,
}

impl PgAuthRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountRepository for PgAuthRepository {
    async fn create_account(&self, account: NewAccount) -> AuthResult<Account> {
        let roles: Vec<String> = account.roles.iter().map(|r| r.as_str().to_string()).collect();

        let inserted = with_default_timeout(
            sqlx::query(
                r#"
                INSERT INTO accounts (username, password_hash, roles, created_at)
                VALUES ($1, $2, $3, $4)
                RETURNING id, username, roles, is_active, created_at, last_login
                "#,
            )
            .bind(&account.username)
            .bind(&account.password_hash)
            .bind(&roles)
            .bind(account.created_at)
            .fetch_one(&self.pool),
        )
        .await;

        let row = match inserted {
            Ok(row) => row,
            Err(TimeoutError::Database(e)) if is_unique_violation(&e) => {
                return Err(AuthError::UsernameTaken);
            }
            Err(e) => return Err(e.into()),
        };

        account_from_row(&row)
    }

    async fn find_account_by_username(&self, username: &str) -> AuthResult<Option<AccountRecord>> {
        let row = with_default_timeout(
            sqlx::query(
                r#"
                SELECT id, username, password_hash, roles, is_active, created_at, last_login
                FROM accounts
                WHERE username = $1
                "#,
            )
            .bind(username)
            .fetch_optional(&self.pool),
        )
        .await?;

        row.map(|row| {
            Ok(AccountRecord {
                account: account_from_row(&row)?,
                password_hash: row.try_get("password_hash")?,
            })
        })
        .transpose()
    }

    async fn find_account(&self, account_id: AccountId) -> AuthResult<Option<Account>> {
        let row = with_default_timeout(
            sqlx::query(
                r#"
                SELECT id, username, roles, is_active, created_at, last_login
                FROM accounts
                WHERE id = $1
                "#,
            )
            .bind(account_id)
            .fetch_optional(&self.pool),
        )
        .await?;

        row.as_ref().map(account_from_row).transpose()
    }

    async fn record_login(&self, account_id: AccountId, at: DateTime<Utc>) -> AuthResult<()> {
        with_default_timeout(
            sqlx::query("UPDATE accounts SET last_login = $2 WHERE id = $1")
                .bind(account_id)
                .bind(at)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn set_account_active(&self, account_id: AccountId, active: bool) -> AuthResult<()> {
        let result = with_default_timeout(
            sqlx::query("UPDATE accounts SET is_active = $2 WHERE id = $1")
                .bind(account_id)
                .bind(active)
                .execute(&self.pool),
        )
        .await?;

        if result.rows_affected() == 0 {
            return Err(AuthError::AccountNotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceRepository for PgAuthRepository {
    async fn find_device_by_fingerprint(
        &self,
        account_id: AccountId,
        fingerprint: &str,
    ) -> AuthResult<Option<Device>> {
        let row = with_default_timeout(
            sqlx::query(
                r#"
                SELECT id, account_id, fingerprint, label, user_agent, created_ip,
                       created_at, last_used_at
                FROM devices
                WHERE account_id = $1 AND fingerprint = $2
                "#,
            )
            .bind(account_id)
            .bind(fingerprint)
            .fetch_optional(&self.pool),
        )
        .await?;

        row.as_ref().map(device_from_row).transpose()
    }

    async fn find_device(
        &self,
        account_id: AccountId,
        device_id: DeviceId,
    ) -> AuthResult<Option<Device>> {
        let row = with_default_timeout(
            sqlx::query(
                r#"
                SELECT id, account_id, fingerprint, label, user_agent, created_ip,
                       created_at, last_used_at
                FROM devices
                WHERE account_id = $1 AND id = $2
                "#,
            )
            .bind(account_id)
            .bind(device_id)
            .fetch_optional(&self.pool),
        )
        .await?;

        row.as_ref().map(device_from_row).transpose()
    }

    async fn list_devices(&self, account_id: AccountId) -> AuthResult<Vec<Device>> {
        let rows = with_default_timeout(
            sqlx::query(
                r#"
                SELECT id, account_id, fingerprint, label, user_agent, created_ip,
                       created_at, last_used_at
                FROM devices
                WHERE account_id = $1
                ORDER BY created_at, id
                "#,
            )
            .bind(account_id)
            .fetch_all(&self.pool),
        )
        .await?;

        rows.iter().map(device_from_row).collect()
    }

    async fn touch_device(
        &self,
        device_id: DeviceId,
        user_agent: Option<&str>,
        at: DateTime<Utc>,
    ) -> AuthResult<Device> {
        let row = with_default_timeout(
            sqlx::query(
                r#"
                UPDATE devices
                SET last_used_at = $2, user_agent = COALESCE($3, user_agent)
                WHERE id = $1
                RETURNING id, account_id, fingerprint, label, user_agent, created_ip,
                          created_at, last_used_at
                "#,
            )
            .bind(device_id)
            .bind(at)
            .bind(user_agent)
            .fetch_optional(&self.pool),
        )
        .await?
        .ok_or(AuthError::DeviceNotFound)?;

        device_from_row(&row)
    }

    async fn insert_device_within_cap(&self, device: NewDevice, cap: usize) -> AuthResult<Device> {
        with_transaction_timeout(async {
            let mut tx = self.pool.begin().await?;

            // Serializes cap checks for one account across connections
            sqlx::query("SELECT id FROM accounts WHERE id = $1 FOR UPDATE")
                .bind(device.account_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(AuthError::AccountNotFound)?;

            let existing = sqlx::query(
                r#"
                UPDATE devices
                SET last_used_at = $3, user_agent = COALESCE($4, user_agent)
                WHERE account_id = $1 AND fingerprint = $2
                RETURNING id, account_id, fingerprint, label, user_agent, created_ip,
                          created_at, last_used_at
                "#,
            )
            .bind(device.account_id)
            .bind(&device.fingerprint)
            .bind(device.created_at)
            .bind(&device.user_agent)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(row) = existing {
                let found = device_from_row(&row)?;
                tx.commit().await?;
                return Ok(found);
            }

            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM devices WHERE account_id = $1")
                .bind(device.account_id)
                .fetch_one(&mut *tx)
                .await?;

            if count >= cap as i64 {
                return Err(AuthError::TooManyDevices { limit: cap });
            }

            let row = sqlx::query(
                r#"
                INSERT INTO devices
                    (account_id, fingerprint, label, user_agent, created_ip, created_at, last_used_at)
                VALUES ($1, $2, $3, $4, $5, $6, $6)
                RETURNING id, account_id, fingerprint, label, user_agent, created_ip,
                          created_at, last_used_at
                "#,
            )
            .bind(device.account_id)
            .bind(&device.fingerprint)
            .bind(&device.label)
            .bind(&device.user_agent)
            .bind(&device.created_ip)
            .bind(device.created_at)
            .fetch_one(&mut *tx)
            .await?;

            let created = device_from_row(&row)?;
            tx.commit().await?;
            Ok::<_, AuthError>(created)
        })
        .await
    }

    async fn delete_stale_devices(
        &self,
        account_id: AccountId,
        now: DateTime<Utc>,
        idle_before: DateTime<Utc>,
    ) -> AuthResult<u64> {
        let result = with_default_timeout(
            sqlx::query(
                r#"
                DELETE FROM devices d
                WHERE d.account_id = $1
                  AND d.last_used_at < $3
                  AND NOT EXISTS (
                      SELECT 1 FROM refresh_tokens r
                      WHERE r.device_id = d.id
                        AND r.revoked_at IS NULL
                        AND r.expires_at > $2
                  )
                "#,
            )
            .bind(account_id)
            .bind(now)
            .bind(idle_before)
            .execute(&self.pool),
        )
        .await?;

        Ok(result.rows_affected())
    }

    async fn revoke_and_delete_device(
        &self,
        device_id: DeviceId,
        at: DateTime<Utc>,
        revoked_by_ip: Option<&str>,
    ) -> AuthResult<u64> {
        with_transaction_timeout(async {
            let mut tx = self.pool.begin().await?;

            let revoked = sqlx::query(
                r#"
                UPDATE refresh_tokens
                SET revoked_at = $2, revoked_by_ip = $3
                WHERE device_id = $1 AND revoked_at IS NULL
                "#,
            )
            .bind(device_id)
            .bind(at)
            .bind(revoked_by_ip)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            let deleted = sqlx::query("DELETE FROM devices WHERE id = $1")
                .bind(device_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();

            if deleted == 0 {
                return Err(AuthError::DeviceNotFound);
            }

            tx.commit().await?;
            Ok::<_, AuthError>(revoked)
        })
        .await
    }
}

#[async_trait]
impl RefreshTokenRepository for PgAuthRepository {
    async fn insert_refresh_token(&self, token: NewRefreshToken) -> AuthResult<RefreshToken> {
        let row = with_default_timeout(
            sqlx::query(
                r#"
                INSERT INTO refresh_tokens (account_id, device_id, token, created_at, expires_at)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id, account_id, device_id, token, created_at, expires_at,
                          revoked_at, revoked_by_ip, replaced_by_token_id
                "#,
            )
            .bind(token.account_id)
            .bind(token.device_id)
            .bind(&token.token)
            .bind(token.created_at)
            .bind(token.expires_at)
            .fetch_one(&self.pool),
        )
        .await?;

        refresh_token_from_row(&row)
    }

    async fn replace_device_tokens(
        &self,
        device_id: DeviceId,
        token: NewRefreshToken,
        revoked_by_ip: Option<&str>,
    ) -> AuthResult<RefreshToken> {
        with_transaction_timeout(async {
            let mut tx = self.pool.begin().await?;

            // Serialises concurrent logins from the same device
            let device = sqlx::query("SELECT id FROM devices WHERE id = $1 FOR UPDATE")
                .bind(device_id)
                .fetch_optional(&mut *tx)
                .await?;
            if device.is_none() {
                return Err(AuthError::DeviceNotFound);
            }

            sqlx::query(
                r#"
                UPDATE refresh_tokens
                SET revoked_at = $2, revoked_by_ip = $3
                WHERE device_id = $1 AND revoked_at IS NULL
                "#,
            )
            .bind(device_id)
            .bind(token.created_at)
            .bind(revoked_by_ip)
            .execute(&mut *tx)
            .await?;

            let row = sqlx::query(
                r#"
                INSERT INTO refresh_tokens (account_id, device_id, token, created_at, expires_at)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id, account_id, device_id, token, created_at, expires_at,
                          revoked_at, revoked_by_ip, replaced_by_token_id
                "#,
            )
            .bind(token.account_id)
            .bind(device_id)
            .bind(&token.token)
            .bind(token.created_at)
            .bind(token.expires_at)
            .fetch_one(&mut *tx)
            .await?;
            let issued = refresh_token_from_row(&row)?;

            tx.commit().await?;
            Ok::<_, AuthError>(issued)
        })
        .await
    }

    async fn find_refresh_token(&self, token: &str) -> AuthResult<Option<RefreshToken>> {
        let row = with_default_timeout(
            sqlx::query(
                r#"
                SELECT id, account_id, device_id, token, created_at, expires_at,
                       revoked_at, revoked_by_ip, replaced_by_token_id
                FROM refresh_tokens
                WHERE token = $1
                "#,
            )
            .bind(token)
            .fetch_optional(&self.pool),
        )
        .await?;

        row.as_ref().map(refresh_token_from_row).transpose()
    }

    async fn latest_active_refresh_token(
        &self,
        account_id: AccountId,
        device_id: Option<DeviceId>,
        now: DateTime<Utc>,
    ) -> AuthResult<Option<RefreshToken>> {
        let row = with_default_timeout(
            sqlx::query(
                r#"
                SELECT id, account_id, device_id, token, created_at, expires_at,
                       revoked_at, revoked_by_ip, replaced_by_token_id
                FROM refresh_tokens
                WHERE account_id = $1
                  AND ($2::BIGINT IS NULL OR device_id = $2)
                  AND revoked_at IS NULL
                  AND expires_at > $3
                ORDER BY created_at DESC, id DESC
                LIMIT 1
                "#,
            )
            .bind(account_id)
            .bind(device_id)
            .bind(now)
            .fetch_optional(&self.pool),
        )
        .await?;

        row.as_ref().map(refresh_token_from_row).transpose()
    }

    async fn rotate_refresh_token(
        &self,
        current_id: RefreshTokenId,
        replacement: NewRefreshToken,
        revoked_by_ip: Option<&str>,
    ) -> AuthResult<Option<RefreshToken>> {
        with_transaction_timeout(async {
            let mut tx = self.pool.begin().await?;
            let now = replacement.created_at;

            // A concurrent rotation holding the row lock makes this wait, then
            // re-check the predicate against the committed revocation.
            let revoked = sqlx::query(
                r#"
                UPDATE refresh_tokens
                SET revoked_at = $2, revoked_by_ip = $3
                WHERE id = $1 AND revoked_at IS NULL AND expires_at > $2
                "#,
            )
            .bind(current_id)
            .bind(now)
            .bind(revoked_by_ip)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if revoked == 0 {
                tx.rollback().await?;
                return Ok(None);
            }

            let row = sqlx::query(
                r#"
                INSERT INTO refresh_tokens (account_id, device_id, token, created_at, expires_at)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id, account_id, device_id, token, created_at, expires_at,
                          revoked_at, revoked_by_ip, replaced_by_token_id
                "#,
            )
            .bind(replacement.account_id)
            .bind(replacement.device_id)
            .bind(&replacement.token)
            .bind(replacement.created_at)
            .bind(replacement.expires_at)
            .fetch_one(&mut *tx)
            .await?;
            let next = refresh_token_from_row(&row)?;

            sqlx::query("UPDATE refresh_tokens SET replaced_by_token_id = $2 WHERE id = $1")
                .bind(current_id)
                .bind(next.id)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok::<_, AuthError>(Some(next))
        })
        .await
    }

    async fn list_refresh_tokens(&self, account_id: AccountId) -> AuthResult<Vec<RefreshToken>> {
        let rows = with_default_timeout(
            sqlx::query(
                r#"
                SELECT id, account_id, device_id, token, created_at, expires_at,
                       revoked_at, revoked_by_ip, replaced_by_token_id
                FROM refresh_tokens
                WHERE account_id = $1
                ORDER BY created_at, id
                "#,
            )
            .bind(account_id)
            .fetch_all(&self.pool),
        )
        .await?;

        rows.iter().map(refresh_token_from_row).collect()
    }
}

#[async_trait]
impl AuthStore for PgAuthRepository {
    async fn health_check(&self) -> AuthResult<()> {
        with_default_timeout(sqlx::query("SELECT 1").execute(&self.pool)).await?;
        Ok(())
    }
}

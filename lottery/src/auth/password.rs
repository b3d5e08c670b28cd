//! Password hashing and credential policy.

use super::errors::{AuthError, AuthResult};
use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

/// One-way hash/verify capability for account passwords
pub trait CredentialHasher: Send + Sync {
    /// Hash a plaintext password for storage
    fn hash(&self, password: &str) -> AuthResult<String>;

    /// Check a plaintext password against a stored hash
    fn verify(&self, password: &str, hash: &str) -> bool;
}

/// Argon2id hasher with a server-side pepper
#[derive(Clone)]
pub struct Argon2Hasher {
    pepper: String,
    params: Params,
}

impl Argon2Hasher {
    /// Create a hasher with the crate's default Argon2id cost
    pub fn new(pepper: String) -> Self {
        Self {
            pepper,
            params: Params::default(),
        }
    }

    /// Create a hasher with explicit cost parameters
    ///
    /// # Errors
    ///
    /// * `AuthError::Configuration` - Parameters rejected by argon2
    pub fn with_cost(pepper: String, m_cost: u32, t_cost: u32, p_cost: u32) -> AuthResult<Self> {
        let params = Params::new(m_cost, t_cost, p_cost, None)
            .map_err(|e| AuthError::Configuration(format!("argon2 params: {e}")))?;
        Ok(Self { pepper, params })
    }

    fn argon2(&self) -> Argon2<'_> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    fn peppered(&self, password: &str) -> String {
        format!("{}{}", password, self.pepper)
    }
}

impl CredentialHasher for Argon2Hasher {
    fn hash(&self, password: &str) -> AuthResult<String> {
        let salt = SaltString::generate(&mut OsRng);

        Ok(self
            .argon2()
            .hash_password(self.peppered(password).as_bytes(), &salt)
            .map_err(|_| AuthError::HashingFailed)?
            .to_string())
    }

    fn verify(&self, password: &str, hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(hash) else {
            return false;
        };

        self.argon2()
            .verify_password(self.peppered(password).as_bytes(), &parsed)
            .is_ok()
    }
}

/// Validate username format
pub fn validate_username(username: &str) -> AuthResult<()> {
    let len = username.len();
    if !(3..=32).contains(&len) {
        return Err(AuthError::InvalidUsername(
            "Username must be 3-32 characters".to_string(),
        ));
    }

    if !username.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.') {
        return Err(AuthError::InvalidUsername(
            "Username can only contain letters, numbers, dots and underscores".to_string(),
        ));
    }

    Ok(())
}

/// Validate password strength
pub fn validate_password(password: &str) -> AuthResult<()> {
    if password.len() < 8 {
        return Err(AuthError::WeakPassword(
            "Password must be at least 8 characters".to_string(),
        ));
    }

    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_uppercase = password.chars().any(|c| c.is_ascii_uppercase());
    let has_lowercase = password.chars().any(|c| c.is_ascii_lowercase());

    if !has_digit || !has_uppercase || !has_lowercase {
        return Err(AuthError::WeakPassword(
            "Password must contain at least one number, one uppercase and one lowercase letter"
                .to_string(),
        ));
    }

    Ok(())
}

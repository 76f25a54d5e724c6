//! One-way hashing and verification of account secrets.
//!
//! The stored hash may be the empty string, which marks an account that has
//! no password. Such an account only accepts the empty secret.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use tracing::{debug, warn};

use crate::shared::AppError;

/// Hashes and verifies plaintext secrets
pub trait CredentialVerifier: Send + Sync {
    /// Salted, deliberately slow one-way transform of `secret`
    fn hash(&self, secret: &str) -> Result<String, AppError>;

    /// Checks `secret` against a hash previously produced by [`CredentialVerifier::hash`]
    fn verify(&self, secret: &str, hashed: &str) -> Result<bool, AppError>;
}

/// Argon2id verifier producing PHC-formatted hashes
#[derive(Clone)]
pub struct Argon2CredentialVerifier {
    argon2: Argon2<'static>,
}

impl Argon2CredentialVerifier {
    /// Uses the crate's default Argon2id parameters
    pub fn new() -> Self {
        Self {
            argon2: Argon2::default(),
        }
    }

    /// Custom memory (KiB) and iteration costs, single lane
    pub fn with_costs(memory_kib: u32, iterations: u32) -> Result<Self, AppError> {
        let params = Params::new(memory_kib, iterations, 1, None)
            .map_err(|e| AppError::Configuration(format!("invalid argon2 params: {e}")))?;
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }
}

impl Default for Argon2CredentialVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialVerifier for Argon2CredentialVerifier {
    fn hash(&self, secret: &str) -> Result<String, AppError> {
        if secret.is_empty() {
            debug!("Empty secret, storing passwordless sentinel");
            return Ok(String::new());
        }

        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(secret.as_bytes(), &salt)
            .map_err(|e| AppError::Internal(format!("argon2 hash: {e}")))?;
        Ok(hash.to_string())
    }

    fn verify(&self, secret: &str, hashed: &str) -> Result<bool, AppError> {
        // Passwordless accounts: empty matches empty, nothing else does
        if hashed.is_empty() {
            return Ok(secret.is_empty());
        }

        let parsed = PasswordHash::new(hashed).map_err(|e| {
            warn!(error = %e, "Stored credential hash is malformed");
            AppError::Internal(format!("bad password hash: {e}"))
        })?;

        Ok(self
            .argon2
            .verify_password(secret.as_bytes(), &parsed)
            .is_ok())
    }
}

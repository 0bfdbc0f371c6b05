//! Password hashing with Argon2

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use std::sync::Arc;

use crate::error::ApiError;

/// PasswordEncoder
///
/// One-way encoding of raw passwords and verification against a stored hash.
/// Swappable so tests can run without paying for Argon2.
pub trait PasswordEncoder: Send + Sync {
    fn encode(&self, raw: &str) -> Result<String, ApiError>;

    /// False for a wrong password and for a hash that cannot be parsed.
    fn matches(&self, raw: &str, encoded: &str) -> bool;
}

pub type PasswordEncoderState = Arc<dyn PasswordEncoder>;

/// Argon2id with the crate's default parameters and a random salt per hash.
#[derive(Clone, Default)]
pub struct Argon2Encoder;

impl PasswordEncoder for Argon2Encoder {
    fn encode(&self, raw: &str) -> Result<String, ApiError> {
        let salt = SaltString::generate(&mut OsRng);

        Argon2::default()
            .hash_password(raw.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| {
                tracing::error!("Password hashing failed: {}", e);
                ApiError::Internal
            })
    }

    fn matches(&self, raw: &str, encoded: &str) -> bool {
        let Ok(parsed_hash) = PasswordHash::new(encoded) else {
            tracing::warn!("Stored password hash is not a valid PHC string");
            return false;
        };

        Argon2::default()
            .verify_password(raw.as_bytes(), &parsed_hash)
            .is_ok()
    }
}

use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher as _, PasswordVerifier};
use rand::Rng;
use thiserror::Error;

use super::error::AuthError;
use crate::MIN_PASSWORD_LENGTH;

/// Reasons a candidate password is refused
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PasswordError {
    #[error("Password must not be empty")]
    Empty,
    #[error("Password must be at least 8 characters long")]
    TooShort,
}

/// Function to validate password strength
pub fn validate_password(password: &str) -> Result<(), PasswordError> {
    if password.is_empty() {
        return Err(PasswordError::Empty);
    }
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(PasswordError::TooShort);
    }
    Ok(())
}

fn salt() -> Result<SaltString, AuthError> {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill(&mut bytes);
    SaltString::encode_b64(&bytes).map_err(|e| AuthError::Hashing(e.to_string()))
}

/// Argon2 hashing with the library's default work factor.
///
/// Both operations run on the blocking pool so a slow hash never stalls the runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct PasswordHasher;

impl PasswordHasher {
    pub fn new() -> Self {
        Self
    }

    /// Hash a plaintext password into a PHC string
    pub async fn hash(&self, plaintext: &str) -> Result<String, AuthError> {
        let plaintext = plaintext.to_owned();
        tokio::task::spawn_blocking(move || {
            let salt = salt()?;
            Argon2::default()
                .hash_password(plaintext.as_bytes(), &salt)
                .map(|h| h.to_string())
                .map_err(|e| AuthError::Hashing(e.to_string()))
        })
        .await
        .map_err(|e| AuthError::Hashing(e.to_string()))?
    }

    /// Check a plaintext against a stored hash; any failure reads as a mismatch
    pub async fn verify(&self, plaintext: &str, hashword: &str) -> bool {
        let plaintext = plaintext.to_owned();
        let hashword = hashword.to_owned();
        tokio::task::spawn_blocking(move || {
            PasswordHash::new(&hashword)
                .map(|hash| {
                    Argon2::default()
                        .verify_password(plaintext.as_bytes(), &hash)
                        .is_ok()
                })
                .unwrap_or(false)
        })
        .await
        .unwrap_or(false)
    }
}

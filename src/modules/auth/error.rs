use log::{error, warn};
use serde::Serialize;
use thiserror::Error;

use super::password::PasswordError;
use crate::modules::utils::logging::format_sensitive;

/// Failures raised by the credential store collaborators
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated on {0}")]
    UniqueViolation(&'static str),
    #[error("store i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("store snapshot is malformed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Every way an authentication operation can fail
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Email already exists")]
    DuplicateCredential,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("User not found")]
    NotFound,
    #[error("Email is already verified")]
    AlreadyVerified,
    #[error("Invalid verification token")]
    InvalidVerificationToken,
    #[error("Verification token has expired")]
    ExpiredVerificationToken,
    #[error("Invalid reset token")]
    InvalidResetToken,
    #[error("Reset token has expired")]
    ExpiredResetToken,
    #[error("Invalid refresh token")]
    InvalidRefreshToken,
    #[error("Email not verified")]
    EmailNotVerified,
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token has expired")]
    ExpiredToken,
    #[error("Missing or malformed authorization header")]
    MissingToken,
    #[error("Invalid email address")]
    InvalidEmail,
    #[error("{0}")]
    WeakPassword(PasswordError),
    #[error("password hashing failed: {0}")]
    Hashing(String),
    #[error("token signing failed: {0}")]
    Signing(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AuthError {
    /// Internal failures whose details must not reach callers
    pub fn is_unexpected(&self) -> bool {
        matches!(self, Self::Hashing(_) | Self::Signing(_) | Self::Store(_))
    }
}

impl From<PasswordError> for AuthError {
    fn from(err: PasswordError) -> Self {
        Self::WeakPassword(err)
    }
}

/// The single signal callers see when an operation is refused
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub message: String,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Unauthorized: {}", self.message)
    }
}

impl std::error::Error for Rejection {}

/// Log an operation failure with its context and collapse it into a [`Rejection`]
pub fn handle_auth_error(context: &str, email: Option<&str>, err: &AuthError) -> Rejection {
    let subject = email.map(format_sensitive);
    if err.is_unexpected() {
        error!("{} error: {} (email={:?})", context, err, subject);
        Rejection {
            message: "Authentication failed".to_string(),
        }
    } else {
        warn!("{} rejected: {} (email={:?})", context, err, subject);
        Rejection {
            message: err.to_string(),
        }
    }
}

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use super::error::AuthError;
use super::store::User;
use super::tokens::expiry_from;
use crate::modules::config::AuthConfig;
use crate::modules::utils::time::Clock;

/// The two independent single-use token slots on a user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationKind {
    EmailVerification,
    PasswordReset,
}

impl VerificationKind {
    fn invalid(self) -> AuthError {
        match self {
            Self::EmailVerification => AuthError::InvalidVerificationToken,
            Self::PasswordReset => AuthError::InvalidResetToken,
        }
    }

    fn expired(self) -> AuthError {
        match self {
            Self::EmailVerification => AuthError::ExpiredVerificationToken,
            Self::PasswordReset => AuthError::ExpiredResetToken,
        }
    }

    fn slot(self, user: &User) -> (Option<&str>, Option<DateTime<Utc>>) {
        match self {
            Self::EmailVerification => (
                user.email_verification_token.as_deref(),
                user.email_verification_token_expires_at,
            ),
            Self::PasswordReset => (
                user.password_reset_token.as_deref(),
                user.password_reset_token_expires_at,
            ),
        }
    }

    fn slot_mut(self, user: &mut User) -> (&mut Option<String>, &mut Option<DateTime<Utc>>) {
        match self {
            Self::EmailVerification => (
                &mut user.email_verification_token,
                &mut user.email_verification_token_expires_at,
            ),
            Self::PasswordReset => (
                &mut user.password_reset_token,
                &mut user.password_reset_token_expires_at,
            ),
        }
    }
}

/// Generate an unguessable 128-bit token
pub fn generate_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Writes single-use, time-bounded tokens onto user records and checks them back
pub struct VerificationTokenIssuer {
    email_verification_ttl: Duration,
    password_reset_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl VerificationTokenIssuer {
    pub fn new(config: &AuthConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            email_verification_ttl: config.email_verification_ttl,
            password_reset_ttl: config.password_reset_ttl,
            clock,
        }
    }

    pub fn ttl(&self, kind: VerificationKind) -> Duration {
        match kind {
            VerificationKind::EmailVerification => self.email_verification_ttl,
            VerificationKind::PasswordReset => self.password_reset_ttl,
        }
    }

    /// Fresh token and absolute expiry, not yet attached to any user
    pub fn mint(&self, kind: VerificationKind) -> Result<(String, DateTime<Utc>), AuthError> {
        let expires_at = expiry_from(self.clock.now(), self.ttl(kind))?;
        Ok((generate_token(), expires_at))
    }

    /// Issue a token of `kind` onto `user`, replacing whatever was there before
    pub fn issue(&self, user: &mut User, kind: VerificationKind) -> Result<String, AuthError> {
        let (token, expires_at) = self.mint(kind)?;
        let (slot, expiry) = kind.slot_mut(user);
        *slot = Some(token.clone());
        *expiry = Some(expires_at);
        Ok(token)
    }

    /// Exact match and strictly before expiry
    pub fn check(&self, user: &User, kind: VerificationKind, token: &str) -> Result<(), AuthError> {
        let (stored, expires_at) = kind.slot(user);
        if stored != Some(token) {
            return Err(kind.invalid());
        }
        match expires_at {
            Some(expires_at) if self.clock.now() < expires_at => Ok(()),
            _ => Err(kind.expired()),
        }
    }

    /// Clear token and expiry so the token cannot be replayed
    pub fn consume(&self, user: &mut User, kind: VerificationKind) {
        let (slot, expiry) = kind.slot_mut(user);
        *slot = None;
        *expiry = None;
    }
}

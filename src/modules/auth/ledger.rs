use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::{AuthError, StoreError};
use super::store::{User, UserId};
use super::tokens::{expiry_from, TokenSigner};
use crate::modules::utils::logging::{log_data_operation, token_fingerprint};
use crate::modules::utils::time::Clock;

/// Persisted refresh token row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshToken {
    pub id: uuid::Uuid,
    pub token: String,
    pub user_id: UserId,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub is_revoked: bool,
}

impl RefreshToken {
    /// Usable iff not revoked and not past its expiry
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked && now <= self.expires_at
    }
}

/// Persistence contract for refresh tokens
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn insert(&self, token: &RefreshToken) -> Result<(), StoreError>;
    /// Exact-match lookup restricted to rows that are not revoked
    async fn find_active(&self, token: &str) -> Result<Option<RefreshToken>, StoreError>;
    /// Atomically flip `is_revoked` to true; returns whether this call did the flip
    async fn revoke_if_active(&self, token: &str) -> Result<bool, StoreError>;
}

/// Sole owner of refresh-token state transitions
pub struct RefreshTokenLedger {
    store: Arc<dyn RefreshTokenStore>,
    signer: Arc<TokenSigner>,
    clock: Arc<dyn Clock>,
}

impl RefreshTokenLedger {
    pub fn new(store: Arc<dyn RefreshTokenStore>, signer: Arc<TokenSigner>, clock: Arc<dyn Clock>) -> Self {
        Self { store, signer, clock }
    }

    /// Mint, persist and return a new refresh token for `user`
    pub async fn create_refresh_token(&self, user: &User) -> Result<RefreshToken, AuthError> {
        let token = self.signer.sign_refresh(user.id)?;
        let now = self.clock.now();
        let row = RefreshToken {
            id: uuid::Uuid::new_v4(),
            token,
            user_id: user.id,
            expires_at: expiry_from(now, self.signer.refresh_ttl())?,
            created_at: now,
            is_revoked: false,
        };

        if let Err(e) = self.store.insert(&row).await {
            log_data_operation("create_refresh_token", &user.email, "refresh_tokens", false, Some(&e.to_string()));
            return Err(e.into());
        }
        log::debug!(
            "refresh token {} issued for user {} (expires {})",
            token_fingerprint(&row.token),
            user.id,
            row.expires_at
        );
        Ok(row)
    }

    /// Look up a presented token; revoked, unknown and lapsed tokens all fail the same way
    pub async fn verify_refresh_token(&self, token: &str) -> Result<RefreshToken, AuthError> {
        let row = self
            .store
            .find_active(token)
            .await?
            .ok_or(AuthError::InvalidRefreshToken)?;

        // Lazy expiry, the row is left untouched
        if !row.is_usable_at(self.clock.now()) {
            log::debug!("refresh token {} presented after expiry", token_fingerprint(token));
            return Err(AuthError::InvalidRefreshToken);
        }
        Ok(row)
    }

    /// Revoke a token; unknown or already revoked tokens are not an error
    pub async fn revoke_refresh_token(&self, token: &str) -> Result<(), AuthError> {
        let revoked = self.store.revoke_if_active(token).await?;
        if !revoked {
            log::debug!("revoke of inactive refresh token {} ignored", token_fingerprint(token));
        }
        Ok(())
    }

    /// Revoke a token as part of rotation; only one caller can ever win for a given token
    pub async fn consume_refresh_token(&self, token: &str) -> Result<(), AuthError> {
        if self.store.revoke_if_active(token).await? {
            Ok(())
        } else {
            log::warn!("refresh token {} was consumed concurrently", token_fingerprint(token));
            Err(AuthError::InvalidRefreshToken)
        }
    }
}

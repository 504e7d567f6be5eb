use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::AuthError;
use super::store::{User, UserId};
use crate::modules::config::{AuthConfig, JwtSettings};
use crate::modules::utils::time::Clock;

/// Payload of a short-lived access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub email: String,
    pub sub: UserId,
    pub iat: i64,
    pub exp: i64,
}

/// Payload of a refresh token; `jti` keeps tokens minted in the same second distinct
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: UserId,
    pub jti: uuid::Uuid,
    pub iat: i64,
    pub exp: i64,
}

trait Expiring {
    fn exp(&self) -> i64;
}

impl Expiring for AccessClaims {
    fn exp(&self) -> i64 {
        self.exp
    }
}

impl Expiring for RefreshClaims {
    fn exp(&self) -> i64 {
        self.exp
    }
}

/// One secret plus the lifetime of tokens signed with it
struct SigningContext {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl SigningContext {
    fn new(settings: &JwtSettings) -> Self {
        Self {
            encoding: EncodingKey::from_secret(settings.secret.as_bytes()),
            decoding: DecodingKey::from_secret(settings.secret.as_bytes()),
            ttl: settings.ttl,
        }
    }
}

/// Issues and checks JWTs for the access and refresh contexts.
///
/// Expiry is judged against the injected [`Clock`] rather than jsonwebtoken's own wall
/// clock, so an expired token and a forged one fail with different errors.
pub struct TokenSigner {
    access: SigningContext,
    refresh: SigningContext,
    clock: Arc<dyn Clock>,
}

impl TokenSigner {
    pub fn new(config: &AuthConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            access: SigningContext::new(&config.access),
            refresh: SigningContext::new(&config.refresh),
            clock,
        }
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh.ttl
    }

    pub fn sign_access(&self, user: &User) -> Result<String, AuthError> {
        let now = self.clock.now();
        let claims = AccessClaims {
            email: user.email.clone(),
            sub: user.id,
            iat: now.timestamp(),
            exp: expiry_from(now, self.access.ttl)?.timestamp(),
        };
        encode(&claims, &self.access)
    }

    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, AuthError> {
        self.decode(token, &self.access)
    }

    pub fn sign_refresh(&self, user_id: UserId) -> Result<String, AuthError> {
        let now = self.clock.now();
        let claims = RefreshClaims {
            sub: user_id,
            jti: uuid::Uuid::new_v4(),
            iat: now.timestamp(),
            exp: expiry_from(now, self.refresh.ttl)?.timestamp(),
        };
        encode(&claims, &self.refresh)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, AuthError> {
        self.decode(token, &self.refresh)
    }

    fn decode<C>(&self, token: &str, context: &SigningContext) -> Result<C, AuthError>
    where
        C: DeserializeOwned + Expiring,
    {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let claims = jsonwebtoken::decode::<C>(token, &context.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|_| AuthError::InvalidToken)?;

        if claims.exp() < self.clock.now().timestamp() {
            return Err(AuthError::ExpiredToken);
        }
        Ok(claims)
    }
}

/// `now + ttl`, or a signing error when the result falls outside the representable range
pub(crate) fn expiry_from(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>, AuthError> {
    now.checked_add_signed(ttl)
        .ok_or_else(|| AuthError::Signing(format!("expiry out of range for ttl {}", ttl)))
}

fn encode<C: Serialize>(claims: &C, context: &SigningContext) -> Result<String, AuthError> {
    jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &context.encoding)
        .map_err(|e| AuthError::Signing(e.to_string()))
}

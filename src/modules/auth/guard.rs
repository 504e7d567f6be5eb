use std::sync::Arc;

use serde::Serialize;

use super::error::AuthError;
use super::service::AuthService;
use super::store::{User, UserId};

const BEARER_PREFIX: &str = "Bearer ";

/// What a route demands of the caller before the handler runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteAccess {
    Public,
    Authenticated,
    VerifiedEmail,
    /// Refresh endpoint: the owner of the presented refresh token must be verified
    RefreshOwnerVerified,
}

/// Credentials a caller presented with one request
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestCredentials<'a> {
    /// Raw `Authorization` header value
    pub authorization: Option<&'a str>,
    pub refresh_token: Option<&'a str>,
}

/// Caller identity established by the guard
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: UserId,
    pub email: String,
    pub is_email_verified: bool,
}

impl From<&User> for Identity {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            email: user.email.clone(),
            is_email_verified: user.is_email_verified,
        }
    }
}

pub struct Guard {
    service: Arc<AuthService>,
}

impl Guard {
    pub fn new(service: Arc<AuthService>) -> Self {
        Self { service }
    }

    /// Check `credentials` against `access`; public routes yield no identity
    pub async fn authorize(
        &self,
        access: RouteAccess,
        credentials: &RequestCredentials<'_>,
    ) -> Result<Option<Identity>, AuthError> {
        match access {
            RouteAccess::Public => Ok(None),
            RouteAccess::Authenticated => self.authenticate(credentials.authorization).await.map(Some),
            RouteAccess::VerifiedEmail => {
                let identity = self.authenticate(credentials.authorization).await?;
                Self::require_verified(&identity)?;
                Ok(Some(identity))
            }
            RouteAccess::RefreshOwnerVerified => {
                let token = credentials.refresh_token.ok_or(AuthError::MissingToken)?;
                self.require_verified_refresh_owner(token).await.map(Some)
            }
        }
    }

    /// Resolve a bearer `Authorization` header to the user it belongs to
    pub async fn authenticate(&self, authorization: Option<&str>) -> Result<Identity, AuthError> {
        let token = authorization
            .and_then(|header| header.strip_prefix(BEARER_PREFIX))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(AuthError::MissingToken)?;

        let (_, user) = self.service.identify(token).await?;
        Ok(Identity::from(&user))
    }

    pub fn require_verified(identity: &Identity) -> Result<(), AuthError> {
        if identity.is_email_verified {
            Ok(())
        } else {
            log::debug!("user {} blocked on verified route", identity.user_id);
            Err(AuthError::EmailNotVerified)
        }
    }

    pub async fn require_verified_refresh_owner(&self, refresh_token: &str) -> Result<Identity, AuthError> {
        let owner = self.service.refresh_token_owner(refresh_token).await?;
        let identity = Identity::from(&owner);
        Self::require_verified(&identity)?;
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::auth::service::testing::{harness, login_request, register_request, Harness};
    use crate::modules::email::EmailType;
    use chrono::Duration;

    const ALICE: &str = "alice@example.com";
    const PASSWORD: &str = "Passw0rd1";

    struct Session {
        access_token: String,
        refresh_token: String,
    }

    async fn signed_in(h: &Harness, verify: bool) -> Session {
        h.service.register(register_request(ALICE, PASSWORD)).await.unwrap();
        if verify {
            let token = h.mailer.last_token(EmailType::Verification, ALICE).unwrap();
            h.service.verify_email(&token).await.unwrap();
        }
        let login = h.service.login(login_request(ALICE, PASSWORD)).await.unwrap();
        Session {
            access_token: login.access_token,
            refresh_token: login.refresh_token,
        }
    }

    fn bearer(token: &str) -> String {
        format!("Bearer {}", token)
    }

    #[tokio::test]
    async fn test_public_route_needs_nothing() {
        let h = harness();
        let guard = Guard::new(h.service.clone());
        let result = guard
            .authorize(RouteAccess::Public, &RequestCredentials::default())
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_authenticated_route() {
        let h = harness();
        let session = signed_in(&h, false).await;
        let guard = Guard::new(h.service.clone());

        let header = bearer(&session.access_token);
        let credentials = RequestCredentials {
            authorization: Some(&header),
            refresh_token: None,
        };
        let identity = guard
            .authorize(RouteAccess::Authenticated, &credentials)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(identity.email, ALICE);
        assert!(!identity.is_email_verified);
    }

    #[tokio::test]
    async fn test_missing_or_malformed_header() {
        let h = harness();
        let session = signed_in(&h, false).await;
        let guard = Guard::new(h.service.clone());

        assert!(matches!(guard.authenticate(None).await, Err(AuthError::MissingToken)));
        assert!(matches!(
            guard.authenticate(Some("Bearer ")).await,
            Err(AuthError::MissingToken)
        ));
        assert!(matches!(
            guard.authenticate(Some(&session.access_token)).await,
            Err(AuthError::MissingToken)
        ));
        assert!(matches!(
            guard.authenticate(Some("Bearer not.a.jwt")).await,
            Err(AuthError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_expired_access_token() {
        let h = harness();
        let session = signed_in(&h, true).await;
        let guard = Guard::new(h.service.clone());

        h.clock.advance(Duration::minutes(31));
        let header = bearer(&session.access_token);
        assert!(matches!(
            guard.authenticate(Some(&header)).await,
            Err(AuthError::ExpiredToken)
        ));
    }

    #[tokio::test]
    async fn test_deleted_user_token_is_invalid() {
        let h = harness();
        let session = signed_in(&h, true).await;
        let guard = Guard::new(h.service.clone());

        let header = bearer(&session.access_token);
        let identity = guard.authenticate(Some(&header)).await.unwrap();
        assert!(h.store.remove_user(identity.user_id).await.unwrap());

        assert!(matches!(
            guard.authenticate(Some(&header)).await,
            Err(AuthError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_verified_route_rejects_unverified_user() {
        let h = harness();
        let session = signed_in(&h, false).await;
        let guard = Guard::new(h.service.clone());

        let header = bearer(&session.access_token);
        let credentials = RequestCredentials {
            authorization: Some(&header),
            refresh_token: None,
        };
        assert!(matches!(
            guard.authorize(RouteAccess::VerifiedEmail, &credentials).await,
            Err(AuthError::EmailNotVerified)
        ));

        let token = h.mailer.last_token(EmailType::Verification, ALICE).unwrap();
        h.service.verify_email(&token).await.unwrap();

        // Same access token now passes: state is read per request
        let identity = guard
            .authorize(RouteAccess::VerifiedEmail, &credentials)
            .await
            .unwrap()
            .unwrap();
        assert!(identity.is_email_verified);
    }

    #[tokio::test]
    async fn test_refresh_route_checks_token_owner() {
        let h = harness();
        let session = signed_in(&h, false).await;
        let guard = Guard::new(h.service.clone());

        let credentials = RequestCredentials {
            authorization: None,
            refresh_token: Some(&session.refresh_token),
        };
        assert!(matches!(
            guard.authorize(RouteAccess::RefreshOwnerVerified, &credentials).await,
            Err(AuthError::EmailNotVerified)
        ));

        let token = h.mailer.last_token(EmailType::Verification, ALICE).unwrap();
        h.service.verify_email(&token).await.unwrap();
        let identity = guard
            .authorize(RouteAccess::RefreshOwnerVerified, &credentials)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(identity.email, ALICE);

        h.service.logout(&session.refresh_token).await.unwrap();
        assert!(matches!(
            guard.authorize(RouteAccess::RefreshOwnerVerified, &credentials).await,
            Err(AuthError::InvalidRefreshToken)
        ));
        assert!(matches!(
            guard
                .authorize(RouteAccess::RefreshOwnerVerified, &RequestCredentials::default())
                .await,
            Err(AuthError::MissingToken)
        ));
    }
}

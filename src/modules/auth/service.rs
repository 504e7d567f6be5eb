//! Orchestration of every credential flow: registration, login, refresh rotation,
//! email verification, password reset/change and logout.
//!
//! Each operation is a strictly ordered sequence of store, hasher, signer and mailer
//! calls. Nothing is wrapped in a transaction; a write that has happened stays
//! happened even if a later step fails.

use std::sync::Arc;

use super::dto::{LoginRequest, LoginResponse, RegisterRequest, RegisterResponse, TokenPair};
use super::error::{AuthError, StoreError};
use super::ledger::{RefreshTokenLedger, RefreshTokenStore};
use super::password::{validate_password, PasswordHasher};
use super::store::{CredentialStore, NewUser, User, UserId, UserProfile};
use super::tokens::{AccessClaims, TokenSigner};
use super::verification::{VerificationKind, VerificationTokenIssuer};
use crate::modules::config::AuthConfig;
use crate::modules::email::EmailSender;
use crate::modules::utils::io::is_valid_email;
use crate::modules::utils::logging::log_auth_event;
use crate::modules::utils::time::Clock;

pub struct AuthService {
    users: Arc<dyn CredentialStore>,
    hasher: PasswordHasher,
    signer: Arc<TokenSigner>,
    ledger: RefreshTokenLedger,
    issuer: VerificationTokenIssuer,
    mailer: Arc<dyn EmailSender>,
}

impl AuthService {
    pub fn new(
        config: &AuthConfig,
        users: Arc<dyn CredentialStore>,
        refresh_tokens: Arc<dyn RefreshTokenStore>,
        mailer: Arc<dyn EmailSender>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let signer = Arc::new(TokenSigner::new(config, clock.clone()));
        Self {
            users,
            hasher: PasswordHasher::new(),
            ledger: RefreshTokenLedger::new(refresh_tokens, signer.clone(), clock.clone()),
            issuer: VerificationTokenIssuer::new(config, clock),
            signer,
            mailer,
        }
    }

    /// Create an unverified account and authenticate it immediately
    pub async fn register(&self, req: RegisterRequest) -> Result<RegisterResponse, AuthError> {
        if !is_valid_email(&req.email) {
            return Err(AuthError::InvalidEmail);
        }
        validate_password(&req.password)?;

        if self.users.find_by_email(&req.email).await?.is_some() {
            log_auth_event("register", &req.email, false, Some("email already registered"));
            return Err(AuthError::DuplicateCredential);
        }

        let password_hash = self.hasher.hash(&req.password).await?;
        let (token, expires_at) = self.issuer.mint(VerificationKind::EmailVerification)?;
        let user = match self
            .users
            .create(NewUser {
                email: req.email,
                name: req.name,
                password_hash,
                email_verification_token: Some(token.clone()),
                email_verification_token_expires_at: Some(expires_at),
            })
            .await
        {
            Ok(user) => user,
            // Lost a race with a concurrent registration of the same email
            Err(StoreError::UniqueViolation(_)) => return Err(AuthError::DuplicateCredential),
            Err(e) => return Err(e.into()),
        };

        // Delivery failure leaves the account in place
        let verification_email_sent = self.mailer.send_verification_email(&user.email, &token).await;
        if !verification_email_sent {
            log::warn!("verification email for new user {} was not delivered", user.id);
        }

        let access_token = self.signer.sign_access(&user)?;
        log_auth_event("register", &user.email, true, None);
        Ok(RegisterResponse {
            user: user.profile(),
            access_token,
            verification_email_sent,
        })
    }

    /// Exchange email and password for an access token and a fresh refresh token
    pub async fn login(&self, req: LoginRequest) -> Result<LoginResponse, AuthError> {
        let user = self.validate_user(&req.email, &req.password).await?;
        let access_token = self.signer.sign_access(&user)?;
        let refresh = self.ledger.create_refresh_token(&user).await?;

        log_auth_event("login", &user.email, true, None);
        Ok(LoginResponse {
            user: user.profile(),
            access_token,
            refresh_token: refresh.token,
        })
    }

    /// Rotate a refresh token: verify, mint access, revoke presented, create new
    pub async fn refresh_token(&self, token: &str) -> Result<TokenPair, AuthError> {
        let presented = self.ledger.verify_refresh_token(token).await?;
        let user = self
            .users
            .find_by_id(presented.user_id)
            .await?
            .ok_or(AuthError::InvalidRefreshToken)?;
        let access_token = self.signer.sign_access(&user)?;

        self.ledger.consume_refresh_token(token).await?;
        let refresh = match self.ledger.create_refresh_token(&user).await {
            Ok(refresh) => refresh,
            Err(e) => {
                // The presented token is already revoked, so this session is gone
                log::error!("refresh rotation for user {} lost the session: {}", user.id, e);
                return Err(e);
            }
        };

        log_auth_event("refresh", &user.email, true, None);
        Ok(TokenPair {
            access_token,
            refresh_token: refresh.token,
        })
    }

    /// Consume an email verification token
    pub async fn verify_email(&self, token: &str) -> Result<UserProfile, AuthError> {
        let mut user = self
            .users
            .find_by_email_verification_token(token)
            .await?
            .ok_or(AuthError::InvalidVerificationToken)?;
        if let Err(e) = self.issuer.check(&user, VerificationKind::EmailVerification, token) {
            log_auth_event("verify_email", &user.email, false, Some(&e.to_string()));
            return Err(e);
        }

        user.is_email_verified = true;
        self.issuer.consume(&mut user, VerificationKind::EmailVerification);
        let user = self.users.save(&user).await?;

        log_auth_event("verify_email", &user.email, true, None);
        Ok(user.profile())
    }

    /// Issue a new verification token (invalidating the old one) and mail it
    pub async fn resend_verification_email(&self, email: &str) -> Result<bool, AuthError> {
        let mut user = self.users.find_by_email(email).await?.ok_or(AuthError::NotFound)?;
        if user.is_email_verified {
            return Err(AuthError::AlreadyVerified);
        }

        let token = self.issuer.issue(&mut user, VerificationKind::EmailVerification)?;
        let user = self.users.save(&user).await?;
        let sent = self.mailer.send_verification_email(&user.email, &token).await;

        log_auth_event("resend_verification", &user.email, sent, None);
        Ok(sent)
    }

    /// Issue a password reset token and mail it
    pub async fn forgot_password(&self, email: &str) -> Result<bool, AuthError> {
        let mut user = self.users.find_by_email(email).await?.ok_or(AuthError::NotFound)?;

        let token = self.issuer.issue(&mut user, VerificationKind::PasswordReset)?;
        let user = self.users.save(&user).await?;
        let sent = self.mailer.send_password_reset_email(&user.email, &token).await;

        log_auth_event("forgot_password", &user.email, sent, None);
        Ok(sent)
    }

    /// Consume a reset token and replace the password
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<(), AuthError> {
        let mut user = self
            .users
            .find_by_password_reset_token(token)
            .await?
            .ok_or(AuthError::InvalidResetToken)?;
        if let Err(e) = self.issuer.check(&user, VerificationKind::PasswordReset, token) {
            log_auth_event("reset_password", &user.email, false, Some(&e.to_string()));
            return Err(e);
        }
        validate_password(new_password)?;

        user.password_hash = self.hasher.hash(new_password).await?;
        self.issuer.consume(&mut user, VerificationKind::PasswordReset);
        self.users.save(&user).await?;

        log_auth_event("reset_password", &user.email, true, None);
        Ok(())
    }

    /// Replace the password of a signed-in user. Refresh tokens already issued stay valid.
    pub async fn change_password(
        &self,
        user_id: UserId,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let mut user = self.users.find_by_id(user_id).await?.ok_or(AuthError::NotFound)?;
        if !self.hasher.verify(current_password, &user.password_hash).await {
            log_auth_event("change_password", &user.email, false, Some("current password mismatch"));
            return Err(AuthError::InvalidCredentials);
        }
        validate_password(new_password)?;

        user.password_hash = self.hasher.hash(new_password).await?;
        self.users.save(&user).await?;

        log_auth_event("change_password", &user.email, true, None);
        Ok(())
    }

    /// Revoke a refresh token; succeeds whether or not the token was live
    pub async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        self.ledger.revoke_refresh_token(refresh_token).await
    }

    /// Resolve a bearer access token to its claims and the user it names
    pub async fn identify(&self, access_token: &str) -> Result<(AccessClaims, User), AuthError> {
        let claims = self.signer.verify_access(access_token)?;
        let user = self
            .users
            .find_by_email(&claims.email)
            .await?
            .ok_or(AuthError::InvalidToken)?;
        Ok((claims, user))
    }

    /// Owner of a live refresh token
    pub async fn refresh_token_owner(&self, token: &str) -> Result<User, AuthError> {
        let row = self.ledger.verify_refresh_token(token).await?;
        self.users
            .find_by_id(row.user_id)
            .await?
            .ok_or(AuthError::InvalidRefreshToken)
    }

    async fn validate_user(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let Some(user) = self.users.find_by_email(email).await? else {
            log_auth_event("login", email, false, Some("unknown email"));
            return Err(AuthError::InvalidCredentials);
        };
        if !self.hasher.verify(password, &user.password_hash).await {
            log_auth_event("login", email, false, Some("wrong password"));
            return Err(AuthError::InvalidCredentials);
        }
        Ok(user)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::modules::auth::store::MemoryStore;
    use crate::modules::config::fixtures::test_config;
    use crate::modules::email::sender::testing::RecordingSender;
    use crate::modules::utils::time::ManualClock;

    pub struct Harness {
        pub service: Arc<AuthService>,
        pub store: Arc<MemoryStore>,
        pub mailer: Arc<RecordingSender>,
        pub clock: Arc<ManualClock>,
    }

    pub fn harness() -> Harness {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let mailer = Arc::new(RecordingSender::default());
        let service = Arc::new(AuthService::new(
            &test_config(),
            store.clone(),
            store.clone(),
            mailer.clone(),
            clock.clone(),
        ));
        Harness {
            service,
            store,
            mailer,
            clock,
        }
    }

    pub fn register_request(email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.to_string(),
            password: password.to_string(),
            name: "Alice".to_string(),
        }
    }

    pub fn login_request(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        }
    }
}

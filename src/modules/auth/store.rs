use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::error::StoreError;
use super::ledger::{RefreshToken, RefreshTokenStore};
use crate::modules::utils::logging::{log_data_operation, token_fingerprint};
use crate::modules::utils::time::Clock;

/// Opaque user identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(uuid::Uuid);

impl UserId {
    /// Fresh time-ordered identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7())
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity record with credential and single-use token fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String, // Stored exactly as registered, lookups are case-sensitive
    pub name: String,
    pub password_hash: String,
    pub is_email_verified: bool,
    pub email_verification_token: Option<String>,
    pub email_verification_token_expires_at: Option<DateTime<Utc>>,
    pub password_reset_token: Option<String>,
    pub password_reset_token_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Projection safe to hand back to callers
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id,
            email: self.email.clone(),
            name: self.name.clone(),
            is_email_verified: self.is_email_verified,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// User without password hash or token material
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub email: String,
    pub name: String,
    pub is_email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Properties for a user about to be created
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub email_verification_token: Option<String>,
    pub email_verification_token_expires_at: Option<DateTime<Utc>>,
}

/// Persistence contract for users
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, StoreError>;
    async fn find_by_email_verification_token(&self, token: &str) -> Result<Option<User>, StoreError>;
    async fn find_by_password_reset_token(&self, token: &str) -> Result<Option<User>, StoreError>;
    /// Insert a new user; a taken email is reported as [`StoreError::UniqueViolation`]
    async fn create(&self, props: NewUser) -> Result<User, StoreError>;
    /// Write back a modified user and return the stored version
    async fn save(&self, user: &User) -> Result<User, StoreError>;
}

#[derive(Default, Serialize, Deserialize)]
struct Snapshot {
    users: Vec<User>,
    refresh_tokens: Vec<RefreshToken>,
}

#[derive(Default, Clone)]
struct State {
    users: HashMap<UserId, User>,
    refresh_tokens: HashMap<String, RefreshToken>,
}

impl State {
    fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            users: snapshot.users.into_iter().map(|u| (u.id, u)).collect(),
            refresh_tokens: snapshot
                .refresh_tokens
                .into_iter()
                .map(|t| (t.token.clone(), t))
                .collect(),
        }
    }

    fn to_snapshot(&self) -> Snapshot {
        let mut users: Vec<User> = self.users.values().cloned().collect();
        users.sort_by_key(|u| u.id);
        let mut refresh_tokens: Vec<RefreshToken> = self.refresh_tokens.values().cloned().collect();
        refresh_tokens.sort_by_key(|t| t.created_at);
        Snapshot { users, refresh_tokens }
    }
}

/// In-process store for users and refresh tokens, optionally mirrored to a JSON file.
///
/// Every mutation is staged on a copy of the state, written to the snapshot (if any)
/// and only then made live, all under the write lock. A failed write leaves both the
/// file and the in-memory state as they were.
pub struct MemoryStore {
    state: RwLock<State>,
    snapshot_path: Option<PathBuf>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Purely in-memory store
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(State::default()),
            snapshot_path: None,
            clock,
        }
    }

    /// Store backed by a JSON file; a missing file starts empty
    pub async fn open(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => State::from_snapshot(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => State::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            state: RwLock::new(state),
            snapshot_path: Some(path),
            clock,
        })
    }

    async fn persist(&self, state: &State) -> Result<(), StoreError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let data = serde_json::to_vec_pretty(&state.to_snapshot())?;

        // Write next to the target and rename so readers never see a partial file
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Persist `next` and only then make it the live state
    async fn commit(&self, live: &mut State, next: State) -> Result<(), StoreError> {
        self.persist(&next).await?;
        *live = next;
        Ok(())
    }

    /// Delete a user together with every refresh token they own
    pub async fn remove_user(&self, id: UserId) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let mut next = state.clone();
        let Some(user) = next.users.remove(&id) else {
            return Ok(false);
        };
        next.refresh_tokens.retain(|_, t| t.user_id != id);
        self.commit(&mut state, next).await?;
        log_data_operation("remove_user", &user.email, "users", true, Some("refresh tokens cascaded"));
        Ok(true)
    }

    /// All refresh tokens (revoked or not) belonging to a user, oldest first
    pub async fn refresh_tokens_for(&self, id: UserId) -> Vec<RefreshToken> {
        let state = self.state.read().await;
        let mut tokens: Vec<RefreshToken> = state
            .refresh_tokens
            .values()
            .filter(|t| t.user_id == id)
            .cloned()
            .collect();
        tokens.sort_by_key(|t| t.created_at);
        tokens
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let state = self.state.read().await;
        Ok(state.users.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let state = self.state.read().await;
        Ok(state.users.get(&id).cloned())
    }

    async fn find_by_email_verification_token(&self, token: &str) -> Result<Option<User>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .users
            .values()
            .find(|u| u.email_verification_token.as_deref() == Some(token))
            .cloned())
    }

    async fn find_by_password_reset_token(&self, token: &str) -> Result<Option<User>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .users
            .values()
            .find(|u| u.password_reset_token.as_deref() == Some(token))
            .cloned())
    }

    async fn create(&self, props: NewUser) -> Result<User, StoreError> {
        let mut state = self.state.write().await;
        if state.users.values().any(|u| u.email == props.email) {
            return Err(StoreError::UniqueViolation("email"));
        }

        let now = self.clock.now();
        let user = User {
            id: UserId::generate(),
            email: props.email,
            name: props.name,
            password_hash: props.password_hash,
            is_email_verified: false,
            email_verification_token: props.email_verification_token,
            email_verification_token_expires_at: props.email_verification_token_expires_at,
            password_reset_token: None,
            password_reset_token_expires_at: None,
            created_at: now,
            updated_at: now,
        };
        let mut next = state.clone();
        next.users.insert(user.id, user.clone());
        self.commit(&mut state, next).await?;
        Ok(user)
    }

    async fn save(&self, user: &User) -> Result<User, StoreError> {
        let mut state = self.state.write().await;
        if state
            .users
            .values()
            .any(|u| u.id != user.id && u.email == user.email)
        {
            return Err(StoreError::UniqueViolation("email"));
        }

        let mut stored = user.clone();
        stored.updated_at = self.clock.now();
        let mut next = state.clone();
        next.users.insert(stored.id, stored.clone());
        self.commit(&mut state, next).await?;
        Ok(stored)
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryStore {
    async fn insert(&self, token: &RefreshToken) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.refresh_tokens.contains_key(&token.token) {
            return Err(StoreError::UniqueViolation("token"));
        }
        let mut next = state.clone();
        next.refresh_tokens.insert(token.token.clone(), token.clone());
        self.commit(&mut state, next).await
    }

    async fn find_active(&self, token: &str) -> Result<Option<RefreshToken>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .refresh_tokens
            .get(token)
            .filter(|t| !t.is_revoked)
            .cloned())
    }

    async fn revoke_if_active(&self, token: &str) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let mut next = state.clone();
        let Some(row) = next.refresh_tokens.get_mut(token).filter(|row| !row.is_revoked) else {
            return Ok(false);
        };
        row.is_revoked = true;
        self.commit(&mut state, next).await?;
        log::debug!("refresh token {} revoked", token_fingerprint(token));
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::utils::time::ManualClock;
    use chrono::Duration;
    use tempfile::TempDir;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            name: "Test User".to_string(),
            password_hash: "$argon2id$stub".to_string(),
            email_verification_token: Some(format!("verify-{}", email)),
            email_verification_token_expires_at: None,
        }
    }

    fn refresh_row(user_id: UserId, token: &str, clock: &ManualClock) -> RefreshToken {
        RefreshToken {
            id: uuid::Uuid::new_v4(),
            token: token.to_string(),
            user_id,
            expires_at: clock.now() + Duration::days(7),
            created_at: clock.now(),
            is_revoked: false,
        }
    }

    #[tokio::test]
    async fn test_user_creation_and_lookups() {
        let store = MemoryStore::new(Arc::new(ManualClock::default()));
        let user = store.create(new_user("alice@example.com")).await.unwrap();

        assert!(!user.is_email_verified);
        assert_eq!(user.created_at, user.updated_at);

        let by_email = store.find_by_email("alice@example.com").await.unwrap().unwrap();
        assert_eq!(by_email.id, user.id);
        assert_eq!(store.find_by_id(user.id).await.unwrap().unwrap(), user);

        let by_token = store
            .find_by_email_verification_token("verify-alice@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_token.id, user.id);
        assert!(store.find_by_password_reset_token("anything").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_email_lookup_is_case_sensitive() {
        let store = MemoryStore::new(Arc::new(ManualClock::default()));
        store.create(new_user("alice@example.com")).await.unwrap();

        assert!(store.find_by_email("Alice@example.com").await.unwrap().is_none());
        // A differently-cased address is a different credential
        assert!(store.create(new_user("Alice@example.com")).await.is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_email_is_unique_violation() {
        let store = MemoryStore::new(Arc::new(ManualClock::default()));
        store.create(new_user("alice@example.com")).await.unwrap();

        let result = store.create(new_user("alice@example.com")).await;
        assert!(matches!(result, Err(StoreError::UniqueViolation("email"))));
    }

    #[tokio::test]
    async fn test_save_bumps_updated_at() {
        let clock = Arc::new(ManualClock::default());
        let store = MemoryStore::new(clock.clone());
        let mut user = store.create(new_user("alice@example.com")).await.unwrap();

        clock.advance(Duration::minutes(5));
        user.is_email_verified = true;
        let saved = store.save(&user).await.unwrap();

        assert!(saved.is_email_verified);
        assert_eq!(saved.updated_at, user.created_at + Duration::minutes(5));
        assert_eq!(store.find_by_id(user.id).await.unwrap().unwrap(), saved);
    }

    #[tokio::test]
    async fn test_revoke_if_active_is_compare_and_swap() {
        let clock = Arc::new(ManualClock::default());
        let store = MemoryStore::new(clock.clone());
        let user = store.create(new_user("alice@example.com")).await.unwrap();
        store.insert(&refresh_row(user.id, "r1", &clock)).await.unwrap();

        assert!(store.find_active("r1").await.unwrap().is_some());
        assert!(store.revoke_if_active("r1").await.unwrap());
        assert!(!store.revoke_if_active("r1").await.unwrap());
        assert!(!store.revoke_if_active("never-issued").await.unwrap());
        assert!(store.find_active("r1").await.unwrap().is_none());

        // Duplicate token strings are refused
        let duplicate = store.insert(&refresh_row(user.id, "r1", &clock)).await;
        assert!(matches!(duplicate, Err(StoreError::UniqueViolation("token"))));
    }

    #[tokio::test]
    async fn test_remove_user_cascades_refresh_tokens() {
        let clock = Arc::new(ManualClock::default());
        let store = MemoryStore::new(clock.clone());
        let alice = store.create(new_user("alice@example.com")).await.unwrap();
        let bob = store.create(new_user("bob@example.com")).await.unwrap();
        store.insert(&refresh_row(alice.id, "a1", &clock)).await.unwrap();
        store.insert(&refresh_row(alice.id, "a2", &clock)).await.unwrap();
        store.insert(&refresh_row(bob.id, "b1", &clock)).await.unwrap();

        assert!(store.remove_user(alice.id).await.unwrap());
        assert!(!store.remove_user(alice.id).await.unwrap());

        assert!(store.refresh_tokens_for(alice.id).await.is_empty());
        assert_eq!(store.refresh_tokens_for(bob.id).await.len(), 1);
        assert!(store.find_active("a1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_snapshot_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());

        let user_id = {
            let store = MemoryStore::open(&path, clock.clone()).await.unwrap();
            let user = store.create(new_user("alice@example.com")).await.unwrap();
            store
                .insert(&RefreshToken {
                    id: uuid::Uuid::new_v4(),
                    token: "persisted".to_string(),
                    user_id: user.id,
                    expires_at: clock.now() + Duration::days(1),
                    created_at: clock.now(),
                    is_revoked: false,
                })
                .await
                .unwrap();
            user.id
        };

        let reopened = MemoryStore::open(&path, clock).await.unwrap();
        let user = reopened.find_by_id(user_id).await.unwrap().unwrap();
        assert_eq!(user.email, "alice@example.com");
        assert!(reopened.find_active("persisted").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_snapshot_write_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let clock = Arc::new(ManualClock::default());
        let store = MemoryStore::open(&path, clock.clone()).await.unwrap();
        let alice = store.create(new_user("alice@example.com")).await.unwrap();
        store.insert(&refresh_row(alice.id, "r1", &clock)).await.unwrap();

        // A directory where the temporary snapshot goes makes every write fail
        std::fs::create_dir(path.with_extension("json.tmp")).unwrap();

        let created = store.create(new_user("bob@example.com")).await;
        assert!(matches!(created, Err(StoreError::Io(_))));
        assert!(store.find_by_email("bob@example.com").await.unwrap().is_none());

        let mut verified = alice.clone();
        verified.is_email_verified = true;
        assert!(store.save(&verified).await.is_err());
        assert_eq!(store.find_by_id(alice.id).await.unwrap().unwrap(), alice);

        assert!(store.revoke_if_active("r1").await.is_err());
        assert!(store.find_active("r1").await.unwrap().is_some());
        assert!(store.insert(&refresh_row(alice.id, "r2", &clock)).await.is_err());
        assert!(store.find_active("r2").await.unwrap().is_none());
        assert!(store.remove_user(alice.id).await.is_err());
        assert!(store.find_by_id(alice.id).await.unwrap().is_some());

        // Once the disk recovers the same registration goes through
        std::fs::remove_dir(path.with_extension("json.tmp")).unwrap();
        assert!(store.create(new_user("bob@example.com")).await.is_ok());
    }

    #[tokio::test]
    async fn test_open_rejects_corrupt_snapshot() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let result = MemoryStore::open(&path, Arc::new(ManualClock::default())).await;
        assert!(matches!(result, Err(StoreError::Serialization(_))));
    }

    #[test]
    fn test_profile_hides_secrets() {
        let now = Utc::now();
        let user = User {
            id: UserId::generate(),
            email: "alice@example.com".to_string(),
            name: "Alice".to_string(),
            password_hash: "$argon2id$secret".to_string(),
            is_email_verified: false,
            email_verification_token: Some("tok".to_string()),
            email_verification_token_expires_at: Some(now),
            password_reset_token: None,
            password_reset_token_expires_at: None,
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_string(&user.profile()).unwrap();
        assert!(!json.contains("argon2"));
        assert!(!json.contains("tok\""));
        assert!(json.contains("isEmailVerified"));
    }
}

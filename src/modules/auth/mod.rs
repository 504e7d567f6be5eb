pub mod dto;
pub mod error;
pub mod guard;
pub mod ledger;
pub mod password;
pub mod service;
pub mod store;
pub mod tokens;
pub mod verification;

// Re-export the main types and functions
pub use dto::{LoginRequest, LoginResponse, MessageResponse, RegisterRequest, RegisterResponse, TokenPair};
pub use error::{handle_auth_error, AuthError, Rejection, StoreError};
pub use guard::{Guard, Identity, RequestCredentials, RouteAccess};
pub use ledger::{RefreshToken, RefreshTokenLedger, RefreshTokenStore};
pub use password::{validate_password, PasswordError, PasswordHasher};
pub use service::AuthService;
pub use store::{CredentialStore, MemoryStore, NewUser, User, UserId, UserProfile};
pub use tokens::{AccessClaims, RefreshClaims, TokenSigner};
pub use verification::{VerificationKind, VerificationTokenIssuer};

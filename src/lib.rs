// First, declare the modules folder itself
mod modules;

// Re-export everything from modules for easier access
pub use modules::{auth, config, email, utils};

// Re-export commonly used types
pub use modules::auth::{AuthError, AuthService, Guard, MemoryStore};
pub use modules::config::AuthConfig;
pub use modules::email::Mailer;

// Constants
pub const DEFAULT_ACCESS_TOKEN_TTL: &str = "30m";
pub const DEFAULT_REFRESH_TOKEN_TTL: &str = "7d";
pub const DEFAULT_EMAIL_VERIFICATION_TTL_HOURS: i64 = 24;
pub const DEFAULT_PASSWORD_RESET_TTL_HOURS: i64 = 1;
pub const DEFAULT_SMTP_PORT: u16 = 587;
pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const MAX_TOKEN_TTL_DAYS: i64 = 3650;

//! Process-wide configuration, read once at startup and passed by reference
//! into every component constructor.

use chrono::{Duration, Utc};
use std::path::PathBuf;
use thiserror::Error;

use crate::{
    DEFAULT_ACCESS_TOKEN_TTL, DEFAULT_EMAIL_VERIFICATION_TTL_HOURS, DEFAULT_PASSWORD_RESET_TTL_HOURS,
    DEFAULT_REFRESH_TOKEN_TTL, DEFAULT_SMTP_PORT, MAX_TOKEN_TTL_DAYS,
};

/// Fatal configuration problems, only ever raised while loading
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("configuration missing: {0}")]
    Missing(String),
    #[error("invalid duration '{0}': expected <integer><unit> with unit one of s, m, h, d")]
    InvalidDuration(String),
    #[error("invalid number for {key}: '{value}'")]
    InvalidNumber { key: String, value: String },
    #[error("unknown email provider '{0}': expected 'smtp' or 'file'")]
    UnknownEmailProvider(String),
}

/// Parse a TTL string such as `7d`, `24h`, `30m` or `60s`
pub fn parse_duration(raw: &str) -> Result<Duration, ConfigError> {
    let raw = raw.trim();
    let invalid = || ConfigError::InvalidDuration(raw.to_string());

    let unit = raw.chars().last().ok_or_else(invalid)?;
    let digits = &raw[..raw.len() - unit.len_utf8()];
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let value: i64 = digits.parse().map_err(|_| invalid())?;
    if value == 0 {
        return Err(invalid());
    }

    let duration = match unit {
        'd' => Duration::try_days(value),
        'h' => Duration::try_hours(value),
        'm' => Duration::try_minutes(value),
        's' => Duration::try_seconds(value),
        _ => None,
    };
    duration.and_then(within_bounds).ok_or_else(invalid)
}

/// Keep a TTL that can be added to the current time without overflowing
fn within_bounds(ttl: Duration) -> Option<Duration> {
    let cap = Duration::try_days(MAX_TOKEN_TTL_DAYS)?;
    if ttl > cap {
        return None;
    }
    Utc::now().checked_add_signed(ttl).map(|_| ttl)
}

/// Which transport carries outgoing mail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailProvider {
    Smtp,
    File,
}

impl std::str::FromStr for EmailProvider {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "smtp" => Ok(Self::Smtp),
            "file" => Ok(Self::File),
            other => Err(ConfigError::UnknownEmailProvider(other.to_string())),
        }
    }
}

/// SMTP relay settings
#[derive(Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything the mailer needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailSettings {
    pub provider: EmailProvider,
    pub from_email: String,
    pub from_name: Option<String>,
    pub app_url: String,
    pub smtp: Option<SmtpSettings>,
    pub outbox_dir: PathBuf,
}

/// Secret and lifetime for one signing context
#[derive(Clone, PartialEq, Eq)]
pub struct JwtSettings {
    pub secret: String,
    pub ttl: Duration,
}

impl std::fmt::Debug for JwtSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtSettings")
            .field("secret", &"<redacted>")
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    pub access: JwtSettings,
    pub refresh: JwtSettings,
    pub email_verification_ttl: Duration,
    pub password_reset_ttl: Duration,
    pub email: EmailSettings,
    pub store_path: PathBuf,
    pub log_file: Option<PathBuf>,
}

impl AuthConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key lookup; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |key: &str| get(key).ok_or_else(|| ConfigError::Missing(key.to_string()));

        let access = JwtSettings {
            secret: require("JWT_SECRET")?,
            ttl: parse_duration(&get("JWT_EXPIRES_IN").unwrap_or_else(|| DEFAULT_ACCESS_TOKEN_TTL.to_string()))?,
        };
        let refresh = JwtSettings {
            secret: require("JWT_REFRESH_SECRET")?,
            ttl: parse_duration(
                &get("JWT_REFRESH_EXPIRES_IN").unwrap_or_else(|| DEFAULT_REFRESH_TOKEN_TTL.to_string()),
            )?,
        };

        let hours = |key: &str, default: i64| -> Result<Duration, ConfigError> {
            match get(key) {
                None => Ok(Duration::hours(default)),
                Some(value) => value
                    .parse::<i64>()
                    .ok()
                    .filter(|h| *h > 0)
                    .and_then(Duration::try_hours)
                    .and_then(within_bounds)
                    .ok_or(ConfigError::InvalidNumber {
                        key: key.to_string(),
                        value,
                    }),
            }
        };
        let email_verification_ttl = hours("EMAIL_VERIFICATION_TTL_HOURS", DEFAULT_EMAIL_VERIFICATION_TTL_HOURS)?;
        let password_reset_ttl = hours("PASSWORD_RESET_TTL_HOURS", DEFAULT_PASSWORD_RESET_TTL_HOURS)?;

        let provider: EmailProvider = get("EMAIL_PROVIDER").as_deref().unwrap_or("smtp").parse()?;
        let smtp = match provider {
            EmailProvider::Smtp => {
                let port = match get("SMTP_PORT") {
                    None => DEFAULT_SMTP_PORT,
                    Some(value) => value.parse().map_err(|_| ConfigError::InvalidNumber {
                        key: "SMTP_PORT".to_string(),
                        value,
                    })?,
                };
                Some(SmtpSettings {
                    host: require("SMTP_HOST")?,
                    port,
                    username: require("SMTP_USERNAME")?,
                    password: require("SMTP_PASSWORD")?,
                })
            }
            EmailProvider::File => None,
        };
        let email = EmailSettings {
            provider,
            from_email: require("EMAIL_FROM")?,
            from_name: get("EMAIL_FROM_NAME"),
            app_url: require("APP_URL")?.trim_end_matches('/').to_string(),
            smtp,
            outbox_dir: PathBuf::from(get("EMAIL_OUTBOX_DIR").unwrap_or_else(|| "outbox".to_string())),
        };

        Ok(Self {
            access,
            refresh,
            email_verification_ttl,
            password_reset_ttl,
            email,
            store_path: PathBuf::from(get("TOKENWARDEN_STORE").unwrap_or_else(|| "tokenwarden.json".to_string())),
            log_file: get("TOKENWARDEN_LOG").map(PathBuf::from),
        })
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use std::collections::HashMap;

    /// Minimal valid configuration using the file mail provider
    pub fn test_config() -> AuthConfig {
        let vars: HashMap<&str, &str> = [
            ("JWT_SECRET", "access-secret-for-tests"),
            ("JWT_REFRESH_SECRET", "refresh-secret-for-tests"),
            ("EMAIL_PROVIDER", "file"),
            ("EMAIL_FROM", "no-reply@example.com"),
            ("EMAIL_FROM_NAME", "Tokenwarden"),
            ("APP_URL", "https://app.example.com/"),
        ]
        .into_iter()
        .collect();
        AuthConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap()
    }
}

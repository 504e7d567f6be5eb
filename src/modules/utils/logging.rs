use chrono::Utc;
use env_logger::{Builder, WriteStyle};
use log::{error, info, warn, LevelFilter};
use sha2::Digest;
use std::fs::OpenOptions;
use std::path::Path;

use super::time::format_timestamp;

/// Initialize the logging system, writing to `log_file` when given and stderr otherwise
pub fn initialize_logging(log_file: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let mut builder = Builder::new();

    // Default level, overridable through RUST_LOG
    builder
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_secs()
        .format_module_path(true)
        .write_style(WriteStyle::Auto);

    if let Some(path) = log_file {
        // Create or append to log file
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.try_init()?;

    info!("Logging system initialized");
    Ok(())
}

/// Helper function to format sensitive data for logging
pub fn format_sensitive(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..2].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{}***{}", head, tail)
}

/// Short, stable identifier for a token so it can be correlated in logs without being leaked
pub fn token_fingerprint(token: &str) -> String {
    let digest = sha2::Sha256::digest(token.as_bytes());
    hex::encode(&digest[..6])
}

/// Structured logging for authentication events
pub fn log_auth_event(event_type: &str, email: &str, success: bool, details: Option<&str>) {
    let timestamp = format_timestamp(Utc::now());
    if success {
        info!(
            "Auth event: type={}, user={}, success=true, timestamp={}, details={:?}",
            event_type,
            format_sensitive(email),
            timestamp,
            details
        );
    } else {
        warn!(
            "Auth event: type={}, user={}, success=false, timestamp={}, details={:?}",
            event_type,
            format_sensitive(email),
            timestamp,
            details
        );
    }
}

/// Structured logging for store and ledger mutations
pub fn log_data_operation(
    operation: &str,
    user: &str,
    resource: &str,
    success: bool,
    details: Option<&str>,
) {
    let timestamp = format_timestamp(Utc::now());
    if success {
        info!(
            "Data operation: op={}, user={}, resource={}, success=true, timestamp={}, details={:?}",
            operation,
            format_sensitive(user),
            resource,
            timestamp,
            details
        );
    } else {
        error!(
            "Data operation: op={}, user={}, resource={}, success=false, timestamp={}, details={:?}",
            operation,
            format_sensitive(user),
            resource,
            timestamp,
            details
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_sensitive_data_formatting() {
        assert_eq!(format_sensitive("password"), "pa***rd");
        assert_eq!(format_sensitive("key"), "***");
        assert_eq!(format_sensitive("alice@example.com"), "al***om");
        assert_eq!(format_sensitive(""), "");
    }

    #[test]
    fn test_token_fingerprint_is_stable_and_short() {
        let first = token_fingerprint("eyJhbGciOiJIUzI1NiJ9.payload.signature");
        let second = token_fingerprint("eyJhbGciOiJIUzI1NiJ9.payload.signature");
        assert_eq!(first, second);
        assert_eq!(first.len(), 12);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(first, token_fingerprint("another-token"));
    }

    #[test]
    fn test_logging_initialization() {
        let log_file = NamedTempFile::new().unwrap();

        // Either we installed the logger or another test already did
        let result = initialize_logging(Some(log_file.path()));
        assert!(result.is_ok() || result.unwrap_err().to_string().contains("logger"));
    }
}

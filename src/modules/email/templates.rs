use chrono::Duration;

use crate::modules::utils::time::format_duration;

/// Rendered message in both plain-text and HTML forms
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailTemplate {
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// Kind of message, used for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailType {
    Verification,
    PasswordReset,
}

impl std::fmt::Display for EmailType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Verification => f.write_str("verification"),
            Self::PasswordReset => f.write_str("password reset"),
        }
    }
}

/// Builds outgoing messages with links back into the application
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    app_url: String,
    email_verification_ttl: Duration,
    password_reset_ttl: Duration,
}

impl TemplateRenderer {
    pub fn new(app_url: &str, email_verification_ttl: Duration, password_reset_ttl: Duration) -> Self {
        Self {
            app_url: app_url.trim_end_matches('/').to_string(),
            email_verification_ttl,
            password_reset_ttl,
        }
    }

    pub fn verification_url(&self, token: &str) -> String {
        format!("{}/api/auth/verify-email?token={}", self.app_url, token)
    }

    pub fn reset_url(&self, token: &str) -> String {
        format!("{}/reset-password?token={}", self.app_url, token)
    }

    /// Message asking a new user to confirm their address
    pub fn verification_email(&self, token: &str) -> EmailTemplate {
        let url = self.verification_url(token);
        let expiry = format_duration(self.email_verification_ttl);
        EmailTemplate {
            subject: "Email Verification".to_string(),
            text: format!(
                "Welcome!\n\
                \n\
                Please verify your email by opening this link:\n\
                \n\
                {}\n\
                \n\
                This link will expire in {}.",
                url, expiry
            ),
            html: format!(
                "<div>\n  <h1>Email Verification</h1>\n  \
                 <p>Please verify your email by clicking the link below:</p>\n  \
                 <a href=\"{}\">Verify Email</a>\n  \
                 <p>This link will expire in {}.</p>\n</div>",
                url, expiry
            ),
        }
    }

    /// Message carrying a password reset link
    pub fn password_reset_email(&self, token: &str) -> EmailTemplate {
        let url = self.reset_url(token);
        let expiry = format_duration(self.password_reset_ttl);
        EmailTemplate {
            subject: "Password Reset Request".to_string(),
            text: format!(
                "You requested to reset your password. Open this link to reset it:\n\
                \n\
                {}\n\
                \n\
                This link will expire in {}.\n\
                \n\
                If you did not request this reset, please ignore this email.",
                url, expiry
            ),
            html: format!(
                "<div>\n  <h1>Password Reset Request</h1>\n  \
                 <p>You requested to reset your password. Click the link below to reset it:</p>\n  \
                 <a href=\"{}\">Reset Password</a>\n  \
                 <p>This link will expire in {}.</p>\n  \
                 <p>If you did not request this reset, please ignore this email.</p>\n</div>",
                url, expiry
            ),
        }
    }
}

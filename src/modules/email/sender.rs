use async_trait::async_trait;
use std::sync::Arc;
use lettre::message::{Mailbox, MultiPart, SinglePart};
use lettre::{Address, FileTransport, Message, SmtpTransport, Transport};
use log::{error, info};
use thiserror::Error;

use super::smtp::build_transport;
use super::templates::{EmailTemplate, EmailType, TemplateRenderer};
use crate::modules::config::{AuthConfig, EmailProvider};
use crate::modules::utils::logging::format_sensitive;

/// Outgoing mail as the auth core sees it; delivery failure is reported, never raised
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_verification_email(&self, email: &str, token: &str) -> bool;
    async fn send_password_reset_email(&self, email: &str, token: &str) -> bool;
}

/// Problems building the mailer at startup
#[derive(Debug, Error)]
pub enum EmailConfigError {
    #[error("Email configuration missing: {0}")]
    Missing(&'static str),
    #[error("Invalid sender address '{0}'")]
    InvalidSender(String),
    #[error("Failed to prepare outbox: {0}")]
    Outbox(#[from] std::io::Error),
    #[error("{0}")]
    Transport(String),
}

enum MailTransport {
    Smtp(SmtpTransport),
    File(FileTransport),
}

impl MailTransport {
    fn send(&self, message: &Message) -> Result<(), String> {
        match self {
            Self::Smtp(transport) => transport.send(message).map(|_| ()).map_err(|e| e.to_string()),
            Self::File(transport) => transport.send(message).map(|_| ()).map_err(|e| e.to_string()),
        }
    }
}

/// lettre-backed sender; the transport is fixed once from configuration
pub struct Mailer {
    transport: Arc<MailTransport>,
    from: Mailbox,
    templates: TemplateRenderer,
}

impl Mailer {
    pub fn from_config(config: &AuthConfig) -> Result<Self, EmailConfigError> {
        let settings = &config.email;
        let address: Address = settings
            .from_email
            .parse()
            .map_err(|_| EmailConfigError::InvalidSender(settings.from_email.clone()))?;
        let from = Mailbox::new(settings.from_name.clone(), address);

        let transport = match settings.provider {
            EmailProvider::Smtp => {
                let smtp = settings
                    .smtp
                    .as_ref()
                    .ok_or(EmailConfigError::Missing("SMTP_HOST"))?;
                MailTransport::Smtp(build_transport(smtp).map_err(EmailConfigError::Transport)?)
            }
            EmailProvider::File => {
                std::fs::create_dir_all(&settings.outbox_dir)?;
                MailTransport::File(FileTransport::new(&settings.outbox_dir))
            }
        };

        info!("Mailer configured with {:?} provider", settings.provider);
        Ok(Self {
            transport: Arc::new(transport),
            from,
            templates: TemplateRenderer::new(
                &settings.app_url,
                config.email_verification_ttl,
                config.password_reset_ttl,
            ),
        })
    }

    fn build_message(&self, to: &str, template: EmailTemplate) -> Result<Message, String> {
        let to: Mailbox = to.parse().map_err(|e| format!("Invalid to address: {}", e))?;
        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(template.subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(SinglePart::plain(template.text))
                    .singlepart(SinglePart::html(template.html)),
            )
            .map_err(|e| format!("Failed to create email: {}", e))
    }

    /// Build and deliver one message, logging the outcome
    async fn deliver(&self, to: &str, kind: EmailType, template: EmailTemplate) -> bool {
        let outcome = match self.build_message(to, template) {
            Ok(message) => {
                let transport = Arc::clone(&self.transport);
                tokio::task::spawn_blocking(move || transport.send(&message))
                    .await
                    .unwrap_or_else(|e| Err(e.to_string()))
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                info!("{} email sent to {}", kind, format_sensitive(to));
                true
            }
            Err(e) => {
                error!("Failed to send {} email to {}: {}", kind, format_sensitive(to), e);
                false
            }
        }
    }
}

#[async_trait]
impl EmailSender for Mailer {
    async fn send_verification_email(&self, email: &str, token: &str) -> bool {
        let template = self.templates.verification_email(token);
        self.deliver(email, EmailType::Verification, template).await
    }

    async fn send_password_reset_email(&self, email: &str, token: &str) -> bool {
        let template = self.templates.password_reset_email(token);
        self.deliver(email, EmailType::PasswordReset, template).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// One captured delivery attempt
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SentEmail {
        pub kind: EmailType,
        pub to: String,
        pub token: String,
    }

    /// Sender that records every attempt and can be told to fail
    #[derive(Default)]
    pub struct RecordingSender {
        sent: Mutex<Vec<SentEmail>>,
        failing: AtomicBool,
    }

    impl RecordingSender {
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        pub fn sent(&self) -> Vec<SentEmail> {
            self.sent.lock().unwrap().clone()
        }

        /// Token carried by the most recent message of `kind` to `to`
        pub fn last_token(&self, kind: EmailType, to: &str) -> Option<String> {
            self.sent()
                .into_iter()
                .rev()
                .find(|m| m.kind == kind && m.to == to)
                .map(|m| m.token)
        }

        fn record(&self, kind: EmailType, to: &str, token: &str) -> bool {
            self.sent.lock().unwrap().push(SentEmail {
                kind,
                to: to.to_string(),
                token: token.to_string(),
            });
            !self.failing.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EmailSender for RecordingSender {
        async fn send_verification_email(&self, email: &str, token: &str) -> bool {
            self.record(EmailType::Verification, email, token)
        }

        async fn send_password_reset_email(&self, email: &str, token: &str) -> bool {
            self.record(EmailType::PasswordReset, email, token)
        }
    }
}

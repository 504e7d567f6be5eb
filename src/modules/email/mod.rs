pub mod sender;
mod smtp;
mod templates;

pub use sender::{EmailConfigError, EmailSender, Mailer};
pub use templates::{EmailTemplate, EmailType, TemplateRenderer};

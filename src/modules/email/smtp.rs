use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::transport::smtp::PoolConfig;
use lettre::SmtpTransport;

use crate::modules::config::SmtpSettings;

/// Build a TLS-required SMTP relay transport from configuration
pub fn build_transport(settings: &SmtpSettings) -> Result<SmtpTransport, String> {
    // Configure TLS parameters
    let tls_parameters = TlsParameters::builder(settings.host.clone())
        .build()
        .map_err(|e| format!("Failed to build TLS parameters: {}", e))?;

    // Set up SMTP transport with explicit TLS configuration
    let mailer = SmtpTransport::relay(&settings.host)
        .map_err(|e| format!("Failed to create SMTP transport: {}", e))?
        .credentials(Credentials::new(
            settings.username.clone(),
            settings.password.clone(),
        ))
        .port(settings.port)
        .tls(Tls::Required(tls_parameters))
        .pool_config(PoolConfig::new().max_size(1))
        .timeout(Some(std::time::Duration::from_secs(10)))
        .build();

    Ok(mailer)
}

//! Mail transport capability. One call is one send attempt.
//!
//! The pipeline depends only on [`MailTransport`]. [`SmtpMailer`] is the
//! production adapter built on lettre's blocking SMTP transport, run on the
//! blocking pool with a bounded per-send timeout.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};

use crate::error::{ConfigError, TransportError};

/// A fully rendered message ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Injected capability that attempts exactly one send.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), TransportError>;
}

/// SMTP settings, built from environment variables.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub timeout: Duration,
}

impl SmtpConfig {
    /// Returns `None` if `SMTP_HOST` is not set (transport disabled).
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let Ok(host) = std::env::var("SMTP_HOST") else {
            return Ok(None);
        };

        let port = match std::env::var("SMTP_PORT") {
            Ok(raw) => raw.parse().map_err(|e| ConfigError::InvalidValue {
                key: "SMTP_PORT".into(),
                message: format!("{e}"),
            })?,
            Err(_) => 587,
        };

        let timeout_secs: u64 = std::env::var("SMTP_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        Ok(Some(Self {
            host,
            port,
            username: std::env::var("SMTP_USERNAME").unwrap_or_default(),
            password: SecretString::from(std::env::var("SMTP_PASSWORD").unwrap_or_default()),
            timeout: Duration::from_secs(timeout_secs),
        }))
    }
}

/// lettre-backed SMTP transport.
pub struct SmtpMailer {
    transport: SmtpTransport,
    timeout: Duration,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, TransportError> {
        let creds = Credentials::new(
            config.username.clone(),
            config.password.expose_secret().to_string(),
        );

        let transport = SmtpTransport::relay(&config.host)
            .map_err(|e| TransportError::Unavailable(format!("SMTP relay error: {e}")))?
            .port(config.port)
            .credentials(creds)
            .timeout(Some(config.timeout))
            .build();

        Ok(Self {
            transport,
            timeout: config.timeout,
        })
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), TransportError> {
        let message = build_message(email)?;
        let transport = self.transport.clone();
        let timeout = self.timeout;

        let result = tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| TransportError::Unavailable(format!("send task failed: {e}")))?;

        match result {
            Ok(_) => {
                tracing::debug!(to = %email.to, "SMTP send accepted");
                Ok(())
            }
            Err(e) if e.is_timeout() => Err(TransportError::Timeout(timeout)),
            Err(e) if e.is_permanent() => Err(TransportError::Rejected(e.to_string())),
            Err(e) => Err(TransportError::Unavailable(e.to_string())),
        }
    }
}

/// Build a lettre HTML message, mapping address errors per field.
fn build_message(email: &OutgoingEmail) -> Result<Message, TransportError> {
    let from = email
        .from
        .parse()
        .map_err(|e| TransportError::InvalidAddress {
            address: email.from.clone(),
            reason: format!("{e}"),
        })?;
    let to = email.to.parse().map_err(|e| TransportError::InvalidAddress {
        address: email.to.clone(),
        reason: format!("{e}"),
    })?;

    Message::builder()
        .from(from)
        .to(to)
        .subject(email.subject.as_str())
        .header(ContentType::TEXT_HTML)
        .body(email.html.clone())
        .map_err(|e| TransportError::Rejected(format!("Failed to build email: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email(to: &str) -> OutgoingEmail {
        OutgoingEmail {
            from: "sender@example.com".into(),
            to: to.into(),
            subject: "Hello".into(),
            html: "<p>hi</p>".into(),
        }
    }

    #[test]
    fn build_message_accepts_valid_addresses() {
        assert!(build_message(&email("someone@example.org")).is_ok());
    }

    #[test]
    fn build_message_rejects_invalid_recipient() {
        match build_message(&email("not-an-address")) {
            Err(TransportError::InvalidAddress { address, .. }) => {
                assert_eq!(address, "not-an-address")
            }
            other => panic!("expected InvalidAddress, got {other:?}"),
        }
    }
}

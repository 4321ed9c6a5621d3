//! Outbound email delivery.
//!
//! The scheduler only sees the [`Notifier`] trait. [`EmailNotifier`] talks to
//! an SMTP relay through `lettre`; [`LogNotifier`] records what would have
//! been sent without contacting anyone.

use std::time::Duration;

use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::config::SmtpConfig;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("SMTP delivery failed: {0}")]
    Smtp(String),

    #[error("template rendering failed: {0}")]
    Template(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),
}

/// A rendered email addressed to one learner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> Result<(), NotifyError>;

    fn channel_name(&self) -> &str;
}

pub struct EmailNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailNotifier {
    /// Builds the SMTP transport. Port 465 uses implicit TLS, `tls = true`
    /// uses STARTTLS, anything else is plaintext. Credentials are attached
    /// only when both a username and a password are configured.
    pub fn from_config(config: &SmtpConfig) -> Result<Self, NotifyError> {
        let from: Mailbox = config
            .from
            .parse()
            .map_err(|e: lettre::address::AddressError| NotifyError::Config(e.to_string()))?;

        let mut builder = if config.port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| NotifyError::Config(e.to_string()))?
                .port(config.port)
        } else if config.tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| NotifyError::Config(e.to_string()))?
                .port(config.port)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host).port(config.port)
        };

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait::async_trait]
impl Notifier for EmailNotifier {
    async fn send(&self, email: &OutboundEmail) -> Result<(), NotifyError> {
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e: lettre::address::AddressError| NotifyError::Smtp(e.to_string()))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(&email.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(email.body.clone())
            .map_err(|e| NotifyError::Smtp(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| NotifyError::Smtp(e.to_string()))?;

        Ok(())
    }

    fn channel_name(&self) -> &str {
        "email"
    }
}

/// Logs each email instead of delivering it.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, email: &OutboundEmail) -> Result<(), NotifyError> {
        tracing::info!(
            to = %email.to,
            subject = %email.subject,
            body_len = email.body.len(),
            "email not sent (log-only mode)"
        );
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "log"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smtp(host: &str, port: u16, tls: bool, from: &str) -> SmtpConfig {
        SmtpConfig {
            host: host.to_string(),
            port,
            tls,
            from: from.to_string(),
            username: None,
            password: None,
        }
    }

    #[test]
    fn builds_tls_transport() {
        let notifier =
            EmailNotifier::from_config(&smtp("smtp.example.com", 587, true, "courses@example.com"));
        assert!(notifier.is_ok());
    }

    #[test]
    fn builds_plaintext_transport() {
        let notifier =
            EmailNotifier::from_config(&smtp("localhost", 1025, false, "Courses <courses@example.com>"));
        assert_eq!(notifier.unwrap().channel_name(), "email");
    }

    #[test]
    fn builds_authenticated_transport() {
        let config = SmtpConfig {
            username: Some("courses".to_string()),
            password: Some("hunter2".to_string()),
            ..smtp("smtp.example.com", 465, true, "courses@example.com")
        };
        assert!(EmailNotifier::from_config(&config).is_ok());
    }

    #[test]
    fn rejects_invalid_sender() {
        let result = EmailNotifier::from_config(&smtp("smtp.example.com", 587, true, "courses"));
        let err = result.err().unwrap().to_string();
        assert!(err.contains("configuration error"), "got: {err}");
    }

    #[tokio::test]
    async fn log_notifier_always_succeeds() {
        let email = OutboundEmail {
            to: "avery@example.com".to_string(),
            subject: "Reminder".to_string(),
            body: "Finish your course".to_string(),
        };
        assert!(LogNotifier.send(&email).await.is_ok());
        assert_eq!(LogNotifier.channel_name(), "log");
    }
}

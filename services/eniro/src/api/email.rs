//! Email delivery abstraction.
//!
//! Handlers enqueue a rendered message through [`EmailSender`] and do not
//! care how it leaves the building. [`SmtpSender`] delivers over SMTP;
//! [`LogEmailSender`] is the local-dev sink that logs instead of sending,
//! and doubles as the place the test-address OTP ends up.

use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::{Mailbox, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Email delivery seam used by the login flow.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error to fail the request.
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Local dev sender that logs the payload instead of sending real email.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to = %message.to,
            subject = %message.subject,
            body = %message.html,
            "email send stub"
        );
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

/// SMTP-backed sender.
pub struct SmtpSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpSender {
    /// # Errors
    ///
    /// Returns an error when the `from` address is invalid.
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
                .port(config.port);
        if !config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ));
        }

        let from = config
            .from
            .parse()
            .with_context(|| format!("invalid sender address: {}", config.from))?;

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl EmailSender for SmtpSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let to: Mailbox = message
            .to
            .parse()
            .with_context(|| format!("invalid recipient address: {}", message.to))?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(&message.subject)
            .singlepart(SinglePart::html(message.html.clone()))
            .context("failed to compose email")?;

        self.transport
            .send(email)
            .await
            .context("failed to send email")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_sender_always_succeeds() -> Result<()> {
        let sender = LogEmailSender;
        sender
            .send(&EmailMessage {
                to: "alice@example.com".to_string(),
                subject: "Access code".to_string(),
                html: "<p>hello</p>".to_string(),
            })
            .await
    }

    #[test]
    fn smtp_sender_rejects_invalid_from() {
        let result = SmtpSender::new(&SmtpConfig {
            host: "localhost".to_string(),
            port: 25,
            username: String::new(),
            password: String::new(),
            from: "not an address".to_string(),
        });
        assert!(result.is_err());
    }
}

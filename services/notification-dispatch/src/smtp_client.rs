//! SMTP transport
//!
//! Email delivery via lettre. The transport is built once at startup and
//! reused across dispatch cycles.

use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use procura_models::{NotificationChannel, NotificationQueueEntry};
use procura_utils::config::SmtpConfig;

/// One delivery channel implementation. `deliver` returns the provider
/// response for the compliance log.
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    fn channel(&self) -> NotificationChannel;
    async fn deliver(&self, entry: &NotificationQueueEntry) -> Result<String>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let from: Mailbox = format!("{} <{}>", config.from_name, config.from_address)
            .parse()
            .context("Invalid from address")?;

        let credentials = Credentials::new(config.username.clone(), config.password.clone());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .context("Failed to create SMTP transport")?
            .port(config.port)
            .credentials(credentials)
            .build();

        Ok(Self { transport, from })
    }
}

#[async_trait]
impl NotificationTransport for SmtpMailer {
    fn channel(&self) -> NotificationChannel {
        NotificationChannel::Email
    }

    async fn deliver(&self, entry: &NotificationQueueEntry) -> Result<String> {
        let to: Mailbox = entry
            .recipient_email
            .parse()
            .context("Invalid recipient address")?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(&entry.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(entry.body.clone())
            .context("Failed to build email")?;

        let response = self
            .transport
            .send(message)
            .await
            .context("Failed to send email")?;

        Ok(response.message().collect::<Vec<_>>().join("\n"))
    }
}

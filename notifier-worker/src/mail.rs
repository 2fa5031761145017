use std::time::Duration;

use async_trait::async_trait;
use lettre::address::AddressError;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum MailError {
    #[error("invalid address: {0}")]
    Address(#[from] AddressError),
    #[error("failed to build message: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("smtp error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Sends one plain-text message. Failures are returned as is, never retried.
    async fn send(&self, recipient: &Mailbox, subject: &str, body: &str)
        -> Result<(), MailError>;
}

#[derive(Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
}

/// Opens a fresh implicit-TLS session for every message, and closes it once
/// the message went through or failed.
pub struct SmtpMailer {
    settings: SmtpSettings,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(settings: SmtpSettings, from: &str) -> Result<Self, MailError> {
        Ok(Self {
            settings,
            from: from.parse()?,
        })
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, MailError> {
        let credentials = Credentials::new(
            self.settings.username.clone(),
            self.settings.password.clone(),
        );
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&self.settings.host)?
            .port(self.settings.port)
            .credentials(credentials)
            .timeout(Some(self.settings.timeout))
            .build();
        Ok(transport)
    }
}

pub fn build_message(
    from: Mailbox,
    recipient: Mailbox,
    subject: &str,
    body: &str,
) -> Result<Message, MailError> {
    let message = Message::builder()
        .from(from)
        .to(recipient)
        .subject(subject)
        .header(ContentType::TEXT_PLAIN)
        .body(body.to_owned())?;
    Ok(message)
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(
        &self,
        recipient: &Mailbox,
        subject: &str,
        body: &str,
    ) -> Result<(), MailError> {
        let message = build_message(self.from.clone(), recipient.clone(), subject, body)?;
        debug!(
            "sending mail to {} from {} through {}:{}",
            recipient, self.from, self.settings.host, self.settings.port
        );

        let response = self.transport()?.send(message).await?;
        info!(
            "mail to {} accepted with code {}",
            recipient,
            response.code()
        );
        Ok(())
    }
}

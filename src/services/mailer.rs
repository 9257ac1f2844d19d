// src/services/mailer.rs

//! Notification delivery.
//!
//! Reports are sent by e-mail over SMTP with STARTTLS. Connection settings come
//! from the environment (a `.env` file is honoured by the binary):
//! `SMTP_SERVER`, `SMTP_PORT`, `SMTP_USER`, `SMTP_PASSWORD`, `EMAIL_FROM` and
//! a comma-separated `EMAIL_TO`.

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message as MailMessage, Tokio1Executor};

use crate::error::{AppError, Result};

/// A rendered notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub subject: String,
    /// Plain-text body
    pub text: String,
    /// HTML alternative of the body
    pub html: String,
}

impl Message {
    pub fn new(subject: impl Into<String>, text: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            text: text.into(),
            html: html.into(),
        }
    }
}

/// Delivers rendered notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &Message) -> Result<()>;
}

/// SMTP connection settings.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub server: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from: String,
    pub to: Vec<String>,
}

impl SmtpConfig {
    /// Read settings from the environment.
    ///
    /// Returns `Ok(None)` when `SMTP_SERVER` is not set at all.
    pub fn from_env() -> Result<Option<Self>> {
        let Ok(server) = env::var("SMTP_SERVER") else {
            return Ok(None);
        };

        let port = match env::var("SMTP_PORT") {
            Ok(p) => p
                .trim()
                .parse()
                .map_err(|e| AppError::config(format!("SMTP_PORT '{p}' is invalid: {e}")))?,
            Err(_) => 587,
        };

        let to: Vec<String> = required("EMAIL_TO")?
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        if to.is_empty() {
            return Err(AppError::config("EMAIL_TO lists no recipients"));
        }

        Ok(Some(Self {
            server,
            port,
            user: required("SMTP_USER")?,
            password: required("SMTP_PASSWORD")?,
            from: required("EMAIL_FROM")?,
            to,
        }))
    }
}

fn required(name: &str) -> Result<String> {
    env::var(name).map_err(|_| AppError::config(format!("{name} is not set")))
}

/// Sends notifications as multipart (text + HTML) e-mails.
pub struct SmtpNotifier {
    from: Mailbox,
    to: Vec<Mailbox>,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpNotifier {
    pub fn new(config: &SmtpConfig, timeout: Duration) -> Result<Self> {
        let from: Mailbox = config
            .from
            .parse()
            .map_err(|e| AppError::config(format!("Invalid EMAIL_FROM: {e}")))?;
        let to = config
            .to
            .iter()
            .map(|addr| {
                addr.parse::<Mailbox>()
                    .map_err(|e| AppError::config(format!("Invalid recipient '{addr}': {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        let creds = Credentials::new(config.user.clone(), config.password.clone());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.server)
            .map_err(|e| AppError::config(format!("SMTP relay {}: {e}", config.server)))?
            .port(config.port)
            .credentials(creds)
            .timeout(Some(timeout))
            .build();

        Ok(Self { from, to, transport })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, message: &Message) -> Result<()> {
        let mut builder = MailMessage::builder()
            .from(self.from.clone())
            .subject(message.subject.as_str());
        for to in &self.to {
            builder = builder.to(to.clone());
        }

        let email = builder
            .multipart(MultiPart::alternative_plain_html(
                message.text.clone(),
                message.html.clone(),
            ))
            .map_err(|e| AppError::notify(format!("Build email: {e}")))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| AppError::notify(format!("SMTP send: {e}")))?;

        log::info!(
            "E-mail sent to {} recipient(s): {}",
            self.to.len(),
            message.subject
        );
        Ok(())
    }
}

/// Writes notifications to the log instead of sending them.
///
/// Used when no SMTP settings are configured.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: &Message) -> Result<()> {
        log::info!("Notification: {}\n{}", message.subject, message.text);
        Ok(())
    }
}

//! Email
//!
//! SMTP delivery for password reset messages.

use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::Config;

/// Outgoing password reset message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordResetEmail {
    pub to: String,
    pub username: String,
    /// Raw token; only its hash is stored.
    pub token: String,
    pub expires_in_minutes: i64,
}

impl PasswordResetEmail {
    /// Plain-text body. Includes a link when the public URL is known.
    pub fn body(&self, public_url: Option<&str>) -> String {
        let action = public_url.map_or_else(
            || format!("Your reset code: {}", self.token),
            |base| format!("Reset your password: {base}/reset-password?token={}", self.token),
        );
        format!(
            "Hello {},\n\
             \n\
             A password reset was requested for your account.\n\
             \n\
             {action}\n\
             \n\
             This link expires in {} minutes.\n\
             \n\
             If you did not request this, you can safely ignore this email.\n",
            self.username, self.expires_in_minutes
        )
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_password_reset(&self, email: &PasswordResetEmail) -> Result<()>;
}

/// SMTP mailer built from server configuration.
#[derive(Clone)]
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from_address: Mailbox,
    public_url: Option<String>,
}

impl SmtpMailer {
    /// Requires `config.has_smtp()`.
    pub fn new(config: &Config) -> Result<Self> {
        let host = config.smtp_host.as_ref().context("SMTP_HOST is required")?;
        let username = config
            .smtp_username
            .as_ref()
            .context("SMTP_USERNAME is required")?;
        let password = config
            .smtp_password
            .as_ref()
            .context("SMTP_PASSWORD is required")?;
        let from = config.smtp_from.as_ref().context("SMTP_FROM is required")?;

        let from_address: Mailbox = from
            .parse()
            .context("SMTP_FROM is not a valid email address")?;
        let creds = Credentials::new(username.clone(), password.clone());

        let transport = match config.smtp_tls.as_str() {
            "tls" => AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                .context("Failed to create SMTP TLS transport")?
                .port(config.smtp_port)
                .credentials(creds)
                .build(),
            "none" => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
                .port(config.smtp_port)
                .credentials(creds)
                .build(),
            _ => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .context("Failed to create SMTP STARTTLS transport")?
                .port(config.smtp_port)
                .credentials(creds)
                .build(),
        };

        Ok(Self {
            transport,
            from_address,
            public_url: config.public_url.clone(),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_password_reset(&self, email: &PasswordResetEmail) -> Result<()> {
        let to: Mailbox = email
            .to
            .parse()
            .context("Invalid recipient email address")?;

        let message = Message::builder()
            .from(self.from_address.clone())
            .to(to)
            .subject("Reset your password")
            .body(email.body(self.public_url.as_deref()))
            .context("Failed to build email message")?;

        self.transport
            .send(message)
            .await
            .context("Failed to send email via SMTP")?;
        Ok(())
    }
}

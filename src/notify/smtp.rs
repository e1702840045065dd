// src/notify/smtp.rs
// Raw-protocol fallback: SMTP submission over STARTTLS via lettre.

use anyhow::{Context, Result};
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};

use super::{Digest, DigestTransport};

pub struct SmtpSender {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpSender {
    pub fn new(host: &str, port: u16, user: &str, pass: &str) -> Result<Self> {
        let creds = Credentials::new(user.to_string(), pass.to_string());
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .with_context(|| format!("invalid smtp host '{host}'"))?
            .port(port)
            .credentials(creds)
            .build();
        Ok(Self { mailer })
    }
}

#[async_trait::async_trait]
impl DigestTransport for SmtpSender {
    async fn send(&self, digest: &Digest) -> Result<()> {
        let from: Mailbox = digest
            .sender
            .parse()
            .with_context(|| format!("invalid sender '{}'", digest.sender))?;

        let mut builder = Message::builder()
            .from(from)
            .subject(&digest.subject)
            .header(header::ContentType::TEXT_PLAIN);
        for recipient in &digest.recipients {
            let to: Mailbox = recipient
                .parse()
                .with_context(|| format!("invalid recipient '{recipient}'"))?;
            builder = builder.to(to);
        }
        for addr in &digest.reply_to {
            let reply_to: Mailbox = addr
                .parse()
                .with_context(|| format!("invalid reply-to '{addr}'"))?;
            builder = builder.reply_to(reply_to);
        }

        let message = builder.body(digest.body.clone()).context("build email")?;
        self.mailer.send(message).await.context("smtp send")?;

        tracing::info!(
            transport = self.name(),
            recipients = digest.recipients.len(),
            "digest dispatched"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "smtp"
    }
}

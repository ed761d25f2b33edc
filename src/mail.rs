use anyhow::Context;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::debug;

use crate::config::MailConfig;

const SMTPS_PORT: u16 = 465;

/// Outbound notification channel. One attempt per call, no retry.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
}

impl SmtpMailer {
    pub fn new(cfg: &MailConfig) -> anyhow::Result<Self> {
        // 465 is implicit TLS; any other secure port upgrades with STARTTLS
        let builder = if cfg.use_secure_transport && cfg.port == SMTPS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.server)
                .with_context(|| format!("smtp relay {}", cfg.server))?
        } else if cfg.use_secure_transport {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.server)
                .with_context(|| format!("smtp starttls relay {}", cfg.server))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&cfg.server)
        };
        let mut builder = builder.port(cfg.port);
        if let (Some(user), Some(pass)) = (&cfg.username, &cfg.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        let sender: Mailbox = cfg
            .default_sender
            .parse()
            .with_context(|| format!("invalid MAIL_DEFAULT_SENDER {:?}", cfg.default_sender))?;

        Ok(Self {
            transport: builder.build(),
            sender,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        let to: Mailbox = recipient
            .parse()
            .with_context(|| format!("invalid recipient {recipient:?}"))?;
        let message = Message::builder()
            .from(self.sender.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .context("build message")?;

        self.transport.send(message).await.context("smtp send")?;
        debug!(%recipient, %subject, "mail sent");
        Ok(())
    }
}

#[cfg(test)]
pub use fake::RecordingMailer;

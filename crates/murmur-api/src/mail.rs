use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Attachment, Mailbox, MultiPart, SinglePart, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use tracing::{info, warn};

use murmur_db::models::UserRow;

use crate::state::Settings;

#[derive(Debug, Clone)]
pub struct EmailAttachment {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<EmailAttachment>,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> anyhow::Result<()>;
}

/// Writes emails to the log instead of delivering them.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: OutgoingEmail) -> anyhow::Result<()> {
        info!(
            "Email to {:?}: {} ({} attachment(s))\n{}",
            email.to,
            email.subject,
            email.attachments.len(),
            email.body
        );
        Ok(())
    }
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(host: &str, port: u16, credentials: Option<(String, String)>) -> Self {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host).port(port);
        if let Some((username, password)) = credentials {
            builder = builder.credentials(Credentials::new(username, password));
        }
        Self {
            transport: builder.build(),
        }
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: OutgoingEmail) -> anyhow::Result<()> {
        let message = build_message(email)?;
        self.transport.send(message).await?;
        Ok(())
    }
}

fn build_message(email: OutgoingEmail) -> anyhow::Result<Message> {
    let mut builder = Message::builder()
        .from(email.from.parse::<Mailbox>()?)
        .subject(email.subject);
    for to in &email.to {
        builder = builder.to(to.parse::<Mailbox>()?);
    }

    if email.attachments.is_empty() {
        return Ok(builder.header(ContentType::TEXT_PLAIN).body(email.body)?);
    }

    let mut parts = MultiPart::mixed().singlepart(SinglePart::plain(email.body));
    for attachment in email.attachments {
        let content_type = ContentType::parse(&attachment.content_type)?;
        parts = parts.singlepart(Attachment::new(attachment.filename).body(attachment.data, content_type));
    }
    Ok(builder.multipart(parts)?)
}

pub fn password_reset_email(settings: &Settings, user: &UserRow, token: &str) -> OutgoingEmail {
    let link = format!(
        "{}/reset_password/{}",
        settings.base_url.trim_end_matches('/'),
        token
    );
    OutgoingEmail {
        from: settings.mail_sender.clone(),
        to: vec![user.email.clone()],
        subject: "[Murmur] Reset Your Password".into(),
        body: format!(
            "Dear {},\n\nTo reset your password click on the following link:\n\n{}\n\n\
             If you have not requested a password reset simply ignore this message.\n\n\
             Sincerely,\n\nThe Murmur Team\n",
            user.username, link
        ),
        attachments: vec![],
    }
}

/// Deliver an email, logging instead of failing.
pub async fn send_logged(mailer: &dyn Mailer, email: OutgoingEmail) {
    let subject = email.subject.clone();
    if let Err(e) = mailer.send(email).await {
        warn!("Failed to send email '{}': {:#}", subject, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> UserRow {
        UserRow {
            id: "u1".into(),
            username: "susan".into(),
            email: "susan@example.com".into(),
            password_hash: String::new(),
            about_me: None,
            last_seen: None,
            last_message_read_time: None,
            created_at: "2024-01-01T00:00:00.000000Z".into(),
        }
    }

    #[test]
    fn reset_email_links_to_token() {
        let settings = Settings {
            base_url: "https://murmur.example/".into(),
            ..Settings::default()
        };
        let email = password_reset_email(&settings, &user(), "tok");
        assert_eq!(email.to, ["susan@example.com"]);
        assert_eq!(email.subject, "[Murmur] Reset Your Password");
        assert!(email.body.contains("https://murmur.example/reset_password/tok"));
    }

    #[test]
    fn attachments_make_multipart_message() {
        let email = OutgoingEmail {
            from: "no-reply@murmur.local".into(),
            to: vec!["susan@example.com".into()],
            subject: "posts".into(),
            body: "attached".into(),
            attachments: vec![EmailAttachment {
                filename: "posts.json".into(),
                content_type: "application/json".into(),
                data: b"{}".to_vec(),
            }],
        };
        let raw = String::from_utf8(build_message(email).unwrap().formatted()).unwrap();
        assert!(raw.contains("multipart/mixed"));
        assert!(raw.contains("posts.json"));
    }

    #[test]
    fn bad_address_is_an_error() {
        let email = OutgoingEmail {
            from: "no-reply@murmur.local".into(),
            to: vec!["not an address".into()],
            subject: "x".into(),
            body: "x".into(),
            attachments: vec![],
        };
        assert!(build_message(email).is_err());
    }
}

//! SMTP delivery through `lettre`.

use super::{MailError, MailTransport, OutgoingEmail};
use lettre::message::{header, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Sender address, optionally with a display name.
    pub from: String,
    /// STARTTLS when true, plain SMTP otherwise.
    pub use_tls: bool,
}

impl Default for SmtpSettings {
    fn default() -> Self {
        Self {
            host: "smtp.gmail.com".to_string(),
            port: 587,
            username: String::new(),
            password: String::new(),
            from: String::new(),
            use_tls: true,
        }
    }
}

pub struct SmtpMailTransport {
    from: Mailbox,
    transport: SmtpTransport,
}

impl SmtpMailTransport {
    pub fn new(settings: &SmtpSettings) -> Result<Self, MailError> {
        let from: Mailbox = settings
            .from
            .parse()
            .map_err(|_| MailError::InvalidAddress(settings.from.clone()))?;
        let credentials = Credentials::new(settings.username.clone(), settings.password.clone());

        let builder = if settings.use_tls {
            SmtpTransport::starttls_relay(&settings.host)
                .map_err(|e| MailError::Transport(e.to_string()))?
        } else {
            SmtpTransport::builder_dangerous(&settings.host)
        };
        let transport = builder
            .port(settings.port)
            .credentials(credentials)
            .build();

        Ok(Self { from, transport })
    }

    fn build_message(&self, email: &OutgoingEmail) -> Result<Message, MailError> {
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|_| MailError::InvalidAddress(email.to.clone()))?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject.clone())
            .header(header::ContentType::TEXT_HTML)
            .body(email.html_body.clone())
            .map_err(|e| MailError::Build(e.to_string()))
    }
}

impl MailTransport for SmtpMailTransport {
    fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        let message = self.build_message(email)?;
        let response = self
            .transport
            .send(&message)
            .map_err(|e| MailError::Transport(e.to_string()))?;
        debug!("SMTP relay accepted mail to {}: {:?}", email.to, response.code());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SmtpSettings {
        SmtpSettings {
            host: "smtp.example.com".to_string(),
            username: "user".to_string(),
            password: "secret".to_string(),
            from: "Weather <weather@example.com>".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn default_settings_target_gmail_starttls() {
        let defaults = SmtpSettings::default();
        assert_eq!(defaults.host, "smtp.gmail.com");
        assert_eq!(defaults.port, 587);
        assert!(defaults.use_tls);
    }

    #[test]
    fn rejects_invalid_sender() {
        let mut settings = settings();
        settings.from = "not an address".to_string();
        assert!(matches!(
            SmtpMailTransport::new(&settings),
            Err(MailError::InvalidAddress(_))
        ));
    }

    #[test]
    fn builds_html_message() {
        let transport = SmtpMailTransport::new(&settings()).unwrap();
        let email = OutgoingEmail {
            to: "user@example.com".to_string(),
            subject: "Hello".to_string(),
            html_body: "<p>Hi</p>".to_string(),
        };
        let message = transport.build_message(&email).unwrap();
        let formatted = String::from_utf8(message.formatted()).unwrap();
        assert!(formatted.contains("Subject: Hello"));
        assert!(formatted.contains("text/html"));
    }

    #[test]
    fn rejects_invalid_recipient() {
        let transport = SmtpMailTransport::new(&settings()).unwrap();
        let email = OutgoingEmail {
            to: "nope".to_string(),
            subject: "Hello".to_string(),
            html_body: String::new(),
        };
        assert!(matches!(
            transport.build_message(&email),
            Err(MailError::InvalidAddress(_))
        ));
    }
}

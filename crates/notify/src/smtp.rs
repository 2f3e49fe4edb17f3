use std::time::Duration;

use async_trait::async_trait;
use crmflow_core::config::EmailConfig;
use crmflow_core::notify::{NotificationTransport, TransportError};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use secrecy::ExposeSecret;

/// Sends plain-text mail through an SMTP relay. Remote hosts are reached over STARTTLS;
/// loopback relays (local catch-all servers) are used without TLS.
#[derive(Clone)]
pub struct SmtpTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
}

impl SmtpTransport {
    pub fn from_config(config: &EmailConfig) -> Result<Self, TransportError> {
        let host = config.smtp_host.trim();
        if host.is_empty() {
            return Err(TransportError::NotConfigured("email.smtp_host is empty".to_string()));
        }

        let mut builder = if is_loopback(host) {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .map_err(|error| TransportError::NotConfigured(error.to_string()))?
        };
        builder = builder
            .port(config.smtp_port)
            .timeout(Some(Duration::from_secs(config.timeout_secs)));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(
                username.clone(),
                password.expose_secret().to_string(),
            ));
        }

        Ok(Self { mailer: builder.build(), sender: parse_mailbox(&config.sender)? })
    }

    fn message(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<Message, TransportError> {
        Message::builder()
            .from(self.sender.clone())
            .to(parse_mailbox(recipient)?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|error| TransportError::Delivery(error.to_string()))
    }
}

#[async_trait]
impl NotificationTransport for SmtpTransport {
    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), TransportError> {
        let message = self.message(recipient, subject, body)?;
        match self.mailer.send(message).await {
            Ok(response) => {
                tracing::info!(
                    event_name = "notification.smtp_accepted",
                    recipient = recipient,
                    code = %response.code(),
                    "notification accepted by SMTP relay"
                );
                Ok(())
            }
            Err(error) if error.is_timeout() => Err(TransportError::Timeout),
            Err(error) => Err(TransportError::Delivery(error.to_string())),
        }
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, TransportError> {
    address
        .trim()
        .parse::<Mailbox>()
        .map_err(|_| TransportError::InvalidAddress(address.to_string()))
}

fn is_loopback(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1")
}

#[cfg(test)]
mod tests {
    use crmflow_core::config::EmailConfig;
    use crmflow_core::notify::{NotificationTransport, TransportError};

    use super::SmtpTransport;

    fn local_config(sender: &str) -> EmailConfig {
        EmailConfig {
            enabled: true,
            smtp_host: "127.0.0.1".to_string(),
            smtp_port: 1,
            username: None,
            password: None,
            sender: sender.to_string(),
            recipient: "sales@example.com".to_string(),
            timeout_secs: 2,
        }
    }

    #[test]
    fn invalid_sender_is_rejected_at_construction() {
        let error = SmtpTransport::from_config(&local_config("not an address"))
            .err()
            .expect("sender should be rejected");
        assert_eq!(error, TransportError::InvalidAddress("not an address".to_string()));
    }

    #[test]
    fn empty_host_is_not_configured() {
        let mut config = local_config("bot@example.com");
        config.smtp_host = "  ".to_string();
        assert!(matches!(
            SmtpTransport::from_config(&config),
            Err(TransportError::NotConfigured(_))
        ));
    }

    #[test]
    fn message_carries_subject_and_recipient() {
        let transport = SmtpTransport::from_config(&local_config("bot@example.com")).expect("ok");
        let message = transport
            .message("sales@example.com", "[crmflow] Contact created: 42", "Contact created.")
            .expect("message");
        let raw = String::from_utf8(message.formatted()).expect("utf8");
        assert!(raw.contains("To: sales@example.com"));
        assert!(raw.contains("Subject: [crmflow] Contact created: 42"));
    }

    #[tokio::test]
    async fn invalid_recipient_fails_before_connecting() {
        let transport = SmtpTransport::from_config(&local_config("bot@example.com")).expect("ok");
        let error = transport.send("nobody", "subject", "body").await.expect_err("invalid");
        assert_eq!(error, TransportError::InvalidAddress("nobody".to_string()));
    }

    #[tokio::test]
    async fn unreachable_relay_is_a_delivery_failure() {
        let transport = SmtpTransport::from_config(&local_config("bot@example.com")).expect("ok");
        let error = transport
            .send("sales@example.com", "subject", "body")
            .await
            .expect_err("nothing listens on port 1");
        assert!(matches!(error, TransportError::Delivery(_) | TransportError::Timeout));
    }
}

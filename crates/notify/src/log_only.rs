use async_trait::async_trait;
use crmflow_core::notify::{NotificationTransport, TransportError};

/// Writes notifications to the tracing output instead of sending them.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogOnlyTransport;

#[async_trait]
impl NotificationTransport for LogOnlyTransport {
    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), TransportError> {
        tracing::info!(
            event_name = "notification.logged",
            recipient = recipient,
            subject = subject,
            body_len = body.len(),
            "e-mail disabled, notification written to log"
        );
        tracing::debug!(event_name = "notification.body", body = body);
        Ok(())
    }
}

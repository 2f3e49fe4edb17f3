use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("notification transport is not configured: {0}")]
    NotConfigured(String),
    #[error("invalid address `{0}`")]
    InvalidAddress(String),
    #[error("notification delivery failed: {0}")]
    Delivery(String),
    #[error("notification delivery timed out")]
    Timeout,
}

#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn send(&self, recipient: &str, subject: &str, body: &str)
        -> Result<(), TransportError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentMessage {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

/// Keeps delivered messages in memory and optionally fails every send.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    sent: Arc<Mutex<Vec<SentMessage>>>,
    failure: Option<TransportError>,
}

impl RecordingTransport {
    pub fn failing(error: TransportError) -> Self {
        Self { sent: Arc::default(), failure: Some(error) }
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl NotificationTransport for RecordingTransport {
    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), TransportError> {
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        let message = SentMessage {
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        };
        match self.sent.lock() {
            Ok(mut sent) => sent.push(message),
            Err(poisoned) => poisoned.into_inner().push(message),
        }
        Ok(())
    }
}

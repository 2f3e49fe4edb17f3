//! Delivery channels for composed notifications.

pub mod log_only;
pub mod smtp;

pub use log_only::LogOnlyTransport;
pub use smtp::SmtpTransport;

use std::sync::Arc;

use crmflow_core::config::EmailConfig;
use crmflow_core::notify::{NotificationTransport, TransportError};

/// SMTP when e-mail is enabled, otherwise the log-only channel.
pub fn transport_from_config(
    config: &EmailConfig,
) -> Result<Arc<dyn NotificationTransport>, TransportError> {
    if config.enabled {
        Ok(Arc::new(SmtpTransport::from_config(config)?))
    } else {
        Ok(Arc::new(LogOnlyTransport))
    }
}

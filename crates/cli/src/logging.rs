use crmflow_core::config::{AppConfig, LogFormat};
use crmflow_core::{AuditEvent, AuditSink};
use tracing::Level;

/// Installs the global subscriber. Output goes to stderr so command output on stdout stays
/// machine-readable. Repeated calls are ignored.
pub fn init_logging(config: &AppConfig) {
    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    let installed = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    if installed.is_ok() {
        tracing::debug!(
            event_name = "system.logging.initialized",
            level = %log_level,
            format = ?config.logging.format,
            "logging initialized"
        );
    }
}

/// Forwards the per-run audit trail to the tracing output at debug level.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogAuditSink;

impl AuditSink for LogAuditSink {
    fn emit(&self, event: AuditEvent) {
        tracing::debug!(
            event_name = "audit.recorded",
            correlation_id = %event.run_id,
            audit_event = event.name.as_str(),
            category = event.category.as_str(),
            outcome = event.outcome.as_str(),
            details = event.details_line().as_str(),
            "audit event"
        );
    }
}

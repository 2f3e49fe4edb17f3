use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use crmflow_agent::{
    ChatCompletionsClient, GuardrailPolicy, IntentParser, KeywordProvider, LanguageProvider,
    ModelProvider, PipelineController,
};
use crmflow_core::config::{AppConfig, LlmConfig, LlmProvider, LoadOptions};
use crmflow_core::{CrmBackend, RetryPolicy};
use crmflow_crm::HubSpotClient;

use crate::logging::LogAuditSink;

/// Recipient label used when e-mail delivery is disabled.
pub const LOG_RECIPIENT: &str = "operator log";

pub struct Application {
    pub config: AppConfig,
    pub pipeline: PipelineController,
}

pub fn load(options: LoadOptions) -> Result<Application> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config)
}

pub fn bootstrap_with_config(config: AppConfig) -> Result<Application> {
    tracing::info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        provider = config.llm.provider.as_str(),
        allow_delete = config.crm.allow_delete,
        email_enabled = config.email.enabled,
        "assembling query pipeline"
    );

    let backend: Arc<dyn CrmBackend> = Arc::new(
        HubSpotClient::from_config(&config.crm).context("failed to build CRM client")?,
    );
    let transport = crmflow_notify::transport_from_config(&config.email)
        .context("failed to build notification transport")?;
    let recipient =
        if config.email.enabled { config.email.recipient.clone() } else { LOG_RECIPIENT.into() };

    let pipeline = PipelineController::assemble(
        build_parser(&config.llm, config.crm.retry_policy())?,
        backend,
        transport,
        config.crm.retry_policy(),
        GuardrailPolicy::new(config.crm.allow_delete),
        recipient,
    )
    .context("failed to load notification templates")?
    .with_audit_sink(Arc::new(LogAuditSink));

    tracing::info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        provider = pipeline.provider_name(),
        "query pipeline ready"
    );

    Ok(Application { config, pipeline })
}

/// The model provider reuses the CRM backoff schedule, bounded by the model's own timeout.
fn build_parser(llm: &LlmConfig, retry: RetryPolicy) -> Result<IntentParser> {
    let provider: Arc<dyn LanguageProvider> = match llm.provider {
        LlmProvider::Keyword => Arc::new(KeywordProvider),
        LlmProvider::OpenAi | LlmProvider::Ollama => {
            let timeout = Duration::from_secs(llm.timeout_secs);
            let client = ChatCompletionsClient::new(
                llm.endpoint(),
                llm.model.clone(),
                llm.api_key.clone(),
                timeout,
            )
            .context("failed to build language model client")?;
            Arc::new(ModelProvider::new(Arc::new(client), retry.with_call_timeout(timeout)))
        }
    };
    Ok(IntentParser::new(provider, llm.min_confidence))
}

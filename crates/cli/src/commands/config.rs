use std::env;
use std::fs;
use std::path::Path;

use crmflow_core::config::{resolve_config_path, AppConfig, ConfigOverrides, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

struct Field {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

impl Field {
    fn new(key: &'static str, value: impl Into<String>, env_keys: &'static [&'static str]) -> Self {
        Self { key, value: value.into(), env_keys }
    }
}

pub fn run(options: LoadOptions) -> String {
    let config_path = resolve_config_path(options.config_path.as_deref());
    let flagged = flagged_keys(&options.overrides);
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };
    let config_doc = load_config_doc(config_path.as_deref());

    let mut lines =
        vec!["effective config (source precedence: flag > env > file > default):".to_string()];
    for field in fields(&config) {
        let source = if flagged.contains(&field.key) {
            "flag".to_string()
        } else {
            field_source(&field, config_doc.as_ref(), config_path.as_deref())
        };
        lines.push(format!("- {} = {} (source: {source})", field.key, field.value));
    }
    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let crm = &config.crm;
    let llm = &config.llm;
    let email = &config.email;
    vec![
        Field::new("crm.base_url", crm.base_url.clone(), &["CRMFLOW_CRM_BASE_URL"]),
        Field::new(
            "crm.access_token",
            redact_token(crm.access_token.expose_secret()),
            &["CRMFLOW_CRM_ACCESS_TOKEN", "HUBSPOT_ACCESS_TOKEN"],
        ),
        Field::new("crm.timeout_secs", crm.timeout_secs.to_string(), &["CRMFLOW_CRM_TIMEOUT_SECS"]),
        Field::new("crm.max_attempts", crm.max_attempts.to_string(), &["CRMFLOW_CRM_MAX_ATTEMPTS"]),
        Field::new(
            "crm.backoff_base_ms",
            crm.backoff_base_ms.to_string(),
            &["CRMFLOW_CRM_BACKOFF_BASE_MS"],
        ),
        Field::new(
            "crm.backoff_max_ms",
            crm.backoff_max_ms.to_string(),
            &["CRMFLOW_CRM_BACKOFF_MAX_MS"],
        ),
        Field::new("crm.allow_delete", crm.allow_delete.to_string(), &["CRMFLOW_CRM_ALLOW_DELETE"]),
        Field::new("llm.provider", llm.provider.as_str(), &["CRMFLOW_LLM_PROVIDER"]),
        Field::new("llm.model", llm.model.clone(), &["CRMFLOW_LLM_MODEL"]),
        Field::new("llm.base_url", llm.endpoint(), &["CRMFLOW_LLM_BASE_URL"]),
        Field::new("llm.api_key", redact_optional(llm.api_key.as_ref()), &["CRMFLOW_LLM_API_KEY"]),
        Field::new(
            "llm.min_confidence",
            llm.min_confidence.to_string(),
            &["CRMFLOW_LLM_MIN_CONFIDENCE"],
        ),
        Field::new("email.enabled", email.enabled.to_string(), &["CRMFLOW_EMAIL_ENABLED"]),
        Field::new("email.smtp_host", email.smtp_host.clone(), &["CRMFLOW_EMAIL_SMTP_HOST"]),
        Field::new("email.smtp_port", email.smtp_port.to_string(), &["CRMFLOW_EMAIL_SMTP_PORT"]),
        Field::new(
            "email.username",
            email.username.clone().unwrap_or_else(|| "<unset>".to_string()),
            &["CRMFLOW_EMAIL_USERNAME"],
        ),
        Field::new(
            "email.password",
            redact_optional(email.password.as_ref()),
            &["CRMFLOW_EMAIL_PASSWORD"],
        ),
        Field::new("email.sender", or_unset(&email.sender), &["CRMFLOW_EMAIL_SENDER"]),
        Field::new("email.recipient", or_unset(&email.recipient), &["CRMFLOW_EMAIL_RECIPIENT"]),
        Field::new(
            "logging.level",
            config.logging.level.clone(),
            &["CRMFLOW_LOGGING_LEVEL", "CRMFLOW_LOG_LEVEL"],
        ),
        Field::new(
            "logging.format",
            format!("{:?}", config.logging.format).to_ascii_lowercase(),
            &["CRMFLOW_LOGGING_FORMAT", "CRMFLOW_LOG_FORMAT"],
        ),
    ]
}

fn flagged_keys(overrides: &ConfigOverrides) -> Vec<&'static str> {
    [
        ("crm.base_url", overrides.crm_base_url.is_some()),
        ("crm.access_token", overrides.crm_access_token.is_some()),
        ("crm.allow_delete", overrides.allow_delete.is_some()),
        ("llm.provider", overrides.llm_provider.is_some()),
        ("llm.model", overrides.llm_model.is_some()),
        ("email.enabled", overrides.email_enabled.is_some()),
        ("email.recipient", overrides.email_recipient.is_some()),
        ("logging.level", overrides.log_level.is_some()),
    ]
    .into_iter()
    .filter_map(|(key, set)| set.then_some(key))
    .collect()
}

fn load_config_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(field: &Field, config_doc: Option<&Value>, config_path: Option<&Path>) -> String {
    if let Some(env_key) = field.env_keys.iter().find(|key| env_is_set(key)) {
        return format!("env ({env_key})");
    }

    if config_doc.is_some_and(|doc| contains_path(doc, field.key)) {
        let file_path = config_path
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "config file".to_string());
        return format!("file ({file_path})");
    }

    "default".to_string()
}

fn env_is_set(key: &str) -> bool {
    env::var(key).is_ok_and(|value| !value.trim().is_empty())
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn or_unset(value: &str) -> String {
    if value.trim().is_empty() {
        "<unset>".to_string()
    } else {
        value.to_string()
    }
}

fn redact_optional(secret: Option<&SecretString>) -> String {
    match secret {
        Some(secret) => redact_token(secret.expose_secret()),
        None => "<unset>".to_string(),
    }
}

/// Private app tokens look like `pat-na1-...`; only the leading segment is shown.
fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::RetryPolicy;

pub const DEFAULT_CONFIG_FILES: [&str; 2] = ["crmflow.toml", "config/crmflow.toml"];

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub crm: CrmConfig,
    pub llm: LlmConfig,
    pub email: EmailConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct CrmConfig {
    pub base_url: String,
    pub access_token: SecretString,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub allow_delete: bool,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    /// Extractions scoring below this (0..=100) are rejected as low confidence.
    pub min_confidence: u8,
}

#[derive(Clone, Debug)]
pub struct EmailConfig {
    pub enabled: bool,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub sender: String,
    pub recipient: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    Keyword,
    #[serde(rename = "openai")]
    OpenAi,
    Ollama,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Keyword => "keyword",
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub crm_base_url: Option<String>,
    pub crm_access_token: Option<String>,
    pub allow_delete: Option<bool>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub email_enabled: Option<bool>,
    pub email_recipient: Option<String>,
    pub log_level: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            crm: CrmConfig {
                base_url: "https://api.hubapi.com".to_string(),
                access_token: String::new().into(),
                timeout_secs: 30,
                max_attempts: 3,
                backoff_base_ms: 500,
                backoff_max_ms: 8_000,
                allow_delete: false,
            },
            llm: LlmConfig {
                provider: LlmProvider::Keyword,
                api_key: None,
                base_url: None,
                model: "gpt-4o-mini".to_string(),
                timeout_secs: 30,
                min_confidence: 60,
            },
            email: EmailConfig {
                enabled: false,
                smtp_host: "smtp.gmail.com".to_string(),
                smtp_port: 587,
                username: None,
                password: None,
                sender: String::new(),
                recipient: String::new(),
                timeout_secs: 30,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "keyword" => Ok(Self::Keyword),
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected keyword|openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl CrmConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.backoff_base_ms),
            max_delay: Duration::from_millis(self.backoff_max_ms),
            call_timeout: Duration::from_secs(self.timeout_secs),
        }
    }

    pub fn has_access_token(&self) -> bool {
        !self.access_token.expose_secret().trim().is_empty()
    }
}

impl LlmConfig {
    /// Chat completions root for the configured provider.
    pub fn endpoint(&self) -> String {
        match (&self.base_url, self.provider) {
            (Some(url), _) => url.trim_end_matches('/').to_string(),
            (None, LlmProvider::Ollama) => "http://localhost:11434/v1".to_string(),
            (None, _) => "https://api.openai.com/v1".to_string(),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILES[0]));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(crm) = patch.crm {
            if let Some(base_url) = crm.base_url {
                self.crm.base_url = base_url;
            }
            if let Some(access_token) = crm.access_token {
                self.crm.access_token = secret_value(access_token);
            }
            if let Some(timeout_secs) = crm.timeout_secs {
                self.crm.timeout_secs = timeout_secs;
            }
            if let Some(max_attempts) = crm.max_attempts {
                self.crm.max_attempts = max_attempts;
            }
            if let Some(backoff_base_ms) = crm.backoff_base_ms {
                self.crm.backoff_base_ms = backoff_base_ms;
            }
            if let Some(backoff_max_ms) = crm.backoff_max_ms {
                self.crm.backoff_max_ms = backoff_max_ms;
            }
            if let Some(allow_delete) = crm.allow_delete {
                self.crm.allow_delete = allow_delete;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(min_confidence) = llm.min_confidence {
                self.llm.min_confidence = min_confidence;
            }
        }

        if let Some(email) = patch.email {
            if let Some(enabled) = email.enabled {
                self.email.enabled = enabled;
            }
            if let Some(smtp_host) = email.smtp_host {
                self.email.smtp_host = smtp_host;
            }
            if let Some(smtp_port) = email.smtp_port {
                self.email.smtp_port = smtp_port;
            }
            if let Some(username) = email.username {
                self.email.username = Some(username);
            }
            if let Some(password) = email.password {
                self.email.password = Some(secret_value(password));
            }
            if let Some(sender) = email.sender {
                self.email.sender = sender;
            }
            if let Some(recipient) = email.recipient {
                self.email.recipient = recipient;
            }
            if let Some(timeout_secs) = email.timeout_secs {
                self.email.timeout_secs = timeout_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("CRMFLOW_CRM_BASE_URL") {
            self.crm.base_url = value;
        }
        let access_token =
            read_env("CRMFLOW_CRM_ACCESS_TOKEN").or_else(|| read_env("HUBSPOT_ACCESS_TOKEN"));
        if let Some(value) = access_token {
            self.crm.access_token = secret_value(value);
        }
        if let Some(value) = read_env("CRMFLOW_CRM_TIMEOUT_SECS") {
            self.crm.timeout_secs = parse_u64("CRMFLOW_CRM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CRMFLOW_CRM_MAX_ATTEMPTS") {
            self.crm.max_attempts = parse_u32("CRMFLOW_CRM_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("CRMFLOW_CRM_BACKOFF_BASE_MS") {
            self.crm.backoff_base_ms = parse_u64("CRMFLOW_CRM_BACKOFF_BASE_MS", &value)?;
        }
        if let Some(value) = read_env("CRMFLOW_CRM_BACKOFF_MAX_MS") {
            self.crm.backoff_max_ms = parse_u64("CRMFLOW_CRM_BACKOFF_MAX_MS", &value)?;
        }
        if let Some(value) = read_env("CRMFLOW_CRM_ALLOW_DELETE") {
            self.crm.allow_delete = parse_bool("CRMFLOW_CRM_ALLOW_DELETE", &value)?;
        }

        if let Some(value) = read_env("CRMFLOW_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("CRMFLOW_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("CRMFLOW_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("CRMFLOW_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("CRMFLOW_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("CRMFLOW_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CRMFLOW_LLM_MIN_CONFIDENCE") {
            self.llm.min_confidence = parse_u8("CRMFLOW_LLM_MIN_CONFIDENCE", &value)?;
        }

        if let Some(value) = read_env("CRMFLOW_EMAIL_ENABLED") {
            self.email.enabled = parse_bool("CRMFLOW_EMAIL_ENABLED", &value)?;
        }
        if let Some(value) = read_env("CRMFLOW_EMAIL_SMTP_HOST") {
            self.email.smtp_host = value;
        }
        if let Some(value) = read_env("CRMFLOW_EMAIL_SMTP_PORT") {
            self.email.smtp_port = parse_u16("CRMFLOW_EMAIL_SMTP_PORT", &value)?;
        }
        if let Some(value) = read_env("CRMFLOW_EMAIL_USERNAME") {
            self.email.username = Some(value);
        }
        if let Some(value) = read_env("CRMFLOW_EMAIL_PASSWORD") {
            self.email.password = Some(secret_value(value));
        }
        if let Some(value) = read_env("CRMFLOW_EMAIL_SENDER") {
            self.email.sender = value;
        }
        if let Some(value) = read_env("CRMFLOW_EMAIL_RECIPIENT") {
            self.email.recipient = value;
        }
        if let Some(value) = read_env("CRMFLOW_EMAIL_TIMEOUT_SECS") {
            self.email.timeout_secs = parse_u64("CRMFLOW_EMAIL_TIMEOUT_SECS", &value)?;
        }

        let log_level =
            read_env("CRMFLOW_LOGGING_LEVEL").or_else(|| read_env("CRMFLOW_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CRMFLOW_LOGGING_FORMAT").or_else(|| read_env("CRMFLOW_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(base_url) = overrides.crm_base_url {
            self.crm.base_url = base_url;
        }
        if let Some(access_token) = overrides.crm_access_token {
            self.crm.access_token = secret_value(access_token);
        }
        if let Some(allow_delete) = overrides.allow_delete {
            self.crm.allow_delete = allow_delete;
        }
        if let Some(provider) = overrides.llm_provider {
            self.llm.provider = provider;
        }
        if let Some(model) = overrides.llm_model {
            self.llm.model = model;
        }
        if let Some(enabled) = overrides.email_enabled {
            self.email.enabled = enabled;
        }
        if let Some(recipient) = overrides.email_recipient {
            self.email.recipient = recipient;
        }
        if let Some(level) = overrides.log_level {
            self.logging.level = level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_crm(&self.crm)?;
        validate_llm(&self.llm)?;
        validate_email(&self.email)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

/// The explicit path when it exists, otherwise the first default file present.
pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    DEFAULT_CONFIG_FILES.into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_crm(crm: &CrmConfig) -> Result<(), ConfigError> {
    let base_url = crm.base_url.trim();
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "crm.base_url must start with http:// or https://".to_string(),
        ));
    }

    if !crm.has_access_token() {
        return Err(ConfigError::Validation(
            "crm.access_token is required. Create one in HubSpot > Settings > Integrations > \
             Private Apps and grant the crm.objects read/write scopes"
                .to_string(),
        ));
    }

    if crm.timeout_secs == 0 || crm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "crm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if crm.max_attempts == 0 || crm.max_attempts > 10 {
        return Err(ConfigError::Validation(
            "crm.max_attempts must be in range 1..=10".to_string(),
        ));
    }

    if crm.backoff_base_ms > crm.backoff_max_ms {
        return Err(ConfigError::Validation(
            "crm.backoff_base_ms must not exceed crm.backoff_max_ms".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.min_confidence > 100 {
        return Err(ConfigError::Validation(
            "llm.min_confidence must be in range 0..=100".to_string(),
        ));
    }

    match llm.provider {
        LlmProvider::Keyword => {}
        LlmProvider::OpenAi => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for the openai provider".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            if llm.model.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "llm.model is required for the ollama provider".to_string(),
                ));
            }
        }
    }

    if let Some(base_url) = &llm.base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "llm.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_email(email: &EmailConfig) -> Result<(), ConfigError> {
    if !email.enabled {
        return Ok(());
    }

    if email.smtp_host.trim().is_empty() || email.smtp_port == 0 {
        return Err(ConfigError::Validation(
            "email.smtp_host and email.smtp_port are required when email.enabled is true"
                .to_string(),
        ));
    }

    for (key, value) in [("email.sender", &email.sender), ("email.recipient", &email.recipient)] {
        if !value.contains('@') {
            return Err(ConfigError::Validation(format!(
                "{key} must be an e-mail address when email.enabled is true"
            )));
        }
    }

    if email.username.is_some() != email.password.is_some() {
        return Err(ConfigError::Validation(
            "email.username and email.password must be set together".to_string(),
        ));
    }

    if email.timeout_secs == 0 || email.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "email.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u8(key: &str, value: &str) -> Result<u8, ConfigError> {
    value.trim().parse::<u8>().map_err(|_| invalid_override(key, value))
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.trim().parse::<u16>().map_err(|_| invalid_override(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.trim().parse::<bool>().map_err(|_| invalid_override(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    crm: Option<CrmPatch>,
    llm: Option<LlmPatch>,
    email: Option<EmailPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct CrmPatch {
    base_url: Option<String>,
    access_token: Option<String>,
    timeout_secs: Option<u64>,
    max_attempts: Option<u32>,
    backoff_base_ms: Option<u64>,
    backoff_max_ms: Option<u64>,
    allow_delete: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    min_confidence: Option<u8>,
}

#[derive(Debug, Default, Deserialize)]
struct EmailPatch {
    enabled: Option<bool>,
    smtp_host: Option<String>,
    smtp_port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    sender: Option<String>,
    recipient: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

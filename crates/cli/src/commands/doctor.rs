use crmflow_core::config::{AppConfig, ConfigError, LlmProvider, LoadOptions};
use crmflow_core::{CrmBackend, EntityType, ExecutionStatus, ObjectId};
use crmflow_crm::HubSpotClient;
use secrecy::ExposeSecret;
use serde::Serialize;

use crate::commands::{current_thread_runtime, escape_json, CommandResult};

/// Record id that never exists. A 404 for it proves the API is reachable and the token
/// is accepted.
const READINESS_RECORD_ID: &str = "0";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
pub struct DoctorCheck {
    pub name: &'static str,
    pub status: CheckStatus,
    pub details: String,
}

#[derive(Debug, Serialize)]
pub struct DoctorReport {
    pub overall_status: CheckStatus,
    pub summary: String,
    pub checks: Vec<DoctorCheck>,
}

const DEPENDENT_CHECKS: [&str; 4] =
    ["crm_token_readiness", "crm_api_access", "language_provider", "notification_transport"];

pub fn run(options: LoadOptions, json_output: bool) -> CommandResult {
    let loaded = AppConfig::load(options);
    let report = match current_thread_runtime() {
        Ok(runtime) => runtime.block_on(build_report(loaded)),
        Err(message) => DoctorReport {
            overall_status: CheckStatus::Fail,
            summary: "doctor: could not start".to_string(),
            checks: vec![DoctorCheck {
                name: "async_runtime",
                status: CheckStatus::Fail,
                details: message,
            }],
        },
    };
    render(&report, json_output)
}

pub fn render(report: &DoctorReport, json_output: bool) -> CommandResult {
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };
    if !json_output {
        return CommandResult::text(exit_code, render_human(report));
    }

    let output = serde_json::to_string_pretty(report).unwrap_or_else(|error| {
        format!(
            "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\
             \"error\":\"{}\"}}",
            escape_json(&error.to_string())
        )
    });
    CommandResult::text(exit_code, output)
}

pub async fn build_report(loaded: Result<AppConfig, ConfigError>) -> DoctorReport {
    let mut checks = Vec::new();

    match loaded {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_token(&config));
            checks.push(check_crm_access(&config).await);
            checks.push(check_language_provider(&config));
            checks.push(check_notification_transport(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.extend(DEPENDENT_CHECKS.into_iter().map(|name| DoctorCheck {
                name,
                status: CheckStatus::Skipped,
                details: "skipped because configuration did not load".to_string(),
            }));
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_token(config: &AppConfig) -> DoctorCheck {
    let token = config.crm.access_token.expose_secret();
    let well_formed = !token.trim().is_empty() && !token.chars().any(char::is_whitespace);
    DoctorCheck {
        name: "crm_token_readiness",
        status: if well_formed { CheckStatus::Pass } else { CheckStatus::Fail },
        details: if well_formed {
            "access token present".to_string()
        } else {
            "access token must be a single non-empty value without whitespace".to_string()
        },
    }
}

async fn check_crm_access(config: &AppConfig) -> DoctorCheck {
    let client = match HubSpotClient::from_config(&config.crm) {
        Ok(client) => client,
        Err(error) => {
            return DoctorCheck {
                name: "crm_api_access",
                status: CheckStatus::Fail,
                details: error.to_string(),
            }
        }
    };

    let readiness_id = ObjectId(READINESS_RECORD_ID.to_string());
    match client.get_record(EntityType::Contact, &readiness_id).await {
        Ok(_) => DoctorCheck {
            name: "crm_api_access",
            status: CheckStatus::Pass,
            details: format!("reached {}", config.crm.base_url),
        },
        Err(error) if error.status() == ExecutionStatus::NotFound => DoctorCheck {
            name: "crm_api_access",
            status: CheckStatus::Pass,
            details: format!("reached {} and the token was accepted", config.crm.base_url),
        },
        Err(error) => {
            let details = match error.status().remediation() {
                Some(remediation) => format!("{error}. {remediation}"),
                None => error.to_string(),
            };
            DoctorCheck { name: "crm_api_access", status: CheckStatus::Fail, details }
        }
    }
}

fn check_language_provider(config: &AppConfig) -> DoctorCheck {
    let details = match config.llm.provider {
        LlmProvider::Keyword => "keyword grammar (no network calls)".to_string(),
        LlmProvider::OpenAi | LlmProvider::Ollama => format!(
            "{} model `{}` at {}",
            config.llm.provider.as_str(),
            config.llm.model,
            config.llm.endpoint()
        ),
    };
    DoctorCheck { name: "language_provider", status: CheckStatus::Pass, details }
}

fn check_notification_transport(config: &AppConfig) -> DoctorCheck {
    if !config.email.enabled {
        return DoctorCheck {
            name: "notification_transport",
            status: CheckStatus::Pass,
            details: "e-mail disabled; notifications are written to the log".to_string(),
        };
    }

    match crmflow_notify::SmtpTransport::from_config(&config.email) {
        Ok(_) => DoctorCheck {
            name: "notification_transport",
            status: CheckStatus::Pass,
            details: format!(
                "SMTP relay {}:{} configured for {}",
                config.email.smtp_host, config.email.smtp_port, config.email.recipient
            ),
        },
        Err(error) => DoctorCheck {
            name: "notification_transport",
            status: CheckStatus::Fail,
            details: error.to_string(),
        },
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = vec![report.summary.clone()];

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

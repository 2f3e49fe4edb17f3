use crmflow_agent::{PipelineController, PipelineReport};
use crmflow_core::config::{AppConfig, LoadOptions};
use serde::Serialize;

use crate::bootstrap;
use crate::commands::{current_thread_runtime, CommandResult, EXIT_CONFIG};
use crate::logging::init_logging;

#[derive(Debug, Serialize)]
struct QueryOutcome<'a> {
    command: &'static str,
    run_id: String,
    status: &'static str,
    operation: Option<&'static str>,
    entity_type: Option<&'static str>,
    object_id: Option<&'a str>,
    attempts: u32,
    final_state: Option<&'static str>,
    notification_delivered: bool,
    response: &'a str,
}

pub fn run(options: LoadOptions, text: &str, json: bool) -> CommandResult {
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "query",
                "config_validation",
                error.to_string(),
                EXIT_CONFIG,
            )
        }
    };
    init_logging(&config);

    match current_thread_runtime() {
        Ok(runtime) => runtime.block_on(execute(config, text, json)),
        Err(message) => CommandResult::failure("query", "runtime", message, 1),
    }
}

pub async fn execute(config: AppConfig, text: &str, json: bool) -> CommandResult {
    match bootstrap::bootstrap_with_config(config) {
        Ok(app) => handle(&app.pipeline, text, json).await,
        Err(error) => {
            CommandResult::failure("query", "bootstrap", format!("{error:#}"), EXIT_CONFIG)
        }
    }
}

pub async fn handle(pipeline: &PipelineController, text: &str, json: bool) -> CommandResult {
    match pipeline.handle_query(text).await {
        Ok(report) => render(&report, json),
        Err(error) => CommandResult::failure("query", "pipeline", error.to_string(), 1),
    }
}

fn render(report: &PipelineReport, json: bool) -> CommandResult {
    let exit_code = if report.is_success() { 0 } else { 1 };
    if !json {
        return CommandResult::text(exit_code, report.response.clone());
    }

    let outcome = QueryOutcome {
        command: "query",
        run_id: report.run_id.to_string(),
        status: report.result.status.as_str(),
        operation: report.result.operation.map(|operation| operation.as_str()),
        entity_type: report.result.entity_type.map(|entity_type| entity_type.as_str()),
        object_id: report.result.object_id().map(|id| id.0.as_str()),
        attempts: report.result.attempts,
        final_state: report.final_state().map(|state| state.as_str()),
        notification_delivered: report.delivery.is_delivered(),
        response: &report.response,
    };
    match serde_json::to_string_pretty(&outcome) {
        Ok(output) => CommandResult::text(exit_code, output),
        Err(error) => CommandResult::failure("query", "serialization", error.to_string(), 1),
    }
}

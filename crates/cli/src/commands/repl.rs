use crmflow_agent::PipelineController;
use crmflow_core::config::{AppConfig, LoadOptions};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::bootstrap;
use crate::commands::{current_thread_runtime, CommandResult, EXIT_CONFIG};
use crate::logging::init_logging;

pub const EXIT_KEYWORDS: [&str; 3] = ["exit", "quit", "q"];

pub const EXAMPLE_QUERIES: [&str; 10] = [
    "Create a contact for Jane Doe with email jane@example.com",
    "Create a company called Acme Corp with domain acme.com",
    "Create a deal called Enterprise Sale with amount 50000 and dealstage appointmentscheduled",
    "Update contact 234567 with phone 555-9876",
    "Update deal 12345678 with dealstage closedwon",
    "Update contact jane@example.com with phone 555-0100",
    "Find contacts with first name Jane and last name Doe",
    "Delete company 88",
    "Associate deal 12345678 with contact 234567",
    "List properties for deals",
];

const PROMPT: &str = "crmflow> ";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub queries: usize,
    pub failures: usize,
}

pub fn is_exit(line: &str) -> bool {
    let line = line.trim();
    EXIT_KEYWORDS.iter().any(|keyword| line.eq_ignore_ascii_case(keyword))
}

pub fn examples_text() -> String {
    let mut lines = vec!["Example requests:".to_string()];
    lines.extend(EXAMPLE_QUERIES.iter().map(|query| format!("  - {query}")));
    lines.join("\n")
}

pub fn run(options: LoadOptions) -> CommandResult {
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "repl",
                "config_validation",
                error.to_string(),
                EXIT_CONFIG,
            )
        }
    };
    init_logging(&config);

    let app = match bootstrap::bootstrap_with_config(config) {
        Ok(app) => app,
        Err(error) => {
            return CommandResult::failure("repl", "bootstrap", format!("{error:#}"), EXIT_CONFIG)
        }
    };
    let runtime = match current_thread_runtime() {
        Ok(runtime) => runtime,
        Err(message) => return CommandResult::failure("repl", "runtime", message, 1),
    };

    let outcome = runtime.block_on(session(
        &app.pipeline,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    ));
    match outcome {
        Ok(summary) => {
            tracing::info!(
                event_name = "system.repl.closed",
                correlation_id = "repl",
                queries = summary.queries,
                failures = summary.failures,
                "interactive session closed"
            );
            CommandResult::text(0, "")
        }
        Err(error) => CommandResult::failure("repl", "io", error.to_string(), 1),
    }
}

/// Reads one request per line until an exit keyword or end of input.
pub async fn session<R, W>(
    pipeline: &PipelineController,
    mut input: R,
    mut output: W,
) -> std::io::Result<SessionSummary>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut summary = SessionSummary::default();
    output
        .write_all(
            format!(
                "crmflow ready ({} parser). Type a request, 'examples' for ideas, or 'exit' \
                 to quit.\n",
                pipeline.provider_name()
            )
            .as_bytes(),
        )
        .await?;

    let mut line = String::new();
    loop {
        output.write_all(PROMPT.as_bytes()).await?;
        output.flush().await?;

        line.clear();
        if input.read_line(&mut line).await? == 0 {
            output.write_all(b"\n").await?;
            break;
        }

        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if is_exit(query) {
            output.write_all(b"Goodbye.\n").await?;
            break;
        }
        if query.eq_ignore_ascii_case("examples") || query.eq_ignore_ascii_case("help") {
            output.write_all(format!("{}\n", examples_text()).as_bytes()).await?;
            continue;
        }

        summary.queries += 1;
        let reply = match pipeline.handle_query(query).await {
            Ok(report) => {
                if !report.is_success() {
                    summary.failures += 1;
                }
                report.response
            }
            Err(error) => {
                summary.failures += 1;
                tracing::error!(
                    event_name = "system.repl.pipeline_error",
                    correlation_id = "repl",
                    error = %error,
                    "pipeline stopped on an invalid transition"
                );
                format!("Internal error: {error}")
            }
        };
        output.write_all(format!("{reply}\n\n").as_bytes()).await?;
    }

    output.flush().await?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::{examples_text, is_exit, EXAMPLE_QUERIES};

    #[test]
    fn exit_keywords_are_case_insensitive() {
        assert!(is_exit("exit"));
        assert!(is_exit("  QUIT "));
        assert!(is_exit("q"));
        assert!(!is_exit("quit now"));
        assert!(!is_exit("query contacts"));
    }

    #[test]
    fn examples_list_every_sample_query() {
        let text = examples_text();
        for query in EXAMPLE_QUERIES {
            assert!(text.contains(query), "missing example: {query}");
        }
    }
}

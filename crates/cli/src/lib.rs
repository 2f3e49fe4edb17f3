pub mod bootstrap;
pub mod commands;
pub mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use crmflow_core::config::{ConfigOverrides, LlmProvider, LoadOptions};

#[derive(Debug, Parser)]
#[command(
    name = "crmflow",
    about = "Natural-language CRM operations",
    long_about = "Turn plain-English requests into CRM record operations, notify on the outcome, \
                  and inspect runtime readiness.",
    after_help = "Examples:\n  crmflow\n  crmflow query \"Create a contact for Jane Doe with email \
                  jane@example.com\"\n  crmflow doctor --json\n  crmflow config"
)]
pub struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Clone, Debug, Default, Args)]
pub struct GlobalArgs {
    #[arg(long, global = true, help = "Path to a crmflow.toml config file")]
    pub config: Option<PathBuf>,
    #[arg(long, global = true, help = "Language provider: keyword, openai or ollama")]
    pub provider: Option<LlmProvider>,
    #[arg(long, global = true, help = "Permit delete operations for this session")]
    pub allow_delete: bool,
    #[arg(long, global = true, help = "Log level override (trace|debug|info|warn|error)")]
    pub log_level: Option<String>,
}

impl GlobalArgs {
    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            config_path: self.config.clone(),
            require_file: self.config.is_some(),
            overrides: ConfigOverrides {
                allow_delete: self.allow_delete.then_some(true),
                llm_provider: self.provider,
                log_level: self.log_level.clone(),
                ..ConfigOverrides::default()
            },
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Read requests from stdin one line at a time (default)")]
    Repl,
    #[command(about = "Run a single request and exit")]
    Query {
        #[arg(required = true, num_args = 1.., help = "The request text")]
        text: Vec<String>,
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Print sample requests")]
    Examples,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, CRM token readiness, and notification transport")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = cli.global.load_options();

    let result = match cli.command.unwrap_or(Command::Repl) {
        Command::Repl => commands::repl::run(options),
        Command::Query { text, json } => commands::query::run(options, &text.join(" "), json),
        Command::Examples => commands::CommandResult {
            exit_code: 0,
            output: commands::repl::examples_text(),
        },
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run(options) }
        }
        Command::Doctor { json } => commands::doctor::run(options, json),
    };

    if !result.output.is_empty() {
        println!("{}", result.output);
    }
    ExitCode::from(result.exit_code)
}

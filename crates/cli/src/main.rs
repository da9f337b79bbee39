mod commands;
mod config;

use std::path::{Path, PathBuf};
use std::process;

use blueprint_interchange::Blueprint;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Blueprint workflow engine toolchain.
#[derive(Parser)]
#[command(
    name = "blueprint",
    version,
    about = "Blueprint workflow engine toolchain"
)]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run static analysis checks on a blueprint configuration
    Check {
        /// Path to the blueprint JSON file
        file: PathBuf,
        /// Comma-separated list of analyses to run (s1,s2,s3,s4). Default: all.
        #[arg(long)]
        analysis: Option<String>,
    },

    /// List the transitions a record can take from a state
    Transitions {
        /// Path to the blueprint JSON file
        file: PathBuf,
        /// Current state id. Default: the state a new record would start in
        #[arg(long)]
        state: Option<i64>,
        /// Path to a JSON object with the record's field values
        #[arg(long)]
        data: Option<PathBuf>,
    },

    /// Show the SLA clock of a record that entered a state
    Sla {
        /// Path to the blueprint JSON file
        file: PathBuf,
        /// State the record is in
        #[arg(long)]
        state: i64,
        /// When the record entered the state (RFC 3339)
        #[arg(long)]
        entered_at: String,
        /// Evaluation time (RFC 3339). Default: now
        #[arg(long)]
        now: Option<String>,
        /// Path to an engine configuration TOML file
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Host the engine and run the escalation scheduler until Ctrl-C
    Run {
        /// Blueprint JSON files to register
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Path to a JSON array of records to track
        #[arg(long)]
        records: Option<PathBuf>,
        /// Path to an engine configuration TOML file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match (&cli.command, cli.quiet) {
        (_, true) => "error",
        (Commands::Run { .. }, false) => "info",
        _ => "warn",
    };
    init_logging(default_level);

    match cli.command {
        Commands::Check { file, analysis } => {
            commands::check::cmd_check(&file, analysis.as_deref(), cli.output, cli.quiet);
        }
        Commands::Transitions { file, state, data } => {
            commands::transitions::cmd_transitions(
                &file,
                state,
                data.as_deref(),
                cli.output,
                cli.quiet,
            );
        }
        Commands::Sla {
            file,
            state,
            entered_at,
            now,
            config,
        } => {
            commands::sla::cmd_sla(
                commands::sla::SlaOptions {
                    file: &file,
                    state_id: state,
                    entered_at: &entered_at,
                    now: now.as_deref(),
                    config: config.as_deref(),
                },
                cli.output,
                cli.quiet,
            );
        }
        Commands::Run {
            files,
            records,
            config,
        } => {
            commands::run::cmd_run(&files, records.as_deref(), config.as_deref(), cli.output, cli.quiet);
        }
    }
}

/// Logs go to stderr so that stdout stays parseable. `RUST_LOG` overrides
/// the default level.
fn init_logging(default_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(std::io::stderr),
        )
        .init();
}

pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}

/// Read and parse a JSON file, exiting with status 1 on failure.
pub(crate) fn read_json(path: &Path, output: OutputFormat, quiet: bool) -> serde_json::Value {
    let text = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            report_error(
                &format!("error reading file '{}': {}", path.display(), e),
                output,
                quiet,
            );
            process::exit(1);
        }
    };
    match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(e) => {
            report_error(
                &format!("error parsing JSON in '{}': {}", path.display(), e),
                output,
                quiet,
            );
            process::exit(1);
        }
    }
}

/// Load and validate a blueprint configuration, exiting with status 1 on
/// failure.
pub(crate) fn load_blueprint(path: &Path, output: OutputFormat, quiet: bool) -> Blueprint {
    let config = read_json(path, output, quiet);
    match blueprint_interchange::from_config(&config) {
        Ok(bp) => bp,
        Err(e) => {
            report_error(
                &format!("invalid blueprint '{}': {}", path.display(), e),
                output,
                quiet,
            );
            process::exit(1);
        }
    }
}

pub(crate) fn print_json<T: serde::Serialize>(value: &T) {
    let pretty = serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| format!("{{\"error\": \"serialization: {}\"}}", e));
    println!("{}", pretty);
}

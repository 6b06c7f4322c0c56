use anyhow::{Context, Result};
use callscope::{Config, DirSearcher, Reporter, RunCommand, run_command};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use std::path::PathBuf;
use std::process::ExitCode;

mod cli_logger;

use cli_logger::CliLogger;

#[derive(Debug, Parser)]
#[command(name = "callscope", version, about = "Analyze hierarchical function-call profiles")]
struct Cli {
    /// Path to the config file.
    #[arg(long, global = true, default_value = "callscope.toml")]
    config: PathBuf,

    /// Emit compact JSON instead of the pretty rendering.
    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: RunCommand,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load_optional(&cli.config);
    let logger = CliLogger::new(cli.json || config.reporter == Reporter::Json, cli.no_color);

    match run(&cli, &config).and_then(|value| logger.print_serialized(&value)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = err
                .downcast_ref::<callscope::CallscopeError>()
                .map_or("error", |e| e.code());
            logger.print_error(code, &format!("{err:#}"));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli, config: &Config) -> Result<serde_json::Value> {
    let searcher = DirSearcher::from_config(config);
    tracing::debug!(runs_dir = %config.runs_dir().display(), "using run store");
    let value = run_command(config, &searcher, &cli.command)
        .with_context(|| format!("{} failed", command_name(&cli.command)))?;
    Ok(value)
}

fn command_name(command: &RunCommand) -> &'static str {
    match command {
        RunCommand::List { .. } => "list",
        RunCommand::View { .. } => "view",
        RunCommand::Top { .. } => "top",
        RunCommand::Symbol { .. } => "symbol",
        RunCommand::Callgraph { .. } => "callgraph",
        RunCommand::Compare { .. } => "compare",
        RunCommand::Watched { .. } => "watched",
        RunCommand::Watch { .. } => "watch",
        RunCommand::Import { .. } => "import",
        RunCommand::Delete { .. } => "delete",
        RunCommand::DeleteAll { .. } => "delete-all",
    }
}

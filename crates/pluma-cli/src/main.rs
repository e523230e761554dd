//! Pluma CLI - Command-line tool for running and inspecting plugin hosts

mod cli;
mod commands;
mod output;

use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so `-o json` output stays parseable.
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_command(cli))
}

async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = commands::load_runtime_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            plugin_dir,
            no_hot_reload,
        } => commands::run::run(config, plugin_dir, no_hot_reload).await,
        Commands::Inspect { artifact, name } => {
            commands::inspect::run(&artifact, name.as_deref(), cli.output).await
        }
        Commands::Scan { dir } => {
            let dir = dir.unwrap_or_else(|| config.plugin_dir.clone());
            commands::scan::run(&config, &dir, cli.output)
        }
        Commands::Config => commands::config_cmd::run(&config, cli.output),
    }
}

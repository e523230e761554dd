//! CLI command definitions using clap

use crate::output::OutputFormat;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Pluma CLI - Run a hot-reloading plugin host
#[derive(Parser)]
#[command(name = "pluma")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json)
    #[arg(short = 'o', long, global = true, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,

    /// Runtime configuration file (TOML, YAML or JSON)
    #[arg(short = 'c', long, global = true, env = "PLUMA_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the plugin host until interrupted
    Run {
        /// Plugin directory (overrides the configuration file)
        #[arg(short, long)]
        plugin_dir: Option<PathBuf>,

        /// Track changes without loading or reloading plugins
        #[arg(long)]
        no_hot_reload: bool,
    },

    /// Open a plugin artifact and show what it declares
    Inspect {
        /// Path to the shared library
        artifact: PathBuf,

        /// Expected plugin name (defaults to the file stem)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// List the plugin files the watcher would react to
    Scan {
        /// Plugin directory (defaults to the configured one)
        dir: Option<PathBuf>,
    },

    /// Show the effective runtime configuration
    Config,
}

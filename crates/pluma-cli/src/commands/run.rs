//! `pluma run` command implementation

use std::path::PathBuf;

use anyhow::anyhow;
use colored::Colorize;
use pluma_plugins::{PluginRuntime, RuntimeConfig};

use crate::output::{join_or_dash, table};

/// Execute the `pluma run` command
pub async fn run(
    mut config: RuntimeConfig,
    plugin_dir: Option<PathBuf>,
    no_hot_reload: bool,
) -> anyhow::Result<()> {
    if let Some(dir) = plugin_dir {
        config.plugin_dir = dir;
    }
    if no_hot_reload {
        config.hot_reload = false;
    }

    println!(
        "{} Starting plugin host on {}{}",
        "→".green(),
        config.plugin_dir.display(),
        if config.hot_reload {
            String::new()
        } else {
            " (hot reload disabled)".yellow().to_string()
        }
    );

    let runtime = PluginRuntime::new(config).map_err(|report| anyhow!("{report:?}"))?;
    runtime
        .start()
        .await
        .map_err(|report| anyhow!("{report:?}"))?;

    println!("  Press Ctrl-C to stop.");
    tokio::signal::ctrl_c().await?;

    println!();
    println!("{} Shutting down", "→".green());
    print_statuses(&runtime);

    let failures = runtime.shutdown().await;
    for (name, error) in &failures {
        println!("  {} {}: {}", "✗".red(), name, error);
    }

    let metrics = runtime.metrics();
    println!(
        "  {} errors, {} reloads ({} failed), {} unregistrations",
        metrics.total_errors,
        metrics.reloads_succeeded + metrics.reloads_failed,
        metrics.reloads_failed,
        metrics.unregistrations
    );

    if failures.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("{} plugin(s) failed to shut down", failures.len()))
    }
}

fn print_statuses(runtime: &PluginRuntime) {
    let statuses = runtime.manager().statuses();
    if statuses.is_empty() {
        println!("  No plugins registered.");
        return;
    }
    let rows = statuses.into_iter().map(|s| {
        vec![
            s.name,
            s.version,
            s.state.to_string(),
            s.route_count.to_string(),
            s.reload_count.to_string(),
            join_or_dash(&s.dependencies),
        ]
    });
    println!(
        "{}",
        table(
            &["plugin", "version", "state", "routes", "reloads", "depends on"],
            rows
        )
    );
}

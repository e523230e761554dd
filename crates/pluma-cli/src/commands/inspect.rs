//! `pluma inspect` command implementation

use std::path::Path;

use anyhow::Context;
use colored::Colorize;
use pluma_kernel::plugin::namespaced_path;
use pluma_plugins::{NativeLoader, Plugin, PluginLoader};
use serde::Serialize;

use crate::output::{OutputFormat, join_or_dash, print_json, table};

#[derive(Debug, Clone, Serialize)]
struct InspectReport {
    name: String,
    version: String,
    description: String,
    dependencies: Vec<String>,
    conflicts: Vec<String>,
    sha256: Option<String>,
    routes: Vec<RouteInfo>,
}

#[derive(Debug, Clone, Serialize)]
struct RouteInfo {
    method: String,
    path: String,
    auth_required: bool,
    middlewares: usize,
    description: String,
}

/// Execute the `pluma inspect` command
///
/// Lifecycle hooks are not run; the artifact is only opened and its
/// declarations read.
pub async fn run(artifact: &Path, name: Option<&str>, format: OutputFormat) -> anyhow::Result<()> {
    let name = match name {
        Some(name) => name.to_string(),
        None => artifact
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string)
            .with_context(|| format!("Cannot derive a plugin name from {}", artifact.display()))?,
    };

    let loader = NativeLoader::new().context("Failed to create artifact shadow directory")?;
    let plugin = loader.load_plugin(artifact, &name).await?;

    let descriptor = plugin.descriptor();
    let report = InspectReport {
        name: descriptor.name.clone(),
        version: descriptor.version.clone(),
        description: descriptor.description.clone(),
        dependencies: descriptor.dependencies.iter().cloned().collect(),
        conflicts: descriptor.conflicts.iter().cloned().collect(),
        sha256: loader.artifact_info(&name).await.map(|info| info.sha256),
        routes: plugin
            .routes()
            .iter()
            .map(|route| RouteInfo {
                method: route.method.to_string(),
                path: namespaced_path(&name, &route.path),
                auth_required: route.auth_required,
                middlewares: route.middlewares.len(),
                description: route.description.clone(),
            })
            .collect(),
    };

    drop(plugin);
    loader.unload_plugin(&name).await?;

    if format == OutputFormat::Json {
        return print_json(&report);
    }

    println!(
        "{} {} {}",
        "→".green(),
        report.name.bold(),
        format!("v{}", report.version).dimmed()
    );
    if !report.description.is_empty() {
        println!("  {}", report.description);
    }
    println!("  depends on: {}", join_or_dash(&report.dependencies));
    println!("  conflicts:  {}", join_or_dash(&report.conflicts));
    if let Some(sha) = &report.sha256 {
        println!("  sha256:     {sha}");
    }
    println!();

    if report.routes.is_empty() {
        println!("  No routes declared.");
        return Ok(());
    }
    let rows = report.routes.iter().map(|r| {
        vec![
            r.method.clone(),
            r.path.clone(),
            if r.auth_required { "yes" } else { "no" }.to_string(),
            r.middlewares.to_string(),
            r.description.clone(),
        ]
    });
    println!(
        "{}",
        table(&["method", "path", "auth", "middlewares", "description"], rows)
    );
    Ok(())
}

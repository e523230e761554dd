//! `pluma scan` command implementation

use std::path::Path;

use anyhow::bail;
use chrono::{DateTime, Utc};
use colored::Colorize;
use pluma_plugins::{RuntimeConfig, WatchConfig};
use serde::Serialize;

use crate::output::{OutputFormat, print_json, table};

#[derive(Debug, Clone, Serialize)]
struct ScanEntry {
    file: String,
    plugin: String,
    kind: &'static str,
    size: u64,
    modified: Option<DateTime<Utc>>,
}

/// Execute the `pluma scan` command
pub fn run(config: &RuntimeConfig, dir: &Path, format: OutputFormat) -> anyhow::Result<()> {
    if !dir.is_dir() {
        bail!("Plugin directory does not exist: {}", dir.display());
    }

    let watch = WatchConfig {
        plugin_dir: dir.to_path_buf(),
        ..config.watch_config()
    };
    let entries = scan_dir(&watch)?;

    if format == OutputFormat::Json {
        return print_json(&entries);
    }

    println!("{} Scanning {}", "→".green(), dir.display());
    println!();
    if entries.is_empty() {
        println!("  No plugin files found.");
        return Ok(());
    }

    let rows = entries.iter().map(|e| {
        vec![
            e.plugin.clone(),
            e.kind.to_string(),
            e.file.clone(),
            e.size.to_string(),
            e.modified
                .map(|m| m.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string()),
        ]
    });
    println!("{}", table(&["plugin", "kind", "file", "bytes", "modified"], rows));
    Ok(())
}

fn scan_dir(watch: &WatchConfig) -> anyhow::Result<Vec<ScanEntry>> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(&watch.plugin_dir)? {
        let path = entry?.path();
        let Some(plugin) = watch.plugin_name(&path) else {
            continue;
        };
        let metadata = std::fs::metadata(&path)?;
        if !metadata.is_file() {
            continue;
        }
        entries.push(ScanEntry {
            file: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            plugin,
            kind: if watch.is_artifact(&path) {
                "artifact"
            } else {
                "source"
            },
            size: metadata.len(),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        });
    }
    entries.sort_by(|a, b| (&a.plugin, a.kind).cmp(&(&b.plugin, b.kind)));
    Ok(entries)
}

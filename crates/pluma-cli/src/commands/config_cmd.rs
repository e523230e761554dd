//! `pluma config` command implementation

use crate::output::{OutputFormat, print_json, table};
use colored::Colorize;
use pluma_plugins::RuntimeConfig;
use serde_json::Value;

/// Execute the `pluma config` command
pub fn run(config: &RuntimeConfig, format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        return print_json(config);
    }

    println!("{} Effective runtime configuration", "→".green());
    println!();

    let value = serde_json::to_value(config)?;
    let rows = value
        .as_object()
        .into_iter()
        .flatten()
        .map(|(key, value)| {
            let rendered = match value {
                Value::String(s) => s.clone(),
                Value::Array(items) => items
                    .iter()
                    .map(|i| i.as_str().map(str::to_string).unwrap_or_else(|| i.to_string()))
                    .collect::<Vec<_>>()
                    .join(", "),
                other => other.to_string(),
            };
            vec![key.clone(), rendered]
        });
    println!("{}", table(&["key", "value"], rows));
    Ok(())
}

//! CLI command implementations

pub mod config_cmd;
pub mod inspect;
pub mod run;
pub mod scan;

use std::path::Path;

use anyhow::anyhow;
use pluma_plugins::RuntimeConfig;

/// Configuration file looked up in the working directory when `--config` is
/// not given.
pub const DEFAULT_CONFIG_FILE: &str = "pluma.toml";

/// Load the runtime configuration: the explicit file, else `pluma.toml` if
/// present, else defaults.
pub fn load_runtime_config(path: Option<&Path>) -> anyhow::Result<RuntimeConfig> {
    let path = match path {
        Some(path) => path,
        None if Path::new(DEFAULT_CONFIG_FILE).is_file() => Path::new(DEFAULT_CONFIG_FILE),
        None => return Ok(RuntimeConfig::default()),
    };
    RuntimeConfig::load(path).map_err(|report| anyhow!("{report:?}"))
}

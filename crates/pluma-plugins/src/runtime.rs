//! Plugin host runtime
//!
//! Wires a [`PluginManager`], a [`PluginLoader`] and a [`PluginWatcher`]
//! together from one configuration file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use error_stack::{Report, ResultExt};
use pluma_kernel::config::{ConfigError, load_config};
use pluma_kernel::metrics::{PluginCounters, PluginMetricsSnapshot};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::hot_reload::{NativeLoader, PluginLoader, PluginWatcher, WatchConfig, WatcherError};
use crate::manager::{ManagerConfig, ManagerError, PluginManager};

/// Error-stack backed result alias for runtime operations.
pub type RuntimeResult<T> = ::std::result::Result<T, Report<RuntimeError>>;

/// Extension trait to convert component errors into [`RuntimeResult<T>`].
pub trait IntoRuntimeReport<T> {
    /// Wrap the error in an `error_stack::Report`.
    fn into_report(self) -> RuntimeResult<T>;
}

impl<T, E> IntoRuntimeReport<T> for ::std::result::Result<T, E>
where
    E: Into<RuntimeError>,
{
    #[inline]
    fn into_report(self) -> RuntimeResult<T> {
        self.map_err(|e| Report::new(e.into()))
    }
}

/// Errors raised while bringing the plugin host up or down.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RuntimeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Plugin watcher error: {0}")]
    Watcher(#[from] WatcherError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Host configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Directory holding plugin artifacts
    pub plugin_dir: PathBuf,
    /// Apply plugin changes automatically
    pub hot_reload: bool,
    pub scan_interval_secs: u64,
    pub debounce_ms: u64,
    /// Enable plugins right after registration
    pub auto_enable: bool,
    /// Subscribe to native filesystem events
    pub fs_events: bool,
    /// Source file extensions that also trigger a reload
    pub source_extensions: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            plugin_dir: PathBuf::from("plugins"),
            hot_reload: true,
            scan_interval_secs: 5,
            debounce_ms: 500,
            auto_enable: true,
            fs_events: true,
            source_extensions: vec!["rs".to_string()],
        }
    }
}

impl RuntimeConfig {
    /// Load from a TOML, YAML or JSON file, with `${VAR}` substitution.
    pub fn load(path: impl AsRef<Path>) -> RuntimeResult<Self> {
        let path = path.as_ref();
        load_config(path)
            .into_report()
            .attach(format!("loading runtime config {}", path.display()))
    }

    pub fn watch_config(&self) -> WatchConfig {
        WatchConfig::new(&self.plugin_dir)
            .with_hot_reload(self.hot_reload)
            .with_scan_interval(Duration::from_secs(self.scan_interval_secs))
            .with_debounce(Duration::from_millis(self.debounce_ms))
            .with_source_extensions(self.source_extensions.clone())
            .with_fs_events(self.fs_events)
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig::new().with_auto_enable(self.auto_enable)
    }
}

/// A running plugin host
pub struct PluginRuntime {
    config: RuntimeConfig,
    manager: Arc<PluginManager>,
    loader: Arc<dyn PluginLoader>,
    watcher: PluginWatcher,
    counters: Arc<PluginCounters>,
}

impl PluginRuntime {
    /// Build a runtime loading native shared libraries.
    pub fn new(config: RuntimeConfig) -> RuntimeResult<Self> {
        let loader = NativeLoader::new()
            .into_report()
            .attach("creating artifact shadow directory")?;
        Ok(Self::with_loader(config, Arc::new(loader)))
    }

    /// Build a runtime with a custom loader, e.g. a
    /// [`StaticLoader`](crate::hot_reload::StaticLoader).
    pub fn with_loader(config: RuntimeConfig, loader: Arc<dyn PluginLoader>) -> Self {
        Self::with_manager_config(config.manager_config(), config, loader)
    }

    /// Like [`with_loader`](Self::with_loader), with explicit manager settings
    /// such as global middlewares.
    pub fn with_manager_config(
        manager_config: ManagerConfig,
        config: RuntimeConfig,
        loader: Arc<dyn PluginLoader>,
    ) -> Self {
        let counters = Arc::new(PluginCounters::new());
        let manager = PluginManager::with_metrics(manager_config, counters.clone());
        let watcher = PluginWatcher::new(config.watch_config(), manager.clone(), loader.clone());
        Self {
            config,
            manager,
            loader,
            watcher,
            counters,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<PluginManager> {
        &self.manager
    }

    pub fn loader(&self) -> &Arc<dyn PluginLoader> {
        &self.loader
    }

    pub fn watcher(&self) -> &PluginWatcher {
        &self.watcher
    }

    pub fn metrics(&self) -> PluginMetricsSnapshot {
        self.counters.snapshot()
    }

    /// Create the plugin directory if needed and start watching it.
    pub async fn start(&self) -> RuntimeResult<()> {
        let dir = &self.config.plugin_dir;
        std::fs::create_dir_all(dir)
            .into_report()
            .attach(format!("creating plugin directory {}", dir.display()))?;

        self.watcher
            .start()
            .await
            .into_report()
            .attach(format!("watching {}", dir.display()))?;

        info!(
            plugin_dir = ?dir,
            hot_reload = self.config.hot_reload,
            "Plugin runtime started"
        );
        Ok(())
    }

    /// Stop the watcher, then shut every plugin down, dependents first.
    ///
    /// Returns the plugins whose shutdown failed.
    pub async fn shutdown(&self) -> Vec<(String, ManagerError)> {
        self.watcher.stop().await;
        let failures = self.manager.shutdown_all().await;
        if failures.is_empty() {
            info!("Plugin runtime stopped");
        } else {
            warn!(failed = failures.len(), "Plugin runtime stopped with failures");
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_config_defaults_fill_missing_keys() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("pluma.toml");
        std::fs::write(&path, "plugin_dir = \"/srv/plugins\"\nhot_reload = false\n").unwrap();

        let config = RuntimeConfig::load(&path).unwrap();
        assert_eq!(config.plugin_dir, PathBuf::from("/srv/plugins"));
        assert!(!config.hot_reload);
        assert_eq!(config.scan_interval_secs, 5);
        assert_eq!(config.debounce_ms, 500);
        assert!(config.auto_enable);
    }

    #[test]
    fn test_runtime_config_missing_file_reports_context() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("absent.yaml");

        let report = RuntimeConfig::load(&path).unwrap_err();
        assert!(matches!(
            report.current_context(),
            RuntimeError::Config(ConfigError::Io(_))
        ));
        assert!(format!("{report:?}").contains("absent.yaml"));
    }

    #[test]
    fn test_watch_config_mapping() {
        let config = RuntimeConfig {
            debounce_ms: 50,
            scan_interval_secs: 1,
            fs_events: false,
            ..RuntimeConfig::default()
        };
        let watch = config.watch_config();
        assert_eq!(watch.debounce, Duration::from_millis(50));
        assert_eq!(watch.scan_interval, Duration::from_secs(1));
        assert!(!watch.fs_events);
        assert_eq!(watch.plugin_dir, PathBuf::from("plugins"));
    }
}

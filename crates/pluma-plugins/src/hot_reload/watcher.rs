//! File system watcher for the plugin directory
//!
//! Turns changes in the plugin directory into loader and manager calls.
//! While started, three tasks run: one forwarding native filesystem events,
//! one rescanning the directory periodically to catch missed events, and a
//! single consumer applying settled changes one at a time.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use pluma_kernel::metrics::PluginMetrics;
use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::loader::{PluginLoader, artifact_path};
use super::queue::DebounceQueue;
use crate::manager::PluginManager;

const MIN_SCAN_INTERVAL: Duration = Duration::from_millis(10);

/// Watch configuration
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Directory holding plugin artifacts and sources
    pub plugin_dir: PathBuf,
    /// Apply changes automatically; when off, changes are only logged
    pub hot_reload: bool,
    /// Interval of the reconciliation scan
    pub scan_interval: Duration,
    /// Quiet period a file must reach before its change is applied
    pub debounce: Duration,
    /// Capacity of the work queue
    pub queue_capacity: usize,
    /// Extension of loadable artifacts
    pub artifact_extension: String,
    /// Extensions of plugin sources that also count as changes
    pub source_extensions: Vec<String>,
    /// Ignore patterns (`*suffix`, `prefix*` or exact names)
    pub ignore_patterns: Vec<String>,
    /// Subscribe to native filesystem events; when off, only scans run
    pub fs_events: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            plugin_dir: PathBuf::from("plugins"),
            hot_reload: true,
            scan_interval: Duration::from_secs(5),
            debounce: Duration::from_millis(500),
            queue_capacity: 256,
            artifact_extension: std::env::consts::DLL_EXTENSION.to_string(),
            source_extensions: vec!["rs".to_string()],
            ignore_patterns: vec!["*.tmp".to_string(), "*.swp".to_string(), "*~".to_string()],
            fs_events: true,
        }
    }
}

impl WatchConfig {
    pub fn new(plugin_dir: impl Into<PathBuf>) -> Self {
        Self {
            plugin_dir: plugin_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_hot_reload(mut self, enabled: bool) -> Self {
        self.hot_reload = enabled;
        self
    }

    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = interval;
        self
    }

    pub fn with_debounce(mut self, duration: Duration) -> Self {
        self.debounce = duration;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_source_extensions(mut self, extensions: Vec<String>) -> Self {
        self.source_extensions = extensions;
        self
    }

    pub fn with_ignore(mut self, pattern: &str) -> Self {
        self.ignore_patterns.push(pattern.to_string());
        self
    }

    pub fn with_fs_events(mut self, enabled: bool) -> Self {
        self.fs_events = enabled;
        self
    }

    /// Check if a path is a plugin file worth reacting to
    pub fn should_watch(&self, path: &Path) -> bool {
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        if file_name.starts_with('.') {
            return false;
        }

        for pattern in &self.ignore_patterns {
            if let Some(suffix) = pattern.strip_prefix('*') {
                if file_name.ends_with(suffix) {
                    return false;
                }
            } else if let Some(prefix) = pattern.strip_suffix('*') {
                if file_name.starts_with(prefix) {
                    return false;
                }
            } else if file_name == pattern {
                return false;
            }
        }

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        ext == self.artifact_extension || self.source_extensions.iter().any(|e| e == ext)
    }

    /// Plugin a watched file belongs to: its file stem
    pub fn plugin_name(&self, path: &Path) -> Option<String> {
        if !self.should_watch(path) {
            return None;
        }
        path.file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    pub fn is_artifact(&self, path: &Path) -> bool {
        path.extension().and_then(|e| e.to_str()) == Some(self.artifact_extension.as_str())
    }

    /// Where the artifact for `name` is expected
    pub fn artifact_path(&self, name: &str) -> PathBuf {
        artifact_path(&self.plugin_dir, name, &self.artifact_extension)
    }
}

/// A file the watcher has processed at least once
#[derive(Debug, Clone, Serialize)]
pub struct WatchedFile {
    pub path: PathBuf,
    pub plugin_name: String,
    /// Modification time at the last processed change
    pub last_processed: Option<SystemTime>,
}

/// Watcher errors
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum WatcherError {
    #[error("Plugin directory does not exist: {}", .0.display())]
    MissingDirectory(PathBuf),

    #[error("Plugin watcher is already running")]
    AlreadyRunning,

    #[error("Filesystem watch failed: {0}")]
    Notify(#[from] notify::Error),
}

/// State shared by the watcher tasks
struct WatcherShared {
    config: WatchConfig,
    manager: Arc<PluginManager>,
    loader: Arc<dyn PluginLoader>,
    metrics: Arc<dyn PluginMetrics>,
    tracked: RwLock<HashMap<PathBuf, WatchedFile>>,
}

struct Running {
    cancel: CancellationToken,
    queue: Arc<DebounceQueue>,
    fs_watcher: Option<RecommendedWatcher>,
    tasks: Vec<JoinHandle<()>>,
}

/// Plugin directory watcher
pub struct PluginWatcher {
    shared: Arc<WatcherShared>,
    running: Mutex<Option<Running>>,
}

impl PluginWatcher {
    /// Create a watcher that applies changes to `manager` using `loader`.
    ///
    /// Failures are reported to the manager's metrics sink.
    pub fn new(
        config: WatchConfig,
        manager: Arc<PluginManager>,
        loader: Arc<dyn PluginLoader>,
    ) -> Self {
        let metrics = manager.metrics();
        Self {
            shared: Arc::new(WatcherShared {
                config,
                manager,
                loader,
                metrics,
                tracked: RwLock::new(HashMap::new()),
            }),
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &WatchConfig {
        &self.shared.config
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Start watching. Performs an initial scan so files already present are
    /// queued immediately.
    pub async fn start(&self) -> Result<(), WatcherError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(WatcherError::AlreadyRunning);
        }

        let config = &self.shared.config;
        if !config.plugin_dir.is_dir() {
            return Err(WatcherError::MissingDirectory(config.plugin_dir.clone()));
        }

        info!(
            plugin_dir = ?config.plugin_dir,
            hot_reload = config.hot_reload,
            fs_events = config.fs_events,
            "Starting plugin watcher"
        );

        let fs_source = if config.fs_events {
            let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
            let mut watcher = RecommendedWatcher::new(
                move |result: Result<Event, notify::Error>| {
                    let _ = tx.blocking_send(result);
                },
                Config::default(),
            )?;
            watcher.watch(&config.plugin_dir, RecursiveMode::NonRecursive)?;
            Some((watcher, rx))
        } else {
            None
        };

        let cancel = CancellationToken::new();
        let (queue, work_rx) =
            DebounceQueue::new(config.debounce, config.queue_capacity, cancel.clone());

        self.shared.scan(&queue).await;

        let mut tasks = vec![
            tokio::spawn(run_consumer(
                self.shared.clone(),
                queue.clone(),
                work_rx,
                cancel.clone(),
            )),
            tokio::spawn(run_scanner(
                self.shared.clone(),
                queue.clone(),
                cancel.clone(),
            )),
        ];

        let fs_watcher = match fs_source {
            Some((watcher, events)) => {
                tasks.push(tokio::spawn(run_event_forwarder(
                    self.shared.clone(),
                    queue.clone(),
                    events,
                    cancel.clone(),
                )));
                Some(watcher)
            }
            None => None,
        };

        *running = Some(Running {
            cancel,
            queue,
            fs_watcher,
            tasks,
        });
        Ok(())
    }

    /// Stop watching. Waits for an in-flight change to finish; queued and
    /// pending changes are discarded and tracking is cleared.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        info!("Stopping plugin watcher");
        running.cancel.cancel();
        drop(running.fs_watcher);

        for task in running.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Watcher task ended abnormally");
            }
        }

        self.shared.tracked.write().clear();
    }

    /// Report a change to `path` as if the filesystem had.
    ///
    /// Returns `true` if this started a new debounce window for the path.
    pub async fn notify_path(&self, path: impl Into<PathBuf>) -> bool {
        let path = path.into();
        if !self.shared.config.should_watch(&path) {
            return false;
        }
        match self.running.lock().await.as_ref() {
            Some(running) => running.queue.schedule(path),
            None => false,
        }
    }

    /// Run a reconciliation scan now instead of waiting for the next tick.
    pub async fn scan_now(&self) {
        let queue = match self.running.lock().await.as_ref() {
            Some(running) => running.queue.clone(),
            None => return,
        };
        self.shared.scan(&queue).await;
    }

    /// Files processed so far, ordered by path
    pub fn tracked_files(&self) -> Vec<WatchedFile> {
        let mut files: Vec<WatchedFile> = self.shared.tracked.read().values().cloned().collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files
    }
}

impl WatcherShared {
    fn handle_event(&self, queue: &Arc<DebounceQueue>, event: Event) {
        if matches!(event.kind, EventKind::Access(_)) {
            return;
        }
        for path in event.paths {
            if self.config.should_watch(&path) {
                queue.schedule(path);
            }
        }
    }

    /// Queue new, changed and vanished files.
    async fn scan(&self, queue: &Arc<DebounceQueue>) {
        let entries = match std::fs::read_dir(&self.config.plugin_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(plugin_dir = ?self.config.plugin_dir, error = %e, "Plugin directory scan failed");
                return;
            }
        };

        let mut present: HashMap<PathBuf, Option<SystemTime>> = HashMap::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !self.config.should_watch(&path) {
                continue;
            }
            match std::fs::metadata(&path) {
                Ok(metadata) if metadata.is_file() => {
                    present.insert(path, metadata.modified().ok());
                }
                _ => {}
            }
        }

        let queued: Vec<PathBuf> = {
            let tracked = self.tracked.read();
            let vanished = tracked.keys().filter(|p| !present.contains_key(*p)).cloned();
            let changed = present
                .iter()
                .filter(|(path, modified)| match tracked.get(*path) {
                    None => true,
                    Some(file) => modified.is_some() && file.last_processed != **modified,
                })
                .map(|(path, _)| path.clone());
            vanished.chain(changed).collect()
        };

        if !queued.is_empty() {
            debug!(count = queued.len(), "Scan found unprocessed changes");
        }
        for path in queued {
            queue.schedule_now(path);
        }
    }

    async fn process(&self, path: &Path) {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.handle_removal(path).await;
                return;
            }
            Err(e) => {
                warn!(path = ?path, error = %e, "Cannot stat changed file");
                return;
            }
        };

        let Some(name) = self.config.plugin_name(path) else {
            return;
        };
        let modified = metadata.modified().ok();

        {
            let mut tracked = self.tracked.write();
            let file = tracked
                .entry(path.to_path_buf())
                .or_insert_with(|| WatchedFile {
                    path: path.to_path_buf(),
                    plugin_name: name.clone(),
                    last_processed: None,
                });
            if modified.is_some() && file.last_processed == modified {
                debug!(path = ?path, "File unchanged since last processed");
                return;
            }
        }

        // A failed change stays unprocessed so the next scan retries it.
        if self.dispatch(path, &name).await {
            if let Some(file) = self.tracked.write().get_mut(path) {
                file.last_processed = modified;
            }
        }
    }

    /// Apply a settled change. Returns `false` if it has to be retried.
    async fn dispatch(&self, path: &Path, name: &str) -> bool {
        if !self.config.hot_reload {
            info!(plugin = name, path = ?path, "Plugin file changed; hot reload disabled");
            return true;
        }

        let artifact = self.config.artifact_path(name);
        if !self.config.is_artifact(path)
            && self.artifact_processed(&artifact)
            && self.loader.is_loaded(name).await
            && self.manager.contains(name)
        {
            debug!(plugin = name, path = ?path, "Artifact unchanged, skipping redundant load");
            return true;
        }

        let instance = match self.loader.load_plugin(&artifact, name).await {
            Ok(instance) => instance,
            Err(e) => {
                warn!(plugin = name, path = ?artifact, error = %e, "Failed to load plugin");
                self.metrics.record_plugin_error(name, &e.to_string());
                return false;
            }
        };

        let result = if self.manager.contains(name) {
            self.manager.reload_plugin(name, instance).await
        } else {
            self.manager.register(instance).await
        };

        match result {
            Ok(()) => {
                info!(plugin = name, "Applied plugin change");
                self.mark_processed(&artifact, name);
                true
            }
            Err(e) => {
                warn!(plugin = name, error = %e, "Failed to apply plugin change");
                self.metrics.record_plugin_error(name, &e.to_string());
                let _ = self.loader.unload_plugin(name).await;
                false
            }
        }
    }

    async fn handle_removal(&self, path: &Path) {
        let removed = self.tracked.write().remove(path);
        let Some(file) = removed else {
            debug!(path = ?path, "Untracked file removed");
            return;
        };
        let name = file.plugin_name;

        if !self.config.hot_reload {
            info!(plugin = %name, path = ?path, "Plugin file removed; hot reload disabled");
            return;
        }

        if self.manager.contains(&name) {
            match self.manager.unregister(&name).await {
                Ok(()) => info!(plugin = %name, path = ?path, "Plugin file removed, unregistered"),
                Err(e) => {
                    warn!(plugin = %name, error = %e, "Failed to unregister removed plugin");
                    self.metrics.record_plugin_error(&name, &e.to_string());
                }
            }
        }

        if self.loader.is_loaded(&name).await {
            if let Err(e) = self.loader.unload_plugin(&name).await {
                debug!(plugin = %name, error = %e, "Loader unload failed");
            }
        }
    }

    /// Whether the artifact on disk is the one last loaded
    fn artifact_processed(&self, artifact: &Path) -> bool {
        let Ok(modified) = std::fs::metadata(artifact).and_then(|m| m.modified()) else {
            return false;
        };
        self.tracked
            .read()
            .get(artifact)
            .is_some_and(|file| file.last_processed == Some(modified))
    }

    fn mark_processed(&self, artifact: &Path, name: &str) {
        let Ok(modified) = std::fs::metadata(artifact).and_then(|m| m.modified()) else {
            return;
        };
        let mut tracked = self.tracked.write();
        let file = tracked
            .entry(artifact.to_path_buf())
            .or_insert_with(|| WatchedFile {
                path: artifact.to_path_buf(),
                plugin_name: name.to_string(),
                last_processed: None,
            });
        file.last_processed = Some(modified);
    }
}

async fn run_consumer(
    shared: Arc<WatcherShared>,
    queue: Arc<DebounceQueue>,
    mut work: mpsc::Receiver<PathBuf>,
    cancel: CancellationToken,
) {
    loop {
        let path = tokio::select! {
            _ = cancel.cancelled() => break,
            next = work.recv() => match next {
                Some(path) => path,
                None => break,
            },
        };

        if let Some(wait) = queue.take(&path) {
            queue.defer(path, wait);
            continue;
        }
        shared.process(&path).await;
    }
    debug!("Watcher consumer stopped");
}

async fn run_scanner(
    shared: Arc<WatcherShared>,
    queue: Arc<DebounceQueue>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(shared.config.scan_interval.max(MIN_SCAN_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; start() has already scanned.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => shared.scan(&queue).await,
        }
    }
    debug!("Watcher scanner stopped");
}

async fn run_event_forwarder(
    shared: Arc<WatcherShared>,
    queue: Arc<DebounceQueue>,
    mut events: mpsc::Receiver<Result<Event, notify::Error>>,
    cancel: CancellationToken,
) {
    loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            next = events.recv() => match next {
                Some(result) => result,
                None => break,
            },
        };
        match result {
            Ok(event) => shared.handle_event(&queue, event),
            Err(e) => warn!(error = %e, "Filesystem watch error"),
        }
    }
    debug!("Watcher event forwarder stopped");
}

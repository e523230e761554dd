//! Dynamic plugin loader
//!
//! Turns a compiled plugin artifact into a plugin instance. The
//! [`PluginLoader`] trait keeps the manager and watcher agnostic of how code
//! is materialized; [`NativeLoader`] opens shared libraries, while
//! [`StaticLoader`](super::StaticLoader) serves constructors linked into the
//! host at build time.

use std::any::Any;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libloading::{Library, Symbol};
use pluma_kernel::plugin::{
    Middleware, Plugin, PluginDescriptor, PluginIntrospection, PluginResult, Route,
};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Constructor every plugin artifact exports.
pub const PLUGIN_ENTRY_SYMBOL: &str = "_pluma_plugin_create";
/// ABI version every plugin artifact exports.
pub const PLUGIN_ABI_SYMBOL: &str = "_pluma_plugin_abi_version";
/// Current plugin ABI version. Bump whenever the `Plugin` trait changes shape.
pub const PLUGIN_ABI_VERSION: u32 = 1;

type PluginCreate = unsafe extern "C" fn() -> *mut dyn Plugin;
type PluginAbiVersion = unsafe extern "C" fn() -> u32;

/// Plugin load error types
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum LoaderError {
    #[error("Failed to open plugin artifact {}: {reason}", .path.display())]
    OpenFailed { path: PathBuf, reason: String },

    #[error("Entry point {symbol} not found in {}: {reason}", .path.display())]
    EntryPointNotFound {
        path: PathBuf,
        symbol: String,
        reason: String,
    },

    #[error("Entry point in {} has an incompatible signature: {reason}", .path.display())]
    EntryPointTypeMismatch { path: PathBuf, reason: String },

    #[error("Plugin construction failed for {}: {reason}", .path.display())]
    CreationFailed { path: PathBuf, reason: String },

    #[error("Artifact {} declares plugin '{actual}', expected '{expected}'", .path.display())]
    NameMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Plugin artifact not loaded: {0}")]
    NotLoaded(String),
}

impl LoaderError {
    fn open(path: &Path, reason: impl ToString) -> Self {
        Self::OpenFailed {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

pub type LoaderResult<T> = Result<T, LoaderError>;

/// Materializes plugin instances from artifacts.
#[async_trait]
pub trait PluginLoader: Send + Sync {
    /// Load the artifact at `artifact` and construct the plugin it exports.
    ///
    /// An artifact already open under `expected_name` is unloaded first so a
    /// reload never reuses stale code.
    async fn load_plugin(&self, artifact: &Path, expected_name: &str)
    -> LoaderResult<Arc<dyn Plugin>>;

    /// Drop the loader's bookkeeping for `name`.
    ///
    /// This is a logical unload. Native code stays mapped as long as an
    /// instance created from it is alive, and the platform may keep it
    /// mapped until process exit.
    async fn unload_plugin(&self, name: &str) -> LoaderResult<()>;

    /// Whether an artifact for `name` is currently open.
    async fn is_loaded(&self, name: &str) -> bool;
}

/// File name of the artifact for `name` with the given extension.
pub fn artifact_file_name(name: &str, extension: &str) -> String {
    format!("{name}.{extension}")
}

/// `<plugin_dir>/<name>.<extension>`
pub fn artifact_path(plugin_dir: &Path, name: &str, extension: &str) -> PathBuf {
    plugin_dir.join(artifact_file_name(name, extension))
}

/// Calculate the SHA-256 of a file
pub(crate) fn calculate_hash(path: &Path) -> std::io::Result<String> {
    let contents = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&contents);
    Ok(format!("{:x}", hasher.finalize()))
}

// ============================================================================
// Native loader
// ============================================================================

/// Diagnostics about an open artifact
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactInfo {
    pub name: String,
    /// Artifact as found in the plugin directory
    pub path: PathBuf,
    /// Private copy actually handed to the platform loader. Already
    /// unlinked on unix, where the mapping outlives the file.
    pub shadow_path: PathBuf,
    pub sha256: String,
    pub loaded_at: DateTime<Utc>,
}

/// An open artifact
struct ArtifactHandle {
    info: ArtifactInfo,
    library: Arc<Library>,
}

/// A plugin instance constructed from a shared library.
///
/// Keeps the library mapped for as long as the instance lives.
struct LibraryPlugin {
    // Field order matters: the instance must drop before its library.
    inner: Box<dyn Plugin>,
    _library: Arc<Library>,
}

#[async_trait]
impl Plugin for LibraryPlugin {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    fn version(&self) -> &str {
        self.inner.version()
    }

    fn dependencies(&self) -> Vec<String> {
        self.inner.dependencies()
    }

    fn conflicts(&self) -> Vec<String> {
        self.inner.conflicts()
    }

    async fn init(&self) -> PluginResult<()> {
        self.inner.init().await
    }

    async fn shutdown(&self) -> PluginResult<()> {
        self.inner.shutdown().await
    }

    async fn on_enable(&self) -> PluginResult<()> {
        self.inner.on_enable().await
    }

    async fn on_disable(&self) -> PluginResult<()> {
        self.inner.on_disable().await
    }

    fn routes(&self) -> Vec<Route> {
        self.inner.routes()
    }

    fn default_middlewares(&self) -> Vec<Arc<dyn Middleware>> {
        self.inner.default_middlewares()
    }

    fn set_plugin_manager(&self, manager: Weak<dyn PluginIntrospection>) {
        self.inner.set_plugin_manager(manager)
    }

    fn descriptor(&self) -> PluginDescriptor {
        self.inner.descriptor()
    }

    fn as_any(&self) -> &dyn Any {
        self.inner.as_any()
    }
}

/// Loads plugins from platform shared libraries (`.so`, `.dylib`, `.dll`).
///
/// Each load opens a uniquely named copy of the artifact, so the platform
/// loader cannot return a cached handle for a path it has already mapped.
pub struct NativeLoader {
    /// Open artifacts by plugin name
    artifacts: RwLock<HashMap<String, ArtifactHandle>>,
    /// Where artifact copies are opened from
    shadow_dir: tempfile::TempDir,
}

impl NativeLoader {
    pub fn new() -> std::io::Result<Self> {
        let shadow_dir = tempfile::Builder::new()
            .prefix("pluma-artifacts-")
            .tempdir()?;
        debug!(shadow_dir = ?shadow_dir.path(), "Created artifact shadow directory");
        Ok(Self {
            artifacts: RwLock::new(HashMap::new()),
            shadow_dir,
        })
    }

    pub fn shadow_dir(&self) -> &Path {
        self.shadow_dir.path()
    }

    /// Diagnostics for an open artifact
    pub async fn artifact_info(&self, name: &str) -> Option<ArtifactInfo> {
        let artifacts = self.artifacts.read().await;
        artifacts.get(name).map(|h| h.info.clone())
    }

    /// Names of all open artifacts
    pub async fn list_loaded(&self) -> Vec<String> {
        let artifacts = self.artifacts.read().await;
        let mut names: Vec<String> = artifacts.keys().cloned().collect();
        names.sort();
        names
    }

    /// Copy, open and construct. Returns the live library and its instance.
    ///
    /// The copy never outlives a failed load. On unix it is unlinked as soon
    /// as it is mapped.
    fn open_artifact(
        &self,
        path: &Path,
        expected_name: &str,
    ) -> LoaderResult<(ArtifactInfo, Arc<Library>, Box<dyn Plugin>)> {
        if !path.is_file() {
            return Err(LoaderError::open(path, "artifact does not exist"));
        }

        let sha256 = calculate_hash(path).map_err(|e| LoaderError::open(path, e))?;
        let shadow_path = self.shadow_dir.path().join(format!(
            "{}-{}.{}",
            expected_name,
            uuid::Uuid::now_v7(),
            path.extension().and_then(|e| e.to_str()).unwrap_or("lib")
        ));
        std::fs::copy(path, &shadow_path).map_err(|e| LoaderError::open(path, e))?;

        let opened = Self::open_copy(path, &shadow_path, expected_name);
        if cfg!(unix) || opened.is_err() {
            remove_shadow_copy(&shadow_path);
        }
        let (library, plugin) = opened?;

        let info = ArtifactInfo {
            name: expected_name.to_string(),
            path: path.to_path_buf(),
            shadow_path,
            sha256,
            loaded_at: Utc::now(),
        };
        Ok((info, Arc::new(library), plugin))
    }

    fn open_copy(
        path: &Path,
        shadow_path: &Path,
        expected_name: &str,
    ) -> LoaderResult<(Library, Box<dyn Plugin>)> {
        // SAFETY: loading a library runs its initializers; artifacts in the
        // plugin directory are trusted by the host operator.
        let library =
            unsafe { Library::new(shadow_path) }.map_err(|e| LoaderError::open(path, e))?;

        let plugin = {
            // SAFETY: symbol types are fixed by `declare_plugin!`.
            let create: Symbol<PluginCreate> = unsafe {
                library.get(PLUGIN_ENTRY_SYMBOL.as_bytes())
            }
            .map_err(|e| LoaderError::EntryPointNotFound {
                path: path.to_path_buf(),
                symbol: PLUGIN_ENTRY_SYMBOL.to_string(),
                reason: e.to_string(),
            })?;

            let abi_version: Symbol<PluginAbiVersion> = unsafe {
                library.get(PLUGIN_ABI_SYMBOL.as_bytes())
            }
            .map_err(|e| LoaderError::EntryPointTypeMismatch {
                path: path.to_path_buf(),
                reason: format!("missing {PLUGIN_ABI_SYMBOL}: {e}"),
            })?;

            let actual = unsafe { abi_version() };
            if actual != PLUGIN_ABI_VERSION {
                return Err(LoaderError::EntryPointTypeMismatch {
                    path: path.to_path_buf(),
                    reason: format!("ABI version {actual}, host expects {PLUGIN_ABI_VERSION}"),
                });
            }

            let raw = unsafe { create() };
            if raw.is_null() {
                return Err(LoaderError::CreationFailed {
                    path: path.to_path_buf(),
                    reason: "constructor returned null".to_string(),
                });
            }
            // SAFETY: non-null pointer produced by `Box::into_raw` in the artifact.
            unsafe { Box::from_raw(raw) }
        };

        if plugin.name() != expected_name {
            return Err(LoaderError::NameMismatch {
                path: path.to_path_buf(),
                expected: expected_name.to_string(),
                actual: plugin.name().to_string(),
            });
        }

        Ok((library, plugin))
    }
}

/// Drop the loader's reference to an artifact. The copy is deleted once no
/// instance built from it is left.
fn release_artifact(handle: ArtifactHandle) -> bool {
    let ArtifactHandle { info, library } = handle;
    let instances_alive = Arc::strong_count(&library) > 1;
    drop(library);
    if !instances_alive {
        remove_shadow_copy(&info.shadow_path);
    }
    instances_alive
}

fn remove_shadow_copy(shadow_path: &Path) {
    match std::fs::remove_file(shadow_path) {
        Ok(()) => debug!(path = ?shadow_path, "Removed artifact copy"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => debug!(path = ?shadow_path, error = %e, "Artifact copy not removed"),
    }
}

#[async_trait]
impl PluginLoader for NativeLoader {
    async fn load_plugin(
        &self,
        artifact: &Path,
        expected_name: &str,
    ) -> LoaderResult<Arc<dyn Plugin>> {
        let previous = self.artifacts.write().await.remove(expected_name);
        if let Some(previous) = previous {
            let path = previous.info.path.clone();
            let instances_alive = release_artifact(previous);
            info!(
                plugin = expected_name,
                path = ?path,
                instances_alive,
                "Unloaded previous artifact before reload"
            );
        }

        let (info, library, plugin) = self.open_artifact(artifact, expected_name)?;

        info!(
            plugin = expected_name,
            path = ?info.path,
            sha256 = %info.sha256,
            version = plugin.version(),
            "Loaded plugin artifact"
        );

        let instance: Arc<dyn Plugin> = Arc::new(LibraryPlugin {
            inner: plugin,
            _library: library.clone(),
        });
        self.artifacts
            .write()
            .await
            .insert(expected_name.to_string(), ArtifactHandle { info, library });

        Ok(instance)
    }

    async fn unload_plugin(&self, name: &str) -> LoaderResult<()> {
        let mut artifacts = self.artifacts.write().await;
        match artifacts.remove(name) {
            Some(handle) => {
                let path = handle.info.path.clone();
                let instances_alive = release_artifact(handle);
                info!(
                    plugin = name,
                    path = ?path,
                    instances_alive,
                    "Unloaded plugin artifact"
                );
                Ok(())
            }
            None => Err(LoaderError::NotLoaded(name.to_string())),
        }
    }

    async fn is_loaded(&self, name: &str) -> bool {
        self.artifacts.read().await.contains_key(name)
    }
}

/// Export the entry points the native loader resolves.
///
/// Use once at the root of a plugin `cdylib`:
///
/// ```rust,ignore
/// pluma_plugins::declare_plugin!(NotePlugin::new());
/// ```
#[macro_export]
macro_rules! declare_plugin {
    ($constructor:expr) => {
        #[unsafe(no_mangle)]
        #[allow(improper_ctypes_definitions)]
        pub extern "C" fn _pluma_plugin_create() -> *mut dyn $crate::pluma_kernel::plugin::Plugin
        {
            let plugin: Box<dyn $crate::pluma_kernel::plugin::Plugin> = Box::new($constructor);
            Box::into_raw(plugin)
        }

        #[unsafe(no_mangle)]
        pub extern "C" fn _pluma_plugin_abi_version() -> u32 {
            $crate::hot_reload::PLUGIN_ABI_VERSION
        }
    };
}

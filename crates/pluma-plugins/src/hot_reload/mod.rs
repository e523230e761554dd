//! Hot-reload plugin support module
//!
//! - Dynamic plugin loading from shared libraries or linked constructors
//! - File watching for the plugin directory
//! - Debounced application of changes through the plugin manager

mod loader;
mod queue;
mod static_loader;
mod watcher;

pub use loader::{
    ArtifactInfo, LoaderError, LoaderResult, NativeLoader, PLUGIN_ABI_SYMBOL, PLUGIN_ABI_VERSION,
    PLUGIN_ENTRY_SYMBOL, PluginLoader, artifact_file_name, artifact_path,
};
pub use static_loader::{PluginFactory, StaticLoader};
pub use watcher::{PluginWatcher, WatchConfig, WatchedFile, WatcherError};

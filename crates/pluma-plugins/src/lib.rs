//! Pluma plugin host
//!
//! - [`manager`]: registry, admission checks, lifecycle and route aggregation
//! - [`hot_reload`]: dynamic loading and directory watching
//! - [`runtime`]: the three wired together from one configuration file

pub mod hot_reload;
pub mod manager;
pub mod runtime;

// Re-exported for `declare_plugin!` and for plugin crates that only depend on
// the host crate.
pub use pluma_kernel;
pub use pluma_kernel::plugin::{
    HttpMethod, Middleware, MiddlewareOutcome, Plugin, PluginDescriptor, PluginError,
    PluginIntrospection, PluginRequest, PluginResponse, PluginResult, PluginState, PluginStatus,
    Route, RouteHandler,
};

pub use hot_reload::{
    LoaderError, NativeLoader, PluginLoader, PluginWatcher, StaticLoader, WatchConfig,
    WatcherError,
};
pub use manager::{
    AggregatedRoute, ManagerConfig, ManagerError, ManagerResult, PluginManager, PluginRecord,
};
pub use runtime::{IntoRuntimeReport, PluginRuntime, RuntimeConfig, RuntimeError, RuntimeResult};

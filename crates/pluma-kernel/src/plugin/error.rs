//! Typed errors for the plugin sub-system.

use thiserror::Error;

/// Errors returned by plugin lifecycle hooks, route handlers and middlewares.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PluginError {
    /// Plugin failed during initialisation.
    #[error("Plugin initialization failed: {0}")]
    InitFailed(String),

    /// Plugin failed while shutting down.
    #[error("Plugin shutdown failed: {0}")]
    ShutdownFailed(String),

    /// Plugin refused an enable/disable transition.
    #[error("Plugin activation failed: {0}")]
    ActivationFailed(String),

    /// A route handler or middleware returned an error.
    #[error("Plugin execution failed: {0}")]
    ExecutionFailed(String),
}

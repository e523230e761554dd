//! Plugin manager errors

use pluma_kernel::plugin::{PluginError, PluginState};

/// Errors returned by registry mutations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ManagerError {
    #[error("Plugin already registered: {0}")]
    DuplicateName(String),

    #[error("Plugin '{plugin}' depends on '{dependency}', which is not initialized")]
    UnsatisfiedDependency { plugin: String, dependency: String },

    #[error("Plugin '{plugin}' conflicts with registered plugin '{other}'")]
    ConflictDetected { plugin: String, other: String },

    #[error("Plugin not found: {0}")]
    NotFound(String),

    #[error("Plugin '{plugin}' is required by enabled plugins: {}", .dependents.join(", "))]
    DependentsExist {
        plugin: String,
        dependents: Vec<String>,
    },

    #[error("Invalid plugin descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Plugin '{plugin}' cannot {operation} while {state}")]
    InvalidState {
        plugin: String,
        operation: &'static str,
        state: PluginState,
    },

    #[error("Plugin '{plugin}' {hook} hook failed: {source}")]
    LifecycleHook {
        plugin: String,
        hook: &'static str,
        #[source]
        source: PluginError,
    },

    #[error("Reload of '{expected}' received plugin '{actual}'")]
    NameMismatch { expected: String, actual: String },
}

impl ManagerError {
    pub(crate) fn hook(plugin: &str, hook: &'static str, source: PluginError) -> Self {
        Self::LifecycleHook {
            plugin: plugin.to_string(),
            hook,
            source,
        }
    }
}

/// Result alias for manager operations
pub type ManagerResult<T> = Result<T, ManagerError>;

use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod error;
pub use error::PluginError;

mod route;
pub use route::{
    FnHandler, HttpMethod, Middleware, MiddlewareOutcome, NAMESPACE_PREFIX, PluginRequest,
    PluginResponse, Route, RouteHandler, handler_fn, namespaced_path,
};

/// Plugin execution result type using the typed [`PluginError`].
pub type PluginResult<T> = Result<T, PluginError>;

// ============================================================================
// Capability contract
// ============================================================================

/// Core plugin trait.
///
/// Every loadable extension implements this. Instances are shared between
/// the manager and the request path, so hooks take `&self`; plugins keep
/// mutable state behind their own locks.
#[async_trait::async_trait]
pub trait Plugin: Send + Sync {
    /// Unique plugin name. Also the registry key and the route namespace.
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn version(&self) -> &str;

    /// Names of plugins that must be initialized before this one registers.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Names of plugins that may not be active alongside this one.
    fn conflicts(&self) -> Vec<String> {
        Vec::new()
    }

    /// Initialization hook, run once after the registry accepted the plugin.
    async fn init(&self) -> PluginResult<()>;

    /// Shutdown hook, run before the plugin leaves the registry.
    async fn shutdown(&self) -> PluginResult<()>;

    async fn on_enable(&self) -> PluginResult<()> {
        Ok(())
    }

    async fn on_disable(&self) -> PluginResult<()> {
        Ok(())
    }

    /// Routes relative to `/plugins/<name>/`.
    fn routes(&self) -> Vec<Route> {
        Vec::new()
    }

    /// Middlewares applied to every route of this plugin, after the host's
    /// global middlewares and before the route's own.
    fn default_middlewares(&self) -> Vec<Arc<dyn Middleware>> {
        Vec::new()
    }

    /// Receives a weak back-reference to the manager before `init` runs.
    fn set_plugin_manager(&self, _manager: Weak<dyn PluginIntrospection>) {}

    /// Immutable identity snapshot.
    fn descriptor(&self) -> PluginDescriptor {
        PluginDescriptor {
            name: self.name().to_string(),
            version: self.version().to_string(),
            description: self.description().to_string(),
            dependencies: self.dependencies().into_iter().collect(),
            conflicts: self.conflicts().into_iter().collect(),
        }
    }

    /// Convert to Any (for downcasting)
    fn as_any(&self) -> &dyn Any;
}

/// Read-only view of the registry handed to plugins.
pub trait PluginIntrospection: Send + Sync {
    fn list_plugins(&self) -> Vec<String>;

    fn plugin_status(&self, name: &str) -> Option<PluginStatus>;
}

// ============================================================================
// Descriptor
// ============================================================================

/// Identity and dependency metadata of a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub name: String,
    pub version: String,
    pub description: String,
    pub dependencies: BTreeSet<String>,
    pub conflicts: BTreeSet<String>,
}

impl PluginDescriptor {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            description: String::new(),
            dependencies: BTreeSet::new(),
            conflicts: BTreeSet::new(),
        }
    }

    pub fn with_description(mut self, desc: &str) -> Self {
        self.description = desc.to_string();
        self
    }

    pub fn with_dependency(mut self, dep: &str) -> Self {
        self.dependencies.insert(dep.to_string());
        self
    }

    pub fn with_conflict(mut self, conflict: &str) -> Self {
        self.conflicts.insert(conflict.to_string());
        self
    }

    /// Check the descriptor invariants: non-empty name that neither depends
    /// on nor conflicts with itself.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("plugin name is empty".to_string());
        }
        if self.dependencies.contains(&self.name) {
            return Err(format!("plugin '{}' depends on itself", self.name));
        }
        if self.conflicts.contains(&self.name) {
            return Err(format!("plugin '{}' conflicts with itself", self.name));
        }
        Ok(())
    }
}

// ============================================================================
// Lifecycle state
// ============================================================================

/// Lifecycle state of a registered plugin.
///
/// `Loaded -> Initialized -> Enabled <-> Disabled -> Unregistered`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    Loaded,
    Initialized,
    Enabled,
    Disabled,
    Unregistered,
}

impl PluginState {
    /// True once the init hook has succeeded and until unregistration.
    /// Dependency and conflict checks only consider plugins in these states.
    pub fn is_initialized(&self) -> bool {
        matches!(self, Self::Initialized | Self::Enabled | Self::Disabled)
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled)
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginState::Loaded => write!(f, "Loaded"),
            PluginState::Initialized => write!(f, "Initialized"),
            PluginState::Enabled => write!(f, "Enabled"),
            PluginState::Disabled => write!(f, "Disabled"),
            PluginState::Unregistered => write!(f, "Unregistered"),
        }
    }
}

// ============================================================================
// Status
// ============================================================================

/// Serializable status of one registered plugin, for health and metrics
/// endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginStatus {
    pub name: String,
    pub version: String,
    pub description: String,
    pub state: PluginState,
    pub dependencies: Vec<String>,
    pub conflicts: Vec<String>,
    pub route_count: usize,
    pub registered_at: DateTime<Utc>,
    pub reload_count: u32,
}

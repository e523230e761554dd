//! Plugin manager
//!
//! Owns the authoritative registry of plugins: admission (duplicate,
//! dependency and conflict checks), the lifecycle state machine, and the
//! aggregated route table.
//!
//! Writers serialize on one async lock held across the whole
//! check-and-mutate sequence, lifecycle hooks included. They work on a
//! private copy of the registry and publish it as a new immutable snapshot
//! when done, so readers never observe a partially registered plugin.

mod error;
mod routes;

pub use error::{ManagerError, ManagerResult};
pub use routes::AggregatedRoute;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use pluma_kernel::metrics::{NoopMetrics, PluginMetrics};
use pluma_kernel::plugin::{
    Middleware, Plugin, PluginDescriptor, PluginIntrospection, PluginState, PluginStatus, Route,
    namespaced_path,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Registry contents keyed by plugin name.
type Registry = BTreeMap<String, Arc<PluginRecord>>;

/// Manager configuration
#[derive(Clone)]
pub struct ManagerConfig {
    /// Activate plugins right after a successful init
    pub auto_enable: bool,
    /// Middlewares prepended to every plugin route
    pub global_middlewares: Vec<Arc<dyn Middleware>>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            auto_enable: true,
            global_middlewares: Vec::new(),
        }
    }
}

impl ManagerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auto_enable(mut self, enabled: bool) -> Self {
        self.auto_enable = enabled;
        self
    }

    pub fn with_global_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.global_middlewares.push(middleware);
        self
    }
}

impl fmt::Debug for ManagerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerConfig")
            .field("auto_enable", &self.auto_enable)
            .field(
                "global_middlewares",
                &self
                    .global_middlewares
                    .iter()
                    .map(|m| m.name())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// A registered plugin
#[derive(Clone)]
pub struct PluginRecord {
    pub descriptor: PluginDescriptor,
    pub instance: Arc<dyn Plugin>,
    pub state: PluginState,
    pub routes: Vec<Route>,
    pub default_middlewares: Vec<Arc<dyn Middleware>>,
    pub registered_at: DateTime<Utc>,
    pub reload_count: u32,
}

impl PluginRecord {
    fn new(instance: Arc<dyn Plugin>, descriptor: PluginDescriptor, reload_count: u32) -> Self {
        Self {
            routes: instance.routes(),
            default_middlewares: instance.default_middlewares(),
            descriptor,
            instance,
            state: PluginState::Loaded,
            registered_at: Utc::now(),
            reload_count,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn status(&self) -> PluginStatus {
        PluginStatus {
            name: self.descriptor.name.clone(),
            version: self.descriptor.version.clone(),
            description: self.descriptor.description.clone(),
            state: self.state,
            dependencies: self.descriptor.dependencies.iter().cloned().collect(),
            conflicts: self.descriptor.conflicts.iter().cloned().collect(),
            route_count: self.routes.len(),
            registered_at: self.registered_at,
            reload_count: self.reload_count,
        }
    }

    fn with_state(&self, state: PluginState) -> Self {
        Self {
            state,
            ..self.clone()
        }
    }
}

impl fmt::Debug for PluginRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRecord")
            .field("descriptor", &self.descriptor)
            .field("state", &self.state)
            .field("routes", &self.routes)
            .field("registered_at", &self.registered_at)
            .field("reload_count", &self.reload_count)
            .finish_non_exhaustive()
    }
}

/// Plugin manager
pub struct PluginManager {
    config: ManagerConfig,
    /// Published registry; replaced wholesale by writers
    snapshot: RwLock<Arc<Registry>>,
    /// Serializes registry mutations, held across lifecycle hooks
    write_lock: Mutex<()>,
    metrics: Arc<dyn PluginMetrics>,
    /// Back-reference handed to plugins
    self_ref: Weak<PluginManager>,
}

impl PluginManager {
    /// Create a manager that reports to no metrics sink
    pub fn new(config: ManagerConfig) -> Arc<Self> {
        Self::with_metrics(config, Arc::new(NoopMetrics))
    }

    pub fn with_metrics(config: ManagerConfig, metrics: Arc<dyn PluginMetrics>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            config,
            snapshot: RwLock::new(Arc::new(Registry::new())),
            write_lock: Mutex::new(()),
            metrics,
            self_ref: self_ref.clone(),
        })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// The metrics sink this manager reports to
    pub fn metrics(&self) -> Arc<dyn PluginMetrics> {
        self.metrics.clone()
    }

    fn current(&self) -> Arc<Registry> {
        self.snapshot.read().clone()
    }

    fn working_copy(&self) -> Registry {
        (*self.current()).clone()
    }

    fn publish(&self, registry: Registry) {
        *self.snapshot.write() = Arc::new(registry);
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Register a plugin instance: admission checks, init hook and (with
    /// `auto_enable`) activation, as one atomic step.
    pub async fn register(&self, instance: Arc<dyn Plugin>) -> ManagerResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut working = self.working_copy();
        let result = self.register_locked(&mut working, instance, 0).await;
        self.publish(working);
        result
    }

    /// Unregister a plugin. Enabled dependents must be unregistered first.
    pub async fn unregister(&self, name: &str) -> ManagerResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut working = self.working_copy();
        let result = self.unregister_locked(&mut working, name).await;
        self.publish(working);
        if result.is_ok() {
            self.metrics.record_plugin_unregistered(name);
        }
        result
    }

    /// Replace a registered plugin with a freshly loaded instance.
    ///
    /// If the old instance is removed but the new one is rejected, the plugin
    /// stays unregistered; the previous instance is not restored.
    pub async fn reload_plugin(&self, name: &str, instance: Arc<dyn Plugin>) -> ManagerResult<()> {
        if instance.name() != name {
            return Err(ManagerError::NameMismatch {
                expected: name.to_string(),
                actual: instance.name().to_string(),
            });
        }

        let _guard = self.write_lock.lock().await;
        let mut working = self.working_copy();
        let reload_count = working
            .get(name)
            .map(|record| record.reload_count)
            .ok_or_else(|| ManagerError::NotFound(name.to_string()))?;

        info!(plugin = name, "Reloading plugin");
        let result = match self.unregister_locked(&mut working, name).await {
            Ok(()) => {
                self.register_locked(&mut working, instance, reload_count + 1)
                    .await
            }
            Err(e) => Err(e),
        };
        self.publish(working);

        self.metrics.record_plugin_reload(name, result.is_ok());
        match &result {
            Ok(()) => info!(plugin = name, reload_count = reload_count + 1, "Plugin reloaded"),
            Err(e) => warn!(plugin = name, error = %e, "Plugin reload failed"),
        }
        result
    }

    /// Activate an Initialized or Disabled plugin.
    pub async fn enable_plugin(&self, name: &str) -> ManagerResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut working = self.working_copy();
        let record = working
            .get(name)
            .cloned()
            .ok_or_else(|| ManagerError::NotFound(name.to_string()))?;

        match record.state {
            PluginState::Enabled => return Ok(()),
            PluginState::Initialized | PluginState::Disabled => {}
            state => {
                return Err(ManagerError::InvalidState {
                    plugin: name.to_string(),
                    operation: "enable",
                    state,
                });
            }
        }

        // A dependency may have left the registry while this plugin was disabled.
        for dep in &record.descriptor.dependencies {
            if !working.get(dep).is_some_and(|r| r.state.is_initialized()) {
                return Err(ManagerError::UnsatisfiedDependency {
                    plugin: name.to_string(),
                    dependency: dep.clone(),
                });
            }
        }

        record
            .instance
            .on_enable()
            .await
            .map_err(|e| ManagerError::hook(name, "enable", e))?;

        working.insert(
            name.to_string(),
            Arc::new(record.with_state(PluginState::Enabled)),
        );
        self.publish(working);
        info!(plugin = name, "Plugin enabled");
        Ok(())
    }

    /// Deactivate an Enabled plugin.
    pub async fn disable_plugin(&self, name: &str) -> ManagerResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut working = self.working_copy();
        let record = working
            .get(name)
            .cloned()
            .ok_or_else(|| ManagerError::NotFound(name.to_string()))?;

        match record.state {
            PluginState::Disabled => return Ok(()),
            PluginState::Enabled => {}
            state => {
                return Err(ManagerError::InvalidState {
                    plugin: name.to_string(),
                    operation: "disable",
                    state,
                });
            }
        }

        record
            .instance
            .on_disable()
            .await
            .map_err(|e| ManagerError::hook(name, "disable", e))?;

        working.insert(
            name.to_string(),
            Arc::new(record.with_state(PluginState::Disabled)),
        );
        self.publish(working);
        info!(plugin = name, "Plugin disabled");
        Ok(())
    }

    /// Unregister every plugin, dependents before their dependencies.
    ///
    /// Returns the plugins that could not be unregistered.
    pub async fn shutdown_all(&self) -> Vec<(String, ManagerError)> {
        let _guard = self.write_lock.lock().await;
        let mut working = self.working_copy();
        let mut failures: Vec<(String, ManagerError)> = Vec::new();

        loop {
            let leaves: Vec<String> = {
                let failed: HashSet<&str> = failures.iter().map(|(n, _)| n.as_str()).collect();
                working
                    .keys()
                    .filter(|name| !failed.contains(name.as_str()))
                    .filter(|name| {
                        !working.values().any(|r| {
                            r.name() != name.as_str() && r.descriptor.dependencies.contains(*name)
                        })
                    })
                    .cloned()
                    .collect()
            };

            if leaves.is_empty() {
                break;
            }

            for name in leaves {
                match self.unregister_locked(&mut working, &name).await {
                    Ok(()) => self.metrics.record_plugin_unregistered(&name),
                    Err(e) => {
                        warn!(plugin = %name, error = %e, "Failed to unregister plugin during shutdown");
                        failures.push((name, e));
                    }
                }
            }
        }

        // Whatever is left is held in place by a failed dependent.
        for name in working.keys() {
            if !failures.iter().any(|(n, _)| n == name) {
                debug!(plugin = %name, "Plugin left registered behind a failed dependent");
            }
        }

        self.publish(working);
        failures
    }

    async fn register_locked(
        &self,
        working: &mut Registry,
        instance: Arc<dyn Plugin>,
        reload_count: u32,
    ) -> ManagerResult<()> {
        let descriptor = instance.descriptor();
        descriptor
            .validate()
            .map_err(ManagerError::InvalidDescriptor)?;
        Self::check_admission(working, &descriptor)?;

        let name = descriptor.name.clone();
        let mut record = PluginRecord::new(instance.clone(), descriptor, reload_count);
        working.insert(name.clone(), Arc::new(record.clone()));
        debug!(plugin = %name, version = %record.descriptor.version, "Plugin admitted");

        let introspection: Weak<dyn PluginIntrospection> = self.self_ref.clone();
        instance.set_plugin_manager(introspection);

        if let Err(e) = instance.init().await {
            working.remove(&name);
            warn!(plugin = %name, error = %e, "Plugin init failed, registration rolled back");
            return Err(ManagerError::hook(&name, "init", e));
        }
        record.state = PluginState::Initialized;

        if self.config.auto_enable {
            if let Err(e) = instance.on_enable().await {
                if let Err(shutdown_err) = instance.shutdown().await {
                    warn!(plugin = %name, error = %shutdown_err, "Shutdown after failed activation also failed");
                }
                working.remove(&name);
                warn!(plugin = %name, error = %e, "Plugin activation failed, registration rolled back");
                return Err(ManagerError::hook(&name, "enable", e));
            }
            record.state = PluginState::Enabled;
        }

        info!(
            plugin = %name,
            version = %record.descriptor.version,
            state = %record.state,
            routes = record.routes.len(),
            "Plugin registered"
        );
        working.insert(name, Arc::new(record));
        Ok(())
    }

    fn check_admission(working: &Registry, descriptor: &PluginDescriptor) -> ManagerResult<()> {
        let name = &descriptor.name;

        if working.contains_key(name) {
            return Err(ManagerError::DuplicateName(name.clone()));
        }

        for dep in &descriptor.dependencies {
            if !working.get(dep).is_some_and(|r| r.state.is_initialized()) {
                return Err(ManagerError::UnsatisfiedDependency {
                    plugin: name.clone(),
                    dependency: dep.clone(),
                });
            }
        }

        for conflict in &descriptor.conflicts {
            if working.get(conflict).is_some_and(|r| r.state.is_initialized()) {
                return Err(ManagerError::ConflictDetected {
                    plugin: name.clone(),
                    other: conflict.clone(),
                });
            }
        }

        if let Some(other) = working
            .values()
            .find(|r| r.descriptor.conflicts.contains(name))
        {
            return Err(ManagerError::ConflictDetected {
                plugin: name.clone(),
                other: other.name().to_string(),
            });
        }

        Ok(())
    }

    async fn unregister_locked(&self, working: &mut Registry, name: &str) -> ManagerResult<()> {
        let record = working
            .get(name)
            .cloned()
            .ok_or_else(|| ManagerError::NotFound(name.to_string()))?;

        let dependents: Vec<String> = working
            .values()
            .filter(|r| {
                r.name() != name && r.state.is_enabled() && r.descriptor.dependencies.contains(name)
            })
            .map(|r| r.name().to_string())
            .collect();
        if !dependents.is_empty() {
            return Err(ManagerError::DependentsExist {
                plugin: name.to_string(),
                dependents,
            });
        }

        if record.state.is_enabled() {
            record
                .instance
                .on_disable()
                .await
                .map_err(|e| ManagerError::hook(name, "disable", e))?;
            working.insert(
                name.to_string(),
                Arc::new(record.with_state(PluginState::Disabled)),
            );
        }

        record
            .instance
            .shutdown()
            .await
            .map_err(|e| ManagerError::hook(name, "shutdown", e))?;

        working.remove(name);
        info!(plugin = name, "Plugin unregistered");
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn get_plugin(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.current().get(name).map(|r| r.instance.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.current().contains_key(name)
    }

    /// Names of all registered plugins, sorted
    pub fn list_plugins(&self) -> Vec<String> {
        self.current().keys().cloned().collect()
    }

    pub fn state(&self, name: &str) -> Option<PluginState> {
        self.current().get(name).map(|r| r.state)
    }

    pub fn record(&self, name: &str) -> Option<Arc<PluginRecord>> {
        self.current().get(name).cloned()
    }

    pub fn status(&self, name: &str) -> Option<PluginStatus> {
        self.current().get(name).map(|r| r.status())
    }

    pub fn statuses(&self) -> Vec<PluginStatus> {
        self.current().values().map(|r| r.status()).collect()
    }

    /// Routes of every Enabled plugin, namespaced under `/plugins/<name>/`,
    /// ordered by plugin name then declaration order.
    pub fn aggregate_routes(&self) -> Vec<AggregatedRoute> {
        let registry = self.current();
        let mut routes = Vec::new();

        for record in registry.values().filter(|r| r.state.is_enabled()) {
            for route in &record.routes {
                let middlewares = self
                    .config
                    .global_middlewares
                    .iter()
                    .chain(record.default_middlewares.iter())
                    .chain(route.middlewares.iter())
                    .cloned()
                    .collect();

                routes.push(AggregatedRoute {
                    plugin: record.name().to_string(),
                    path: namespaced_path(record.name(), &route.path),
                    method: route.method,
                    handler: route.handler.clone(),
                    middlewares,
                    auth_required: route.auth_required,
                    description: route.description.clone(),
                    tags: route.tags.clone(),
                });
            }
        }

        routes
    }
}

impl PluginIntrospection for PluginManager {
    fn list_plugins(&self) -> Vec<String> {
        PluginManager::list_plugins(self)
    }

    fn plugin_status(&self, name: &str) -> Option<PluginStatus> {
        self.status(name)
    }
}

impl fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginManager")
            .field("config", &self.config)
            .field("plugins", &self.list_plugins())
            .finish_non_exhaustive()
    }
}

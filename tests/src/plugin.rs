use async_trait::async_trait;
use parking_lot::Mutex;
use pluma_kernel::plugin::{
    HttpMethod, Middleware, Plugin, PluginError, PluginIntrospection, PluginRequest,
    PluginResponse, PluginResult, Route, handler_fn,
};
use serde_json::json;
use std::any::Any;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// Lifecycle hooks a [`MockPlugin`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    Init,
    Shutdown,
    Enable,
    Disable,
}

impl Hook {
    pub fn as_str(&self) -> &'static str {
        match self {
            Hook::Init => "init",
            Hook::Shutdown => "shutdown",
            Hook::Enable => "enable",
            Hook::Disable => "disable",
        }
    }
}

/// Ordered record of hook calls, shareable between several plugins.
///
/// Entries read `"<plugin>:<hook>"`.
#[derive(Debug, Default)]
pub struct EventLog {
    entries: Mutex<Vec<String>>,
}

impl EventLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, plugin: &str, hook: Hook) {
        self.entries.lock().push(format!("{plugin}:{}", hook.as_str()));
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Entries for one hook, in call order, as plugin names
    pub fn plugins_for(&self, hook: Hook) -> Vec<String> {
        let suffix = format!(":{}", hook.as_str());
        self.entries
            .lock()
            .iter()
            .filter_map(|e| e.strip_suffix(&suffix).map(str::to_string))
            .collect()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// Hook call counters and failure switches of one mock plugin.
///
/// Shared with the test after the plugin itself has been handed to the
/// manager.
#[derive(Debug, Default)]
pub struct HookProbe {
    init: AtomicUsize,
    shutdown: AtomicUsize,
    enable: AtomicUsize,
    disable: AtomicUsize,
    failing: Mutex<HashSet<Hook>>,
    manager: Mutex<Option<Weak<dyn PluginIntrospection>>>,
}

impl HookProbe {
    pub fn calls(&self, hook: Hook) -> usize {
        self.counter(hook).load(Ordering::SeqCst)
    }

    /// Make `hook` fail (or succeed again) from now on.
    pub fn set_failing(&self, hook: Hook, failing: bool) {
        let mut set = self.failing.lock();
        if failing {
            set.insert(hook);
        } else {
            set.remove(&hook);
        }
    }

    /// The manager view received through `set_plugin_manager`, if still alive
    pub fn manager(&self) -> Option<Arc<dyn PluginIntrospection>> {
        self.manager.lock().as_ref().and_then(Weak::upgrade)
    }

    fn counter(&self, hook: Hook) -> &AtomicUsize {
        match hook {
            Hook::Init => &self.init,
            Hook::Shutdown => &self.shutdown,
            Hook::Enable => &self.enable,
            Hook::Disable => &self.disable,
        }
    }

    fn fire(&self, plugin: &str, hook: Hook, log: Option<&EventLog>) -> PluginResult<()> {
        self.counter(hook).fetch_add(1, Ordering::SeqCst);
        if let Some(log) = log {
            log.push(plugin, hook);
        }
        if self.failing.lock().contains(&hook) {
            let reason = format!("{plugin} refused {}", hook.as_str());
            return Err(match hook {
                Hook::Init => PluginError::InitFailed(reason),
                Hook::Shutdown => PluginError::ShutdownFailed(reason),
                Hook::Enable | Hook::Disable => PluginError::ActivationFailed(reason),
            });
        }
        Ok(())
    }
}

/// A configurable in-memory plugin.
///
/// ```rust,ignore
/// let notes = MockPlugin::new("note")
///     .with_dependency("storage")
///     .with_echo_route(HttpMethod::Get, "/notes");
/// let probe = notes.probe();
/// manager.register(notes.into_plugin()).await?;
/// assert_eq!(probe.calls(Hook::Init), 1);
/// ```
#[derive(Clone)]
pub struct MockPlugin {
    name: String,
    version: String,
    description: String,
    dependencies: Vec<String>,
    conflicts: Vec<String>,
    routes: Vec<Route>,
    middlewares: Vec<Arc<dyn Middleware>>,
    probe: Arc<HookProbe>,
    log: Option<Arc<EventLog>>,
}

impl MockPlugin {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            description: format!("mock plugin {name}"),
            dependencies: Vec::new(),
            conflicts: Vec::new(),
            routes: Vec::new(),
            middlewares: Vec::new(),
            probe: Arc::new(HookProbe::default()),
            log: None,
        }
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    pub fn with_dependency(mut self, name: &str) -> Self {
        self.dependencies.push(name.to_string());
        self
    }

    pub fn with_conflict(mut self, name: &str) -> Self {
        self.conflicts.push(name.to_string());
        self
    }

    pub fn with_route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }

    /// A route answering `{"plugin": <name>, "path": <request path>, "headers": ...}`.
    pub fn with_echo_route(self, method: HttpMethod, path: &str) -> Self {
        let route = Route::new(method, path, echo_handler(&self.name));
        self.with_route(route)
    }

    /// A route whose handler always fails with `reason`.
    pub fn with_failing_route(self, method: HttpMethod, path: &str, reason: &str) -> Self {
        let reason = reason.to_string();
        let handler = handler_fn(move |_request: PluginRequest| {
            let reason = reason.clone();
            async move { Err::<PluginResponse, _>(PluginError::ExecutionFailed(reason)) }
        });
        self.with_route(Route::new(method, path, handler))
    }

    pub fn with_default_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn failing_on(self, hook: Hook) -> Self {
        self.probe.set_failing(hook, true);
        self
    }

    pub fn with_event_log(mut self, log: Arc<EventLog>) -> Self {
        self.log = Some(log);
        self
    }

    /// Use the probe of another mock, e.g. to count hooks across reloads.
    pub fn sharing_probe(mut self, probe: Arc<HookProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn probe(&self) -> Arc<HookProbe> {
        self.probe.clone()
    }

    pub fn into_plugin(self) -> Arc<dyn Plugin> {
        Arc::new(self)
    }

    fn fire(&self, hook: Hook) -> PluginResult<()> {
        self.probe.fire(&self.name, hook, self.log.as_deref())
    }
}

fn echo_handler(plugin: &str) -> Arc<dyn pluma_kernel::plugin::RouteHandler> {
    let plugin = plugin.to_string();
    handler_fn(move |request: PluginRequest| {
        let plugin = plugin.clone();
        async move {
            Ok(PluginResponse::ok(json!({
                "plugin": plugin,
                "path": request.path,
                "headers": request.headers,
            })))
        }
    })
}

#[async_trait]
impl Plugin for MockPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn dependencies(&self) -> Vec<String> {
        self.dependencies.clone()
    }

    fn conflicts(&self) -> Vec<String> {
        self.conflicts.clone()
    }

    async fn init(&self) -> PluginResult<()> {
        self.fire(Hook::Init)
    }

    async fn shutdown(&self) -> PluginResult<()> {
        self.fire(Hook::Shutdown)
    }

    async fn on_enable(&self) -> PluginResult<()> {
        self.fire(Hook::Enable)
    }

    async fn on_disable(&self) -> PluginResult<()> {
        self.fire(Hook::Disable)
    }

    fn routes(&self) -> Vec<Route> {
        self.routes.clone()
    }

    fn default_middlewares(&self) -> Vec<Arc<dyn Middleware>> {
        self.middlewares.clone()
    }

    fn set_plugin_manager(&self, manager: Weak<dyn PluginIntrospection>) {
        *self.probe.manager.lock() = Some(manager);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

//! Routes, handlers and middlewares declared by plugins.
//!
//! These types are transport-neutral: the hosting HTTP layer converts its own
//! request type into a [`PluginRequest`], runs the aggregated middleware chain
//! and handler, then converts the [`PluginResponse`] back.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::PluginResult;

/// Every plugin route is mounted below `/plugins/<name>/`.
pub const NAMESPACE_PREFIX: &str = "/plugins/";

/// Build the effective path of a plugin route.
///
/// ```rust
/// use pluma_kernel::plugin::namespaced_path;
///
/// assert_eq!(namespaced_path("note", "/notes"), "/plugins/note/notes");
/// assert_eq!(namespaced_path("note", "notes/{id}"), "/plugins/note/notes/{id}");
/// ```
pub fn namespaced_path(plugin: &str, route_path: &str) -> String {
    format!(
        "{}{}/{}",
        NAMESPACE_PREFIX,
        plugin,
        route_path.trim_start_matches('/')
    )
}

/// HTTP method, covering the standard verbs used by plugin routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[non_exhaustive]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    /// Case-insensitive parse from a string slice.
    pub fn from_str_ci(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "GET" => Some(HttpMethod::Get),
            "POST" => Some(HttpMethod::Post),
            "PUT" => Some(HttpMethod::Put),
            "PATCH" => Some(HttpMethod::Patch),
            "DELETE" => Some(HttpMethod::Delete),
            "HEAD" => Some(HttpMethod::Head),
            "OPTIONS" => Some(HttpMethod::Options),
            _ => None,
        }
    }

    /// Return the standard uppercase string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Request / Response
// ============================================================================

/// A request routed to a plugin handler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginRequest {
    pub method: Option<HttpMethod>,
    /// Effective (namespaced) request path.
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: serde_json::Value,
    /// Values attached by middlewares for downstream consumers
    /// (authenticated principal, tenant id, ...).
    pub extensions: HashMap<String, serde_json::Value>,
}

impl PluginRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method: Some(method),
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = body;
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }
}

/// A response produced by a handler or a short-circuiting middleware.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: serde_json::Value,
}

impl PluginResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: serde_json::Value::Null,
        }
    }

    pub fn ok(body: serde_json::Value) -> Self {
        Self::new(200).with_body(body)
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = body;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

// ============================================================================
// Handlers and middlewares
// ============================================================================

/// Terminal handler of a route.
#[async_trait]
pub trait RouteHandler: Send + Sync {
    async fn handle(&self, request: PluginRequest) -> PluginResult<PluginResponse>;
}

/// Adapter turning an async closure into a [`RouteHandler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> RouteHandler for FnHandler<F>
where
    F: Fn(PluginRequest) -> Fut + Send + Sync,
    Fut: Future<Output = PluginResult<PluginResponse>> + Send,
{
    async fn handle(&self, request: PluginRequest) -> PluginResult<PluginResponse> {
        (self.0)(request).await
    }
}

/// Wrap an async closure as a shareable handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn RouteHandler>
where
    F: Fn(PluginRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PluginResult<PluginResponse>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Result of running one middleware.
#[derive(Debug)]
pub enum MiddlewareOutcome {
    /// Pass the (possibly modified) request to the next link of the chain.
    Continue(PluginRequest),
    /// Stop the chain and answer with this response.
    Respond(PluginResponse),
}

/// A link of a route's middleware chain.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Stable name, used in diagnostics.
    fn name(&self) -> &str;

    async fn process(&self, request: PluginRequest) -> PluginResult<MiddlewareOutcome>;
}

// ============================================================================
// Route
// ============================================================================

/// A route declared by a plugin. `path` is relative to the plugin namespace.
#[derive(Clone)]
pub struct Route {
    pub path: String,
    pub method: HttpMethod,
    pub handler: Arc<dyn RouteHandler>,
    pub middlewares: Vec<Arc<dyn Middleware>>,
    pub auth_required: bool,
    pub description: String,
    pub tags: Vec<String>,
}

impl Route {
    pub fn new(method: HttpMethod, path: impl Into<String>, handler: Arc<dyn RouteHandler>) -> Self {
        Self {
            path: path.into(),
            method,
            handler,
            middlewares: Vec::new(),
            auth_required: false,
            description: String::new(),
            tags: Vec::new(),
        }
    }

    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn with_auth_required(mut self, required: bool) -> Self {
        self.auth_required = required;
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("path", &self.path)
            .field("method", &self.method)
            .field(
                "middlewares",
                &self.middlewares.iter().map(|m| m.name()).collect::<Vec<_>>(),
            )
            .field("auth_required", &self.auth_required)
            .field("description", &self.description)
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}

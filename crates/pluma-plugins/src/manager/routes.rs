//! Aggregated route table

use std::fmt;
use std::sync::Arc;

use pluma_kernel::plugin::{
    HttpMethod, Middleware, MiddlewareOutcome, PluginRequest, PluginResponse, PluginResult,
    RouteHandler,
};
use tracing::debug;

/// A plugin route as served by the host: namespaced path and the fully
/// composed middleware chain (global, then plugin defaults, then the route's
/// own).
#[derive(Clone)]
pub struct AggregatedRoute {
    pub plugin: String,
    pub path: String,
    pub method: HttpMethod,
    pub handler: Arc<dyn RouteHandler>,
    pub middlewares: Vec<Arc<dyn Middleware>>,
    pub auth_required: bool,
    pub description: String,
    pub tags: Vec<String>,
}

impl AggregatedRoute {
    pub fn middleware_names(&self) -> Vec<&str> {
        self.middlewares.iter().map(|m| m.name()).collect()
    }

    /// Run the middleware chain in order, then the handler.
    ///
    /// A middleware answering with [`MiddlewareOutcome::Respond`] stops the
    /// chain; the handler is not invoked.
    pub async fn dispatch(&self, request: PluginRequest) -> PluginResult<PluginResponse> {
        let mut request = request;
        for middleware in &self.middlewares {
            match middleware.process(request).await? {
                MiddlewareOutcome::Continue(next) => request = next,
                MiddlewareOutcome::Respond(response) => {
                    debug!(
                        plugin = %self.plugin,
                        path = %self.path,
                        middleware = middleware.name(),
                        status = response.status,
                        "Middleware short-circuited request"
                    );
                    return Ok(response);
                }
            }
        }
        self.handler.handle(request).await
    }
}

impl fmt::Debug for AggregatedRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregatedRoute")
            .field("plugin", &self.plugin)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("middlewares", &self.middleware_names())
            .field("auth_required", &self.auth_required)
            .finish_non_exhaustive()
    }
}

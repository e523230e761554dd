use async_trait::async_trait;
use pluma_kernel::plugin::{
    Middleware, MiddlewareOutcome, PluginRequest, PluginResponse, PluginResult,
};
use serde_json::json;
use std::sync::Arc;

/// Header [`TraceMiddleware`] appends to.
pub const TRACE_HEADER: &str = "x-trace";

/// Appends its name to the `x-trace` header and lets the request through.
///
/// After a chain of trace middlewares the header reads e.g.
/// `"global,plugin,route"`.
pub struct TraceMiddleware {
    name: String,
}

impl TraceMiddleware {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
        })
    }
}

#[async_trait]
impl Middleware for TraceMiddleware {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, mut request: PluginRequest) -> PluginResult<MiddlewareOutcome> {
        let trace = match request.header(TRACE_HEADER) {
            Some(existing) if !existing.is_empty() => format!("{existing},{}", self.name),
            _ => self.name.clone(),
        };
        request.headers.insert(TRACE_HEADER.to_string(), trace);
        Ok(MiddlewareOutcome::Continue(request))
    }
}

/// Answers every request itself with a fixed status.
pub struct RejectMiddleware {
    name: String,
    status: u16,
}

impl RejectMiddleware {
    pub fn new(name: &str, status: u16) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            status,
        })
    }
}

#[async_trait]
impl Middleware for RejectMiddleware {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, request: PluginRequest) -> PluginResult<MiddlewareOutcome> {
        Ok(MiddlewareOutcome::Respond(
            PluginResponse::new(self.status)
                .with_body(json!({ "rejected_by": self.name, "path": request.path })),
        ))
    }
}

//! Pluma Testing Framework
//!
//! Provides mock plugins, middlewares and a recording metrics sink for
//! testing the plugin manager, loaders and watcher without building real
//! plugin artifacts.

pub mod metrics;
pub mod middleware;
pub mod plugin;

pub use metrics::{MetricEvent, RecordingMetrics};
pub use middleware::{RejectMiddleware, TRACE_HEADER, TraceMiddleware};
pub use plugin::{EventLog, Hook, HookProbe, MockPlugin};

/// Assert how many times a lifecycle hook of a mock plugin ran.
#[macro_export]
macro_rules! assert_hook_called {
    ($probe:expr, $hook:expr, $expected_count:expr) => {
        let count = $probe.calls($hook);
        assert_eq!(
            count,
            $expected_count,
            "Expected hook '{}' to be called {} times, but was called {} times",
            $hook.as_str(),
            $expected_count,
            count
        );
    };
}

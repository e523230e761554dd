use parking_lot::Mutex;
use pluma_kernel::metrics::PluginMetrics;

/// One call received by [`RecordingMetrics`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricEvent {
    Error { plugin: String, reason: String },
    Reload { plugin: String, success: bool },
    Unregistered { plugin: String },
}

/// A metrics sink that remembers every call, in order.
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    events: Mutex<Vec<MetricEvent>>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MetricEvent> {
        self.events.lock().clone()
    }

    /// Reasons of the errors recorded for `plugin`
    pub fn errors_for(&self, plugin: &str) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                MetricEvent::Error { plugin: p, reason } if p == plugin => Some(reason.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn reloads_for(&self, plugin: &str) -> Vec<bool> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                MetricEvent::Reload { plugin: p, success } if p == plugin => Some(*success),
                _ => None,
            })
            .collect()
    }
}

impl PluginMetrics for RecordingMetrics {
    fn record_plugin_error(&self, name: &str, reason: &str) {
        tracing::debug!(plugin = name, reason, "recorded plugin error");
        self.events.lock().push(MetricEvent::Error {
            plugin: name.to_string(),
            reason: reason.to_string(),
        });
    }

    fn record_plugin_reload(&self, name: &str, success: bool) {
        self.events.lock().push(MetricEvent::Reload {
            plugin: name.to_string(),
            success,
        });
    }

    fn record_plugin_unregistered(&self, name: &str) {
        self.events.lock().push(MetricEvent::Unregistered {
            plugin: name.to_string(),
        });
    }
}

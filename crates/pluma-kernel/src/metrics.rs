//! Plugin runtime metrics
//!
//! The runtime reports load failures, reloads and unregistrations through the
//! narrow [`PluginMetrics`] sink. Observability backends implement it;
//! [`PluginCounters`] is the in-process implementation used by the CLI and
//! health endpoints.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Sink for plugin lifecycle metrics.
pub trait PluginMetrics: Send + Sync {
    /// A load, registration or reload attempt for `name` failed.
    fn record_plugin_error(&self, name: &str, reason: &str);

    /// A reload of `name` finished.
    fn record_plugin_reload(&self, name: &str, success: bool);

    /// `name` left the registry.
    fn record_plugin_unregistered(&self, _name: &str) {}
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl PluginMetrics for NoopMetrics {
    fn record_plugin_error(&self, _name: &str, _reason: &str) {}

    fn record_plugin_reload(&self, _name: &str, _success: bool) {}
}

/// Last error recorded for a plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginErrorRecord {
    pub reason: String,
    pub at: DateTime<Utc>,
}

// Point-in-time metrics snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginMetricsSnapshot {
    pub total_errors: u64,
    pub reloads_succeeded: u64,
    pub reloads_failed: u64,
    pub unregistrations: u64,
    pub last_errors: HashMap<String, PluginErrorRecord>,
}

// Lock-free atomic counters
#[derive(Debug)]
pub struct PluginCounters {
    pub total_errors: AtomicU64,
    pub reloads_succeeded: AtomicU64,
    pub reloads_failed: AtomicU64,
    pub unregistrations: AtomicU64,
    last_errors: Mutex<HashMap<String, PluginErrorRecord>>,
}

impl Default for PluginCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginCounters {
    pub fn new() -> Self {
        Self {
            total_errors: AtomicU64::new(0),
            reloads_succeeded: AtomicU64::new(0),
            reloads_failed: AtomicU64::new(0),
            unregistrations: AtomicU64::new(0),
            last_errors: Mutex::new(HashMap::new()),
        }
    }

    pub fn snapshot(&self) -> PluginMetricsSnapshot {
        PluginMetricsSnapshot {
            total_errors: self.total_errors.load(Ordering::Relaxed),
            reloads_succeeded: self.reloads_succeeded.load(Ordering::Relaxed),
            reloads_failed: self.reloads_failed.load(Ordering::Relaxed),
            unregistrations: self.unregistrations.load(Ordering::Relaxed),
            last_errors: self.last_errors.lock().clone(),
        }
    }

    pub fn last_error(&self, name: &str) -> Option<PluginErrorRecord> {
        self.last_errors.lock().get(name).cloned()
    }
}

impl PluginMetrics for PluginCounters {
    fn record_plugin_error(&self, name: &str, reason: &str) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
        self.last_errors.lock().insert(
            name.to_string(),
            PluginErrorRecord {
                reason: reason.to_string(),
                at: Utc::now(),
            },
        );
    }

    fn record_plugin_reload(&self, _name: &str, success: bool) {
        if success {
            self.reloads_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.reloads_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_plugin_unregistered(&self, _name: &str) {
        self.unregistrations.fetch_add(1, Ordering::Relaxed);
    }
}

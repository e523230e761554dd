//! Pluma kernel
//!
//! The narrow contract shared by the host and every plugin: the
//! [`Plugin`](plugin::Plugin) capability trait, descriptors, routes and
//! middlewares, the metrics sink the runtime reports into, and the
//! configuration loader.

// plugin module
pub mod plugin;
pub use plugin::*;

// metrics module
pub mod metrics;

// config module
#[cfg(feature = "config")]
pub mod config;

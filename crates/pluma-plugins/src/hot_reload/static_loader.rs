//! Loader for plugins linked into the host binary

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use pluma_kernel::plugin::Plugin;
use tokio::sync::RwLock;
use tracing::info;

use super::loader::{LoaderError, LoaderResult, PluginLoader};

/// Builds a fresh plugin instance
pub type PluginFactory = Arc<dyn Fn() -> Arc<dyn Plugin> + Send + Sync>;

/// Serves plugins from constructors registered at startup.
///
/// The artifact path only identifies the change; every load calls the
/// factory registered under the expected name. Useful on targets without a
/// dynamic loader and in tests.
#[derive(Default)]
pub struct StaticLoader {
    factories: parking_lot::RwLock<HashMap<String, PluginFactory>>,
    loaded: RwLock<HashMap<String, PathBuf>>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`register_factory`](Self::register_factory)
    pub fn with_factory<F>(self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn Plugin> + Send + Sync + 'static,
    {
        self.register_factory(name, factory);
        self
    }

    /// Register (or replace) the constructor for `name`
    pub fn register_factory<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn Plugin> + Send + Sync + 'static,
    {
        self.factories.write().insert(name.into(), Arc::new(factory));
    }

    pub fn has_factory(&self, name: &str) -> bool {
        self.factories.read().contains_key(name)
    }
}

#[async_trait]
impl PluginLoader for StaticLoader {
    async fn load_plugin(
        &self,
        artifact: &Path,
        expected_name: &str,
    ) -> LoaderResult<Arc<dyn Plugin>> {
        let factory = self
            .factories
            .read()
            .get(expected_name)
            .cloned()
            .ok_or_else(|| LoaderError::EntryPointNotFound {
                path: artifact.to_path_buf(),
                symbol: expected_name.to_string(),
                reason: "no statically linked constructor".to_string(),
            })?;

        let instance = factory();
        if instance.name() != expected_name {
            return Err(LoaderError::NameMismatch {
                path: artifact.to_path_buf(),
                expected: expected_name.to_string(),
                actual: instance.name().to_string(),
            });
        }

        let previous = self
            .loaded
            .write()
            .await
            .insert(expected_name.to_string(), artifact.to_path_buf());
        info!(
            plugin = expected_name,
            path = ?artifact,
            reload = previous.is_some(),
            "Constructed statically linked plugin"
        );
        Ok(instance)
    }

    async fn unload_plugin(&self, name: &str) -> LoaderResult<()> {
        match self.loaded.write().await.remove(name) {
            Some(_) => Ok(()),
            None => Err(LoaderError::NotLoaded(name.to_string())),
        }
    }

    async fn is_loaded(&self, name: &str) -> bool {
        self.loaded.read().await.contains_key(name)
    }
}

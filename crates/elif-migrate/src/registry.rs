//! Explicit scheme-to-backend factory map
//!
//! Built once at startup and handed to [`Migrator::connect`](crate::Migrator::connect),
//! so the set of available backends is an inspectable value rather than a
//! side effect of linking.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::{MigrateError, MigrateResult, MigratorConfig, VersionStore};

/// Produces an uninitialized store for a connection URL's scheme
pub type StoreFactory = Arc<dyn Fn(&MigratorConfig) -> Box<dyn VersionStore> + Send + Sync>;

/// Registry of version store backends keyed by URL scheme
#[derive(Clone, Default)]
pub struct BackendRegistry {
    factories: HashMap<String, StoreFactory>,
}

impl BackendRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with every backend compiled into this crate
    pub fn with_defaults() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();

        #[cfg(feature = "postgres")]
        for scheme in ["postgres", "postgresql"] {
            registry.register(scheme, |config: &MigratorConfig| {
                Box::new(crate::PostgresStore::new().with_context(config.error_context()))
                    as Box<dyn VersionStore>
            });
        }

        registry
    }

    /// Register a factory for a scheme, replacing any previous one
    pub fn register<F>(&mut self, scheme: &str, factory: F)
    where
        F: Fn(&MigratorConfig) -> Box<dyn VersionStore> + Send + Sync + 'static,
    {
        self.factories
            .insert(scheme.to_lowercase(), Arc::new(factory));
    }

    pub fn has_backend(&self, scheme: &str) -> bool {
        self.factories.contains_key(&scheme.to_lowercase())
    }

    /// Registered schemes, sorted
    pub fn schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self.factories.keys().cloned().collect();
        schemes.sort();
        schemes
    }

    /// Pick the backend for `url`, create its store and initialize it
    pub async fn create(
        &self,
        url: &str,
        config: &MigratorConfig,
    ) -> MigrateResult<Box<dyn VersionStore>> {
        let scheme = scheme_of(url)?;
        let factory = self
            .factories
            .get(&scheme)
            .ok_or_else(|| MigrateError::UnknownBackend(scheme.clone()))?;

        debug!("Creating '{}' version store", scheme);
        let mut store = factory(config);
        store.initialize(url).await?;
        Ok(store)
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("schemes", &self.schemes())
            .finish()
    }
}

fn scheme_of(url: &str) -> MigrateResult<String> {
    let parsed = url::Url::parse(url)
        .map_err(|e| MigrateError::Connection(format!("Invalid connection URL: {}", e)))?;
    Ok(parsed.scheme().to_lowercase())
}

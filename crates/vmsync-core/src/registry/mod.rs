//! Plugin-based component registry
//!
//! The registry lets entity stores and endpoint callers be registered at
//! runtime, so the daemon picks implementations by name from configuration.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use vmsync_core::registry::Registry;
//! use vmsync_core::config::StoreConfig;
//!
//! let registry = Registry::with_builtin_stores();
//! vmsync_http::register(&registry);
//!
//! let store = registry.create_store(&StoreConfig::Memory).await?;
//! let caller = registry.create_caller("http", &serde_json::Value::Null)?;
//! ```

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::store::{FileEntityStoreFactory, MemoryEntityStoreFactory};
use crate::traits::{EndpointCaller, EndpointCallerFactory, EntityStore, EntityStoreFactory};

/// Registry of entity store and endpoint caller factories
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes.
#[derive(Default)]
pub struct Registry {
    /// Registered entity store factories
    stores: RwLock<HashMap<String, Arc<dyn EntityStoreFactory>>>,

    /// Registered endpoint caller factories
    callers: RwLock<HashMap<String, Box<dyn EndpointCallerFactory>>>,
}

impl Registry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the "memory" and "file" stores registered
    pub fn with_builtin_stores() -> Self {
        let registry = Self::new();
        registry.register_store("memory", Box::new(MemoryEntityStoreFactory));
        registry.register_store("file", Box::new(FileEntityStoreFactory));
        registry
    }

    /// Register an entity store factory
    ///
    /// # Parameters
    ///
    /// - `name`: Store type name (e.g., "file", "memory")
    /// - `factory`: Factory object for creating store instances
    pub fn register_store(&self, name: impl Into<String>, factory: Box<dyn EntityStoreFactory>) {
        let mut stores = self.stores.write().unwrap_or_else(|e| e.into_inner());
        stores.insert(name.into(), Arc::from(factory));
    }

    /// Register an endpoint caller factory
    ///
    /// # Parameters
    ///
    /// - `name`: Caller type name (e.g., "http")
    /// - `factory`: Factory object for creating caller instances
    pub fn register_caller(&self, name: impl Into<String>, factory: Box<dyn EndpointCallerFactory>) {
        let mut callers = self.callers.write().unwrap_or_else(|e| e.into_inner());
        callers.insert(name.into(), factory);
    }

    /// Create an entity store from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn EntityStore>)`: Created store instance
    /// - `Err(Error)`: If the store type is not registered or creation fails
    pub async fn create_store(&self, config: &StoreConfig) -> Result<Box<dyn EntityStore>> {
        config.validate()?;
        let store_type = config.type_name();

        let factory = {
            let stores = self.stores.read().unwrap_or_else(|e| e.into_inner());
            stores
                .get(store_type)
                .ok_or_else(|| Error::config(format!("Unknown store type: {}", store_type)))?
                .clone()
        };

        let config_json = serde_json::to_value(config)?;
        factory.create(&config_json).await
    }

    /// Create an endpoint caller by type name
    pub fn create_caller(
        &self,
        name: &str,
        config: &serde_json::Value,
    ) -> Result<Box<dyn EndpointCaller>> {
        let callers = self.callers.read().unwrap_or_else(|e| e.into_inner());

        let factory = callers
            .get(name)
            .ok_or_else(|| Error::config(format!("Unknown endpoint caller type: {}", name)))?;

        factory.create(config)
    }

    /// List all registered store types
    pub fn list_stores(&self) -> Vec<String> {
        let stores = self.stores.read().unwrap_or_else(|e| e.into_inner());
        stores.keys().cloned().collect()
    }

    /// List all registered caller types
    pub fn list_callers(&self) -> Vec<String> {
        let callers = self.callers.read().unwrap_or_else(|e| e.into_inner());
        callers.keys().cloned().collect()
    }

    /// Check if a store type is registered
    pub fn has_store(&self, name: &str) -> bool {
        let stores = self.stores.read().unwrap_or_else(|e| e.into_inner());
        stores.contains_key(name)
    }

    /// Check if a caller type is registered
    pub fn has_caller(&self, name: &str) -> bool {
        let callers = self.callers.read().unwrap_or_else(|e| e.into_inner());
        callers.contains_key(name)
    }
}

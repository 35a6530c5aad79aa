//! Named driver factories.
//!
//! A host looks drivers up by the `driver` key of a [`DriverConfig`]. The
//! default registry knows two keys:
//! - `AzureStorage`: [`StorageQueueDriver`] over the REST service
//! - `Memory`: [`StorageQueueDriver`] over an in-memory service shared by every
//!   driver this registry creates

use crate::adapter::StorageQueueDriver;
use crate::config::{DriverConfig, AZURE_STORAGE_DRIVER};
use crate::driver::QueueDriver;
use crate::error::{ConfigurationError, DriverError};
use crate::transport::MemoryConnector;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;

/// Driver key of the in-memory driver
pub const MEMORY_DRIVER: &str = "Memory";

/// Builds a driver from its configuration
pub type DriverFactory =
    Arc<dyn Fn(DriverConfig) -> Result<Box<dyn QueueDriver>, DriverError> + Send + Sync>;

/// Registry of driver factories keyed by driver name
#[derive(Clone, Default)]
pub struct DriverRegistry {
    factories: HashMap<String, DriverFactory>,
}

impl DriverRegistry {
    /// Create empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create registry with the `AzureStorage` and `Memory` drivers
    pub fn with_default_drivers() -> Self {
        let memory = MemoryConnector::new();

        Self::new()
            .extend(AZURE_STORAGE_DRIVER, |config| {
                Ok(Box::new(StorageQueueDriver::new(config)) as Box<dyn QueueDriver>)
            })
            .extend(MEMORY_DRIVER, move |config| {
                let connector = Arc::new(memory.clone());
                Ok(Box::new(StorageQueueDriver::with_connector(config, connector))
                    as Box<dyn QueueDriver>)
            })
    }

    /// Register a factory, replacing any previous one under the same key
    pub fn extend<F>(mut self, driver: impl Into<String>, factory: F) -> Self
    where
        F: Fn(DriverConfig) -> Result<Box<dyn QueueDriver>, DriverError> + Send + Sync + 'static,
    {
        self.factories.insert(driver.into(), Arc::new(factory));
        self
    }

    /// Build the driver named by `config.driver`
    pub fn create(&self, config: DriverConfig) -> Result<Box<dyn QueueDriver>, DriverError> {
        let factory = self
            .factories
            .get(&config.driver)
            .ok_or_else(|| ConfigurationError::UnknownDriver {
                driver: config.driver.clone(),
            })?;

        debug!(driver = %config.driver, queue = %config.name, "Creating queue driver");
        factory(config)
    }

    /// Check whether a factory is registered under `driver`
    pub fn contains(&self, driver: &str) -> bool {
        self.factories.contains_key(driver)
    }

    /// Registered driver keys, sorted
    pub fn drivers(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.drivers())
            .finish()
    }
}

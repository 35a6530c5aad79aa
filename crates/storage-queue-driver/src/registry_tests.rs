//! Tests for the driver registry.

use super::*;
use crate::config::StorageConfig;
use crate::envelope::Payload;
use crate::service::{PeekOptions, StoreOptions};

fn memory_config(name: &str) -> DriverConfig {
    DriverConfig::new(name, StorageConfig::default()).with_driver(MEMORY_DRIVER)
}

#[test]
fn test_default_drivers_are_listed_sorted() {
    let registry = DriverRegistry::with_default_drivers();
    assert_eq!(registry.drivers(), vec!["AzureStorage", "Memory"]);
    assert!(DriverRegistry::new().drivers().is_empty());
}

#[test]
fn test_contains_registered_keys_only() {
    let registry = DriverRegistry::with_default_drivers();
    assert!(registry.contains(AZURE_STORAGE_DRIVER));
    assert!(registry.contains(MEMORY_DRIVER));
    assert!(!registry.contains("memory"));
    assert!(!DriverRegistry::new().contains(MEMORY_DRIVER));
}

#[test]
fn test_unknown_driver_is_configuration_error() {
    let registry = DriverRegistry::with_default_drivers();
    let result = registry.create(memory_config("orders").with_driver("Redis"));

    match result {
        Err(DriverError::Configuration(ConfigurationError::UnknownDriver { driver })) => {
            assert_eq!(driver, "Redis")
        }
        Err(other) => panic!("expected unknown driver, got {:?}", other),
        Ok(_) => panic!("expected unknown driver error"),
    }
}

#[test]
fn test_azure_driver_is_created_lazily() {
    // No credentials configured; construction must still succeed
    let registry = DriverRegistry::with_default_drivers();
    let driver = registry
        .create(DriverConfig::new("orders", StorageConfig::default()))
        .unwrap();
    assert_eq!(driver.name(), "orders");
}

#[tokio::test]
async fn test_memory_drivers_share_one_service() {
    let registry = DriverRegistry::with_default_drivers();
    let producer = registry.create(memory_config("orders")).unwrap();
    let consumer = registry.create(memory_config("orders")).unwrap();

    producer
        .store(Payload::from("shared"), &StoreOptions::new())
        .await
        .unwrap();

    let peeked = consumer.peek_next(&PeekOptions::new()).await.unwrap();
    assert!(peeked.is_some());
}

#[tokio::test]
async fn test_extend_replaces_factory() {
    let registry = DriverRegistry::new().extend("Custom", |config| {
        Err(ConfigurationError::Invalid {
            message: format!("{} disabled", config.name),
        }
        .into())
    });
    assert_eq!(registry.drivers(), vec!["Custom"]);
    assert!(registry
        .create(memory_config("orders").with_driver("Custom"))
        .is_err());

    let registry = registry.extend("Custom", |config| {
        Ok(Box::new(StorageQueueDriver::with_connector(
            config,
            Arc::new(MemoryConnector::new()),
        )) as Box<dyn QueueDriver>)
    });
    assert!(registry
        .create(memory_config("orders").with_driver("Custom"))
        .is_ok());
}

//! Driver configuration and credential environment snapshot.
//!
//! The configuration surface mirrors what a host queue manager hands to a
//! driver factory:
//!
//! ```yaml
//! name: orders
//! driver: AzureStorage
//! config:
//!   connectionString: "DefaultEndpointsProtocol=https;AccountName=...;AccountKey=..."
//!   pollingDelay: 10
//! ```

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "STORAGE_QUEUE";

/// Driver key of the Azure Storage queue driver
pub const AZURE_STORAGE_DRIVER: &str = "AzureStorage";

/// Configuration handed to a driver factory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Name of the queue the driver operates on; validated on first use
    #[serde(default)]
    pub name: String,
    /// Registry key of the driver to construct
    #[serde(default = "default_driver")]
    pub driver: String,
    #[serde(default)]
    pub config: StorageConfig,
}

fn default_driver() -> String {
    AZURE_STORAGE_DRIVER.to_string()
}

impl DriverConfig {
    /// Create configuration for the Azure Storage driver
    pub fn new(name: impl Into<String>, config: StorageConfig) -> Self {
        Self {
            name: name.into(),
            driver: default_driver(),
            config,
        }
    }

    /// Use a different registered driver
    pub fn with_driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = driver.into();
        self
    }

    /// Load configuration from an optional file plus environment overrides.
    ///
    /// Sources, later ones overriding earlier ones:
    /// 1. `path`, format picked from the extension (YAML, TOML or JSON)
    /// 2. environment variables prefixed `STORAGE_QUEUE__`, e.g.
    ///    `STORAGE_QUEUE__CONFIG__ACCOUNT_NAME=myaccount`
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .map_err(|e| ConfigurationError::Parsing {
                message: e.to_string(),
            })?;

        settings
            .try_deserialize()
            .map_err(|e| ConfigurationError::Parsing {
                message: e.to_string(),
            })
    }
}

/// Connection settings of the storage account
///
/// Accepts camelCase keys plus the snake_case and lowercased spellings that
/// environment sources produce.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    #[serde(default, alias = "connection_string", alias = "connectionstring")]
    pub connection_string: Option<String>,
    #[serde(default, alias = "account_name", alias = "accountname")]
    pub account_name: Option<String>,
    #[serde(default, alias = "account_key", alias = "accountkey")]
    pub account_key: Option<String>,
    /// Delay between polls in milliseconds; reserved, no operation polls
    #[serde(default, alias = "polling_delay", alias = "pollingdelay")]
    pub polling_delay: Option<u64>,
}

impl StorageConfig {
    /// Configuration from a connection string
    pub fn from_connection_string(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: Some(connection_string.into()),
            ..Default::default()
        }
    }

    /// Configuration from an account name and shared key
    pub fn from_account_key(account_name: impl Into<String>, account_key: impl Into<String>) -> Self {
        Self {
            account_name: Some(account_name.into()),
            account_key: Some(account_key.into()),
            ..Default::default()
        }
    }
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field(
                "connection_string",
                &self.connection_string.as_ref().map(|_| "<redacted>"),
            )
            .field("account_name", &self.account_name)
            .field("account_key", &self.account_key.as_ref().map(|_| "<redacted>"))
            .field("polling_delay", &self.polling_delay)
            .finish()
    }
}

/// Snapshot of the service-principal credential environment variables
#[derive(Clone, Default, PartialEq, Eq)]
pub struct EnvironmentCredentials {
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl EnvironmentCredentials {
    pub const TENANT_ID_VAR: &'static str = "AZURE_TENANT_ID";
    pub const CLIENT_ID_VAR: &'static str = "AZURE_CLIENT_ID";
    pub const CLIENT_SECRET_VAR: &'static str = "AZURE_CLIENT_SECRET";

    /// Read the credential variables once from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the credential variables through a lookup function
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).filter(|v| !v.is_empty());
        Self {
            tenant_id: read(Self::TENANT_ID_VAR),
            client_id: read(Self::CLIENT_ID_VAR),
            client_secret: read(Self::CLIENT_SECRET_VAR),
        }
    }

    /// Check that all three variables are present
    pub fn is_complete(&self) -> bool {
        self.tenant_id.is_some() && self.client_id.is_some() && self.client_secret.is_some()
    }
}

impl std::fmt::Debug for EnvironmentCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentCredentials")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

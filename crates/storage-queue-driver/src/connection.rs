//! Connection resolution: authentication strategy and service endpoint.
//!
//! ## Authentication Strategies
//!
//! The strategy is picked from a typed snapshot of configuration and
//! environment, first match wins:
//! - **DefaultCredential**: `AZURE_TENANT_ID`, `AZURE_CLIENT_ID` and
//!   `AZURE_CLIENT_SECRET` are all set
//! - **SharedKey**: both account name and account key are configured
//! - **None**: no explicit credential
//!
//! A configured connection string takes precedence when the endpoint is
//! built: its own account key or SAS token is used and the resolved strategy
//! is ignored.

use crate::config::{EnvironmentCredentials, StorageConfig};
use crate::error::ConfigurationError;
use azure_core::auth::TokenCredential;
use azure_identity::{DefaultAzureCredential, TokenCredentialOptions};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;

/// OAuth scope for storage data-plane access
pub const STORAGE_SCOPE: &str = "https://storage.azure.com/.default";

/// Account name of the local storage emulator
pub const DEV_STORE_ACCOUNT: &str = "devstoreaccount1";

/// Well-known account key of the local storage emulator
pub const DEV_STORE_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";

const DEV_STORE_QUEUE_ENDPOINT: &str = "http://127.0.0.1:10001/devstoreaccount1";

// ============================================================================
// Authentication Types
// ============================================================================

/// Authentication strategy resolved from configuration and environment
#[derive(Clone, PartialEq, Eq)]
pub enum AuthStrategy {
    /// Default Azure credential chain, selected by the environment triple
    DefaultCredential,
    /// Account name plus shared key
    SharedKey {
        account_name: String,
        account_key: String,
    },
    /// No explicit credential
    None,
}

impl fmt::Display for AuthStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DefaultCredential => write!(f, "DefaultCredential"),
            Self::SharedKey { .. } => write!(f, "SharedKey"),
            Self::None => write!(f, "None"),
        }
    }
}

impl fmt::Debug for AuthStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SharedKey { account_name, .. } => f
                .debug_struct("SharedKey")
                .field("account_name", account_name)
                .field("account_key", &"<redacted>")
                .finish(),
            other => write!(f, "{}", other),
        }
    }
}

/// Shared Key signing material for one storage account
#[derive(Clone)]
pub struct SharedKeyCredential {
    account_name: String,
    mac: Hmac<Sha256>,
}

impl SharedKeyCredential {
    /// Create credential from an account name and base64 account key
    pub fn new(account_name: &str, account_key: &str) -> Result<Self, ConfigurationError> {
        let key = STANDARD
            .decode(account_key.trim())
            .map_err(|e| ConfigurationError::Invalid {
                message: format!("Account key is not valid base64: {}", e),
            })?;

        let mac = Hmac::<Sha256>::new_from_slice(&key).map_err(|e| ConfigurationError::Invalid {
            message: format!("Account key rejected: {}", e),
        })?;

        Ok(Self {
            account_name: account_name.to_string(),
            mac,
        })
    }

    /// Account the key belongs to
    pub fn account_name(&self) -> &str {
        &self.account_name
    }

    /// HMAC-SHA256 signature of `string_to_sign`, base64 encoded
    pub fn sign(&self, string_to_sign: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(string_to_sign.as_bytes());
        STANDARD.encode(mac.finalize().into_bytes())
    }
}

impl fmt::Debug for SharedKeyCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedKeyCredential")
            .field("account_name", &self.account_name)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Credential attached to every request sent to the service
#[derive(Clone)]
pub enum StorageCredential {
    SharedKey(SharedKeyCredential),
    /// SAS query string, without the leading `?`
    SharedAccessSignature(String),
    /// Bearer tokens for [`STORAGE_SCOPE`]
    Token(Arc<dyn TokenCredential>),
    Anonymous,
}

impl fmt::Debug for StorageCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SharedKey(key) => f.debug_tuple("SharedKey").field(key).finish(),
            Self::SharedAccessSignature(_) => write!(f, "SharedAccessSignature(<redacted>)"),
            Self::Token(_) => write!(f, "Token(<credential>)"),
            Self::Anonymous => write!(f, "Anonymous"),
        }
    }
}

// ============================================================================
// Connection String
// ============================================================================

/// Parsed storage account connection string
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConnectionString {
    pub account_name: Option<String>,
    pub account_key: Option<String>,
    pub shared_access_signature: Option<String>,
    pub queue_endpoint: Option<String>,
    pub protocol: Option<String>,
    pub endpoint_suffix: Option<String>,
    pub use_development_storage: bool,
}

impl ConnectionString {
    /// Parse `Key=Value;Key=Value` pairs. Values may contain `=`.
    pub fn parse(connection_string: &str) -> Result<Self, ConfigurationError> {
        let mut pairs = HashMap::new();
        for segment in connection_string.split(';') {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }

            let (key, value) = segment.split_once('=').ok_or_else(|| {
                ConfigurationError::Parsing {
                    message: format!("Connection string segment '{}' has no '='", key_only(segment)),
                }
            })?;
            pairs.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }

        if pairs.is_empty() {
            return Err(ConfigurationError::Parsing {
                message: "Connection string is empty".to_string(),
            });
        }

        let take = |key: &str| pairs.get(key).filter(|v| !v.is_empty()).cloned();
        let parsed = Self {
            account_name: take("accountname"),
            account_key: take("accountkey"),
            shared_access_signature: take("sharedaccesssignature")
                .map(|sas| sas.trim_start_matches('?').to_string()),
            queue_endpoint: take("queueendpoint"),
            protocol: take("defaultendpointsprotocol"),
            endpoint_suffix: take("endpointsuffix"),
            use_development_storage: take("usedevelopmentstorage")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        };

        if parsed.use_development_storage {
            return Ok(Self {
                account_name: Some(DEV_STORE_ACCOUNT.to_string()),
                account_key: Some(DEV_STORE_KEY.to_string()),
                queue_endpoint: parsed
                    .queue_endpoint
                    .or_else(|| Some(DEV_STORE_QUEUE_ENDPOINT.to_string())),
                ..parsed
            });
        }

        Ok(parsed)
    }

    /// Queue service endpoint described by this connection string
    pub fn queue_endpoint(&self) -> Result<Url, ConfigurationError> {
        if let Some(endpoint) = &self.queue_endpoint {
            return parse_endpoint(endpoint);
        }

        let account = self
            .account_name
            .as_deref()
            .ok_or_else(|| ConfigurationError::Missing {
                key: "AccountName or QueueEndpoint".to_string(),
            })?;
        let protocol = self.protocol.as_deref().unwrap_or("https");
        let suffix = self.endpoint_suffix.as_deref().unwrap_or("core.windows.net");

        parse_endpoint(&format!("{}://{}.queue.{}", protocol, account, suffix))
    }

    /// Credential embedded in this connection string
    pub fn credential(&self) -> Result<StorageCredential, ConfigurationError> {
        if let (Some(name), Some(key)) = (&self.account_name, &self.account_key) {
            return Ok(StorageCredential::SharedKey(SharedKeyCredential::new(
                name, key,
            )?));
        }

        if let Some(sas) = &self.shared_access_signature {
            return Ok(StorageCredential::SharedAccessSignature(sas.clone()));
        }

        Ok(StorageCredential::Anonymous)
    }
}

impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionString")
            .field("account_name", &self.account_name)
            .field("account_key", &self.account_key.as_ref().map(|_| "<redacted>"))
            .field(
                "shared_access_signature",
                &self.shared_access_signature.as_ref().map(|_| "<redacted>"),
            )
            .field("queue_endpoint", &self.queue_endpoint)
            .field("use_development_storage", &self.use_development_storage)
            .finish()
    }
}

// Never echo a value into error messages, it may be a secret.
fn key_only(segment: &str) -> &str {
    segment.split('=').next().unwrap_or_default()
}

fn parse_endpoint(endpoint: &str) -> Result<Url, ConfigurationError> {
    Url::parse(endpoint.trim_end_matches('/')).map_err(|e| ConfigurationError::Invalid {
        message: format!("Invalid queue endpoint '{}': {}", endpoint, e),
    })
}

// ============================================================================
// Resolver
// ============================================================================

/// Endpoint and credential of the queue service
#[derive(Debug, Clone)]
pub struct ServiceEndpoint {
    pub url: Url,
    pub credential: StorageCredential,
}

/// Resolves configuration into a [`ServiceEndpoint`]
#[derive(Debug, Clone)]
pub struct ConnectionResolver {
    config: StorageConfig,
    environment: EnvironmentCredentials,
}

impl ConnectionResolver {
    /// Create resolver from configuration and an environment snapshot
    pub fn new(config: StorageConfig, environment: EnvironmentCredentials) -> Self {
        Self {
            config,
            environment,
        }
    }

    /// Pick the authentication strategy, first match wins
    pub fn auth_strategy(&self) -> AuthStrategy {
        if self.environment.is_complete() {
            return AuthStrategy::DefaultCredential;
        }

        match (&self.config.account_name, &self.config.account_key) {
            (Some(account_name), Some(account_key))
                if !account_name.is_empty() && !account_key.is_empty() =>
            {
                AuthStrategy::SharedKey {
                    account_name: account_name.clone(),
                    account_key: account_key.clone(),
                }
            }
            _ => AuthStrategy::None,
        }
    }

    /// Resolve the endpoint and credential used to reach the service
    pub fn resolve(&self) -> Result<ServiceEndpoint, ConfigurationError> {
        let strategy = self.auth_strategy();
        debug!(strategy = %strategy, "Resolved authentication strategy");

        if let Some(connection_string) = self
            .config
            .connection_string
            .as_deref()
            .filter(|s| !s.trim().is_empty())
        {
            let parsed = ConnectionString::parse(connection_string)?;
            let endpoint = ServiceEndpoint {
                url: parsed.queue_endpoint()?,
                credential: parsed.credential()?,
            };
            info!(
                endpoint = %endpoint.url,
                "Using queue service endpoint from connection string"
            );
            return Ok(endpoint);
        }

        let account_name = self
            .config
            .account_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ConfigurationError::Missing {
                key: "connectionString or accountName".to_string(),
            })?;

        let credential = match &strategy {
            AuthStrategy::DefaultCredential => {
                let credential = DefaultAzureCredential::create(TokenCredentialOptions::default())
                    .map_err(|e| ConfigurationError::Invalid {
                        message: format!("Default Azure credential unavailable: {}", e),
                    })?;
                StorageCredential::Token(Arc::new(credential))
            }
            AuthStrategy::SharedKey {
                account_name,
                account_key,
            } => StorageCredential::SharedKey(SharedKeyCredential::new(account_name, account_key)?),
            AuthStrategy::None => {
                return Err(ConfigurationError::Missing {
                    key: "accountKey or AZURE_TENANT_ID/AZURE_CLIENT_ID/AZURE_CLIENT_SECRET"
                        .to_string(),
                })
            }
        };

        let url = parse_endpoint(&format!("https://{}.queue.core.windows.net", account_name))?;
        info!(endpoint = %url, strategy = %strategy, "Using queue service endpoint");

        Ok(ServiceEndpoint { url, credential })
    }
}

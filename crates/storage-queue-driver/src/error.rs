//! Error types for queue driver operations.

use chrono::Duration;
use thiserror::Error;

/// Error type returned by every driver operation
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Remote service error: {0}")]
    RemoteService(#[from] RemoteServiceError),

    #[error("Operation '{operation}' is not implemented by this driver")]
    NotImplemented { operation: &'static str },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] SerializationError),
}

impl DriverError {
    /// Check if error is transient and the caller may retry
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RemoteService(e) => e.is_transient(),
            Self::Configuration(_) => false,
            Self::NotImplemented { .. } => false,
            Self::Validation(_) => false,
            Self::Serialization(_) => false,
        }
    }

    /// Service error code when the remote service rejected the request
    pub fn service_code(&self) -> Option<&str> {
        match self {
            Self::RemoteService(RemoteServiceError::Service { code, .. }) => Some(code.as_str()),
            _ => None,
        }
    }
}

/// Failures surfaced by the remote queue service or the transport reaching it
#[derive(Debug, Error)]
pub enum RemoteServiceError {
    #[error("{code} (HTTP {status}): {message}")]
    Service {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        operation: &'static str,
        duration: Duration,
    },

    #[error("Connection failed: {message}")]
    Connection { message: String },

    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    #[error("Malformed response: {message}")]
    MalformedResponse { message: String },
}

impl RemoteServiceError {
    /// Build a service error from an HTTP status and error code
    pub fn service(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Service {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Check if error is transient
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Service { status, code, .. } => {
                *status == 408
                    || *status == 429
                    || *status >= 500
                    || code == "ServerBusy"
                    || code == "OperationTimedOut"
            }
            Self::Timeout { .. } => true,
            Self::Connection { .. } => true,
            Self::Authentication { .. } => false,
            Self::MalformedResponse { .. } => false,
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    #[error("Configuration parsing failed: {message}")]
    Parsing { message: String },

    #[error("No queue driver registered under '{driver}'")]
    UnknownDriver { driver: String },
}

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

/// Errors during payload serialization/deserialization
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("JSON serialization failed: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Payload is raw text, not structured data")]
    NotStructured,
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;

//! Connector facade error types
//!
//! One error enum for the whole runtime. Errors raised by a connector
//! implementation travel through every proxy layer unchanged, so callers see
//! the same value whether or not logging or timeout handlers are in the chain.

use thiserror::Error;

use crate::ids::{ConnectorKey, FacadeId, Fingerprint};
use crate::types::ApiOperation;

/// Error that can occur during connector facade operations.
#[derive(Debug, Error)]
pub enum ConnectorError {
    // Dispatch errors
    /// The capability is not in the configuration's supported set.
    #[error("operation '{operation}' is not supported by this connector configuration")]
    UnsupportedOperation { operation: ApiOperation },

    /// A runtime type handle does not denote the requested capability.
    #[error("invalid capability: '{actual}' does not implement '{expected}'")]
    InvalidCapability { expected: String, actual: String },

    /// A single-result call exceeded its configured duration.
    #[error("operation '{operation}' timed out after {timeout_ms} ms")]
    OperationTimeout {
        operation: ApiOperation,
        timeout_ms: u64,
    },

    // Configuration errors (permanent)
    /// Configuration failed validation.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// No connector metadata is registered under the key.
    #[error("connector not found: {key}")]
    ConnectorNotFound { key: ConnectorKey },

    // Lifecycle errors
    /// Building a facade for the cache failed. Nothing was cached.
    #[error("failed to construct facade for configuration {fingerprint}: {source}")]
    FacadeConstructionFailed {
        fingerprint: Fingerprint,
        #[source]
        source: Box<ConnectorError>,
    },

    /// The facade has been disposed and no longer accepts calls.
    #[error("facade {facade_id} has been disposed")]
    FacadeDisposed { facade_id: FacadeId },

    /// No pooled connector instance became available in time.
    #[error("connector pool exhausted: {max_objects} instances in use, waited {waited_ms} ms")]
    PoolExhausted { max_objects: u32, waited_ms: u64 },

    // Connector errors, passed through unchanged
    /// Failed to establish connection to target system.
    #[error("connection failed: {message}")]
    ConnectionFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Target system is temporarily unavailable.
    #[error("target system unavailable: {message}")]
    TargetUnavailable { message: String },

    /// Invalid credentials provided.
    #[error("authentication failed: invalid credentials")]
    AuthenticationFailed,

    /// Object already exists in target system (create conflict).
    #[error("object already exists: {identifier}")]
    ObjectAlreadyExists { identifier: String },

    /// Object not found in target system (update/delete target missing).
    #[error("object not found: {identifier}")]
    ObjectNotFound { identifier: String },

    /// Invalid data format.
    #[error("invalid data: {message}")]
    InvalidData { message: String },

    /// Operation failed.
    #[error("operation failed: {message}")]
    OperationFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    // Internal errors
    /// Internal error.
    #[error("internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Serialization error.
    #[error("serialization error: {message}")]
    Serialization { message: String },
}

impl ConnectorError {
    /// Check if this error is transient and the operation may be retried by the caller.
    ///
    /// The runtime itself never retries.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ConnectorError::ConnectionFailed { .. }
                | ConnectorError::TargetUnavailable { .. }
                | ConnectorError::OperationTimeout { .. }
                | ConnectorError::PoolExhausted { .. }
        )
    }

    /// Check if this error is permanent and retry won't help.
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Get an error code for classification.
    pub fn error_code(&self) -> &'static str {
        match self {
            ConnectorError::UnsupportedOperation { .. } => "UNSUPPORTED_OPERATION",
            ConnectorError::InvalidCapability { .. } => "INVALID_CAPABILITY",
            ConnectorError::OperationTimeout { .. } => "OPERATION_TIMEOUT",
            ConnectorError::InvalidConfiguration { .. } => "INVALID_CONFIG",
            ConnectorError::ConnectorNotFound { .. } => "CONNECTOR_NOT_FOUND",
            ConnectorError::FacadeConstructionFailed { .. } => "FACADE_CONSTRUCTION_FAILED",
            ConnectorError::FacadeDisposed { .. } => "FACADE_DISPOSED",
            ConnectorError::PoolExhausted { .. } => "POOL_EXHAUSTED",
            ConnectorError::ConnectionFailed { .. } => "CONNECTION_FAILED",
            ConnectorError::TargetUnavailable { .. } => "TARGET_UNAVAILABLE",
            ConnectorError::AuthenticationFailed => "AUTH_FAILED",
            ConnectorError::ObjectAlreadyExists { .. } => "OBJECT_EXISTS",
            ConnectorError::ObjectNotFound { .. } => "OBJECT_NOT_FOUND",
            ConnectorError::InvalidData { .. } => "INVALID_DATA",
            ConnectorError::OperationFailed { .. } => "OPERATION_FAILED",
            ConnectorError::Internal { .. } => "INTERNAL_ERROR",
            ConnectorError::Serialization { .. } => "SERIALIZATION_ERROR",
        }
    }

    // Convenience constructors

    /// Create an invalid configuration error.
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        ConnectorError::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Create a connection failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        ConnectorError::ConnectionFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection failed error with source.
    pub fn connection_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ConnectorError::ConnectionFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an operation failed error.
    pub fn operation_failed(message: impl Into<String>) -> Self {
        ConnectorError::OperationFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create an operation failed error with source.
    pub fn operation_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ConnectorError::OperationFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        ConnectorError::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Create an internal error with source.
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ConnectorError::Internal {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl From<serde_json::Error> for ConnectorError {
    fn from(err: serde_json::Error) -> Self {
        ConnectorError::Serialization {
            message: err.to_string(),
        }
    }
}

/// Result type for connector facade operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;

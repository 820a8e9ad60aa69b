//! Connector error types
//!
//! Error definitions with transient/permanent classification for retry logic.

use thiserror::Error;

/// Error that can occur during connector operations.
#[derive(Debug, Error)]
pub enum ConnectorError {
    // Reachability errors (transient)
    /// Network, authentication or remote-system failure.
    #[error("connector unreachable: {message}")]
    Unreachable {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A single call exceeded its configured timeout.
    #[error("connector call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    // Capability errors (permanent)
    /// The connector does not implement the requested operation.
    #[error("operation '{operation}' is not supported by this connector")]
    UnsupportedOperation { operation: String },

    // Object errors (permanent, item-level)
    /// The remote system rejected the mutation, e.g. a duplicate key.
    #[error("remote conflict on '{key}': {message}")]
    RemoteConflict { key: String, message: String },

    /// Update or delete targeted an object that no longer exists.
    #[error("object not found: {key}")]
    NotFound { key: String },

    /// The remote system rejected the payload.
    #[error("invalid data: {message}")]
    InvalidData { message: String },

    // Configuration errors
    /// Connector configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// Internal error.
    #[error("internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ConnectorError {
    /// Check if this error is transient and the operation should be retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ConnectorError::Unreachable { .. } | ConnectorError::Timeout { .. }
        )
    }

    /// Check if this error is permanent and retry won't help.
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Get an error code for classification.
    pub fn error_code(&self) -> &'static str {
        match self {
            ConnectorError::Unreachable { .. } => "CONNECTOR_UNREACHABLE",
            ConnectorError::Timeout { .. } => "CONNECTOR_TIMEOUT",
            ConnectorError::UnsupportedOperation { .. } => "UNSUPPORTED_OPERATION",
            ConnectorError::RemoteConflict { .. } => "REMOTE_CONFLICT",
            ConnectorError::NotFound { .. } => "OBJECT_NOT_FOUND",
            ConnectorError::InvalidData { .. } => "INVALID_DATA",
            ConnectorError::InvalidConfiguration { .. } => "INVALID_CONFIG",
            ConnectorError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    // Convenience constructors

    /// Create an unreachable error.
    pub fn unreachable(message: impl Into<String>) -> Self {
        ConnectorError::Unreachable {
            message: message.into(),
            source: None,
        }
    }

    /// Create an unreachable error with source.
    pub fn unreachable_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ConnectorError::Unreachable {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an unsupported operation error.
    pub fn unsupported(operation: impl Into<String>) -> Self {
        ConnectorError::UnsupportedOperation {
            operation: operation.into(),
        }
    }

    /// Create a remote conflict error.
    pub fn conflict(key: impl Into<String>, message: impl Into<String>) -> Self {
        ConnectorError::RemoteConflict {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(key: impl Into<String>) -> Self {
        ConnectorError::NotFound { key: key.into() }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        ConnectorError::Internal {
            message: message.into(),
            source: None,
        }
    }
}

/// Result type for connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;

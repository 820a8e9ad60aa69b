//! Reconciliation error types.
//!
//! Item-level failures (mapping, store constraint, remote conflict) are
//! recorded and processing continues; only [`ReconciliationError::is_fatal`]
//! errors abort an execution.

use thiserror::Error;

use xavyo_connector::error::ConnectorError;

use crate::ids::ExecutionId;
use crate::model::{AnyType, TaskDirection};

/// Failure translating a single record between internal and external form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    /// A mandatory item produced no value.
    #[error("mandatory attribute '{attribute}' has no value")]
    MandatoryMissing { attribute: String },

    /// A transformer rejected its input.
    #[error("transformer '{transformer}' failed on '{attribute}': {message}")]
    Transformer {
        attribute: String,
        transformer: String,
        message: String,
    },

    /// Outbound mapping has a password item but no clear-text value.
    #[error("password item '{attribute}' requires a clear-text value")]
    PasswordMissing { attribute: String },

    /// The provision itself is not usable.
    #[error("invalid provision: {message}")]
    InvalidProvision { message: String },
}

/// Errors raised by the internal identity store collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The mutation violates a store constraint (unique key, schema, ...).
    #[error("constraint violation: {message}")]
    ConstraintViolation { message: String },

    /// The identity no longer exists.
    #[error("identity not found: {key}")]
    NotFound { key: String },

    /// The store could not complete the transaction.
    #[error("store unavailable: {message}")]
    Unavailable { message: String },
}

impl StoreError {
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            message: message.into(),
        }
    }
}

/// Errors that can occur while running a reconciliation task.
#[derive(Debug, Error)]
pub enum ReconciliationError {
    /// Another execution holds the lock for this resource and any-type.
    #[error("{direction} of {any_type} on resource '{resource}' is already running (execution {running})")]
    AlreadyRunning {
        resource: String,
        any_type: AnyType,
        direction: TaskDirection,
        running: ExecutionId,
    },

    /// The remote side is unusable for the rest of the execution.
    #[error("connector for resource '{resource}' unreachable: {source}")]
    ConnectorUnreachable {
        resource: String,
        #[source]
        source: ConnectorError,
    },

    /// A connector call was rejected for this item only.
    #[error("connector error on resource '{resource}': {source}")]
    Connector {
        resource: String,
        #[source]
        source: ConnectorError,
    },

    /// Mapping failed for one item.
    #[error("mapping error: {0}")]
    Mapping(#[from] MappingError),

    /// The internal store rejected one item's mutation.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The record could not be correlated reliably.
    #[error("correlation error: {message}")]
    Correlation { message: String },

    /// A hook failed for one item.
    #[error("action hook '{hook}' failed: {message}")]
    Hook { hook: String, message: String },

    /// Programming error, e.g. double-recording a propagation status.
    #[error("invariant violation: {message}")]
    InvariantViolation { message: String },

    /// The task definition does not match the configured resources.
    #[error("invalid task: {message}")]
    InvalidTask { message: String },
}

impl ReconciliationError {
    /// Classify a connector error raised while talking to `resource`.
    pub fn from_connector(resource: impl Into<String>, source: ConnectorError) -> Self {
        let resource = resource.into();
        if source.is_transient() {
            Self::ConnectorUnreachable { resource, source }
        } else {
            Self::Connector { resource, source }
        }
    }

    /// Create an invariant violation error.
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    /// Create a correlation error.
    pub fn correlation(message: impl Into<String>) -> Self {
        Self::Correlation {
            message: message.into(),
        }
    }

    /// Create an invalid task error.
    pub fn invalid_task(message: impl Into<String>) -> Self {
        Self::InvalidTask {
            message: message.into(),
        }
    }

    /// Whether this error aborts the whole execution rather than one item.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConnectorUnreachable { .. } | Self::InvariantViolation { .. }
        )
    }

    /// Get an error code for classification.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AlreadyRunning { .. } => "ALREADY_RUNNING",
            Self::ConnectorUnreachable { .. } => "CONNECTOR_UNREACHABLE",
            Self::Connector { source, .. } => source.error_code(),
            Self::Mapping(_) => "MAPPING_ERROR",
            Self::Store(StoreError::ConstraintViolation { .. }) => "CONSTRAINT_VIOLATION",
            Self::Store(_) => "STORE_ERROR",
            Self::Correlation { .. } => "CORRELATION_ERROR",
            Self::Hook { .. } => "HOOK_FAILED",
            Self::InvariantViolation { .. } => "INVARIANT_VIOLATION",
            Self::InvalidTask { .. } => "INVALID_TASK",
        }
    }
}

/// Result type for reconciliation operations.
pub type ReconciliationResult<T> = Result<T, ReconciliationError>;

//! Error types for rtmodel.
//!
//! All errors are strongly typed using thiserror. Unchanged writes and
//! lookups that find nothing are not errors: they surface as `Ok(())` and
//! `Ok(None)` / empty cursors respectively.

use thiserror::Error;

use crate::storage::StorageError;

/// Errors raised while declaring or consulting entity schemas.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The type was never registered.
    #[error("Unknown entity type: {type_name}")]
    UnknownType {
        type_name: String,
    },

    /// A type with this name is already registered.
    #[error("Entity type '{type_name}' is already registered")]
    DuplicateType {
        type_name: String,
    },

    /// The type declares no attribute with this name.
    #[error("Type '{type_name}' has no attribute '{attribute}'")]
    UnknownAttribute {
        type_name: String,
        attribute: String,
    },

    /// The type declares no association with this name.
    #[error("Type '{type_name}' has no association '{association}'")]
    UnknownAssociation {
        type_name: String,
        association: String,
    },

    /// A value does not fit the attribute's declared kind.
    #[error("Attribute '{attribute}' expects {expected}, got {actual}")]
    TypeMismatch {
        attribute: String,
        expected: String,
        actual: String,
    },

    /// A scalar operation named an embedded attribute.
    #[error("Attribute '{attribute}' is an embedded collection, not a scalar")]
    NotScalar {
        attribute: String,
    },

    /// An embedded-key lookup named a scalar attribute.
    #[error("Attribute '{attribute}' is a scalar, not an embedded collection")]
    NotEmbedded {
        attribute: String,
    },

    /// An embedded attribute would alias one of the entity's own keys.
    #[error("Type '{type_name}' cannot name an embedded attribute '{attribute}': the key is reserved")]
    ReservedAttribute {
        type_name: String,
        attribute: String,
    },
}

/// Top-level error type for rtmodel.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Schema misuse: unknown names, wrong kinds.
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// The backing store could not be reached or rejected an operation.
    #[error("Store error: {0}")]
    Storage(#[from] StorageError),

    /// The entity lock was not acquired before the configured timeout.
    #[error("Lock '{token}' unavailable after {waited_ms}ms")]
    LockUnavailable {
        token: String,
        waited_ms: u64,
    },

    /// A snapshot failed to encode or decode.
    #[error("Snapshot codec error: {message}")]
    Codec {
        message: String,
    },

    /// A stored value does not decode as its declared kind.
    #[error("Corrupt data at '{key}': {message}")]
    CorruptData {
        key: String,
        message: String,
    },

    /// Rejected [`ModelConfig`](crate::ModelConfig) settings.
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        message: String,
    },

    /// Invariant violation inside the crate.
    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl ModelError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a corrupt-data error for the given key.
    #[must_use]
    pub fn corrupt(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CorruptData {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Returns true if this is a schema error.
    #[must_use]
    pub const fn is_schema(&self) -> bool {
        matches!(self, Self::Schema(_))
    }

    /// Returns true if the backing store failed.
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns true if a lock could not be acquired in time.
    #[must_use]
    pub const fn is_lock_unavailable(&self) -> bool {
        matches!(self, Self::LockUnavailable { .. })
    }

    /// Returns true if retrying the same call may succeed.
    ///
    /// Nothing is retried internally; this is a hint for callers layering
    /// their own policy on top.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::LockUnavailable { .. } => true,
            Self::Storage(e) => matches!(e, StorageError::Connection(_)),
            _ => false,
        }
    }
}

/// Result type alias for rtmodel operations.
pub type ModelResult<T> = Result<T, ModelError>;

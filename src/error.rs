//! Error types for the locker
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Locker Error Enum ==
/// Unified error type for every locker operation.
///
/// None of these are fatal: each one is scoped to the operation that
/// produced it and leaves previously stored entries untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockerError {
    /// Key too long, unsupported value, or capability missing in the backend
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Value could not be converted to or from its text encoding
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Eviction could not free enough space for a pending write
    #[error("Capacity exceeded: needed {requested} bytes, reclaimed {reclaimed}")]
    CapacityExceeded {
        /// Bytes that had to be freed for the write to fit
        requested: u64,
        /// Bytes actually freed by eviction
        reclaimed: u64,
    },

    /// The storage medium rejected the operation
    #[error("Backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for LockerError {
    fn from(err: serde_json::Error) -> Self {
        LockerError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for LockerError {
    fn from(err: std::io::Error) -> Self {
        LockerError::Backend(err.to_string())
    }
}

// == Result Type Alias ==
/// Convenience Result type for the locker.
pub type Result<T> = std::result::Result<T, LockerError>;

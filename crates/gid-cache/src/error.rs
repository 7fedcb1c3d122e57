//! Error types for the GID cache.

use thiserror::Error;

/// Errors returned by cache operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The device has no GID table facility (not attached).
    #[error("device has no GID tables")]
    Unsupported,

    /// The port's table exists but is not serving (not yet activated, or
    /// being torn down).
    #[error("GID table is not active")]
    NotActive,

    /// No free slot left for an add.
    #[error("GID table is full")]
    NoSpace,

    /// Lookup miss.
    #[error("GID not found")]
    NotFound,

    /// Attempted deletion of a protected default GID.
    #[error("default GIDs cannot be deleted")]
    PermissionDenied,

    /// Index outside the table's fixed capacity.
    #[error("index {index} out of range for table of {capacity}")]
    OutOfRange { index: usize, capacity: usize },

    /// A concurrent write was observed; the caller should retry.
    #[error("entry was being modified, retry")]
    Retry,

    /// Hardware programming failed; the slot was degraded to empty.
    #[error(transparent)]
    Hardware(#[from] DeviceError),
}

/// Errors surfaced by the device driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// The hardware GID programming call failed.
    #[error("GID programming failed: {0}")]
    Program(String),

    /// A port capability query failed.
    #[error("port query failed: {0}")]
    Query(String),
}

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

//! Error types for GID cache management.

use thiserror::Error;

/// Errors surfaced by the event manager.
#[derive(Debug, Error)]
pub enum MgmtError {
    /// The serialized task queue is closed; the event was dropped (and
    /// logged). Events are never retried implicitly.
    #[error("event queue closed, event dropped")]
    QueueClosed,

    /// A cache operation performed outside the event path failed.
    #[error(transparent)]
    Cache(#[from] gid_cache::CacheError),
}

/// Result type alias for management operations.
pub type Result<T> = std::result::Result<T, MgmtError>;

//! Unified error taxonomy for the Core API Facade.
//!
//! Every operation exposed by [`crate::Core`] returns [`Result<T>`]. The
//! kinds below are the surface taxonomy from the specification: module-level
//! errors (storage, context codec, connectors) convert into these via `From`
//! so callers only ever match on one enum.

use thiserror::Error;

/// Result alias used throughout the crate's public surface.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Surface error kinds. Soft-degradation kinds (`ProviderUnavailable`,
/// `FetchFailed`, `CorruptContext`) are normally absorbed into result
/// envelopes as flags rather than returned as `Err`; they remain part of
/// this enum because some internal call sites do propagate them before the
/// facade converts them to a flag.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Caller-provided data violates an invariant. Never retried by the core.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Uniqueness or cycle violation. Terminal without caller action.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A second process attempted to open the database for writing.
    #[error("database is locked by another process")]
    BackendLocked,

    /// Context blob failed to decompress or validate.
    #[error("corrupt context: {0}")]
    CorruptContext(String),

    /// Embedding provider raised; caller proceeds in degraded mode.
    #[error("embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// HTTP fetch during enrichment failed.
    #[error("fetch failed: {0}")]
    FetchFailed(String),

    /// Schema migration rolled back; database is at the previous version.
    #[error("migration aborted: {0}")]
    MigrationAborted(String),

    /// Underlying SQLite error not otherwise classified above.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Underlying filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// True for kinds that the facade absorbs into a result envelope's
    /// degraded-mode flags instead of surfacing as a hard error to the caller.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            CoreError::ProviderUnavailable(_) | CoreError::FetchFailed(_) | CoreError::CorruptContext(_)
        )
    }

    /// One-line reason suitable for a CLI's non-zero exit message (§7).
    pub fn exit_reason(&self) -> String {
        self.to_string()
    }
}

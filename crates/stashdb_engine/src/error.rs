//! Error types for engine operations.

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors reported by a storage engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// A named partition or index does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A key-uniqueness constraint was violated.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// A record or key was malformed.
    #[error("data error: {0}")]
    Data(String),

    /// A write was attempted inside a read-only unit.
    #[error("unit is read-only")]
    ReadOnly,

    /// The atomic unit was aborted by an earlier failure.
    #[error("unit aborted")]
    Aborted,

    /// The connection is closed.
    #[error("connection is closed")]
    Closed,

    /// Other open connections prevent the request from proceeding.
    #[error("database {database} is blocked by {open} open connection(s)")]
    Blocked {
        /// Database name.
        database: String,
        /// Number of connections holding the database open.
        open: usize,
    },

    /// The requested version is older than the stored version.
    #[error("requested version {requested} is lower than stored version {stored}")]
    VersionMismatch {
        /// Version stored in the engine.
        stored: u64,
        /// Version that was requested.
        requested: u64,
    },

    /// Versions start at 1.
    #[error("invalid version: {0}")]
    InvalidVersion(u64),

    /// Operation not permitted in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The upgrade handler failed.
    #[error("upgrade failed: {0}")]
    Upgrade(String),
}

impl EngineError {
    /// Creates a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Creates a constraint error.
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::Constraint(message.into())
    }

    /// Creates a data error.
    pub fn data(message: impl Into<String>) -> Self {
        Self::Data(message.into())
    }

    /// Creates an upgrade error.
    pub fn upgrade(message: impl Into<String>) -> Self {
        Self::Upgrade(message.into())
    }

    /// Returns true if this error is a key-uniqueness violation.
    #[must_use]
    pub fn is_constraint(&self) -> bool {
        matches!(self, Self::Constraint(_))
    }
}

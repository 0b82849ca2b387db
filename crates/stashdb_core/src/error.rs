//! Error types for StashDB core.

use crate::executor::Primitive;
use stashdb_engine::EngineError;
use thiserror::Error;

/// Result type for core operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors detected while validating a schema descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The database name is empty.
    #[error("database name is empty")]
    EmptyDatabaseName,

    /// Versions start at 1.
    #[error("invalid schema version {0}; versions start at 1")]
    InvalidVersion(u64),

    /// The descriptor declares no partitions.
    #[error("schema declares no partitions")]
    EmptySchema,

    /// A partition or index has an empty name.
    #[error("{kind} name is empty")]
    EmptyName {
        /// What was left unnamed ("partition" or "index").
        kind: &'static str,
    },

    /// Two partitions share a name.
    #[error("partition {0} is declared more than once")]
    DuplicatePartition(String),

    /// Two indexes on one partition share a name.
    #[error("index {index} is declared more than once on partition {partition}")]
    DuplicateIndex {
        /// Partition name.
        partition: String,
        /// Index name.
        index: String,
    },

    /// A key path is empty or malformed.
    #[error("invalid key path {path:?} on {owner}")]
    InvalidKeyPath {
        /// Partition, or `partition.index`, owning the key path.
        owner: String,
        /// The offending key path.
        path: String,
    },

    /// The named partition is not part of the schema.
    #[error("partition {0} is not declared in the schema")]
    UnknownPartition(String),

    /// No default partition could be resolved.
    #[error("schema has several partitions and no default; name the partition explicitly")]
    NoDefaultPartition,
}

/// Errors surfaced to callers of the store.
///
/// Every variant carries enough context (database, partition, primitive)
/// to log or retry at a higher layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Invalid schema descriptor.
    #[error("invalid schema: {0}")]
    Config(#[from] ConfigError),

    /// Opening or migrating the database failed.
    #[error("failed to open database {database}: {source}")]
    Connection {
        /// Database name.
        database: String,
        /// Engine failure.
        source: EngineError,
    },

    /// A single operation failed.
    #[error("{primitive} on partition {partition} failed: {source}")]
    Operation {
        /// Target partition.
        partition: String,
        /// Primitive that failed.
        primitive: Primitive,
        /// Engine failure.
        source: EngineError,
    },

    /// A single operation violated key uniqueness.
    ///
    /// This is a refinement of [`StoreError::Operation`].
    #[error("{primitive} on partition {partition} violated a key constraint: {source}")]
    Constraint {
        /// Target partition.
        partition: String,
        /// Primitive that failed.
        primitive: Primitive,
        /// Engine failure.
        source: EngineError,
    },

    /// A bulk write failed; none of the batch was applied.
    #[error("bulk write to partition {partition} failed: {source}")]
    BulkWrite {
        /// Target partition.
        partition: String,
        /// Engine failure.
        source: EngineError,
    },

    /// Deleting the database failed.
    #[error("failed to delete database {database}: {source}")]
    Destroy {
        /// Database name.
        database: String,
        /// Engine failure.
        source: EngineError,
    },

    /// A value could not be converted to or from a record.
    #[error("invalid record: {message}")]
    InvalidRecord {
        /// Description of the conversion failure.
        message: String,
    },
}

impl StoreError {
    /// Classifies a failed primitive as `Constraint` or `Operation`.
    pub fn operation(
        partition: impl Into<String>,
        primitive: Primitive,
        source: EngineError,
    ) -> Self {
        let partition = partition.into();
        if source.is_constraint() {
            Self::Constraint {
                partition,
                primitive,
                source,
            }
        } else {
            Self::Operation {
                partition,
                primitive,
                source,
            }
        }
    }

    /// Creates an invalid record error.
    pub fn invalid_record(message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            message: message.into(),
        }
    }

    /// Returns true for single-operation failures, constraint violations included.
    #[must_use]
    pub fn is_operation(&self) -> bool {
        matches!(self, Self::Operation { .. } | Self::Constraint { .. })
    }

    /// Returns true for key-uniqueness violations.
    #[must_use]
    pub fn is_constraint(&self) -> bool {
        matches!(self, Self::Constraint { .. })
    }

    /// Partition the failure relates to, if any.
    #[must_use]
    pub fn partition(&self) -> Option<&str> {
        match self {
            Self::Operation { partition, .. }
            | Self::Constraint { partition, .. }
            | Self::BulkWrite { partition, .. } => Some(partition),
            _ => None,
        }
    }

    /// Database the failure relates to, if any.
    #[must_use]
    pub fn database(&self) -> Option<&str> {
        match self {
            Self::Connection { database, .. } | Self::Destroy { database, .. } => Some(database),
            _ => None,
        }
    }

    /// Underlying engine failure, if any.
    #[must_use]
    pub fn engine_error(&self) -> Option<&EngineError> {
        match self {
            Self::Connection { source, .. }
            | Self::Operation { source, .. }
            | Self::Constraint { source, .. }
            | Self::BulkWrite { source, .. }
            | Self::Destroy { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_is_refined_operation() {
        let err = StoreError::operation("users", Primitive::Add, EngineError::constraint("dup"));
        assert!(err.is_constraint());
        assert!(err.is_operation());
        assert_eq!(err.partition(), Some("users"));

        let err = StoreError::operation("users", Primitive::Get, EngineError::Aborted);
        assert!(!err.is_constraint());
        assert!(err.is_operation());
    }

    #[test]
    fn error_context() {
        let err = StoreError::Connection {
            database: "app".into(),
            source: EngineError::InvalidVersion(0),
        };
        assert_eq!(err.database(), Some("app"));
        assert_eq!(err.partition(), None);
        assert_eq!(err.engine_error(), Some(&EngineError::InvalidVersion(0)));
        assert!(!err.is_operation());
    }

    #[test]
    fn error_display() {
        let err = StoreError::operation("users", Primitive::GetAll, EngineError::Closed);
        assert_eq!(
            err.to_string(),
            "getAll on partition users failed: connection is closed"
        );

        let err: StoreError = ConfigError::DuplicatePartition("users".into()).into();
        assert_eq!(
            err.to_string(),
            "invalid schema: partition users is declared more than once"
        );
    }
}

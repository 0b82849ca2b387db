//! Schema migration.
//!
//! When the engine finds the stored version older than the declared one it
//! calls back into [`SchemaMigration`], which walks the whole descriptor and
//! creates every partition and index that is missing. Existence is checked
//! before each creation, so the migration is idempotent: running it against
//! a database that already matches the descriptor changes nothing.
//!
//! Migrations are:
//! - **Declarative**: the descriptor is the only input
//! - **Additive**: partitions and indexes are never dropped or altered
//! - **Atomic**: the engine applies all creations or none of them

use crate::connection::ConnectionState;
use crate::schema::SchemaDescriptor;
use parking_lot::{Mutex, RwLock};
use stashdb_engine::{EngineResult, UpgradeHandler, VersionChange};

/// A single schema change applied during a migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOperation {
    /// A partition was created.
    CreatePartition {
        /// Partition name.
        name: String,
        /// Key path of the new partition.
        key_path: String,
    },
    /// A secondary index was created.
    CreateIndex {
        /// Partition the index belongs to.
        partition: String,
        /// Index name.
        name: String,
        /// Record attribute the index is keyed by.
        key_path: String,
        /// Whether the index enforces uniqueness.
        unique: bool,
    },
}

/// Summary of one migration run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Version stored before the migration (0 for a new database).
    pub from_version: u64,
    /// Version after the migration.
    pub to_version: u64,
    /// Changes applied, in order.
    pub operations: Vec<MigrationOperation>,
}

impl MigrationReport {
    /// Returns true if the migration changed nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Number of partitions created.
    #[must_use]
    pub fn partitions_created(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op, MigrationOperation::CreatePartition { .. }))
            .count()
    }

    /// Number of indexes created.
    #[must_use]
    pub fn indexes_created(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op, MigrationOperation::CreateIndex { .. }))
            .count()
    }
}

/// Brings `change` in line with `schema`, creating whatever is missing.
///
/// # Errors
///
/// Propagates the first engine failure; the engine then discards every
/// change made so far.
pub fn migrate(
    schema: &SchemaDescriptor,
    change: &mut dyn VersionChange,
) -> EngineResult<MigrationReport> {
    let mut report = MigrationReport {
        from_version: change.old_version(),
        to_version: change.new_version(),
        operations: Vec::new(),
    };

    for partition in schema.partitions() {
        if !change.contains_partition(partition.name()) {
            change.create_partition(partition.name(), partition.key_path())?;
            report.operations.push(MigrationOperation::CreatePartition {
                name: partition.name().to_string(),
                key_path: partition.key_path().to_string(),
            });
        }

        let existing = change.index_names(partition.name())?;
        for index in partition.indexes() {
            if existing.iter().any(|name| *name == index.name) {
                continue;
            }
            change.create_index(partition.name(), &index.name, &index.key_path, index.unique)?;
            report.operations.push(MigrationOperation::CreateIndex {
                partition: partition.name().to_string(),
                name: index.name.clone(),
                key_path: index.key_path.clone(),
                unique: index.unique,
            });
        }
    }

    Ok(report)
}

/// Upgrade handler handed to the engine on every open.
pub(crate) struct SchemaMigration<'a> {
    schema: &'a SchemaDescriptor,
    state: &'a RwLock<ConnectionState>,
    report: Mutex<Option<MigrationReport>>,
}

impl<'a> SchemaMigration<'a> {
    pub(crate) fn new(schema: &'a SchemaDescriptor, state: &'a RwLock<ConnectionState>) -> Self {
        Self {
            schema,
            state,
            report: Mutex::new(None),
        }
    }

    /// Report of the upgrade, if the engine ran one.
    pub(crate) fn into_report(self) -> Option<MigrationReport> {
        self.report.into_inner()
    }
}

impl UpgradeHandler for SchemaMigration<'_> {
    fn upgrade(&self, change: &mut dyn VersionChange) -> EngineResult<()> {
        *self.state.write() = ConnectionState::Migrating;
        let report = migrate(self.schema, change)?;
        *self.report.lock() = Some(report);
        Ok(())
    }
}

//! Schema descriptors.
//!
//! A [`SchemaDescriptor`] declares the database a store talks to: its name,
//! its version, and the partitions (with their key paths and secondary
//! indexes) that must exist once the database is open. Descriptors are
//! validated once by [`SchemaBuilder::build`] and are immutable afterwards.
//!
//! ```
//! use stashdb_core::{IndexSpec, PartitionSpec, SchemaDescriptor};
//!
//! let schema = SchemaDescriptor::builder()
//!     .database_name("app")
//!     .version(2)
//!     .partition(PartitionSpec::new("users").index(IndexSpec::new("by_email", "email").unique()))
//!     .partition(PartitionSpec::new("sessions").with_key_path("token"))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(schema.partitions().len(), 2);
//! assert_eq!(schema.partition("users").unwrap().key_path(), "id");
//! assert_eq!(schema.default_partition(), None);
//! ```

use crate::config::{Config, DEFAULT_KEY_PATH, DEFAULT_PARTITION};
use crate::error::ConfigError;
use stashdb_engine::KeyPath;
use std::collections::HashSet;

/// A secondary index declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    /// Index name, unique within its partition.
    pub name: String,
    /// Record attribute the index is keyed by.
    pub key_path: String,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
}

impl IndexSpec {
    /// Creates a non-unique index over `key_path`.
    pub fn new(name: impl Into<String>, key_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: key_path.into(),
            unique: false,
        }
    }

    /// Makes this a unique index.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// A partition declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSpec {
    name: String,
    key_path: Option<String>,
    indexes: Vec<IndexSpec>,
}

impl PartitionSpec {
    /// Declares a partition keyed by the configured default key path.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: None,
            indexes: Vec::new(),
        }
    }

    /// Sets the partition's key path.
    #[must_use]
    pub fn with_key_path(mut self, key_path: impl Into<String>) -> Self {
        self.key_path = Some(key_path.into());
        self
    }

    /// Adds a secondary index.
    #[must_use]
    pub fn index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    /// Partition name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key path of the partition.
    #[must_use]
    pub fn key_path(&self) -> &str {
        self.key_path.as_deref().unwrap_or(DEFAULT_KEY_PATH)
    }

    /// Declared secondary indexes, in declaration order.
    #[must_use]
    pub fn indexes(&self) -> &[IndexSpec] {
        &self.indexes
    }

    /// Looks up an index by name.
    #[must_use]
    pub fn get_index(&self, name: &str) -> Option<&IndexSpec> {
        self.indexes.iter().find(|index| index.name == name)
    }
}

/// The validated, immutable schema of a database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDescriptor {
    database_name: String,
    version: u64,
    partitions: Vec<PartitionSpec>,
    default_partition: Option<String>,
}

impl SchemaDescriptor {
    /// Starts a schema from the default configuration.
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new(Config::default())
    }

    /// Starts a schema from `config`.
    pub fn builder_with(config: Config) -> SchemaBuilder {
        SchemaBuilder::new(config)
    }

    /// Database name.
    #[must_use]
    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    /// Schema version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Declared partitions, in declaration order.
    #[must_use]
    pub fn partitions(&self) -> &[PartitionSpec] {
        &self.partitions
    }

    /// Looks up a partition by name.
    #[must_use]
    pub fn partition(&self, name: &str) -> Option<&PartitionSpec> {
        self.partitions.iter().find(|partition| partition.name == name)
    }

    /// Names of the declared partitions, in declaration order.
    pub fn partition_names(&self) -> impl Iterator<Item = &str> {
        self.partitions.iter().map(PartitionSpec::name)
    }

    /// Partition used by the store's shortcut methods.
    ///
    /// This is the explicitly configured default, or the only partition
    /// when the schema declares exactly one.
    #[must_use]
    pub fn default_partition(&self) -> Option<&str> {
        match (&self.default_partition, self.partitions.as_slice()) {
            (Some(name), _) => Some(name),
            (None, [only]) => Some(only.name()),
            _ => None,
        }
    }
}

impl Default for SchemaDescriptor {
    /// A single `store` partition keyed by `id` in database `stashdb`, version 1.
    fn default() -> Self {
        let config = Config::default();
        Self {
            database_name: config.database_name,
            version: config.version,
            partitions: vec![PartitionSpec::new(DEFAULT_PARTITION).with_key_path(DEFAULT_KEY_PATH)],
            default_partition: None,
        }
    }
}

/// Builder for [`SchemaDescriptor`].
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    config: Config,
    partitions: Vec<PartitionSpec>,
}

impl SchemaBuilder {
    fn new(config: Config) -> Self {
        Self {
            config,
            partitions: Vec::new(),
        }
    }

    /// Sets the database name.
    #[must_use]
    pub fn database_name(mut self, name: impl Into<String>) -> Self {
        self.config = self.config.database_name(name);
        self
    }

    /// Sets the schema version.
    #[must_use]
    pub fn version(mut self, version: u64) -> Self {
        self.config = self.config.version(version);
        self
    }

    /// Sets the default partition.
    #[must_use]
    pub fn default_partition(mut self, name: impl Into<String>) -> Self {
        self.config = self.config.default_partition(name);
        self
    }

    /// Declares a partition.
    #[must_use]
    pub fn partition(mut self, partition: PartitionSpec) -> Self {
        self.partitions.push(partition);
        self
    }

    /// Validates the declarations and produces the descriptor.
    ///
    /// # Errors
    ///
    /// Returns an error if the database name is empty, the version is 0,
    /// no partition is declared, a partition or index name is empty or
    /// repeated, a key path is malformed, or the default partition is not
    /// declared.
    pub fn build(self) -> Result<SchemaDescriptor, ConfigError> {
        let Self { config, partitions } = self;

        if config.database_name.is_empty() {
            return Err(ConfigError::EmptyDatabaseName);
        }
        if config.version == 0 {
            return Err(ConfigError::InvalidVersion(config.version));
        }
        if partitions.is_empty() {
            return Err(ConfigError::EmptySchema);
        }

        let mut seen = HashSet::new();
        let mut resolved = Vec::with_capacity(partitions.len());
        for mut partition in partitions {
            if partition.name.is_empty() {
                return Err(ConfigError::EmptyName { kind: "partition" });
            }
            if !seen.insert(partition.name.clone()) {
                return Err(ConfigError::DuplicatePartition(partition.name));
            }

            let key_path = partition
                .key_path
                .take()
                .unwrap_or_else(|| config.default_key_path.clone());
            check_key_path(&partition.name, &key_path)?;
            partition.key_path = Some(key_path);

            let mut index_names = HashSet::new();
            for index in &partition.indexes {
                if index.name.is_empty() {
                    return Err(ConfigError::EmptyName { kind: "index" });
                }
                if !index_names.insert(index.name.as_str()) {
                    return Err(ConfigError::DuplicateIndex {
                        partition: partition.name.clone(),
                        index: index.name.clone(),
                    });
                }
                check_key_path(&format!("{}.{}", partition.name, index.name), &index.key_path)?;
            }

            resolved.push(partition);
        }

        if let Some(name) = &config.default_partition {
            if !seen.contains(name) {
                return Err(ConfigError::UnknownPartition(name.clone()));
            }
        }

        Ok(SchemaDescriptor {
            database_name: config.database_name,
            version: config.version,
            partitions: resolved,
            default_partition: config.default_partition,
        })
    }
}

fn check_key_path(owner: &str, path: &str) -> Result<(), ConfigError> {
    KeyPath::parse(path)
        .map(|_| ())
        .map_err(|_| ConfigError::InvalidKeyPath {
            owner: owner.to_string(),
            path: path.to_string(),
        })
}

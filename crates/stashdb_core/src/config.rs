//! Store configuration.

/// Database name used when none is configured.
pub const DEFAULT_DATABASE_NAME: &str = "stashdb";

/// Schema version used when none is configured.
pub const DEFAULT_VERSION: u64 = 1;

/// Partition created by [`Config`]-only stores.
pub const DEFAULT_PARTITION: &str = "store";

/// Key path used by partitions that do not declare one.
pub const DEFAULT_KEY_PATH: &str = "id";

/// Configuration shared by every partition of a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Name of the database to open.
    pub database_name: String,

    /// Schema version; raising it triggers a migration on the next open.
    pub version: u64,

    /// Partition targeted by the store's shortcut methods.
    ///
    /// When unset, a schema with exactly one partition uses that partition.
    pub default_partition: Option<String>,

    /// Key path for partitions declared without one.
    pub default_key_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_name: DEFAULT_DATABASE_NAME.to_string(),
            version: DEFAULT_VERSION,
            default_partition: None,
            default_key_path: DEFAULT_KEY_PATH.to_string(),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the database name.
    #[must_use]
    pub fn database_name(mut self, name: impl Into<String>) -> Self {
        self.database_name = name.into();
        self
    }

    /// Sets the schema version.
    #[must_use]
    pub const fn version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Sets the default partition.
    #[must_use]
    pub fn default_partition(mut self, name: impl Into<String>) -> Self {
        self.default_partition = Some(name.into());
        self
    }

    /// Sets the key path used by partitions that do not declare one.
    #[must_use]
    pub fn default_key_path(mut self, key_path: impl Into<String>) -> Self {
        self.default_key_path = key_path.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.database_name, "stashdb");
        assert_eq!(config.version, 1);
        assert_eq!(config.default_partition, None);
        assert_eq!(config.default_key_path, "id");
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .database_name("app")
            .version(3)
            .default_partition("users")
            .default_key_path("uuid");

        assert_eq!(config.database_name, "app");
        assert_eq!(config.version, 3);
        assert_eq!(config.default_partition.as_deref(), Some("users"));
        assert_eq!(config.default_key_path, "uuid");
    }
}

//! Configuration structs, passed to each component at construction.

use camino::Utf8PathBuf;
use serde::Deserialize;
use std::time::Duration;

/// Default name of the migration tracking table.
pub const DEFAULT_TRACKING_TABLE: &str = "strata_migrations";

/// Settings for the [`MigrationEngine`](crate::MigrationEngine).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding migration files
    pub migrations_dir: Utf8PathBuf,
    /// Name of the tracking table
    pub tracking_table: String,
    /// Run each migration and its tracking-row write in one transaction
    pub transactional: bool,
    /// Compare applied migrations against the files on disk before running
    pub validate_checksums: bool,
    /// Apply pending migrations that sort before the latest applied one.
    ///
    /// Unsafe: a later migration may already depend on state the earlier
    /// one was meant to create.
    pub allow_out_of_order: bool,
    pub lock: LockConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            migrations_dir: Utf8PathBuf::from("migrations"),
            tracking_table: DEFAULT_TRACKING_TABLE.to_string(),
            transactional: true,
            validate_checksums: true,
            allow_out_of_order: false,
            lock: LockConfig::default(),
        }
    }
}

/// Cross-process advisory lock held while migrations run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub enabled: bool,
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl LockConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: 30,
            poll_interval_ms: 250,
        }
    }
}

/// Settings for the [`SchemaIntrospector`](crate::SchemaIntrospector).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct IntrospectorConfig {
    /// Namespaces to read
    pub schemas: Vec<String>,
    pub include_views: bool,
    pub include_functions: bool,
    /// Tables never read (the tracking table is always excluded)
    pub exclude_tables: Vec<String>,
    /// Where `analyze()` writes its snapshot
    pub output_dir: Utf8PathBuf,
    /// Also write `schema.sql`
    pub write_sql: bool,
    /// Also write the declarative `schema.prisma`
    pub write_declarative: bool,
    /// Also write Rust type definitions
    pub generate_types: bool,
    pub tracking_table: String,
}

impl Default for IntrospectorConfig {
    fn default() -> Self {
        Self {
            schemas: vec!["public".to_string()],
            include_views: true,
            include_functions: true,
            exclude_tables: Vec::new(),
            output_dir: Utf8PathBuf::from("schema"),
            write_sql: true,
            write_declarative: false,
            generate_types: false,
            tracking_table: DEFAULT_TRACKING_TABLE.to_string(),
        }
    }
}

impl IntrospectorConfig {
    pub fn is_excluded(&self, table: &str) -> bool {
        table == self.tracking_table || self.exclude_tables.iter().any(|t| t == table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_defaults_fill_missing_keys() {
        let config: EngineConfig = toml::from_str(
            r#"
            migrations_dir = "db/migrations"
            [lock]
            timeout_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.migrations_dir, "db/migrations");
        assert_eq!(config.tracking_table, DEFAULT_TRACKING_TABLE);
        assert!(config.transactional);
        assert_eq!(config.lock.timeout(), Duration::from_secs(5));
        assert_eq!(config.lock.poll_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_introspector_excludes_tracking_table() {
        let config = IntrospectorConfig {
            exclude_tables: vec!["audit_log".into()],
            ..Default::default()
        };
        assert!(config.is_excluded(DEFAULT_TRACKING_TABLE));
        assert!(config.is_excluded("audit_log"));
        assert!(!config.is_excluded("users"));
    }
}

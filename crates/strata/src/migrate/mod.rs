//! SQL migrations: discovery, tracking and execution.
//!
//! Migrations are plain `.sql` files under a directory. The engine records
//! every attempt in a tracking table, verifies that applied files have not
//! changed, and applies or rolls back migrations in version order.

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

mod checksum;
pub use checksum::checksum;

mod engine;
pub use engine::{
    AppliedMigration, FailedMigration, MigrationEngine, RollbackOptions, RollbackReport,
    RunOptions, RunReport, StatusEntry, StatusReport,
};

mod file;
pub use file::{controls_transaction, discover, parse_migration, split_statements};

mod lock;

mod tracking;

mod version;
pub use version::Version;

/// What a migration does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationKind {
    #[default]
    Schema,
    Data,
    Seed,
}

impl MigrationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationKind::Schema => "schema",
            MigrationKind::Data => "data",
            MigrationKind::Seed => "seed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "schema" => Some(MigrationKind::Schema),
            "data" => Some(MigrationKind::Data),
            "seed" => Some(MigrationKind::Seed),
            _ => None,
        }
    }
}

impl fmt::Display for MigrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a migration stands.
///
/// ```text
/// PENDING ──> COMPLETED ──> ROLLED_BACK
///    └──────> FAILED
/// ```
///
/// Re-running a FAILED or ROLLED_BACK migration starts a fresh attempt: its
/// tracking row is replaced rather than transitioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationStatus {
    #[default]
    Pending,
    Completed,
    Failed,
    RolledBack,
}

impl MigrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationStatus::Pending => "PENDING",
            MigrationStatus::Completed => "COMPLETED",
            MigrationStatus::Failed => "FAILED",
            MigrationStatus::RolledBack => "ROLLED_BACK",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(MigrationStatus::Pending),
            "COMPLETED" => Some(MigrationStatus::Completed),
            "FAILED" => Some(MigrationStatus::Failed),
            "ROLLED_BACK" => Some(MigrationStatus::RolledBack),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: MigrationStatus) -> bool {
        matches!(
            (self, next),
            (MigrationStatus::Pending, MigrationStatus::Completed)
                | (MigrationStatus::Pending, MigrationStatus::Failed)
                | (MigrationStatus::Completed, MigrationStatus::RolledBack)
        )
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scalar stored in a migration's metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl MetadataValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetadataValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::String(v.to_string())
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Integer(v)
    }
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        MetadataValue::Bool(v)
    }
}

/// Extension data kept with a migration, stored as a JSON object.
pub type Metadata = IndexMap<String, MetadataValue>;

/// Metadata key counting execution attempts.
pub const ATTEMPTS_KEY: &str = "attempts";

/// Metadata key holding the checksum of the rollback SQL at apply time.
pub const ROLLBACK_CHECKSUM_KEY: &str = "rollback_checksum";

/// A migration, as discovered on disk or as recorded in the tracking table.
///
/// Rows loaded from the tracking table have empty `sql`; the text lives in
/// the file.
#[derive(Debug, Clone, PartialEq)]
pub struct Migration {
    pub id: String,
    pub version: Version,
    pub name: String,
    pub description: Option<String>,
    pub kind: MigrationKind,
    pub sql: String,
    pub rollback_sql: Option<String>,
    pub checksum: String,
    pub status: MigrationStatus,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub execution_time: Option<Duration>,
    pub error: Option<String>,
    pub metadata: Metadata,
    /// Whether the file allows running inside a transaction
    pub transactional: bool,
    /// The file it was read from, for discovered migrations
    pub path: Option<Utf8PathBuf>,
}

impl Migration {
    /// A pending migration with its checksum computed from `sql`.
    pub fn new(id: impl Into<String>, version: impl Into<Version>, name: impl Into<String>, sql: impl Into<String>) -> Self {
        let sql = sql.into();
        Self {
            id: id.into(),
            version: version.into(),
            name: name.into(),
            description: None,
            kind: MigrationKind::Schema,
            checksum: checksum(&sql),
            sql,
            rollback_sql: None,
            status: MigrationStatus::Pending,
            created_at: Utc::now(),
            executed_at: None,
            execution_time: None,
            error: None,
            metadata: Metadata::new(),
            transactional: true,
            path: None,
        }
    }

    pub fn attempts(&self) -> i64 {
        self.metadata
            .get(ATTEMPTS_KEY)
            .and_then(MetadataValue::as_i64)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        use MigrationStatus::*;
        assert!(Pending.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Failed));
        assert!(Completed.can_transition_to(RolledBack));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!RolledBack.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(RolledBack));
    }

    #[test]
    fn test_status_text_round_trips() {
        for status in [
            MigrationStatus::Pending,
            MigrationStatus::Completed,
            MigrationStatus::Failed,
            MigrationStatus::RolledBack,
        ] {
            assert_eq!(MigrationStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(MigrationStatus::parse("DONE"), None);
    }

    #[test]
    fn test_metadata_is_a_json_object_of_scalars() {
        let mut metadata = Metadata::new();
        metadata.insert(ATTEMPTS_KEY.into(), 2.into());
        metadata.insert("ticket".into(), "OPS-12".into());
        metadata.insert("reviewed".into(), true.into());
        let json = serde_json::to_string(&metadata).unwrap();
        assert_eq!(json, r#"{"attempts":2,"ticket":"OPS-12","reviewed":true}"#);
        let back: Metadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, metadata);
    }
}

//! Error types.

use camino::Utf8PathBuf;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// An error reported by the database, detached from the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbError {
    pub message: String,
    /// SQLSTATE, when the server sent one.
    pub code: Option<String>,
}

impl DbError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} (SQLSTATE {})", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for DbError {}

impl From<tokio_postgres::Error> for DbError {
    fn from(err: tokio_postgres::Error) -> Self {
        match err.as_db_error() {
            Some(db) => {
                let mut message = db.message().to_string();
                if let Some(detail) = db.detail() {
                    message.push_str(": ");
                    message.push_str(detail);
                }
                DbError {
                    message,
                    code: Some(db.code().code().to_string()),
                }
            }
            None => DbError {
                message: err.to_string(),
                code: err.code().map(|c| c.code().to_string()),
            },
        }
    }
}

/// Errors that can occur when using strata.
#[derive(Debug, Error)]
pub enum Error {
    #[error("schema analysis failed while reading {stage}: {source}")]
    SchemaAnalysis {
        stage: &'static str,
        #[source]
        source: DbError,
    },

    #[error("failed to write snapshot {path}: {source}")]
    SnapshotWrite {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read snapshot {path}: {message}")]
    SnapshotRead { path: Utf8PathBuf, message: String },

    #[error("failed to initialize migration tracking table: {0}")]
    MigrationInit(#[source] DbError),

    #[error("migration {id} (version {version}) failed: {message}")]
    MigrationExecution {
        id: String,
        version: String,
        message: String,
    },

    #[error(
        "checksum mismatch for migration {id} (version {version}): recorded {stored}, file now hashes to {current}"
    )]
    ChecksumMismatch {
        id: String,
        version: String,
        stored: String,
        current: String,
    },

    #[error("rollback of migration {id} (version {version}) failed: {message}")]
    RollbackExecution {
        id: String,
        version: String,
        message: String,
    },

    #[error("migration generation failed: {0}")]
    MigrationGeneration(String),

    #[error("drift repair generation failed: {0}")]
    DriftMigrationGeneration(String),

    #[error("form migration generation failed: {0}")]
    FormMigrationGeneration(String),

    #[error("failed to load migration {path}: {message}")]
    Discovery { path: Utf8PathBuf, message: String },

    #[error(
        "migration {id} (version {version}) sorts before already-applied version {applied}; refusing to apply out of order"
    )]
    OutOfOrder {
        id: String,
        version: String,
        applied: String,
    },

    #[error("could not acquire the migration lock within {0:?}")]
    LockTimeout(Duration),

    #[error("database error: {0}")]
    Database(#[from] DbError),
}

impl Error {
    /// The stable code for this error, independent of its message.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::SchemaAnalysis { .. }
            | Error::SnapshotWrite { .. }
            | Error::SnapshotRead { .. } => ErrorCode::SchemaAnalysisFailed,
            Error::MigrationInit(_) => ErrorCode::MigrationInitFailed,
            Error::MigrationExecution { .. } => ErrorCode::MigrationExecutionFailed,
            Error::ChecksumMismatch { .. } => ErrorCode::ChecksumMismatch,
            Error::RollbackExecution { .. } => ErrorCode::RollbackExecutionFailed,
            Error::MigrationGeneration(_) => ErrorCode::MigrationGenerationFailed,
            Error::DriftMigrationGeneration(_) => ErrorCode::DriftMigrationGenerationFailed,
            Error::FormMigrationGeneration(_) => ErrorCode::FormMigrationGenerationFailed,
            Error::Discovery { .. } => ErrorCode::MigrationDiscoveryFailed,
            Error::OutOfOrder { .. } => ErrorCode::MigrationOutOfOrder,
            Error::LockTimeout(_) => ErrorCode::MigrationLockFailed,
            Error::Database(_) => ErrorCode::DatabaseError,
        }
    }
}

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    SchemaAnalysisFailed,
    MigrationInitFailed,
    MigrationExecutionFailed,
    ChecksumMismatch,
    RollbackExecutionFailed,
    MigrationGenerationFailed,
    DriftMigrationGenerationFailed,
    FormMigrationGenerationFailed,
    MigrationDiscoveryFailed,
    MigrationOutOfOrder,
    MigrationLockFailed,
    DatabaseError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::SchemaAnalysisFailed => "SCHEMA_ANALYSIS_FAILED",
            ErrorCode::MigrationInitFailed => "MIGRATION_INIT_FAILED",
            ErrorCode::MigrationExecutionFailed => "MIGRATION_EXECUTION_FAILED",
            ErrorCode::ChecksumMismatch => "CHECKSUM_MISMATCH",
            ErrorCode::RollbackExecutionFailed => "ROLLBACK_EXECUTION_FAILED",
            ErrorCode::MigrationGenerationFailed => "MIGRATION_GENERATION_FAILED",
            ErrorCode::DriftMigrationGenerationFailed => "DRIFT_MIGRATION_GENERATION_FAILED",
            ErrorCode::FormMigrationGenerationFailed => "FORM_MIGRATION_GENERATION_FAILED",
            ErrorCode::MigrationDiscoveryFailed => "MIGRATION_DISCOVERY_FAILED",
            ErrorCode::MigrationOutOfOrder => "MIGRATION_OUT_OF_ORDER",
            ErrorCode::MigrationLockFailed => "MIGRATION_LOCK_FAILED",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

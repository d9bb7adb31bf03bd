//! Postgres schema introspection, diffing and migrations.
//!
//! This crate provides:
//! - Reading a [`SchemaModel`] from a live catalog ([`SchemaIntrospector`])
//!   and persisting it as a snapshot
//! - Diffing two models into [`SchemaChange`]s
//! - Turning changes into ordered, verified DDL with rollback
//!   ([`generate`], [`diff_and_generate`])
//! - Drift detection and repair, and form-driven column generation
//! - Applying and rolling back `.sql` migration files ([`MigrationEngine`])
//!
//! # Migrations
//!
//! ```ignore
//! let engine = MigrationEngine::new(&client, EngineConfig::default());
//! let report = engine.run_migrations(RunOptions::default()).await?;
//! ```
//!
//! Every component takes its configuration and an [`EventSink`] at
//! construction; nothing reads ambient state.

pub mod config;
pub mod db;
pub mod ddl;
pub mod declarative;
pub mod diff;
pub mod drift;
mod error;
pub mod events;
pub mod form;
pub mod generate;
pub mod introspect;
pub mod migrate;
pub mod snapshot;
pub mod solver;
pub mod typegen;

pub use config::{EngineConfig, IntrospectorConfig, LockConfig};
pub use db::{Database, Row, RowExt, Value};
pub use diff::{SchemaChange, diff};
pub use drift::{DriftEntry, DriftKind, DriftObject, DriftReport, detect_drift, generate_from_drift_report};
pub use error::{DbError, Error, ErrorCode};
pub use events::{CollectingSink, EngineEvent, EventSink, TracingSink};
pub use form::{FieldKind, FormField, generate_from_form};
pub use generate::{
    GeneratedMigration, GeneratorOptions, Placement, Statement, create_table, diff_and_generate,
    generate,
};
pub use introspect::SchemaIntrospector;
pub use migrate::{
    Migration, MigrationEngine, MigrationKind, MigrationStatus, RollbackOptions, RollbackReport,
    RunOptions, RunReport, StatusReport, Version,
};

pub use strata_schema::*;

/// Result type for strata operations.
pub type Result<T> = std::result::Result<T, Error>;

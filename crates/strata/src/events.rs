//! Lifecycle events and the sinks that receive them.
//!
//! Components never log through ambient state for lifecycle events: each one
//! is handed an [`EventSink`] at construction. [`TracingSink`] is the default
//! and forwards everything to `tracing`.

use camino::Utf8PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Something worth telling an operator about.
///
/// Every event carries the correlation id of the run that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    AnalysisCompleted {
        correlation_id: Uuid,
        tables: usize,
        views: usize,
        functions: usize,
    },
    SnapshotWritten {
        correlation_id: Uuid,
        path: Utf8PathBuf,
    },
    TypeGenerationFailed {
        correlation_id: Uuid,
        message: String,
    },
    MigrationStarted {
        correlation_id: Uuid,
        id: String,
        version: String,
    },
    MigrationCompleted {
        correlation_id: Uuid,
        id: String,
        version: String,
        duration: Duration,
    },
    MigrationFailed {
        correlation_id: Uuid,
        id: String,
        version: String,
        error: String,
    },
    RollbackStarted {
        correlation_id: Uuid,
        id: String,
        version: String,
    },
    RollbackCompleted {
        correlation_id: Uuid,
        id: String,
        version: String,
        duration: Duration,
    },
    RollbackFailed {
        correlation_id: Uuid,
        id: String,
        version: String,
        error: String,
    },
    DriftDetected {
        correlation_id: Uuid,
        missing: usize,
        extra: usize,
        mismatched: usize,
    },
}

impl EngineEvent {
    pub fn correlation_id(&self) -> Uuid {
        match self {
            EngineEvent::AnalysisCompleted { correlation_id, .. }
            | EngineEvent::SnapshotWritten { correlation_id, .. }
            | EngineEvent::TypeGenerationFailed { correlation_id, .. }
            | EngineEvent::MigrationStarted { correlation_id, .. }
            | EngineEvent::MigrationCompleted { correlation_id, .. }
            | EngineEvent::MigrationFailed { correlation_id, .. }
            | EngineEvent::RollbackStarted { correlation_id, .. }
            | EngineEvent::RollbackCompleted { correlation_id, .. }
            | EngineEvent::RollbackFailed { correlation_id, .. }
            | EngineEvent::DriftDetected { correlation_id, .. } => *correlation_id,
        }
    }
}

/// Receives lifecycle events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &EngineEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &EngineEvent) {
        match event {
            EngineEvent::AnalysisCompleted {
                correlation_id,
                tables,
                views,
                functions,
            } => tracing::info!(%correlation_id, tables, views, functions, "schema analysis completed"),
            EngineEvent::SnapshotWritten {
                correlation_id,
                path,
            } => tracing::info!(%correlation_id, %path, "snapshot written"),
            EngineEvent::TypeGenerationFailed {
                correlation_id,
                message,
            } => tracing::warn!(%correlation_id, %message, "type generation failed"),
            EngineEvent::MigrationStarted {
                correlation_id,
                id,
                version,
            } => tracing::info!(%correlation_id, %id, %version, "applying migration"),
            EngineEvent::MigrationCompleted {
                correlation_id,
                id,
                version,
                duration,
            } => tracing::info!(%correlation_id, %id, %version, ?duration, "migration applied"),
            EngineEvent::MigrationFailed {
                correlation_id,
                id,
                version,
                error,
            } => tracing::error!(%correlation_id, %id, %version, %error, "migration failed"),
            EngineEvent::RollbackStarted {
                correlation_id,
                id,
                version,
            } => tracing::info!(%correlation_id, %id, %version, "rolling back migration"),
            EngineEvent::RollbackCompleted {
                correlation_id,
                id,
                version,
                duration,
            } => tracing::info!(%correlation_id, %id, %version, ?duration, "migration rolled back"),
            EngineEvent::RollbackFailed {
                correlation_id,
                id,
                version,
                error,
            } => tracing::error!(%correlation_id, %id, %version, %error, "rollback failed"),
            EngineEvent::DriftDetected {
                correlation_id,
                missing,
                extra,
                mismatched,
            } => tracing::warn!(%correlation_id, missing, extra, mismatched, "schema drift detected"),
        }
    }
}

/// Keeps every event in memory. Useful in tests and for rendering a summary.
#[derive(Debug, Default, Clone)]
pub struct CollectingSink {
    events: Arc<Mutex<Vec<EngineEvent>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: &EngineEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
    }
}

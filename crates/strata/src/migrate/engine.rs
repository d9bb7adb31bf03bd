//! Applying and rolling back migrations against one database session.

use super::file::{controls_transaction, discover, split_statements};
use super::lock::MigrationLock;
use super::tracking::Tracking;
use super::{
    ATTEMPTS_KEY, MetadataValue, Migration, MigrationStatus, ROLLBACK_CHECKSUM_KEY, Version,
    checksum,
};
use crate::config::EngineConfig;
use crate::db::Database;
use crate::events::{EngineEvent, EventSink, TracingSink};
use crate::{DbError, Error, Result};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Options for [`MigrationEngine::run_migrations`].
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Report what would run without touching the database
    pub dry_run: bool,
    /// Apply at most this many pending migrations
    pub batch_size: Option<usize>,
    /// Keep going after a failure
    pub force: bool,
}

/// Options for [`MigrationEngine::rollback_migrations`].
#[derive(Debug, Clone, Default)]
pub struct RollbackOptions {
    pub dry_run: bool,
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppliedMigration {
    pub id: String,
    pub version: Version,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailedMigration {
    pub id: String,
    pub version: Version,
    pub error: String,
}

/// The outcome of a run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub correlation_id: Uuid,
    pub dry_run: bool,
    /// Every pending migration, in the order it would run
    pub pending: Vec<Migration>,
    pub applied: Vec<AppliedMigration>,
    pub failed: Vec<FailedMigration>,
    /// Pending migrations not attempted, because of the batch size or an
    /// earlier failure
    pub skipped: Vec<String>,
}

impl RunReport {
    fn new(correlation_id: Uuid, dry_run: bool) -> Self {
        Self {
            correlation_id,
            dry_run,
            pending: Vec::new(),
            applied: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// The outcome of a rollback.
#[derive(Debug, Clone)]
pub struct RollbackReport {
    pub correlation_id: Uuid,
    pub dry_run: bool,
    /// Migrations selected for rollback, latest first
    pub targets: Vec<Migration>,
    pub rolled_back: Vec<AppliedMigration>,
    pub failed: Vec<FailedMigration>,
    pub skipped: Vec<String>,
}

impl RollbackReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// One line of a [`StatusReport`].
#[derive(Debug, Clone)]
pub struct StatusEntry {
    pub migration: Migration,
    /// Has a tracking row
    pub tracked: bool,
    /// Applied, but the file on disk no longer matches the recorded checksum
    pub modified: bool,
    /// Tracked, but no file with this id exists any more
    pub missing_file: bool,
}

/// Tracked and discovered migrations side by side, in version order.
#[derive(Debug, Clone, Default)]
pub struct StatusReport {
    pub entries: Vec<StatusEntry>,
}

impl StatusReport {
    pub fn count(&self, status: MigrationStatus) -> usize {
        self.entries
            .iter()
            .filter(|e| e.migration.status == status)
            .count()
    }
}

/// Runs migrations from a directory against one database session.
///
/// The session must stay the same for the engine's lifetime: transactions
/// and the advisory lock are session state.
pub struct MigrationEngine<'a> {
    db: &'a dyn Database,
    config: EngineConfig,
    events: Arc<dyn EventSink>,
}

impl<'a> MigrationEngine<'a> {
    pub fn new(db: &'a dyn Database, config: EngineConfig) -> Self {
        Self {
            db,
            config,
            events: Arc::new(TracingSink),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn tracking(&self) -> Tracking<'a> {
        Tracking::new(self.db, &self.config.tracking_table)
    }

    /// Create the tracking table and its indexes. Safe to call repeatedly.
    pub async fn initialize(&self) -> Result<()> {
        self.tracking().create().await.map_err(Error::MigrationInit)?;
        tracing::debug!(table = %self.config.tracking_table, "tracking table ready");
        Ok(())
    }

    /// Every tracked migration, in version order.
    pub async fn get_migration_status(&self) -> Result<Vec<Migration>> {
        self.initialize().await?;
        Ok(self.tracking().load().await?)
    }

    /// Tracked migrations merged with the files on disk.
    pub async fn status_report(&self) -> Result<StatusReport> {
        let tracked = self.get_migration_status().await?;
        let discovered = discover(&self.config.migrations_dir)?;

        let mut entries = Vec::new();
        for file in &discovered {
            match tracked.iter().find(|t| t.id == file.id) {
                Some(row) => entries.push(StatusEntry {
                    modified: row.status == MigrationStatus::Completed && row.checksum != file.checksum,
                    migration: Migration {
                        sql: file.sql.clone(),
                        rollback_sql: file.rollback_sql.clone(),
                        transactional: file.transactional,
                        path: file.path.clone(),
                        ..row.clone()
                    },
                    tracked: true,
                    missing_file: false,
                }),
                None => entries.push(StatusEntry {
                    migration: file.clone(),
                    tracked: false,
                    modified: false,
                    missing_file: false,
                }),
            }
        }
        for row in &tracked {
            if !discovered.iter().any(|f| f.id == row.id) {
                entries.push(StatusEntry {
                    migration: row.clone(),
                    tracked: true,
                    modified: false,
                    missing_file: true,
                });
            }
        }
        entries.sort_by(|a, b| a.migration.version.cmp(&b.migration.version));
        Ok(StatusReport { entries })
    }

    /// Apply pending migrations in ascending version order.
    ///
    /// Stops at the first failure unless `force` is set. When the batch held
    /// a single migration its failure is returned as an error; otherwise
    /// failures are listed in the report.
    pub async fn run_migrations(&self, opts: RunOptions) -> Result<RunReport> {
        let correlation_id = Uuid::new_v4();
        let mut report = RunReport::new(correlation_id, opts.dry_run);

        if opts.dry_run {
            let tracked = self.load_if_present().await?;
            report.pending = self.plan(&tracked)?;
            report.skipped = report.pending.iter().map(|m| m.id.clone()).collect();
            return Ok(report);
        }

        self.initialize().await?;
        let lock = self.lock().await?;
        let result = self.run_batch(&opts, &mut report).await;
        self.unlock(lock, result.is_ok()).await?;
        let batch = result?;

        if batch == 1
            && let [failure] = report.failed.as_slice()
        {
            return Err(Error::MigrationExecution {
                id: failure.id.clone(),
                version: failure.version.to_string(),
                message: failure.error.clone(),
            });
        }

        tracing::info!(
            %correlation_id,
            applied = report.applied.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "migration run finished"
        );
        Ok(report)
    }

    /// Roll back completed migrations with a version above `target`, latest
    /// first, or only the latest one when `target` is `None`.
    pub async fn rollback_migrations(
        &self,
        target: Option<&str>,
        opts: RollbackOptions,
    ) -> Result<RollbackReport> {
        let correlation_id = Uuid::new_v4();
        let mut report = RollbackReport {
            correlation_id,
            dry_run: opts.dry_run,
            targets: Vec::new(),
            rolled_back: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
        };

        if opts.dry_run {
            let tracked = self.load_if_present().await?;
            report.targets = rollback_targets(&tracked, target);
            report.skipped = report.targets.iter().map(|m| m.id.clone()).collect();
            return Ok(report);
        }

        self.initialize().await?;
        let lock = self.lock().await?;
        let result = self.rollback_batch(target, &opts, &mut report).await;
        self.unlock(lock, result.is_ok()).await?;
        let batch = result?;

        if batch == 1
            && let [failure] = report.failed.as_slice()
        {
            return Err(Error::RollbackExecution {
                id: failure.id.clone(),
                version: failure.version.to_string(),
                message: failure.error.clone(),
            });
        }

        tracing::info!(
            %correlation_id,
            rolled_back = report.rolled_back.len(),
            failed = report.failed.len(),
            "rollback finished"
        );
        Ok(report)
    }

    /// Remove the tracking row of a migration that is not COMPLETED, so it
    /// counts as never attempted. Returns whether a row was removed.
    pub async fn forget_migration(&self, id: &str) -> Result<bool> {
        self.initialize().await?;
        let removed = self.tracking().forget(id).await? > 0;
        if removed {
            tracing::info!(%id, "tracking row removed");
        } else {
            tracing::warn!(%id, "nothing forgotten: no such row, or the migration is COMPLETED");
        }
        Ok(removed)
    }

    async fn load_if_present(&self) -> Result<Vec<Migration>> {
        let tracking = self.tracking();
        if tracking.exists().await? {
            Ok(tracking.load().await?)
        } else {
            Ok(Vec::new())
        }
    }

    async fn lock(&self) -> Result<Option<MigrationLock<'a>>> {
        if !self.config.lock.enabled {
            return Ok(None);
        }
        MigrationLock::acquire(self.db, &self.config.tracking_table, &self.config.lock)
            .await
            .map(Some)
    }

    /// Release the lock. A release failure is only reported when nothing
    /// else failed first.
    async fn unlock(&self, lock: Option<MigrationLock<'a>>, report_errors: bool) -> Result<()> {
        let Some(lock) = lock else {
            return Ok(());
        };
        match lock.release().await {
            Err(e) if report_errors => Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "failed to release migration lock");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    /// Discover files, check them against `tracked`, and return what is
    /// pending in the order it would run.
    fn plan(&self, tracked: &[Migration]) -> Result<Vec<Migration>> {
        let discovered = discover(&self.config.migrations_dir)?;
        let completed: Vec<&Migration> = tracked
            .iter()
            .filter(|t| t.status == MigrationStatus::Completed)
            .collect();

        if self.config.validate_checksums {
            for row in &completed {
                if let Some(file) = discovered.iter().find(|f| f.id == row.id)
                    && file.checksum != row.checksum
                {
                    return Err(Error::ChecksumMismatch {
                        id: row.id.clone(),
                        version: row.version.to_string(),
                        stored: row.checksum.clone(),
                        current: file.checksum.clone(),
                    });
                }
            }
        }

        let done: HashSet<&str> = completed.iter().map(|m| m.id.as_str()).collect();
        let pending: Vec<Migration> = discovered
            .into_iter()
            .filter(|m| !done.contains(m.id.as_str()))
            .collect();

        // A FAILED or ROLLED_BACK row is a retry, not a newcomer.
        let attempted: HashSet<&str> = tracked
            .iter()
            .filter(|t| t.status != MigrationStatus::Completed)
            .map(|t| t.id.as_str())
            .collect();
        if let Some(latest) = completed.iter().map(|m| &m.version).max()
            && let Some(early) = pending
                .iter()
                .find(|m| m.version < *latest && !attempted.contains(m.id.as_str()))
        {
            if !self.config.allow_out_of_order {
                return Err(Error::OutOfOrder {
                    id: early.id.clone(),
                    version: early.version.to_string(),
                    applied: latest.to_string(),
                });
            }
            tracing::warn!(id = %early.id, version = %early.version, applied = %latest, "applying migration out of order");
        }

        for migration in &pending {
            self.reject_transaction_control(migration, &migration.sql)?;
        }
        Ok(pending)
    }

    /// A script that runs inside the engine's transaction must not open or
    /// end one itself, or the tracking-row write is no longer atomic with it.
    fn reject_transaction_control(&self, file: &Migration, sql: &str) -> Result<()> {
        if self.config.transactional && file.transactional && controls_transaction(sql) {
            return Err(Error::Discovery {
                path: file
                    .path
                    .clone()
                    .unwrap_or_else(|| self.config.migrations_dir.clone()),
                message: format!(
                    "{} contains BEGIN/COMMIT but runs inside a transaction; add -- @transactional: false",
                    file.id
                ),
            });
        }
        Ok(())
    }

    /// Before a rollback: the applied file must be unchanged, forward SQL
    /// and rollback SQL alike.
    fn check_rollback_file(&self, row: &Migration, file: &Migration) -> Result<()> {
        let mismatch = |stored: &str, current: String| Error::ChecksumMismatch {
            id: row.id.clone(),
            version: row.version.to_string(),
            stored: stored.to_string(),
            current,
        };

        if self.config.validate_checksums {
            if file.checksum != row.checksum {
                return Err(mismatch(&row.checksum, file.checksum.clone()));
            }
            let stored = row
                .metadata
                .get(ROLLBACK_CHECKSUM_KEY)
                .and_then(MetadataValue::as_str);
            let current = file.rollback_sql.as_deref().map(checksum);
            if let Some(stored) = stored
                && current.as_deref() != Some(stored)
            {
                return Err(mismatch(
                    stored,
                    current.unwrap_or_else(|| "no rollback SQL".to_string()),
                ));
            }
        }
        if let Some(sql) = &file.rollback_sql {
            self.reject_transaction_control(file, sql)?;
        }
        Ok(())
    }

    async fn run_batch(&self, opts: &RunOptions, report: &mut RunReport) -> Result<usize> {
        let tracked = self.tracking().load().await?;
        report.pending = self.plan(&tracked)?;

        let take = opts
            .batch_size
            .unwrap_or(report.pending.len())
            .min(report.pending.len());
        let batch = &report.pending[..take];

        let mut attempted = 0;
        let mut applied = Vec::new();
        let mut failed = Vec::new();
        for migration in batch {
            attempted += 1;
            let previous = tracked.iter().find(|t| t.id == migration.id);
            match self.apply(migration, previous, report.correlation_id).await? {
                Ok(duration) => applied.push(AppliedMigration {
                    id: migration.id.clone(),
                    version: migration.version.clone(),
                    duration,
                }),
                Err(error) => {
                    failed.push(FailedMigration {
                        id: migration.id.clone(),
                        version: migration.version.clone(),
                        error,
                    });
                    if !opts.force {
                        break;
                    }
                }
            }
        }

        report.skipped = report.pending[attempted..]
            .iter()
            .map(|m| m.id.clone())
            .collect();
        report.applied = applied;
        report.failed = failed;
        Ok(take)
    }

    /// Execute one migration together with its tracking-row write.
    ///
    /// The outer error is an infrastructure failure (the FAILED row could
    /// not be written); the inner one is the migration's own failure.
    async fn apply(
        &self,
        migration: &Migration,
        previous: Option<&Migration>,
        correlation_id: Uuid,
    ) -> Result<std::result::Result<Duration, String>> {
        let mut metadata = migration.metadata.clone();
        let attempts = previous.map(Migration::attempts).unwrap_or(0) + 1;
        metadata.insert(ATTEMPTS_KEY.to_string(), attempts.into());
        if let Some(rollback) = &migration.rollback_sql {
            metadata.insert(
                ROLLBACK_CHECKSUM_KEY.to_string(),
                MetadataValue::String(checksum(rollback)),
            );
        }

        self.events.emit(&EngineEvent::MigrationStarted {
            correlation_id,
            id: migration.id.clone(),
            version: migration.version.to_string(),
        });

        let tracking = self.tracking();
        let transactional = self.config.transactional && migration.transactional;
        let started = Instant::now();
        let body = async {
            self.execute_script(&migration.sql, transactional).await?;
            tracking
                .record(migration, MigrationStatus::Completed, started.elapsed(), None, &metadata)
                .await
        };
        let outcome = if transactional {
            self.in_transaction(body).await
        } else {
            body.await
        };
        let elapsed = started.elapsed();

        match outcome {
            Ok(()) => {
                self.events.emit(&EngineEvent::MigrationCompleted {
                    correlation_id,
                    id: migration.id.clone(),
                    version: migration.version.to_string(),
                    duration: elapsed,
                });
                Ok(Ok(elapsed))
            }
            Err(e) => {
                let error = e.to_string();
                self.events.emit(&EngineEvent::MigrationFailed {
                    correlation_id,
                    id: migration.id.clone(),
                    version: migration.version.to_string(),
                    error: error.clone(),
                });
                tracking
                    .record(migration, MigrationStatus::Failed, elapsed, Some(&error), &metadata)
                    .await?;
                Ok(Err(error))
            }
        }
    }

    async fn rollback_batch(
        &self,
        target: Option<&str>,
        opts: &RollbackOptions,
        report: &mut RollbackReport,
    ) -> Result<usize> {
        let tracked = self.tracking().load().await?;
        report.targets = rollback_targets(&tracked, target);
        if report.targets.is_empty() {
            return Ok(0);
        }
        let discovered = discover(&self.config.migrations_dir)?;
        for row in &report.targets {
            if let Some(file) = discovered.iter().find(|f| f.id == row.id) {
                self.check_rollback_file(row, file)?;
            }
        }
        let correlation_id = report.correlation_id;

        let mut attempted = 0;
        for migration in &report.targets {
            attempted += 1;
            let file = discovered.iter().find(|f| f.id == migration.id);
            match self.revert(migration, file, correlation_id).await? {
                Ok(duration) => report.rolled_back.push(AppliedMigration {
                    id: migration.id.clone(),
                    version: migration.version.clone(),
                    duration,
                }),
                Err(error) => {
                    report.failed.push(FailedMigration {
                        id: migration.id.clone(),
                        version: migration.version.clone(),
                        error,
                    });
                    if !opts.force {
                        break;
                    }
                }
            }
        }

        report.skipped = report.targets[attempted..]
            .iter()
            .map(|m| m.id.clone())
            .collect();
        Ok(report.targets.len())
    }

    async fn revert(
        &self,
        migration: &Migration,
        file: Option<&Migration>,
        correlation_id: Uuid,
    ) -> Result<std::result::Result<Duration, String>> {
        self.events.emit(&EngineEvent::RollbackStarted {
            correlation_id,
            id: migration.id.clone(),
            version: migration.version.to_string(),
        });

        let started = Instant::now();
        let outcome = match file.and_then(|f| f.rollback_sql.as_deref().map(|sql| (f, sql))) {
            None => Err(DbError::new(
                "no rollback SQL: add a -- @rollback section or a .down.sql file",
            )),
            Some((file, sql)) => {
                let tracking = self.tracking();
                let transactional = self.config.transactional && file.transactional;
                let body = async {
                    self.execute_script(sql, transactional).await?;
                    tracking
                        .set_status(&migration.id, MigrationStatus::RolledBack)
                        .await
                        .map(|_| ())
                };
                if transactional {
                    self.in_transaction(body).await
                } else {
                    body.await
                }
            }
        };
        let elapsed = started.elapsed();

        match outcome {
            Ok(()) => {
                self.events.emit(&EngineEvent::RollbackCompleted {
                    correlation_id,
                    id: migration.id.clone(),
                    version: migration.version.to_string(),
                    duration: elapsed,
                });
                Ok(Ok(elapsed))
            }
            Err(e) => {
                let error = e.to_string();
                self.events.emit(&EngineEvent::RollbackFailed {
                    correlation_id,
                    id: migration.id.clone(),
                    version: migration.version.to_string(),
                    error: error.clone(),
                });
                Ok(Err(error))
            }
        }
    }

    /// Run a script. Outside a transaction each statement is sent on its
    /// own, so statements like `CREATE INDEX CONCURRENTLY` are not wrapped
    /// in an implicit transaction block.
    async fn execute_script(&self, sql: &str, transactional: bool) -> std::result::Result<(), DbError> {
        if transactional {
            return self.db.batch_execute(sql).await;
        }
        for statement in split_statements(sql) {
            self.db.batch_execute(&statement).await?;
        }
        Ok(())
    }

    async fn in_transaction<F>(&self, body: F) -> std::result::Result<(), DbError>
    where
        F: Future<Output = std::result::Result<(), DbError>>,
    {
        self.db.begin().await?;
        match body.await {
            Ok(()) => self.db.commit().await,
            Err(e) => {
                if let Err(rollback) = self.db.rollback().await {
                    tracing::warn!(error = %rollback, "ROLLBACK after a failed migration also failed");
                }
                Err(e)
            }
        }
    }
}

/// Completed migrations to roll back, latest first.
fn rollback_targets(tracked: &[Migration], target: Option<&str>) -> Vec<Migration> {
    let mut completed: Vec<Migration> = tracked
        .iter()
        .filter(|m| m.status.can_transition_to(MigrationStatus::RolledBack))
        .cloned()
        .collect();
    completed.sort_by(|a, b| b.version.cmp(&a.version));
    match target {
        Some(target) => {
            let target = Version::new(target);
            completed.into_iter().filter(|m| m.version > target).collect()
        }
        None => completed.into_iter().take(1).collect(),
    }
}

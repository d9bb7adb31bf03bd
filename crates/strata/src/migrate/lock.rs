//! Cross-process exclusion through a session-level advisory lock.

use crate::config::LockConfig;
use crate::db::{Database, RowExt, Value};
use crate::{Error, Result};
use std::time::Instant;

const TRY_LOCK_SQL: &str = "-- strata:lock_acquire
SELECT pg_try_advisory_lock(hashtext(current_database() || ':' || $1)) AS locked";

const UNLOCK_SQL: &str = "-- strata:lock_release
SELECT pg_advisory_unlock(hashtext(current_database() || ':' || $1)) AS unlocked";

/// A held advisory lock, keyed by database and tracking table.
///
/// Must be released explicitly; the lock otherwise lives as long as the
/// session.
pub(crate) struct MigrationLock<'a> {
    db: &'a dyn Database,
    key: String,
}

impl<'a> MigrationLock<'a> {
    /// Poll until the lock is granted or `config.timeout()` passes.
    pub async fn acquire(db: &'a dyn Database, tracking_table: &str, config: &LockConfig) -> Result<Self> {
        let key = tracking_table.to_string();
        let started = Instant::now();
        loop {
            let row = db.query_one(TRY_LOCK_SQL, &[Value::from(key.as_str())]).await?;
            if row.boolean("locked")? {
                tracing::debug!(%key, waited = ?started.elapsed(), "migration lock acquired");
                return Ok(Self { db, key });
            }
            if started.elapsed() >= config.timeout() {
                return Err(Error::LockTimeout(config.timeout()));
            }
            tracing::debug!(%key, "migration lock busy, waiting");
            tokio::time::sleep(config.poll_interval()).await;
        }
    }

    pub async fn release(self) -> Result<()> {
        let row = self
            .db
            .query_one(UNLOCK_SQL, &[Value::from(self.key.as_str())])
            .await?;
        if !row.boolean("unlocked")? {
            tracing::warn!(key = %self.key, "migration lock was not held at release");
        }
        Ok(())
    }
}

//! The migration tracking table.
//!
//! One row per migration id. Every statement starts with a
//! `-- strata:tracking_<op>` marker line.

use super::{Metadata, Migration, MigrationKind, MigrationStatus, Version};
use crate::DbError;
use crate::db::{Database, Row, RowExt, Value};
use chrono::{DateTime, Utc};
use std::time::Duration;
use strata_sql::quote_ident;

pub(crate) struct Tracking<'a> {
    db: &'a dyn Database,
    name: String,
}

impl<'a> Tracking<'a> {
    pub fn new(db: &'a dyn Database, name: &str) -> Self {
        Self {
            db,
            name: name.to_string(),
        }
    }

    fn table(&self) -> String {
        quote_ident(&self.name)
    }

    pub fn create_sql(&self) -> String {
        let table = self.table();
        format!(
            "-- strata:tracking_create
CREATE TABLE IF NOT EXISTS {table} (
    id TEXT PRIMARY KEY,
    version TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    type TEXT NOT NULL DEFAULT 'schema',
    checksum TEXT NOT NULL,
    executed_at TIMESTAMPTZ,
    execution_time INTEGER,
    status TEXT NOT NULL,
    error TEXT,
    metadata JSONB NOT NULL DEFAULT '{{}}'::jsonb
);
CREATE INDEX IF NOT EXISTS {version_idx} ON {table} (version);
CREATE INDEX IF NOT EXISTS {status_idx} ON {table} (status);",
            table = table,
            version_idx = quote_ident(&format!("{}_version_idx", self.name)),
            status_idx = quote_ident(&format!("{}_status_idx", self.name)),
        )
    }

    /// Create the table and its indexes if they are missing.
    pub async fn create(&self) -> Result<(), DbError> {
        self.db.batch_execute(&self.create_sql()).await
    }

    pub async fn exists(&self) -> Result<bool, DbError> {
        let row = self
            .db
            .query_one(
                "-- strata:tracking_exists\nSELECT to_regclass($1::text) IS NOT NULL AS present",
                &[Value::from(self.table())],
            )
            .await?;
        row.boolean("present")
    }

    /// Every tracked migration, in version order.
    pub async fn load(&self) -> Result<Vec<Migration>, DbError> {
        let sql = format!(
            "-- strata:tracking_load
SELECT id, version, name, description, type, checksum, executed_at,
       execution_time, status, error, metadata::text AS metadata
FROM {}",
            self.table()
        );
        let rows = self.db.query(&sql, &[]).await?;
        let mut migrations = rows.iter().map(migration_from_row).collect::<Result<Vec<_>, _>>()?;
        migrations.sort_by(|a, b| a.version.cmp(&b.version));
        Ok(migrations)
    }

    /// Insert or replace the row for `migration`.
    pub async fn record(
        &self,
        migration: &Migration,
        status: MigrationStatus,
        execution_time: Duration,
        error: Option<&str>,
        metadata: &Metadata,
    ) -> Result<(), DbError> {
        let sql = format!(
            "-- strata:tracking_record
INSERT INTO {} (id, version, name, description, type, checksum, executed_at, execution_time, status, error, metadata)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11::text::jsonb)
ON CONFLICT (id) DO UPDATE SET
    version = EXCLUDED.version,
    name = EXCLUDED.name,
    description = EXCLUDED.description,
    type = EXCLUDED.type,
    checksum = EXCLUDED.checksum,
    executed_at = EXCLUDED.executed_at,
    execution_time = EXCLUDED.execution_time,
    status = EXCLUDED.status,
    error = EXCLUDED.error,
    metadata = EXCLUDED.metadata",
            self.table()
        );
        let metadata = serde_json::to_string(metadata).map_err(|e| DbError::new(e.to_string()))?;
        let millis = i32::try_from(execution_time.as_millis()).unwrap_or(i32::MAX);
        let params = [
            Value::from(migration.id.as_str()),
            Value::from(migration.version.as_str()),
            Value::from(migration.name.as_str()),
            Value::from(migration.description.clone()),
            Value::from(migration.kind.as_str()),
            Value::from(migration.checksum.as_str()),
            Value::from(Utc::now()),
            Value::from(millis),
            Value::from(status.as_str()),
            Value::from(error),
            Value::from(metadata),
        ];
        self.db.execute(&sql, &params).await?;
        Ok(())
    }

    pub async fn set_status(&self, id: &str, status: MigrationStatus) -> Result<u64, DbError> {
        let sql = format!(
            "-- strata:tracking_status\nUPDATE {} SET status = $2 WHERE id = $1",
            self.table()
        );
        self.db
            .execute(&sql, &[Value::from(id), Value::from(status.as_str())])
            .await
    }

    /// Delete a row unless it is COMPLETED. Returns the number of rows removed.
    pub async fn forget(&self, id: &str) -> Result<u64, DbError> {
        let sql = format!(
            "-- strata:tracking_forget\nDELETE FROM {} WHERE id = $1 AND status <> 'COMPLETED'",
            self.table()
        );
        self.db.execute(&sql, &[Value::from(id)]).await
    }
}

fn migration_from_row(row: &Row) -> Result<Migration, DbError> {
    let status_text = row.string("status")?;
    let status = MigrationStatus::parse(&status_text)
        .ok_or_else(|| DbError::new(format!("unknown migration status '{}'", status_text)))?;
    let metadata: Metadata = match row.opt_string("metadata")? {
        Some(json) => serde_json::from_str(&json)
            .map_err(|e| DbError::new(format!("bad metadata: {}", e)))?,
        None => Metadata::new(),
    };
    let executed_at: Option<DateTime<Utc>> = row.opt_timestamp("executed_at")?;

    Ok(Migration {
        id: row.string("id")?,
        version: Version::new(row.string("version")?),
        name: row.string("name")?,
        description: row.opt_string("description")?,
        kind: row
            .opt_string("type")?
            .and_then(|t| MigrationKind::parse(&t))
            .unwrap_or_default(),
        sql: String::new(),
        rollback_sql: None,
        checksum: row.string("checksum")?,
        status,
        created_at: executed_at.unwrap_or_else(Utc::now),
        executed_at,
        execution_time: row
            .opt_i64("execution_time")?
            .map(|ms| Duration::from_millis(ms.max(0) as u64)),
        error: row.opt_string("error")?,
        metadata,
        transactional: true,
        path: None,
    })
}

//! An in-memory stand-in for a Postgres session.
//!
//! Statements are answered by their `-- strata:<op>` marker line. The
//! tracking table is emulated row by row and rolled back with the
//! transaction. Any other statement counts as migration SQL: it is logged,
//! and it fails when it contains a configured substring.

#![allow(dead_code)]

use camino::Utf8PathBuf;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use strata::db::BoxFuture;
use strata::introspect::query_stage;
use strata::{Database, DbError, Row, RowExt, Value};

#[derive(Debug, Default)]
struct State {
    /// Every statement received, in order
    log: Vec<String>,
    tracking_created: bool,
    tracking: BTreeMap<String, Row>,
    /// Migration SQL that took effect
    committed: Vec<String>,
    /// Open transaction: tracking rows at BEGIN, statements since BEGIN
    tx: Option<(BTreeMap<String, Row>, Vec<String>)>,
    fail_on: Vec<String>,
    lock_held: bool,
    lock_busy: bool,
    catalog: HashMap<(String, Vec<String>), Vec<Row>>,
    fail_stage: Option<String>,
}

#[derive(Debug, Default)]
pub struct FakeDb {
    state: Mutex<State>,
}

impl FakeDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Migration SQL containing `needle` fails.
    pub fn fail_on(&self, needle: &str) {
        self.state.lock().unwrap().fail_on.push(needle.to_string());
    }

    /// Another session holds the advisory lock.
    pub fn hold_lock_elsewhere(&self) {
        self.state.lock().unwrap().lock_busy = true;
    }

    /// Answer catalog `stage` queries whose parameters are `params`.
    pub fn answer(&self, stage: &str, params: &[&str], rows: Vec<Row>) {
        let key = (
            stage.to_string(),
            params.iter().map(|p| p.to_string()).collect(),
        );
        self.state.lock().unwrap().catalog.insert(key, rows);
    }

    pub fn fail_stage(&self, stage: &str) {
        self.state.lock().unwrap().fail_stage = Some(stage.to_string());
    }

    pub fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    /// Statements that carry the given marker.
    pub fn count_marker(&self, op: &str) -> usize {
        self.log()
            .iter()
            .filter(|sql| query_stage(sql) == Some(op))
            .count()
    }

    pub fn committed(&self) -> Vec<String> {
        self.state.lock().unwrap().committed.clone()
    }

    pub fn lock_held(&self) -> bool {
        self.state.lock().unwrap().lock_held
    }

    pub fn in_transaction(&self) -> bool {
        self.state.lock().unwrap().tx.is_some()
    }

    /// `(id, status)` of every tracking row, ordered by id.
    pub fn tracking_rows(&self) -> Vec<(String, String)> {
        self.state
            .lock()
            .unwrap()
            .tracking
            .iter()
            .map(|(id, row)| (id.clone(), row.string("status").unwrap()))
            .collect()
    }

    pub fn tracking_row(&self, id: &str) -> Option<Row> {
        self.state.lock().unwrap().tracking.get(id).cloned()
    }

    /// Overwrite one field of a tracking row.
    pub fn set_tracking_field(&self, id: &str, field: &str, value: Value) {
        let mut state = self.state.lock().unwrap();
        let row = state.tracking.get_mut(id).unwrap();
        for (name, v) in row.iter_mut() {
            if name == field {
                *v = value.clone();
            }
        }
    }

    fn run(&self, sql: &str, params: &[Value]) -> Result<(Vec<Row>, u64), DbError> {
        let mut state = self.state.lock().unwrap();
        state.log.push(sql.to_string());

        match sql.trim() {
            "BEGIN" => {
                if state.tx.is_some() {
                    return Err(DbError::new("there is already a transaction in progress"));
                }
                let snapshot = state.tracking.clone();
                state.tx = Some((snapshot, Vec::new()));
                return Ok((Vec::new(), 0));
            }
            "COMMIT" => {
                if let Some((_, statements)) = state.tx.take() {
                    state.committed.extend(statements);
                }
                return Ok((Vec::new(), 0));
            }
            "ROLLBACK" => {
                if let Some((snapshot, _)) = state.tx.take() {
                    state.tracking = snapshot;
                }
                return Ok((Vec::new(), 0));
            }
            _ => {}
        }

        let Some(op) = query_stage(sql) else {
            return state.migration_sql(sql);
        };
        let op = op.to_string();

        match op.as_str() {
            "tracking_create" => {
                state.tracking_created = true;
                Ok((Vec::new(), 0))
            }
            "tracking_exists" => {
                // Before Postgres 14 to_regclass only takes cstring.
                if !sql.contains("to_regclass($1::text)") {
                    return Err(DbError {
                        message: "function to_regclass(text) does not exist".into(),
                        code: Some("42883".into()),
                    });
                }
                Ok((
                    vec![vec![("present".into(), Value::Bool(state.tracking_created))]],
                    0,
                ))
            }
            "tracking_load" => {
                if !state.tracking_created {
                    return Err(DbError::new("relation does not exist"));
                }
                Ok((state.tracking.values().cloned().collect(), 0))
            }
            "tracking_record" => {
                let names = [
                    "id",
                    "version",
                    "name",
                    "description",
                    "type",
                    "checksum",
                    "executed_at",
                    "execution_time",
                    "status",
                    "error",
                    "metadata",
                ];
                let row: Row = names
                    .iter()
                    .zip(params)
                    .map(|(n, v)| (n.to_string(), v.clone()))
                    .collect();
                let id = row.string("id")?;
                state.tracking.insert(id, row);
                Ok((Vec::new(), 1))
            }
            "tracking_status" => {
                let id = params[0].as_str().unwrap_or_default().to_string();
                let status = params[1].clone();
                match state.tracking.get_mut(&id) {
                    Some(row) => {
                        for (name, v) in row.iter_mut() {
                            if name == "status" {
                                *v = status.clone();
                            }
                        }
                        Ok((Vec::new(), 1))
                    }
                    None => Ok((Vec::new(), 0)),
                }
            }
            "tracking_forget" => {
                let id = params[0].as_str().unwrap_or_default().to_string();
                let removable = state
                    .tracking
                    .get(&id)
                    .is_some_and(|row| row.string("status").unwrap() != "COMPLETED");
                if removable {
                    state.tracking.remove(&id);
                    Ok((Vec::new(), 1))
                } else {
                    Ok((Vec::new(), 0))
                }
            }
            "lock_acquire" => {
                let granted = !state.lock_busy;
                if granted {
                    state.lock_held = true;
                }
                Ok((vec![vec![("locked".into(), Value::Bool(granted))]], 0))
            }
            "lock_release" => {
                let held = state.lock_held;
                state.lock_held = false;
                Ok((vec![vec![("unlocked".into(), Value::Bool(held))]], 0))
            }
            stage => {
                if state.fail_stage.as_deref() == Some(stage) {
                    return Err(DbError {
                        message: "permission denied for table pg_class".into(),
                        code: Some("42501".into()),
                    });
                }
                let key = (
                    stage.to_string(),
                    params
                        .iter()
                        .map(|p| p.as_str().unwrap_or_default().to_string())
                        .collect(),
                );
                Ok((state.catalog.get(&key).cloned().unwrap_or_default(), 0))
            }
        }
    }
}

impl State {
    fn migration_sql(&mut self, sql: &str) -> Result<(Vec<Row>, u64), DbError> {
        if let Some(needle) = self.fail_on.iter().find(|n| sql.contains(n.as_str())) {
            return Err(DbError {
                message: format!("syntax error at or near \"{}\"", needle),
                code: Some("42601".into()),
            });
        }
        match &mut self.tx {
            Some((_, statements)) => statements.push(sql.to_string()),
            None => self.committed.push(sql.to_string()),
        }
        Ok((Vec::new(), 0))
    }
}

impl Database for FakeDb {
    fn execute<'a>(&'a self, sql: &'a str, params: &'a [Value]) -> BoxFuture<'a, Result<u64, DbError>> {
        Box::pin(async move { self.run(sql, params).map(|(_, n)| n) })
    }

    fn batch_execute<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<(), DbError>> {
        Box::pin(async move { self.run(sql, &[]).map(|_| ()) })
    }

    fn query<'a>(&'a self, sql: &'a str, params: &'a [Value]) -> BoxFuture<'a, Result<Vec<Row>, DbError>> {
        Box::pin(async move { self.run(sql, params).map(|(rows, _)| rows) })
    }
}

/// Build a row from `(column, value)` pairs.
pub fn row(fields: &[(&str, Value)]) -> Row {
    fields
        .iter()
        .map(|(n, v)| (n.to_string(), v.clone()))
        .collect()
}

/// A temporary migrations directory.
pub struct MigrationsDir {
    _dir: tempfile::TempDir,
    pub path: Utf8PathBuf,
}

impl MigrationsDir {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        Self { _dir: dir, path }
    }

    pub fn write(&self, file_name: &str, contents: &str) -> &Self {
        std::fs::write(self.path.join(file_name), contents).unwrap();
        self
    }

    pub fn remove(&self, file_name: &str) {
        std::fs::remove_file(self.path.join(file_name)).unwrap();
    }
}

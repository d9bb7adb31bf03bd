//! Database connection abstraction.
//!
//! The engine talks to Postgres through [`Database`], which is implemented
//! for `tokio_postgres::Client` and `deadpool_postgres::Object`. Every
//! implementation must represent a single session: `BEGIN`/`COMMIT` and the
//! advisory lock are session state.

use crate::DbError;
use std::future::Future;
use std::pin::Pin;

mod postgres;

mod row;
pub use row::{Row, RowExt, SqlParam, pg_row_to_row};

mod value;
pub use value::Value;

/// A boxed future, as returned by [`Database`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for database sessions that can execute queries.
pub trait Database: Send + Sync {
    /// Execute a statement, returning the number of rows affected.
    fn execute<'a>(&'a self, sql: &'a str, params: &'a [Value])
    -> BoxFuture<'a, Result<u64, DbError>>;

    /// Execute one or more statements without parameters.
    fn batch_execute<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<(), DbError>>;

    /// Execute a query, returning all rows.
    fn query<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxFuture<'a, Result<Vec<Row>, DbError>>;

    /// Execute a query, returning at most one row.
    fn query_opt<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxFuture<'a, Result<Option<Row>, DbError>> {
        Box::pin(async move {
            let mut rows = self.query(sql, params).await?;
            if rows.len() > 1 {
                return Err(DbError::new(format!(
                    "query returned {} rows, expected at most one",
                    rows.len()
                )));
            }
            Ok(rows.pop())
        })
    }

    /// Execute a query, returning exactly one row.
    fn query_one<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxFuture<'a, Result<Row, DbError>> {
        Box::pin(async move {
            self.query_opt(sql, params)
                .await?
                .ok_or_else(|| DbError::new("query returned no rows, expected one"))
        })
    }

    fn begin(&self) -> BoxFuture<'_, Result<(), DbError>> {
        self.batch_execute("BEGIN")
    }

    fn commit(&self) -> BoxFuture<'_, Result<(), DbError>> {
        self.batch_execute("COMMIT")
    }

    fn rollback(&self) -> BoxFuture<'_, Result<(), DbError>> {
        self.batch_execute("ROLLBACK")
    }
}

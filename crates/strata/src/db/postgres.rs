//! [`Database`] for tokio-postgres sessions, with every call traced.

use super::{BoxFuture, Database, Row, SqlParam, Value, pg_row_to_row};
use crate::DbError;
use tokio_postgres::types::ToSql;
use tracing::Instrument;

async fn traced_execute(
    client: &tokio_postgres::Client,
    sql: &str,
    params: &[Value],
) -> Result<u64, DbError> {
    let span = tracing::debug_span!(
        "db.execute",
        sql = %sql,
        params = params.len(),
        affected = tracing::field::Empty,
    );
    let wrapped: Vec<SqlParam<'_>> = params.iter().map(SqlParam).collect();
    let refs: Vec<&(dyn ToSql + Sync)> = wrapped.iter().map(|p| p as _).collect();
    let affected = client
        .execute(sql, &refs)
        .instrument(span.clone())
        .await?;
    span.record("affected", affected);
    Ok(affected)
}

async fn traced_batch_execute(client: &tokio_postgres::Client, sql: &str) -> Result<(), DbError> {
    let span = tracing::debug_span!("db.batch_execute", sql = %sql);
    client.batch_execute(sql).instrument(span).await?;
    Ok(())
}

async fn traced_query(
    client: &tokio_postgres::Client,
    sql: &str,
    params: &[Value],
) -> Result<Vec<Row>, DbError> {
    let span = tracing::debug_span!(
        "db.query",
        sql = %sql,
        params = params.len(),
        rows = tracing::field::Empty,
    );
    let wrapped: Vec<SqlParam<'_>> = params.iter().map(SqlParam).collect();
    let refs: Vec<&(dyn ToSql + Sync)> = wrapped.iter().map(|p| p as _).collect();
    let rows = client.query(sql, &refs).instrument(span.clone()).await?;
    span.record("rows", rows.len());
    rows.iter().map(pg_row_to_row).collect()
}

impl Database for tokio_postgres::Client {
    fn execute<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxFuture<'a, Result<u64, DbError>> {
        Box::pin(traced_execute(self, sql, params))
    }

    fn batch_execute<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<(), DbError>> {
        Box::pin(traced_batch_execute(self, sql))
    }

    fn query<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxFuture<'a, Result<Vec<Row>, DbError>> {
        Box::pin(traced_query(self, sql, params))
    }
}

impl Database for deadpool_postgres::Object {
    fn execute<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxFuture<'a, Result<u64, DbError>> {
        // Deref to the underlying Client to avoid recursion
        use std::ops::Deref;
        let client: &tokio_postgres::Client = self.deref();
        Box::pin(traced_execute(client, sql, params))
    }

    fn batch_execute<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<(), DbError>> {
        use std::ops::Deref;
        let client: &tokio_postgres::Client = self.deref();
        Box::pin(traced_batch_execute(client, sql))
    }

    fn query<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxFuture<'a, Result<Vec<Row>, DbError>> {
        use std::ops::Deref;
        let client: &tokio_postgres::Client = self.deref();
        Box::pin(traced_query(client, sql, params))
    }
}

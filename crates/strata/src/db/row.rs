//! Row mapping between Postgres and [`Value`]s.

use super::Value;
use crate::DbError;
use chrono::{DateTime, NaiveDateTime, Utc};
use tokio_postgres::types::{FromSql, ToSql, Type as PgTypeInfo};

/// A row of data as field name → value pairs.
pub type Row = Vec<(String, Value)>;

/// Typed accessors for [`Row`].
pub trait RowExt {
    fn get(&self, name: &str) -> Option<&Value>;

    /// A non-null text column.
    fn string(&self, name: &str) -> Result<String, DbError> {
        self.opt_string(name)?
            .ok_or_else(|| DbError::new(format!("column '{}' is NULL", name)))
    }

    /// A nullable text column.
    fn opt_string(&self, name: &str) -> Result<Option<String>, DbError> {
        match self.get(name) {
            None => Err(missing(name)),
            Some(Value::Null) => Ok(None),
            Some(v) => v
                .as_str()
                .map(|s| Some(s.to_string()))
                .ok_or_else(|| wrong_type(name, "text", v)),
        }
    }

    fn boolean(&self, name: &str) -> Result<bool, DbError> {
        match self.get(name) {
            None => Err(missing(name)),
            Some(v) => v.as_bool().ok_or_else(|| wrong_type(name, "boolean", v)),
        }
    }

    fn opt_i64(&self, name: &str) -> Result<Option<i64>, DbError> {
        match self.get(name) {
            None => Err(missing(name)),
            Some(Value::Null) => Ok(None),
            Some(v) => v
                .as_i64()
                .map(Some)
                .ok_or_else(|| wrong_type(name, "integer", v)),
        }
    }

    fn opt_timestamp(&self, name: &str) -> Result<Option<DateTime<Utc>>, DbError> {
        match self.get(name) {
            None => Err(missing(name)),
            Some(Value::Null) => Ok(None),
            Some(v) => v
                .as_timestamp()
                .map(Some)
                .ok_or_else(|| wrong_type(name, "timestamptz", v)),
        }
    }

    /// A comma-separated `string_agg` column, split into its parts.
    fn list(&self, name: &str) -> Result<Vec<String>, DbError> {
        Ok(self
            .opt_string(name)?
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }
}

impl RowExt for Row {
    fn get(&self, name: &str) -> Option<&Value> {
        self.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

fn missing(name: &str) -> DbError {
    DbError::new(format!("result has no column '{}'", name))
}

fn wrong_type(name: &str, expected: &str, actual: &Value) -> DbError {
    DbError::new(format!(
        "column '{}': expected {}, got {:?}",
        name, expected, actual
    ))
}

/// Raw JSON/JSONB bytes, with the JSONB version prefix stripped.
struct JsonRaw(String);

impl<'a> FromSql<'a> for JsonRaw {
    fn from_sql(
        ty: &PgTypeInfo,
        raw: &'a [u8],
    ) -> Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        // JSONB wire format has a 1-byte version prefix, skip it
        let bytes = if *ty == PgTypeInfo::JSONB && raw.first() == Some(&1) {
            &raw[1..]
        } else {
            raw
        };
        Ok(JsonRaw(String::from_utf8_lossy(bytes).into_owned()))
    }

    fn accepts(ty: &PgTypeInfo) -> bool {
        *ty == PgTypeInfo::JSON || *ty == PgTypeInfo::JSONB
    }
}

/// Convert a tokio_postgres Row to our Row type, using each column's wire type.
pub fn pg_row_to_row(pg_row: &tokio_postgres::Row) -> Result<Row, DbError> {
    let mut row = Vec::with_capacity(pg_row.len());
    for (idx, column) in pg_row.columns().iter().enumerate() {
        let value = pg_value_to_value(pg_row, idx, column.type_())
            .map_err(|e| DbError::new(format!("column '{}': {}", column.name(), e)))?;
        row.push((column.name().to_string(), value));
    }
    Ok(row)
}

fn pg_value_to_value(
    row: &tokio_postgres::Row,
    idx: usize,
    ty: &PgTypeInfo,
) -> Result<Value, tokio_postgres::Error> {
    fn get<'a, T: FromSql<'a>>(
        row: &'a tokio_postgres::Row,
        idx: usize,
        wrap: impl FnOnce(T) -> Value,
    ) -> Result<Value, tokio_postgres::Error> {
        let v: Option<T> = row.try_get(idx)?;
        Ok(v.map(wrap).unwrap_or(Value::Null))
    }

    match *ty {
        PgTypeInfo::BOOL => get(row, idx, Value::Bool),
        PgTypeInfo::INT2 => get(row, idx, Value::I16),
        PgTypeInfo::INT4 => get(row, idx, Value::I32),
        PgTypeInfo::INT8 => get(row, idx, Value::I64),
        PgTypeInfo::OID => get(row, idx, |v: u32| Value::I64(i64::from(v))),
        PgTypeInfo::FLOAT4 => get(row, idx, Value::F32),
        PgTypeInfo::FLOAT8 => get(row, idx, Value::F64),
        PgTypeInfo::NUMERIC => get(row, idx, Value::Decimal),
        PgTypeInfo::BYTEA => get(row, idx, Value::Bytes),
        PgTypeInfo::JSON | PgTypeInfo::JSONB => get(row, idx, |v: JsonRaw| Value::Json(v.0)),
        PgTypeInfo::TIMESTAMPTZ => get(row, idx, Value::Timestamp),
        PgTypeInfo::TIMESTAMP => get(row, idx, |v: NaiveDateTime| {
            Value::Timestamp(v.and_utc())
        }),
        PgTypeInfo::CHAR => get(row, idx, |v: i8| Value::String((v as u8 as char).to_string())),
        // TEXT, VARCHAR, NAME, BPCHAR and anything else readable as text.
        _ => get(row, idx, Value::String),
    }
}

/// Wrapper to make our Value usable as a ToSql parameter.
#[derive(Debug)]
pub struct SqlParam<'a>(pub &'a Value);

impl ToSql for SqlParam<'_> {
    fn to_sql(
        &self,
        ty: &PgTypeInfo,
        out: &mut bytes::BytesMut,
    ) -> Result<tokio_postgres::types::IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self.0 {
            Value::Null => Ok(tokio_postgres::types::IsNull::Yes),
            Value::Bool(v) => v.to_sql(ty, out),
            Value::I16(v) => v.to_sql(ty, out),
            Value::I32(v) => v.to_sql(ty, out),
            Value::I64(v) => v.to_sql(ty, out),
            Value::F32(v) => v.to_sql(ty, out),
            Value::F64(v) => v.to_sql(ty, out),
            Value::Decimal(v) => v.to_sql(ty, out),
            Value::String(v) => v.to_sql(ty, out),
            Value::Bytes(v) => v.to_sql(ty, out),
            Value::Timestamp(v) => v.to_sql(ty, out),
            Value::Json(v) => {
                // For JSONB, we need to prepend the version byte
                if *ty == PgTypeInfo::JSONB {
                    out.extend_from_slice(&[1]);
                }
                out.extend_from_slice(v.as_bytes());
                Ok(tokio_postgres::types::IsNull::No)
            }
        }
    }

    fn accepts(ty: &PgTypeInfo) -> bool {
        matches!(
            *ty,
            PgTypeInfo::BOOL
                | PgTypeInfo::INT2
                | PgTypeInfo::INT4
                | PgTypeInfo::INT8
                | PgTypeInfo::FLOAT4
                | PgTypeInfo::FLOAT8
                | PgTypeInfo::NUMERIC
                | PgTypeInfo::TEXT
                | PgTypeInfo::VARCHAR
                | PgTypeInfo::NAME
                | PgTypeInfo::BYTEA
                | PgTypeInfo::JSON
                | PgTypeInfo::JSONB
                | PgTypeInfo::TIMESTAMPTZ
        )
    }

    tokio_postgres::types::to_sql_checked!();
}

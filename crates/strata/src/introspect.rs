//! Reading a [`SchemaModel`] from a live database catalog.
//!
//! Catalog queries run in dependency order. Each one starts with a
//! `-- strata:<stage>` marker line; the stage names the query in errors and
//! traces, and lets test doubles answer queries without parsing SQL.

use crate::config::IntrospectorConfig;
use crate::db::{Database, Row, RowExt, Value};
use crate::events::{EngineEvent, EventSink, TracingSink};
use crate::{DbError, Error, Result, snapshot};
use std::sync::Arc;
use strata_schema::{
    Column, ColumnDefault, Constraint, ConstraintKind, DatabaseFunction, ForeignKey,
    FunctionArgument, Index, IndexColumn, IndexMethod, PrimaryKey, ReferentialAction,
    SchemaModel, SqlType, Table, View, ViewColumn,
};
use uuid::Uuid;

/// The catalog query stages, in the order they run.
pub mod stage {
    pub const TABLES: &str = "tables";
    pub const COLUMNS: &str = "columns";
    pub const PRIMARY_KEY: &str = "primary_key";
    pub const FOREIGN_KEYS: &str = "foreign_keys";
    pub const INDEXES: &str = "indexes";
    pub const CONSTRAINTS: &str = "constraints";
    pub const VIEWS: &str = "views";
    pub const VIEW_COLUMNS: &str = "view_columns";
    pub const FUNCTIONS: &str = "functions";
}

/// The stage a catalog query belongs to, read from its marker line.
pub fn query_stage(sql: &str) -> Option<&str> {
    sql.trim_start()
        .strip_prefix("-- strata:")
        .and_then(|rest| rest.split_whitespace().next())
}

const TABLES_SQL: &str = "-- strata:tables
SELECT c.relname::text AS name,
       obj_description(c.oid, 'pg_class') AS comment
FROM pg_class c
JOIN pg_namespace n ON n.oid = c.relnamespace
WHERE c.relkind IN ('r', 'p')
  AND NOT c.relispartition
  AND n.nspname::text = $1
ORDER BY c.relname";

const COLUMNS_SQL: &str = "-- strata:columns
SELECT a.attname::text AS name,
       format_type(a.atttypid, a.atttypmod) AS data_type,
       NOT a.attnotnull AS nullable,
       pg_get_expr(d.adbin, d.adrelid) AS default_expr,
       a.attidentity::text AS identity,
       col_description(c.oid, a.attnum) AS comment,
       EXISTS (
           SELECT 1 FROM pg_constraint k
           WHERE k.conrelid = c.oid AND k.contype = 'p' AND a.attnum = ANY (k.conkey)
       ) AS primary_key,
       EXISTS (
           SELECT 1 FROM pg_constraint k
           WHERE k.conrelid = c.oid AND k.contype = 'u' AND k.conkey = ARRAY[a.attnum]
       ) AS is_unique
FROM pg_attribute a
JOIN pg_class c ON c.oid = a.attrelid
JOIN pg_namespace n ON n.oid = c.relnamespace
LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
WHERE n.nspname::text = $1
  AND c.relname::text = $2
  AND a.attnum > 0
  AND NOT a.attisdropped
ORDER BY a.attnum";

const PRIMARY_KEY_SQL: &str = "-- strata:primary_key
SELECT k.conname::text AS name,
       (SELECT string_agg(a.attname::text, ',' ORDER BY array_position(k.conkey, a.attnum))
        FROM pg_attribute a
        WHERE a.attrelid = k.conrelid AND a.attnum = ANY (k.conkey)) AS columns
FROM pg_constraint k
JOIN pg_class c ON c.oid = k.conrelid
JOIN pg_namespace n ON n.oid = c.relnamespace
WHERE n.nspname::text = $1
  AND c.relname::text = $2
  AND k.contype = 'p'";

const FOREIGN_KEYS_SQL: &str = "-- strata:foreign_keys
SELECT k.conname::text AS name,
       (SELECT string_agg(a.attname::text, ',' ORDER BY array_position(k.conkey, a.attnum))
        FROM pg_attribute a
        WHERE a.attrelid = k.conrelid AND a.attnum = ANY (k.conkey)) AS columns,
       rc.relname::text AS references_table,
       (SELECT string_agg(a.attname::text, ',' ORDER BY array_position(k.confkey, a.attnum))
        FROM pg_attribute a
        WHERE a.attrelid = k.confrelid AND a.attnum = ANY (k.confkey)) AS references_columns,
       k.confdeltype::text AS on_delete,
       k.confupdtype::text AS on_update
FROM pg_constraint k
JOIN pg_class c ON c.oid = k.conrelid
JOIN pg_namespace n ON n.oid = c.relnamespace
JOIN pg_class rc ON rc.oid = k.confrelid
WHERE n.nspname::text = $1
  AND c.relname::text = $2
  AND k.contype = 'f'
ORDER BY k.conname";

// Keys come back one per line because expression keys may contain commas.
const INDEXES_SQL: &str = "-- strata:indexes
SELECT i.relname::text AS name,
       ix.indisunique AS is_unique,
       am.amname::text AS method,
       pg_get_expr(ix.indpred, ix.indrelid) AS predicate,
       (SELECT string_agg(
                   pg_get_indexdef(ix.indexrelid, k + 1, true)
                   || CASE WHEN ix.indoption[k] & 1 = 1 THEN ' DESC' ELSE '' END
                   || CASE
                          WHEN ix.indoption[k] & 3 = 2 THEN ' NULLS FIRST'
                          WHEN ix.indoption[k] & 3 = 1 THEN ' NULLS LAST'
                          ELSE ''
                      END,
                   E'\\n' ORDER BY k)
        FROM generate_subscripts(ix.indkey, 1) AS k
        WHERE k < ix.indnkeyatts) AS keys
FROM pg_index ix
JOIN pg_class i ON i.oid = ix.indexrelid
JOIN pg_class c ON c.oid = ix.indrelid
JOIN pg_namespace n ON n.oid = c.relnamespace
JOIN pg_am am ON am.oid = i.relam
WHERE n.nspname::text = $1
  AND c.relname::text = $2
  AND NOT EXISTS (SELECT 1 FROM pg_constraint k WHERE k.conindid = ix.indexrelid)
ORDER BY i.relname";

const CONSTRAINTS_SQL: &str = "-- strata:constraints
SELECT k.conname::text AS name,
       k.contype::text AS kind,
       pg_get_constraintdef(k.oid, true) AS definition,
       (SELECT string_agg(a.attname::text, ',' ORDER BY array_position(k.conkey, a.attnum))
        FROM pg_attribute a
        WHERE a.attrelid = k.conrelid AND a.attnum = ANY (k.conkey)) AS columns
FROM pg_constraint k
JOIN pg_class c ON c.oid = k.conrelid
JOIN pg_namespace n ON n.oid = c.relnamespace
WHERE n.nspname::text = $1
  AND c.relname::text = $2
  AND k.contype IN ('c', 'f', 'p', 'u', 'x')
ORDER BY k.conname";

const VIEWS_SQL: &str = "-- strata:views
SELECT c.relname::text AS name,
       pg_get_viewdef(c.oid, true) AS definition,
       c.relkind = 'm' AS materialized
FROM pg_class c
JOIN pg_namespace n ON n.oid = c.relnamespace
WHERE c.relkind IN ('v', 'm')
  AND n.nspname::text = $1
ORDER BY c.relname";

const VIEW_COLUMNS_SQL: &str = "-- strata:view_columns
SELECT a.attname::text AS name,
       format_type(a.atttypid, a.atttypmod) AS data_type,
       NOT a.attnotnull AS nullable
FROM pg_attribute a
JOIN pg_class c ON c.oid = a.attrelid
JOIN pg_namespace n ON n.oid = c.relnamespace
WHERE n.nspname::text = $1
  AND c.relname::text = $2
  AND a.attnum > 0
  AND NOT a.attisdropped
ORDER BY a.attnum";

const FUNCTIONS_SQL: &str = "-- strata:functions
SELECT p.proname::text AS name,
       pg_get_function_arguments(p.oid) AS arguments,
       pg_get_function_result(p.oid) AS return_type,
       l.lanname::text AS language,
       pg_get_functiondef(p.oid) AS definition
FROM pg_proc p
JOIN pg_namespace n ON n.oid = p.pronamespace
JOIN pg_language l ON l.oid = p.prolang
WHERE n.nspname::text = $1
  AND p.prokind = 'f'
  AND NOT EXISTS (
      SELECT 1 FROM pg_depend d
      WHERE d.classid = 'pg_proc'::regclass AND d.objid = p.oid AND d.deptype = 'e'
  )
ORDER BY p.proname, p.oid";

/// Reads the catalog of one database session into a [`SchemaModel`].
pub struct SchemaIntrospector<'a> {
    db: &'a dyn Database,
    config: IntrospectorConfig,
    events: Arc<dyn EventSink>,
}

impl<'a> SchemaIntrospector<'a> {
    pub fn new(db: &'a dyn Database, config: IntrospectorConfig) -> Self {
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

    pub fn config(&self) -> &IntrospectorConfig {
        &self.config
    }

    /// Read the catalog, then persist the snapshot and the artifacts the
    /// configuration asks for.
    ///
    /// Nothing is written when any catalog query fails.
    pub async fn analyze(&self) -> Result<SchemaModel> {
        let correlation_id = Uuid::new_v4();
        let model = self.introspect().await?;

        self.events.emit(&EngineEvent::AnalysisCompleted {
            correlation_id,
            tables: model.tables.len(),
            views: model.views.len(),
            functions: model.functions.len(),
        });

        let artifacts = snapshot::render(&model, &self.config, self.events.as_ref(), correlation_id)?;
        for path in snapshot::write(&self.config.output_dir, &artifacts)? {
            self.events.emit(&EngineEvent::SnapshotWritten {
                correlation_id,
                path,
            });
        }
        Ok(model)
    }

    /// Read the catalog without writing anything.
    pub async fn introspect(&self) -> Result<SchemaModel> {
        let mut tables = Vec::new();
        let mut views = Vec::new();
        let mut functions = Vec::new();

        for namespace in &self.config.schemas {
            let schema = (namespace != "public").then(|| namespace.clone());
            let ns = [Value::from(namespace.as_str())];

            for row in self.query(stage::TABLES, TABLES_SQL, &ns).await? {
                let name = self.field(stage::TABLES, row.string("name"))?;
                if self.config.is_excluded(&name) {
                    continue;
                }
                let comment = self.field(stage::TABLES, row.opt_string("comment"))?;
                let mut table = self.read_table(namespace, schema.clone(), name).await?;
                table.comment = comment;
                tables.push(table);
            }

            if self.config.include_views {
                for row in self.query(stage::VIEWS, VIEWS_SQL, &ns).await? {
                    views.push(self.read_view(namespace, schema.clone(), &row).await?);
                }
            }

            if self.config.include_functions {
                for row in self.query(stage::FUNCTIONS, FUNCTIONS_SQL, &ns).await? {
                    functions.push(self.field(stage::FUNCTIONS, function_from_row(&row, schema.clone()))?);
                }
            }
        }

        tracing::debug!(
            tables = tables.len(),
            views = views.len(),
            functions = functions.len(),
            "catalog read"
        );
        Ok(SchemaModel::new(tables, views, functions))
    }

    async fn read_table(&self, namespace: &str, schema: Option<String>, name: String) -> Result<Table> {
        let params = [Value::from(namespace), Value::from(name.as_str())];

        let mut columns = Vec::new();
        for row in self.query(stage::COLUMNS, COLUMNS_SQL, &params).await? {
            columns.push(self.field(stage::COLUMNS, column_from_row(&row))?);
        }

        let primary_key = match self
            .query(stage::PRIMARY_KEY, PRIMARY_KEY_SQL, &params)
            .await?
            .first()
        {
            Some(row) => Some(PrimaryKey {
                name: self.field(stage::PRIMARY_KEY, row.string("name"))?,
                columns: self.field(stage::PRIMARY_KEY, row.list("columns"))?,
            }),
            None => None,
        };

        let mut foreign_keys = Vec::new();
        for row in self.query(stage::FOREIGN_KEYS, FOREIGN_KEYS_SQL, &params).await? {
            foreign_keys.push(self.field(stage::FOREIGN_KEYS, foreign_key_from_row(&row))?);
        }

        let mut indexes = Vec::new();
        for row in self.query(stage::INDEXES, INDEXES_SQL, &params).await? {
            let mut index = self.field(stage::INDEXES, index_from_row(&name, &row))?;
            index.schema = schema.clone();
            indexes.push(index);
        }

        let mut constraints = Vec::new();
        for row in self.query(stage::CONSTRAINTS, CONSTRAINTS_SQL, &params).await? {
            if let Some(mut constraint) = self.field(stage::CONSTRAINTS, constraint_from_row(&name, &row))? {
                constraint.schema = schema.clone();
                constraints.push(constraint);
            }
        }

        Ok(Table {
            name,
            schema,
            columns,
            primary_key,
            foreign_keys,
            indexes,
            constraints,
            comment: None,
        })
    }

    async fn read_view(&self, namespace: &str, schema: Option<String>, row: &Row) -> Result<View> {
        let name = self.field(stage::VIEWS, row.string("name"))?;
        let definition = self.field(stage::VIEWS, row.opt_string("definition"))?.unwrap_or_default();
        let materialized = self.field(stage::VIEWS, row.boolean("materialized"))?;

        let params = [Value::from(namespace), Value::from(name.as_str())];
        let mut columns = Vec::new();
        for row in self.query(stage::VIEW_COLUMNS, VIEW_COLUMNS_SQL, &params).await? {
            columns.push(ViewColumn {
                name: self.field(stage::VIEW_COLUMNS, row.string("name"))?,
                data_type: SqlType::parse(&self.field(stage::VIEW_COLUMNS, row.string("data_type"))?),
                nullable: self.field(stage::VIEW_COLUMNS, row.boolean("nullable"))?,
            });
        }

        Ok(View {
            name,
            schema,
            definition: definition.trim().to_string(),
            columns,
            materialized,
        })
    }

    async fn query(&self, stage: &'static str, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.db
            .query(sql, params)
            .await
            .map_err(|source| Error::SchemaAnalysis { stage, source })
    }

    fn field<T>(&self, stage: &'static str, value: std::result::Result<T, DbError>) -> Result<T> {
        value.map_err(|source| Error::SchemaAnalysis { stage, source })
    }
}

fn column_from_row(row: &Row) -> std::result::Result<Column, DbError> {
    let identity = row.opt_string("identity")?.unwrap_or_default();
    let default = if identity == "a" || identity == "d" {
        Some(ColumnDefault::AutoIncrement)
    } else {
        row.opt_string("default_expr")?
            .map(|raw| ColumnDefault::parse(&raw))
    };
    Ok(Column {
        name: row.string("name")?,
        data_type: SqlType::parse(&row.string("data_type")?),
        nullable: row.boolean("nullable")?,
        auto_increment: default == Some(ColumnDefault::AutoIncrement),
        default,
        primary_key: row.boolean("primary_key")?,
        unique: row.boolean("is_unique")?,
        references: None,
        comment: row.opt_string("comment")?,
    })
}

fn foreign_key_from_row(row: &Row) -> std::result::Result<ForeignKey, DbError> {
    Ok(ForeignKey {
        name: row.string("name")?,
        columns: row.list("columns")?,
        references_table: row.string("references_table")?,
        references_columns: row.list("references_columns")?,
        on_delete: ReferentialAction::from_pg_code(&row.opt_string("on_delete")?.unwrap_or_default()),
        on_update: ReferentialAction::from_pg_code(&row.opt_string("on_update")?.unwrap_or_default()),
    })
}

fn index_from_row(table: &str, row: &Row) -> std::result::Result<Index, DbError> {
    let keys = row.opt_string("keys")?.unwrap_or_default();
    Ok(Index {
        name: row.string("name")?,
        table: table.to_string(),
        schema: None,
        columns: keys
            .lines()
            .filter(|k| !k.trim().is_empty())
            .map(IndexColumn::parse)
            .collect(),
        unique: row.boolean("is_unique")?,
        method: IndexMethod::parse(&row.string("method")?),
        predicate: row.opt_string("predicate")?,
    })
}

/// `None` for constraint kinds the model does not carry.
fn constraint_from_row(table: &str, row: &Row) -> std::result::Result<Option<Constraint>, DbError> {
    let Some(kind) = ConstraintKind::from_pg_code(&row.string("kind")?) else {
        return Ok(None);
    };
    let mut constraint = Constraint::new(table, row.string("name")?, kind, row.string("definition")?);
    constraint.columns = row.list("columns")?;
    Ok(Some(constraint))
}

fn function_from_row(row: &Row, schema: Option<String>) -> std::result::Result<DatabaseFunction, DbError> {
    Ok(DatabaseFunction {
        name: row.string("name")?,
        schema,
        arguments: FunctionArgument::parse_list(&row.opt_string("arguments")?.unwrap_or_default()),
        return_type: row.opt_string("return_type")?.unwrap_or_default(),
        language: row.string("language")?,
        definition: row.opt_string("definition")?.unwrap_or_default(),
    })
}

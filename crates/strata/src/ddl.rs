//! DDL rendering.
//!
//! Every function here renders one statement (or a small fixed group) for a
//! single object. Ordering across statements is the solver's job.

use crate::diff::SchemaChange;
use strata_schema::{
    Column, ColumnDefault, Constraint, ConstraintKind, Index, IndexMethod, SchemaModel, Table,
};
use strata_sql::{Lit, qualified_name, quote_ident};

/// Column definition as used by `CREATE TABLE` and `ADD COLUMN`.
///
/// Auto-increment columns become identity columns. Foreign keys are never
/// rendered inline.
pub fn column_definition(column: &Column) -> String {
    let mut def = format!("{} {}", quote_ident(&column.name), column.data_type);
    if column.is_auto_increment() {
        def.push_str(" GENERATED BY DEFAULT AS IDENTITY");
    }
    if !column.nullable {
        def.push_str(" NOT NULL");
    }
    if let Some(default) = column.default.as_ref().and_then(ColumnDefault::to_sql) {
        def.push_str(" DEFAULT ");
        def.push_str(&default);
    }
    def
}

/// Generate CREATE TABLE SQL statement.
///
/// Does not include foreign key constraints (those are added separately so
/// tables can be created in any order). Primary key, unique, check and
/// exclusion constraints are declared inline under their own names.
pub fn create_table_sql(table: &Table) -> String {
    let mut parts: Vec<String> = table
        .columns
        .iter()
        .map(|c| format!("    {}", column_definition(c)))
        .collect();

    for constraint in table.constraint_set() {
        if constraint.kind == ConstraintKind::ForeignKey {
            continue;
        }
        parts.push(format!(
            "    CONSTRAINT {} {}",
            quote_ident(&constraint.name),
            constraint.definition
        ));
    }

    format!(
        "CREATE TABLE {} (\n{}\n);",
        table.qualified_name(),
        parts.join(",\n")
    )
}

/// `COMMENT ON` statements for a table and its columns.
pub fn comment_statements(table: &Table) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(comment) = &table.comment {
        out.push(format!(
            "COMMENT ON TABLE {} IS {};",
            table.qualified_name(),
            Lit(comment)
        ));
    }
    for column in &table.columns {
        if let Some(comment) = &column.comment {
            out.push(format!(
                "COMMENT ON COLUMN {}.{} IS {};",
                table.qualified_name(),
                quote_ident(&column.name),
                Lit(comment)
            ));
        }
    }
    out
}

pub fn drop_table_sql(table: &Table) -> String {
    format!("DROP TABLE {};", table.qualified_name())
}

/// Generate CREATE INDEX SQL statement for a given index.
pub fn create_index_sql(index: &Index, concurrently: bool) -> String {
    let unique = if index.unique { "UNIQUE " } else { "" };
    let concurrently = if concurrently { "CONCURRENTLY " } else { "" };
    let using = match &index.method {
        IndexMethod::Btree => String::new(),
        method => format!(" USING {}", method.as_str()),
    };
    let columns: Vec<String> = index.columns.iter().map(|c| c.to_sql()).collect();
    let predicate = index
        .predicate
        .as_ref()
        .map(|p| format!(" WHERE {}", p))
        .unwrap_or_default();
    format!(
        "CREATE {}INDEX {}{} ON {}{} ({}){};",
        unique,
        concurrently,
        quote_ident(&index.name),
        qualified_name(index.schema.as_deref(), &index.table),
        using,
        columns.join(", "),
        predicate
    )
}

pub fn drop_index_sql(index: &Index, concurrently: bool) -> String {
    let concurrently = if concurrently { "CONCURRENTLY " } else { "" };
    format!(
        "DROP INDEX {}{};",
        concurrently,
        qualified_name(index.schema.as_deref(), &index.name)
    )
}

pub fn add_constraint_sql(constraint: &Constraint) -> String {
    format!(
        "ALTER TABLE {} ADD CONSTRAINT {} {};",
        qualified_name(constraint.schema.as_deref(), &constraint.table),
        quote_ident(&constraint.name),
        constraint.definition
    )
}

pub fn drop_constraint_sql(constraint: &Constraint) -> String {
    format!(
        "ALTER TABLE {} DROP CONSTRAINT {};",
        qualified_name(constraint.schema.as_deref(), &constraint.table),
        quote_ident(&constraint.name)
    )
}

/// Statements that turn column `from` into column `to`.
///
/// Uniqueness is not handled here: it lives in the table's constraint set
/// and changes as a separate constraint step.
pub fn alter_column_sql(schema: Option<&str>, table: &str, from: &Column, to: &Column) -> Vec<String> {
    let prefix = format!(
        "ALTER TABLE {} ALTER COLUMN {}",
        qualified_name(schema, table),
        quote_ident(&to.name)
    );
    let mut out = Vec::new();

    if from.data_type != to.data_type {
        out.push(format!(
            "{} TYPE {} USING {}::{};",
            prefix,
            to.data_type,
            quote_ident(&to.name),
            to.data_type
        ));
    }

    let from_identity = from.is_auto_increment();
    let to_identity = to.is_auto_increment();
    let from_default = from.default.as_ref().and_then(ColumnDefault::to_sql);
    let to_default = to.default.as_ref().and_then(ColumnDefault::to_sql);

    match (from_identity, to_identity) {
        (false, true) => {
            if from_default.is_some() {
                out.push(format!("{} DROP DEFAULT;", prefix));
            }
            out.push(format!("{} ADD GENERATED BY DEFAULT AS IDENTITY;", prefix));
        }
        (true, false) => {
            out.push(format!("{} DROP IDENTITY IF EXISTS;", prefix));
            match &to_default {
                Some(default) => out.push(format!("{} SET DEFAULT {};", prefix, default)),
                None => out.push(format!("{} DROP DEFAULT;", prefix)),
            }
        }
        _ => {
            let changed = match (&from.default, &to.default) {
                (Some(ColumnDefault::Expression(a)), Some(ColumnDefault::Expression(b))) => {
                    strata_sql::normalize_sql_expr(a) != strata_sql::normalize_sql_expr(b)
                }
                _ => from_default != to_default,
            };
            if changed && !to_identity {
                match &to_default {
                    Some(default) => out.push(format!("{} SET DEFAULT {};", prefix, default)),
                    None => out.push(format!("{} DROP DEFAULT;", prefix)),
                }
            }
        }
    }

    if from.nullable != to.nullable {
        if to.nullable {
            out.push(format!("{} DROP NOT NULL;", prefix));
        } else {
            out.push(format!("{} SET NOT NULL;", prefix));
        }
    }

    out
}

/// Render one ordered step.
///
/// `concurrent_indexes` switches index builds and drops to `CONCURRENTLY`.
pub fn change_sql(change: &SchemaChange, concurrent_indexes: bool) -> Vec<String> {
    match change {
        SchemaChange::CreateTable(table) => {
            let mut out = vec![create_table_sql(table)];
            out.extend(comment_statements(table));
            out
        }
        SchemaChange::DropTable(table) => vec![drop_table_sql(table)],
        SchemaChange::AddColumn {
            schema,
            table,
            column,
        } => {
            let mut out = vec![format!(
                "ALTER TABLE {} ADD COLUMN {};",
                qualified_name(schema.as_deref(), table),
                column_definition(column)
            )];
            if let Some(comment) = &column.comment {
                out.push(format!(
                    "COMMENT ON COLUMN {}.{} IS {};",
                    qualified_name(schema.as_deref(), table),
                    quote_ident(&column.name),
                    Lit(comment)
                ));
            }
            out
        }
        SchemaChange::DropColumn {
            schema,
            table,
            column,
        } => vec![format!(
            "ALTER TABLE {} DROP COLUMN {};",
            qualified_name(schema.as_deref(), table),
            quote_ident(&column.name)
        )],
        SchemaChange::AlterColumn {
            schema,
            table,
            from,
            to,
        } => alter_column_sql(schema.as_deref(), table, from, to),
        SchemaChange::CreateIndex(index) => vec![create_index_sql(index, concurrent_indexes)],
        SchemaChange::DropIndex(index) => vec![drop_index_sql(index, concurrent_indexes)],
        SchemaChange::AddConstraint(constraint) => vec![add_constraint_sql(constraint)],
        SchemaChange::DropConstraint(constraint) => vec![drop_constraint_sql(constraint)],
    }
}

/// A complete script that recreates `model` from nothing.
///
/// Tables first, then indexes, then foreign keys, then views and functions.
pub fn schema_sql(model: &SchemaModel) -> String {
    let mut sql = String::new();

    for table in &model.tables {
        sql.push_str(&create_table_sql(&crate::solver::bare_table(table)));
        sql.push('\n');
        for comment in comment_statements(table) {
            sql.push_str(&comment);
            sql.push('\n');
        }
        sql.push('\n');
    }

    for table in &model.tables {
        for index in &table.indexes {
            let mut index = index.clone();
            if index.schema.is_none() {
                index.schema = table.schema.clone();
            }
            sql.push_str(&create_index_sql(&index, false));
            sql.push('\n');
        }
    }

    for table in &model.tables {
        for constraint in table.constraint_set() {
            if constraint.kind == ConstraintKind::ForeignKey {
                sql.push_str(&add_constraint_sql(&constraint));
                sql.push('\n');
            }
        }
    }

    for view in &model.views {
        let kind = if view.materialized {
            "MATERIALIZED VIEW"
        } else {
            "VIEW"
        };
        sql.push_str(&format!(
            "\nCREATE {} {} AS\n{}\n",
            kind,
            qualified_name(view.schema.as_deref(), &view.name),
            terminated(view.definition.trim())
        ));
    }

    for function in &model.functions {
        sql.push('\n');
        sql.push_str(&terminated(function.definition.trim()));
        sql.push('\n');
    }

    sql.trim_end().to_string() + "\n"
}

fn terminated(sql: &str) -> String {
    if sql.ends_with(';') {
        sql.to_string()
    } else {
        format!("{};", sql)
    }
}

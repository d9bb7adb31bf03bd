//! Schema diffing: compare two schema models and produce a list of changes.
//!
//! Tables are matched by schema-qualified name, columns, indexes and
//! constraints by name. Nothing is ever matched as a rename: a name that
//! only exists on one side is a drop or a create.

use std::collections::HashMap;
use std::fmt;
use strata_schema::{Column, ColumnDefault, Constraint, Index, SchemaModel, Table, table_key};

/// A single structural change between two schema models.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaChange {
    CreateTable(Table),
    DropTable(Table),
    AddColumn {
        schema: Option<String>,
        table: String,
        column: Column,
    },
    DropColumn {
        schema: Option<String>,
        table: String,
        column: Column,
    },
    AlterColumn {
        schema: Option<String>,
        table: String,
        from: Column,
        to: Column,
    },
    CreateIndex(Index),
    DropIndex(Index),
    AddConstraint(Constraint),
    DropConstraint(Constraint),
}

impl SchemaChange {
    /// The table this change applies to.
    pub fn table_name(&self) -> &str {
        match self {
            SchemaChange::CreateTable(t) | SchemaChange::DropTable(t) => &t.name,
            SchemaChange::AddColumn { table, .. }
            | SchemaChange::DropColumn { table, .. }
            | SchemaChange::AlterColumn { table, .. } => table,
            SchemaChange::CreateIndex(i) | SchemaChange::DropIndex(i) => &i.table,
            SchemaChange::AddConstraint(c) | SchemaChange::DropConstraint(c) => &c.table,
        }
    }

    /// The change that undoes this one.
    pub fn invert(&self) -> SchemaChange {
        match self {
            SchemaChange::CreateTable(t) => SchemaChange::DropTable(t.clone()),
            SchemaChange::DropTable(t) => SchemaChange::CreateTable(t.clone()),
            SchemaChange::AddColumn {
                schema,
                table,
                column,
            } => SchemaChange::DropColumn {
                schema: schema.clone(),
                table: table.clone(),
                column: column.clone(),
            },
            SchemaChange::DropColumn {
                schema,
                table,
                column,
            } => SchemaChange::AddColumn {
                schema: schema.clone(),
                table: table.clone(),
                column: column.clone(),
            },
            SchemaChange::AlterColumn {
                schema,
                table,
                from,
                to,
            } => SchemaChange::AlterColumn {
                schema: schema.clone(),
                table: table.clone(),
                from: to.clone(),
                to: from.clone(),
            },
            SchemaChange::CreateIndex(i) => SchemaChange::DropIndex(i.clone()),
            SchemaChange::DropIndex(i) => SchemaChange::CreateIndex(i.clone()),
            SchemaChange::AddConstraint(c) => SchemaChange::DropConstraint(c.clone()),
            SchemaChange::DropConstraint(c) => SchemaChange::AddConstraint(c.clone()),
        }
    }

    /// Identity of the table this change applies to, as [`Table::key`] spells it.
    pub fn table_key(&self) -> String {
        match self {
            SchemaChange::CreateTable(t) | SchemaChange::DropTable(t) => t.key(),
            SchemaChange::AddColumn { schema, table, .. }
            | SchemaChange::DropColumn { schema, table, .. }
            | SchemaChange::AlterColumn { schema, table, .. } => {
                table_key(schema.as_deref(), table)
            }
            SchemaChange::CreateIndex(i) | SchemaChange::DropIndex(i) => {
                table_key(i.schema.as_deref(), &i.table)
            }
            SchemaChange::AddConstraint(c) | SchemaChange::DropConstraint(c) => {
                table_key(c.schema.as_deref(), &c.table)
            }
        }
    }

    /// Whether applying this change can lose data.
    pub fn is_destructive(&self) -> bool {
        matches!(
            self,
            SchemaChange::DropTable(_) | SchemaChange::DropColumn { .. }
        )
    }
}

impl fmt::Display for SchemaChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaChange::CreateTable(t) => write!(f, "+ table {}", t.name),
            SchemaChange::DropTable(t) => write!(f, "- table {}", t.name),
            SchemaChange::AddColumn { table, column, .. } => {
                write!(f, "+ {}.{}: {}", table, column.name, column.data_type)?;
                if !column.nullable {
                    write!(f, " NOT NULL")?;
                }
                if let Some(default) = &column.default {
                    write!(f, " DEFAULT {}", default)?;
                }
                Ok(())
            }
            SchemaChange::DropColumn { table, column, .. } => write!(f, "- {}.{}", table, column.name),
            SchemaChange::AlterColumn {
                table, from, to, ..
            } => {
                write!(f, "~ {}.{}: ", table, to.name)?;
                let mut parts = Vec::new();
                if from.data_type != to.data_type {
                    parts.push(format!("type {} -> {}", from.data_type, to.data_type));
                }
                if from.nullable != to.nullable {
                    parts.push(format!(
                        "{} -> {}",
                        nullability(from.nullable),
                        nullability(to.nullable)
                    ));
                }
                if !same_default(from, to) {
                    parts.push(format!(
                        "default {} -> {}",
                        describe_default(from),
                        describe_default(to)
                    ));
                }
                if from.unique != to.unique {
                    parts.push(if to.unique {
                        "add unique".to_string()
                    } else {
                        "drop unique".to_string()
                    });
                }
                write!(f, "{}", parts.join(", "))
            }
            SchemaChange::CreateIndex(i) => {
                let cols: Vec<_> = i.columns.iter().map(|c| c.to_sql()).collect();
                let unique = if i.unique { "unique " } else { "" };
                write!(
                    f,
                    "+ {}index {} on {} ({})",
                    unique,
                    i.name,
                    i.table,
                    cols.join(", ")
                )
            }
            SchemaChange::DropIndex(i) => write!(f, "- index {}", i.name),
            SchemaChange::AddConstraint(c) => {
                write!(f, "+ {} {} on {}: {}", c.kind, c.name, c.table, c.definition)
            }
            SchemaChange::DropConstraint(c) => write!(f, "- {} {} on {}", c.kind, c.name, c.table),
        }
    }
}

fn nullability(nullable: bool) -> &'static str {
    if nullable { "NULL" } else { "NOT NULL" }
}

fn describe_default(column: &Column) -> String {
    match effective_default(column) {
        Some(default) => default.to_string(),
        None => "none".to_string(),
    }
}

/// The column's default, with the auto-increment flag folded in.
fn effective_default(column: &Column) -> Option<ColumnDefault> {
    if column.is_auto_increment() {
        Some(ColumnDefault::AutoIncrement)
    } else {
        column.default.clone()
    }
}

fn same_default(a: &Column, b: &Column) -> bool {
    match (effective_default(a), effective_default(b)) {
        (Some(ColumnDefault::Expression(x)), Some(ColumnDefault::Expression(y))) => {
            strata_sql::normalize_sql_expr(&x) == strata_sql::normalize_sql_expr(&y)
        }
        (x, y) => x == y,
    }
}

/// Whether two same-named columns differ in anything the diff tracks.
pub fn column_differs(a: &Column, b: &Column) -> bool {
    a.data_type != b.data_type || a.nullable != b.nullable || a.unique != b.unique || !same_default(a, b)
}

/// Compute the changes that turn `old` into `new`.
///
/// Dropped tables come first in `old`'s order, then created tables in `new`'s
/// order, then per-table changes in `new`'s order. The output for a given
/// pair of models is always the same.
pub fn diff(old: &SchemaModel, new: &SchemaModel) -> Vec<SchemaChange> {
    let old_tables: HashMap<String, &Table> = old.tables.iter().map(|t| (t.key(), t)).collect();
    let new_tables: HashMap<String, &Table> = new.tables.iter().map(|t| (t.key(), t)).collect();

    let mut changes = Vec::new();

    for table in &old.tables {
        if !new_tables.contains_key(&table.key()) {
            changes.push(SchemaChange::DropTable(table.clone()));
        }
    }

    for table in &new.tables {
        if !old_tables.contains_key(&table.key()) {
            changes.push(SchemaChange::CreateTable(table.clone()));
        }
    }

    for table in &new.tables {
        if let Some(old_table) = old_tables.get(&table.key()) {
            diff_table(old_table, table, &mut changes);
        }
    }

    changes
}

fn diff_table(old: &Table, new: &Table, changes: &mut Vec<SchemaChange>) {
    diff_columns(old, new, changes);
    diff_indexes(old, new, changes);
    diff_constraints(old, new, changes);
}

fn diff_columns(old: &Table, new: &Table, changes: &mut Vec<SchemaChange>) {
    for column in &old.columns {
        if new.column(&column.name).is_none() {
            changes.push(SchemaChange::DropColumn {
                schema: new.schema.clone(),
                table: new.name.clone(),
                column: column.clone(),
            });
        }
    }

    for column in &new.columns {
        match old.column(&column.name) {
            None => changes.push(SchemaChange::AddColumn {
                schema: new.schema.clone(),
                table: new.name.clone(),
                column: column.clone(),
            }),
            Some(old_column) if column_differs(old_column, column) => {
                changes.push(SchemaChange::AlterColumn {
                    schema: new.schema.clone(),
                    table: new.name.clone(),
                    from: old_column.clone(),
                    to: column.clone(),
                });
            }
            Some(_) => {}
        }
    }
}

fn diff_indexes(old: &Table, new: &Table, changes: &mut Vec<SchemaChange>) {
    for index in &old.indexes {
        match new.indexes.iter().find(|i| i.name == index.name) {
            None => changes.push(SchemaChange::DropIndex(with_table(index, old))),
            Some(new_index) if !index.same_definition(new_index) => {
                changes.push(SchemaChange::DropIndex(with_table(index, old)));
                changes.push(SchemaChange::CreateIndex(with_table(new_index, new)));
            }
            Some(_) => {}
        }
    }

    for index in &new.indexes {
        if !old.indexes.iter().any(|i| i.name == index.name) {
            changes.push(SchemaChange::CreateIndex(with_table(index, new)));
        }
    }
}

/// Indexes inherit their table's schema when they don't name one.
fn with_table(index: &Index, table: &Table) -> Index {
    let mut index = index.clone();
    index.table = table.name.clone();
    if index.schema.is_none() {
        index.schema = table.schema.clone();
    }
    index
}

fn diff_constraints(old: &Table, new: &Table, changes: &mut Vec<SchemaChange>) {
    let old_set = old.constraint_set();
    let new_set = new.constraint_set();

    for constraint in &old_set {
        match new_set.iter().find(|c| c.name == constraint.name) {
            None => changes.push(SchemaChange::DropConstraint(constraint.clone())),
            Some(new_constraint) if !constraint.same_definition(new_constraint) => {
                changes.push(SchemaChange::DropConstraint(constraint.clone()));
                changes.push(SchemaChange::AddConstraint(new_constraint.clone()));
            }
            Some(_) => {}
        }
    }

    for constraint in &new_set {
        if !old_set.iter().any(|c| c.name == constraint.name) {
            changes.push(SchemaChange::AddConstraint(constraint.clone()));
        }
    }
}

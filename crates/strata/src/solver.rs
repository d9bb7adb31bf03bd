//! Migration solver: orders schema changes into executable steps and checks
//! the result against a simulated schema.
//!
//! Changes are first expanded so that every step maps to exactly one DDL
//! statement. A created table loses its indexes and foreign keys, which
//! become separate steps; a dropped table drops its own foreign keys first.
//! Steps are then stably sorted into phases:
//!
//! ```text
//! 1 drop constraint   5 create table
//! 2 drop index        6 add / alter column
//! 3 drop column       7 create index
//! 4 drop table        8 add constraint
//! ```
//!
//! With every foreign key added last and dropped first, tables can be
//! created and dropped in any relative order, including cycles.

use crate::diff::SchemaChange;
use std::collections::{HashMap, HashSet};
use std::fmt;
use strata_schema::{ConstraintKind, SchemaModel, Table, table_key};

/// Execution phase of a step. Lower phases run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    DropConstraint = 1,
    DropIndex = 2,
    DropColumn = 3,
    DropTable = 4,
    CreateTable = 5,
    AlterColumn = 6,
    CreateIndex = 7,
    AddConstraint = 8,
}

impl Phase {
    pub fn of(change: &SchemaChange) -> Phase {
        match change {
            SchemaChange::DropConstraint(_) => Phase::DropConstraint,
            SchemaChange::DropIndex(_) => Phase::DropIndex,
            SchemaChange::DropColumn { .. } => Phase::DropColumn,
            SchemaChange::DropTable(_) => Phase::DropTable,
            SchemaChange::CreateTable(_) => Phase::CreateTable,
            SchemaChange::AddColumn { .. } | SchemaChange::AlterColumn { .. } => Phase::AlterColumn,
            SchemaChange::CreateIndex(_) => Phase::CreateIndex,
            SchemaChange::AddConstraint(_) => Phase::AddConstraint,
        }
    }
}

/// Expand and order changes into executable steps.
///
/// The sort is stable: steps in the same phase keep their input order.
pub fn order_changes(changes: &[SchemaChange]) -> Vec<SchemaChange> {
    let mut steps: Vec<SchemaChange> = Vec::with_capacity(changes.len());
    for change in changes {
        for step in expand(change) {
            if !steps.contains(&step) {
                steps.push(step);
            }
        }
    }
    steps.sort_by_key(Phase::of);
    steps
}

fn expand(change: &SchemaChange) -> Vec<SchemaChange> {
    match change {
        SchemaChange::CreateTable(table) => {
            let mut steps = vec![SchemaChange::CreateTable(bare_table(table))];
            for index in &table.indexes {
                let mut index = index.clone();
                index.table = table.name.clone();
                if index.schema.is_none() {
                    index.schema = table.schema.clone();
                }
                steps.push(SchemaChange::CreateIndex(index));
            }
            for constraint in table.constraint_set() {
                if constraint.kind == ConstraintKind::ForeignKey {
                    steps.push(SchemaChange::AddConstraint(constraint));
                }
            }
            steps
        }
        SchemaChange::DropTable(table) => {
            let mut steps: Vec<SchemaChange> = table
                .constraint_set()
                .into_iter()
                .filter(|c| c.kind == ConstraintKind::ForeignKey)
                .map(SchemaChange::DropConstraint)
                .collect();
            steps.push(SchemaChange::DropTable(bare_table(table)));
            steps
        }
        other => vec![other.clone()],
    }
}

/// The table as `CREATE TABLE` sees it: no indexes, no foreign keys.
///
/// Other constraints stay inline.
pub fn bare_table(table: &Table) -> Table {
    let mut bare = table.clone();
    bare.indexes.clear();
    bare.foreign_keys.clear();
    bare.constraints
        .retain(|c| c.kind != ConstraintKind::ForeignKey);
    for column in &mut bare.columns {
        column.references = None;
    }
    bare
}

/// Error when a plan cannot be executed against the schema it targets.
#[derive(Debug, Clone, PartialEq)]
pub enum SolverError {
    TableNotFound {
        change: String,
        table: String,
    },
    TableAlreadyExists {
        change: String,
        table: String,
    },
    ColumnNotFound {
        change: String,
        table: String,
        column: String,
    },
    ColumnAlreadyExists {
        change: String,
        table: String,
        column: String,
    },
    IndexNotFound {
        change: String,
        index: String,
    },
    IndexAlreadyExists {
        change: String,
        index: String,
    },
    ConstraintNotFound {
        change: String,
        table: String,
        constraint: String,
    },
    ConstraintAlreadyExists {
        change: String,
        table: String,
        constraint: String,
    },
    /// A foreign key references a table or column that doesn't exist.
    ForeignKeyTargetNotFound {
        change: String,
        source_table: String,
        target: String,
    },
}

impl fmt::Display for SolverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolverError::TableNotFound { change, table } => {
                write!(f, "{}: table '{}' does not exist", change, table)
            }
            SolverError::TableAlreadyExists { change, table } => {
                write!(f, "{}: table '{}' already exists", change, table)
            }
            SolverError::ColumnNotFound {
                change,
                table,
                column,
            } => write!(f, "{}: column '{}.{}' does not exist", change, table, column),
            SolverError::ColumnAlreadyExists {
                change,
                table,
                column,
            } => write!(f, "{}: column '{}.{}' already exists", change, table, column),
            SolverError::IndexNotFound { change, index } => {
                write!(f, "{}: index '{}' does not exist", change, index)
            }
            SolverError::IndexAlreadyExists { change, index } => {
                write!(f, "{}: index '{}' already exists", change, index)
            }
            SolverError::ConstraintNotFound {
                change,
                table,
                constraint,
            } => write!(
                f,
                "{}: constraint '{}' does not exist on '{}'",
                change, constraint, table
            ),
            SolverError::ConstraintAlreadyExists {
                change,
                table,
                constraint,
            } => write!(
                f,
                "{}: constraint '{}' already exists on '{}'",
                change, constraint, table
            ),
            SolverError::ForeignKeyTargetNotFound {
                change,
                source_table,
                target,
            } => write!(
                f,
                "{}: foreign key from '{}' references non-existent '{}'",
                change, source_table, target
            ),
        }
    }
}

impl std::error::Error for SolverError {}

/// Virtual representation of a table for simulation.
#[derive(Debug, Clone, Default)]
struct VirtualTable {
    name: String,
    columns: HashSet<String>,
    constraints: HashSet<String>,
}

/// Virtual schema state for simulating a plan.
#[derive(Debug, Clone, Default)]
pub struct VirtualSchema {
    /// Tables by [`Table::key`]
    tables: HashMap<String, VirtualTable>,
    /// Schema-qualified index name to owning table key
    indexes: HashMap<String, String>,
}

impl VirtualSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_model(model: &SchemaModel) -> Self {
        let mut schema = Self::new();
        for table in &model.tables {
            schema.insert_table(table);
        }
        schema
    }

    fn insert_table(&mut self, table: &Table) {
        for index in &table.indexes {
            let namespace = index.schema.as_deref().or(table.schema.as_deref());
            self.indexes
                .insert(table_key(namespace, &index.name), table.key());
        }
        self.tables.insert(
            table.key(),
            VirtualTable {
                name: table.name.clone(),
                columns: table.columns.iter().map(|c| c.name.clone()).collect(),
                constraints: table.constraint_set().into_iter().map(|c| c.name).collect(),
            },
        );
    }

    pub fn table_exists(&self, key: &str) -> bool {
        self.tables.contains_key(key)
    }

    pub fn column_exists(&self, key: &str, column: &str) -> bool {
        self.tables
            .get(key)
            .is_some_and(|t| t.columns.contains(column))
    }

    /// Resolve a foreign key target, which may or may not carry a schema.
    fn resolve(&self, source_schema: Option<&str>, target: &str) -> Option<&VirtualTable> {
        if let Some(table) = self.tables.get(target) {
            return Some(table);
        }
        if let Some(table) = self.tables.get(&table_key(source_schema, target)) {
            return Some(table);
        }
        self.tables.values().find(|t| t.name == target)
    }

    /// Apply a step to the virtual schema, validating its preconditions.
    pub fn apply(&mut self, change: &SchemaChange) -> Result<(), SolverError> {
        let desc = change.to_string();
        let key = change.table_key();

        match change {
            SchemaChange::CreateTable(table) => {
                if self.table_exists(&key) {
                    return Err(SolverError::TableAlreadyExists {
                        change: desc,
                        table: key,
                    });
                }
                self.insert_table(table);
            }

            SchemaChange::DropTable(table) => {
                if self.tables.remove(&key).is_none() {
                    return Err(SolverError::TableNotFound {
                        change: desc,
                        table: key,
                    });
                }
                self.indexes.retain(|_, owner| *owner != table.key());
            }

            SchemaChange::AddColumn { column, .. } => {
                let table = self.table_mut(&key, &desc)?;
                if !table.columns.insert(column.name.clone()) {
                    return Err(SolverError::ColumnAlreadyExists {
                        change: desc,
                        table: key,
                        column: column.name.clone(),
                    });
                }
            }

            SchemaChange::DropColumn { column, .. } => {
                let table = self.table_mut(&key, &desc)?;
                if !table.columns.remove(&column.name) {
                    return Err(SolverError::ColumnNotFound {
                        change: desc,
                        table: key,
                        column: column.name.clone(),
                    });
                }
            }

            SchemaChange::AlterColumn { to, .. } => {
                let table = self.table_mut(&key, &desc)?;
                if !table.columns.contains(&to.name) {
                    return Err(SolverError::ColumnNotFound {
                        change: desc,
                        table: key,
                        column: to.name.clone(),
                    });
                }
            }

            SchemaChange::CreateIndex(index) => {
                let table = self.table_mut(&key, &desc)?;
                for column in index.columns.iter().filter(|c| !c.is_expression()) {
                    if !table.columns.contains(&column.name) {
                        return Err(SolverError::ColumnNotFound {
                            change: desc,
                            table: key,
                            column: column.name.clone(),
                        });
                    }
                }
                let qualified = table_key(index.schema.as_deref(), &index.name);
                if self.indexes.insert(qualified, key.clone()).is_some() {
                    return Err(SolverError::IndexAlreadyExists {
                        change: desc,
                        index: index.name.clone(),
                    });
                }
            }

            SchemaChange::DropIndex(index) => {
                let qualified = table_key(index.schema.as_deref(), &index.name);
                if self.indexes.remove(&qualified).is_none() {
                    return Err(SolverError::IndexNotFound {
                        change: desc,
                        index: index.name.clone(),
                    });
                }
            }

            SchemaChange::AddConstraint(constraint) => {
                if constraint.kind == ConstraintKind::ForeignKey
                    && let Some((target, columns)) = fk_target(&constraint.definition)
                {
                    let resolved = self.resolve(constraint.schema.as_deref(), &target);
                    let missing = match resolved {
                        None => Some(target.clone()),
                        Some(t) => columns
                            .iter()
                            .find(|c| !t.columns.contains(*c))
                            .map(|c| format!("{}.{}", target, c)),
                    };
                    if let Some(target) = missing {
                        return Err(SolverError::ForeignKeyTargetNotFound {
                            change: desc,
                            source_table: constraint.table.clone(),
                            target,
                        });
                    }
                }
                let table = self.table_mut(&key, &desc)?;
                if !table.constraints.insert(constraint.name.clone()) {
                    return Err(SolverError::ConstraintAlreadyExists {
                        change: desc,
                        table: key,
                        constraint: constraint.name.clone(),
                    });
                }
            }

            SchemaChange::DropConstraint(constraint) => {
                let table = self.table_mut(&key, &desc)?;
                if !table.constraints.remove(&constraint.name) {
                    return Err(SolverError::ConstraintNotFound {
                        change: desc,
                        table: key,
                        constraint: constraint.name.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    fn table_mut(&mut self, key: &str, desc: &str) -> Result<&mut VirtualTable, SolverError> {
        self.tables
            .get_mut(key)
            .ok_or_else(|| SolverError::TableNotFound {
                change: desc.to_string(),
                table: key.to_string(),
            })
    }
}

/// Pull the referenced table and columns out of `FOREIGN KEY (..) REFERENCES t(a, b)`.
fn fk_target(definition: &str) -> Option<(String, Vec<String>)> {
    let upper = definition.to_ascii_uppercase();
    let start = upper.find("REFERENCES ")? + "REFERENCES ".len();
    let rest = &definition[start..];
    let open = rest.find('(')?;
    let close = rest[open..].find(')')? + open;
    let table = unquote(rest[..open].trim());
    let columns = rest[open + 1..close]
        .split(',')
        .map(|c| unquote(c.trim()))
        .collect();
    Some((table, columns))
}

fn unquote(s: &str) -> String {
    s.split('.')
        .map(|part| part.trim_matches('"'))
        .collect::<Vec<_>>()
        .join(".")
}

/// Simulate a plan against a base schema.
pub fn verify(base: &SchemaModel, steps: &[SchemaChange]) -> Result<(), SolverError> {
    let mut schema = VirtualSchema::from_model(base);
    for step in steps {
        schema.apply(step)?;
    }
    Ok(())
}

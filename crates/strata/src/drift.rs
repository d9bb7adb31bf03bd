//! Drift detection and repair.
//!
//! Drift is any difference between the schema a project expects and the
//! schema a live database actually has. Repair only ever adds or alters:
//! objects that exist live but were not expected are flagged for manual
//! review and left in place.

use crate::diff::{SchemaChange, diff};
use crate::events::{EngineEvent, EventSink};
use crate::generate::{GeneratedMigration, GeneratorOptions, build};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use strata_schema::{Column, Constraint, Index, SchemaModel, Table};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriftKind {
    MissingTable,
    ExtraTable,
    MissingColumn,
    ExtraColumn,
    ColumnMismatch,
    MissingIndex,
    ExtraIndex,
    IndexMismatch,
    MissingConstraint,
    ExtraConstraint,
    ConstraintMismatch,
}

impl DriftKind {
    pub fn is_missing(&self) -> bool {
        matches!(
            self,
            DriftKind::MissingTable
                | DriftKind::MissingColumn
                | DriftKind::MissingIndex
                | DriftKind::MissingConstraint
        )
    }

    pub fn is_extra(&self) -> bool {
        matches!(
            self,
            DriftKind::ExtraTable
                | DriftKind::ExtraColumn
                | DriftKind::ExtraIndex
                | DriftKind::ExtraConstraint
        )
    }

    pub fn is_mismatch(&self) -> bool {
        !self.is_missing() && !self.is_extra()
    }
}

/// The object on one side of a drift entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DriftObject {
    Table(Table),
    Column {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema: Option<String>,
        table: String,
        column: Column,
    },
    Index(Index),
    Constraint(Constraint),
}

/// One difference between the expected and the live schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftEntry {
    #[serde(rename = "type")]
    pub kind: DriftKind,
    /// Human-readable object name, e.g. `orders.status`
    pub object: String,
    #[serde(default)]
    pub expected: Option<DriftObject>,
    #[serde(default)]
    pub actual: Option<DriftObject>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub entries: Vec<DriftEntry>,
}

impl DriftReport {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn count(&self, pred: impl Fn(&DriftKind) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(&e.kind)).count()
    }

    pub fn missing(&self) -> usize {
        self.count(DriftKind::is_missing)
    }

    pub fn extra(&self) -> usize {
        self.count(DriftKind::is_extra)
    }

    pub fn mismatched(&self) -> usize {
        self.count(DriftKind::is_mismatch)
    }

    /// Emit a [`EngineEvent::DriftDetected`] if there is any drift.
    pub fn emit(&self, sink: &dyn EventSink, correlation_id: Uuid) {
        if self.is_empty() {
            return;
        }
        sink.emit(&EngineEvent::DriftDetected {
            correlation_id,
            missing: self.missing(),
            extra: self.extra(),
            mismatched: self.mismatched(),
        });
    }
}

impl fmt::Display for DriftReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "{:?} {}", entry.kind, entry.object)?;
        }
        Ok(())
    }
}

/// Compare an expected schema with a live one.
pub fn detect_drift(expected: &SchemaModel, live: &SchemaModel) -> DriftReport {
    let changes = diff(live, expected);
    let mut entries: Vec<DriftEntry> = Vec::new();

    for change in &changes {
        let entry = match change {
            SchemaChange::CreateTable(t) => DriftEntry {
                kind: DriftKind::MissingTable,
                object: t.name.clone(),
                expected: Some(DriftObject::Table(t.clone())),
                actual: None,
            },
            SchemaChange::DropTable(t) => DriftEntry {
                kind: DriftKind::ExtraTable,
                object: t.name.clone(),
                expected: None,
                actual: Some(DriftObject::Table(t.clone())),
            },
            SchemaChange::AddColumn {
                schema,
                table,
                column,
            } => DriftEntry {
                kind: DriftKind::MissingColumn,
                object: format!("{}.{}", table, column.name),
                expected: Some(column_object(schema, table, column)),
                actual: None,
            },
            SchemaChange::DropColumn {
                schema,
                table,
                column,
            } => DriftEntry {
                kind: DriftKind::ExtraColumn,
                object: format!("{}.{}", table, column.name),
                expected: None,
                actual: Some(column_object(schema, table, column)),
            },
            SchemaChange::AlterColumn {
                schema,
                table,
                from,
                to,
            } => DriftEntry {
                kind: DriftKind::ColumnMismatch,
                object: format!("{}.{}", table, to.name),
                expected: Some(column_object(schema, table, to)),
                actual: Some(column_object(schema, table, from)),
            },
            // The differ emits a changed index as drop then create under the
            // same name; fold those into one mismatch entry.
            SchemaChange::CreateIndex(index) => {
                if let Some(prev) = entries.iter_mut().find(|e| {
                    e.kind == DriftKind::ExtraIndex
                        && matches!(&e.actual, Some(DriftObject::Index(i)) if i.name == index.name)
                }) {
                    prev.kind = DriftKind::IndexMismatch;
                    prev.expected = Some(DriftObject::Index(index.clone()));
                    continue;
                }
                DriftEntry {
                    kind: DriftKind::MissingIndex,
                    object: index.name.clone(),
                    expected: Some(DriftObject::Index(index.clone())),
                    actual: None,
                }
            }
            SchemaChange::DropIndex(index) => DriftEntry {
                kind: DriftKind::ExtraIndex,
                object: index.name.clone(),
                expected: None,
                actual: Some(DriftObject::Index(index.clone())),
            },
            SchemaChange::AddConstraint(constraint) => {
                if let Some(prev) = entries.iter_mut().find(|e| {
                    e.kind == DriftKind::ExtraConstraint
                        && matches!(&e.actual, Some(DriftObject::Constraint(c))
                            if c.name == constraint.name && c.table == constraint.table)
                }) {
                    prev.kind = DriftKind::ConstraintMismatch;
                    prev.expected = Some(DriftObject::Constraint(constraint.clone()));
                    continue;
                }
                DriftEntry {
                    kind: DriftKind::MissingConstraint,
                    object: format!("{}.{}", constraint.table, constraint.name),
                    expected: Some(DriftObject::Constraint(constraint.clone())),
                    actual: None,
                }
            }
            SchemaChange::DropConstraint(constraint) => DriftEntry {
                kind: DriftKind::ExtraConstraint,
                object: format!("{}.{}", constraint.table, constraint.name),
                expected: None,
                actual: Some(DriftObject::Constraint(constraint.clone())),
            },
        };
        entries.push(entry);
    }

    DriftReport { entries }
}

fn column_object(schema: &Option<String>, table: &str, column: &Column) -> DriftObject {
    DriftObject::Column {
        schema: schema.clone(),
        table: table.to_string(),
        column: column.clone(),
    }
}

/// Generate a migration that repairs the drift in `report`.
///
/// Missing objects are created and mismatches altered towards the expected
/// definition. Extra objects produce a `MANUAL REVIEW` advisory and no DDL.
pub fn generate_from_drift_report(
    report: &DriftReport,
    opts: &GeneratorOptions,
) -> Result<GeneratedMigration> {
    let mut changes = Vec::new();
    let mut advisories = Vec::new();

    for entry in &report.entries {
        let malformed = || {
            Error::DriftMigrationGeneration(format!(
                "{:?} entry for {} is missing its object definition",
                entry.kind, entry.object
            ))
        };

        match (entry.kind, &entry.expected, &entry.actual) {
            (DriftKind::MissingTable, Some(DriftObject::Table(t)), _) => {
                changes.push(SchemaChange::CreateTable(t.clone()));
            }
            (
                DriftKind::MissingColumn,
                Some(DriftObject::Column {
                    schema,
                    table,
                    column,
                }),
                _,
            ) => changes.push(SchemaChange::AddColumn {
                schema: schema.clone(),
                table: table.clone(),
                column: column.clone(),
            }),
            (
                DriftKind::ColumnMismatch,
                Some(DriftObject::Column {
                    schema,
                    table,
                    column: to,
                }),
                Some(DriftObject::Column { column: from, .. }),
            ) => changes.push(SchemaChange::AlterColumn {
                schema: schema.clone(),
                table: table.clone(),
                from: from.clone(),
                to: to.clone(),
            }),
            (DriftKind::MissingIndex, Some(DriftObject::Index(index)), _) => {
                changes.push(SchemaChange::CreateIndex(index.clone()));
            }
            (
                DriftKind::IndexMismatch,
                Some(DriftObject::Index(expected)),
                Some(DriftObject::Index(actual)),
            ) => {
                changes.push(SchemaChange::DropIndex(actual.clone()));
                changes.push(SchemaChange::CreateIndex(expected.clone()));
            }
            (DriftKind::MissingConstraint, Some(DriftObject::Constraint(c)), _) => {
                changes.push(SchemaChange::AddConstraint(c.clone()));
            }
            (
                DriftKind::ConstraintMismatch,
                Some(DriftObject::Constraint(expected)),
                Some(DriftObject::Constraint(actual)),
            ) => {
                changes.push(SchemaChange::DropConstraint(actual.clone()));
                changes.push(SchemaChange::AddConstraint(expected.clone()));
            }
            (kind, _, _) if kind.is_extra() => {
                advisories.push(format!(
                    "MANUAL REVIEW: {} exists in the live schema but is not expected ({:?}); not dropped",
                    entry.object, kind
                ));
            }
            _ => return Err(malformed()),
        }
    }

    let mut migration = build(&changes, None, opts).map_err(Error::DriftMigrationGeneration)?;
    migration.advisories.extend(advisories);
    Ok(migration)
}

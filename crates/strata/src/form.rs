//! Schema changes from UI form field descriptors.
//!
//! This path only ever adds columns or widens types. It never narrows a
//! type, tightens nullability on an existing table, or drops anything.

use crate::diff::SchemaChange;
use crate::generate::{GeneratedMigration, GeneratorOptions, build};
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::HashSet;
use strata_schema::{Column, ColumnDefault, SqlType, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Textarea,
    Email,
    Password,
    Select,
    Number,
    Decimal,
    Date,
    Datetime,
    Checkbox,
}

/// A form field as a UI describes it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FormField {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    /// Maximum text length, for text fields
    #[serde(default)]
    pub max_length: Option<u32>,
    /// Bounds, for number fields
    #[serde(default)]
    pub min: Option<i64>,
    #[serde(default)]
    pub max: Option<i64>,
}

impl FormField {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            max_length: None,
            min: None,
            max: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn max_length(mut self, n: u32) -> Self {
        self.max_length = Some(n);
        self
    }

    pub fn bounds(mut self, min: i64, max: i64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }
}

/// The column type a field kind maps to.
pub fn field_type(field: &FormField) -> SqlType {
    match field.kind {
        FieldKind::Text => match field.max_length {
            Some(n) => SqlType::varchar(n),
            None => SqlType::text(),
        },
        FieldKind::Textarea => SqlType::text(),
        FieldKind::Email | FieldKind::Password | FieldKind::Select => SqlType::varchar(255),
        FieldKind::Number => {
            let bound = field
                .min
                .map(|n| n.unsigned_abs())
                .into_iter()
                .chain(field.max.map(|n| n.unsigned_abs()))
                .max();
            match bound {
                None => SqlType::integer(),
                Some(b) if b <= i16::MAX as u64 => SqlType::smallint(),
                Some(b) if b <= i32::MAX as u64 => SqlType::integer(),
                Some(_) => SqlType::bigint(),
            }
        }
        FieldKind::Decimal => SqlType::new("numeric"),
        FieldKind::Date => SqlType::date(),
        FieldKind::Datetime => SqlType::timestamp(),
        FieldKind::Checkbox => SqlType::boolean(),
    }
}

/// How an existing column type relates to the type a field wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Widening {
    /// The current type already holds every value the field can produce
    Keep,
    /// Widen to this type
    To(SqlType),
    /// The types are unrelated; nothing is changed
    Incompatible,
}

fn integer_rank(ty: &SqlType) -> Option<u8> {
    match ty.name.as_str() {
        "smallint" => Some(0),
        "integer" => Some(1),
        "bigint" => Some(2),
        _ => None,
    }
}

/// Compare `current` with `wanted` on the widening order
/// `varchar(n) < varchar(m > n) < text` and `smallint < integer < bigint`.
pub fn widen(current: &SqlType, wanted: &SqlType) -> Widening {
    if current == wanted || current.array || wanted.array {
        return if current == wanted {
            Widening::Keep
        } else {
            Widening::Incompatible
        };
    }
    match (current.name.as_str(), wanted.name.as_str()) {
        ("varchar", "varchar") => match (current.length, wanted.length) {
            // Unbounded varchar already takes anything.
            (None, _) => Widening::Keep,
            (Some(_), None) => Widening::To(wanted.clone()),
            (Some(a), Some(b)) if b > a => Widening::To(wanted.clone()),
            _ => Widening::Keep,
        },
        ("varchar", "text") => Widening::To(SqlType::text()),
        ("text", "varchar") => Widening::Keep,
        _ => match (integer_rank(current), integer_rank(wanted)) {
            (Some(a), Some(b)) if b > a => Widening::To(wanted.clone()),
            (Some(_), Some(_)) => Widening::Keep,
            _ if current.name == wanted.name => Widening::Keep,
            _ => Widening::Incompatible,
        },
    }
}

/// Generate the migration that makes `table` able to store `fields`.
///
/// Without an existing table, the table is created with an `id` identity
/// key unless a field already uses that name.
pub fn generate_from_form(
    table: &str,
    fields: &[FormField],
    existing: Option<&Table>,
    opts: &GeneratorOptions,
) -> Result<GeneratedMigration> {
    validate_fields(table, fields)?;

    let mut changes = Vec::new();
    let mut advisories = Vec::new();

    match existing {
        None => {
            let mut columns = Vec::new();
            if !fields.iter().any(|f| f.name == "id") {
                columns.push(
                    Column::new("id", SqlType::bigint())
                        .primary_key()
                        .auto_increment(),
                );
            }
            for field in fields {
                let mut column = Column::new(&field.name, field_type(field));
                if field.required {
                    column = column.not_null();
                }
                if field.kind == FieldKind::Checkbox {
                    column = column.default(ColumnDefault::Bool(false));
                }
                columns.push(column);
            }
            changes.push(SchemaChange::CreateTable(Table::new(table, columns)));
        }
        Some(current) => {
            for field in fields {
                let wanted = field_type(field);
                match current.column(&field.name) {
                    None => {
                        let mut column = Column::new(&field.name, wanted);
                        if field.kind == FieldKind::Checkbox {
                            column = column.default(ColumnDefault::Bool(false));
                        }
                        if field.required && column.default.is_none() {
                            advisories.push(format!(
                                "{}.{} is required by the form but was added as nullable; backfill it, then SET NOT NULL",
                                table, field.name
                            ));
                        } else if field.required {
                            column = column.not_null();
                        }
                        changes.push(SchemaChange::AddColumn {
                            schema: current.schema.clone(),
                            table: current.name.clone(),
                            column,
                        });
                    }
                    Some(column) => match widen(&column.data_type, &wanted) {
                        Widening::Keep => {}
                        Widening::To(ty) => {
                            let mut to = column.clone();
                            to.data_type = ty;
                            changes.push(SchemaChange::AlterColumn {
                                schema: current.schema.clone(),
                                table: current.name.clone(),
                                from: column.clone(),
                                to,
                            });
                        }
                        Widening::Incompatible => advisories.push(format!(
                            "{}.{} is {} but the form wants {}; left unchanged",
                            table, field.name, column.data_type, wanted
                        )),
                    },
                }
            }
        }
    }

    let mut migration = build(&changes, None, opts).map_err(Error::FormMigrationGeneration)?;
    migration.advisories.extend(advisories);
    Ok(migration)
}

fn validate_fields(table: &str, fields: &[FormField]) -> Result<()> {
    let invalid = |name: &str| {
        name.is_empty()
            || name.len() > strata_sql::PG_IDENT_MAX
            || name.chars().any(|c| c.is_control())
    };
    if invalid(table) {
        return Err(Error::FormMigrationGeneration(format!(
            "invalid table name '{}'",
            table
        )));
    }
    let mut seen = HashSet::new();
    for field in fields {
        if invalid(&field.name) {
            return Err(Error::FormMigrationGeneration(format!(
                "invalid field name '{}'",
                field.name
            )));
        }
        if !seen.insert(field.name.as_str()) {
            return Err(Error::FormMigrationGeneration(format!(
                "field '{}' appears more than once",
                field.name
            )));
        }
    }
    Ok(())
}

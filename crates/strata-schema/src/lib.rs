//! Schema model types for strata.
//!
//! This crate holds the shared vocabulary of the engine: tables, columns,
//! indexes, constraints, views and functions as read from a live catalog or
//! loaded from a persisted snapshot. Everything is `serde` serializable so a
//! [`SchemaModel`] can be written to and read back from `schema.json`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use strata_sql::{display_ident, foreign_key_name, primary_key_name, unique_constraint_name};

mod default;
pub use default::ColumnDefault;

mod function;
pub use function::{ArgumentMode, DatabaseFunction, FunctionArgument};

mod sql_type;
pub use sql_type::SqlType;

/// Version tag written into every snapshot.
pub const SNAPSHOT_VERSION: &str = "1";

/// What happens to referencing rows when the referenced row changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferentialAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl ReferentialAction {
    pub fn to_sql(&self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
        }
    }

    /// Decode `pg_constraint.confdeltype` / `confupdtype`.
    pub fn from_pg_code(code: &str) -> Self {
        match code {
            "r" => ReferentialAction::Restrict,
            "c" => ReferentialAction::Cascade,
            "n" => ReferentialAction::SetNull,
            "d" => ReferentialAction::SetDefault,
            _ => ReferentialAction::NoAction,
        }
    }
}

/// An inline single-column reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnReference {
    pub table: String,
    pub column: String,
    #[serde(default)]
    pub on_delete: ReferentialAction,
    #[serde(default)]
    pub on_update: ReferentialAction,
}

/// A database column definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: SqlType,
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<ColumnDefault>,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub auto_increment: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<ColumnReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl Column {
    /// A nullable column with no default.
    pub fn new(name: impl Into<String>, data_type: SqlType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            default: None,
            primary_key: false,
            unique: false,
            auto_increment: false,
            references: None,
            comment: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self.default = Some(ColumnDefault::AutoIncrement);
        self
    }

    pub fn default(mut self, default: ColumnDefault) -> Self {
        self.auto_increment = default == ColumnDefault::AutoIncrement;
        self.default = Some(default);
        self
    }

    pub fn references(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.references = Some(ColumnReference {
            table: table.into(),
            column: column.into(),
            on_delete: ReferentialAction::NoAction,
            on_update: ReferentialAction::NoAction,
        });
        self
    }

    pub fn is_auto_increment(&self) -> bool {
        self.auto_increment || self.default == Some(ColumnDefault::AutoIncrement)
    }

    /// Whether inserts can omit this column.
    pub fn has_default(&self) -> bool {
        self.default.is_some() || self.auto_increment
    }
}

/// A named primary key, possibly composite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryKey {
    pub name: String,
    pub columns: Vec<String>,
}

/// A foreign key constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForeignKey {
    pub name: String,
    /// Column(s) in this table
    pub columns: Vec<String>,
    pub references_table: String,
    pub references_columns: Vec<String>,
    #[serde(default)]
    pub on_delete: ReferentialAction,
    #[serde(default)]
    pub on_update: ReferentialAction,
}

impl ForeignKey {
    /// The definition text Postgres reports for this key.
    pub fn definition(&self) -> String {
        let mut def = format!(
            "FOREIGN KEY ({}) REFERENCES {}({})",
            ident_list(&self.columns),
            display_ident(&self.references_table),
            ident_list(&self.references_columns)
        );
        if self.on_update != ReferentialAction::NoAction {
            def.push_str(" ON UPDATE ");
            def.push_str(self.on_update.to_sql());
        }
        if self.on_delete != ReferentialAction::NoAction {
            def.push_str(" ON DELETE ");
            def.push_str(self.on_delete.to_sql());
        }
        def
    }
}

fn ident_list(names: &[String]) -> String {
    names
        .iter()
        .map(|n| display_ident(n))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Sort order for index columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    /// Returns the SQL keyword for this sort order, or empty string for ASC (default).
    pub fn to_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "",
            SortOrder::Desc => " DESC",
        }
    }
}

/// Nulls ordering for index columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullsOrder {
    /// Use database default (NULLS LAST for ASC, NULLS FIRST for DESC)
    #[default]
    Default,
    First,
    Last,
}

impl NullsOrder {
    pub fn to_sql(&self) -> &'static str {
        match self {
            NullsOrder::Default => "",
            NullsOrder::First => " NULLS FIRST",
            NullsOrder::Last => " NULLS LAST",
        }
    }
}

/// A column in an index with optional sort order and nulls ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexColumn {
    pub name: String,
    #[serde(default)]
    pub order: SortOrder,
    #[serde(default)]
    pub nulls: NullsOrder,
}

impl IndexColumn {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            order: SortOrder::Asc,
            nulls: NullsOrder::Default,
        }
    }

    pub fn desc(name: impl Into<String>) -> Self {
        Self {
            order: SortOrder::Desc,
            ..Self::new(name)
        }
    }

    /// Returns the SQL fragment for this column (name + order + nulls).
    pub fn to_sql(&self) -> String {
        format!(
            "{}{}{}",
            render_index_key(&self.name),
            self.order.to_sql(),
            self.nulls.to_sql()
        )
    }

    /// Parse a key as `pg_get_indexdef(oid, n, true)` prints it, like
    /// `"created_at DESC NULLS FIRST"` or `lower(email)`.
    pub fn parse(spec: &str) -> Self {
        let spec = spec.trim();
        let upper = spec.to_uppercase();

        let (spec_without_nulls, nulls) = if upper.ends_with(" NULLS FIRST") {
            (&spec[..spec.len() - 12], NullsOrder::First)
        } else if upper.ends_with(" NULLS LAST") {
            (&spec[..spec.len() - 11], NullsOrder::Last)
        } else {
            (spec, NullsOrder::Default)
        };

        let trimmed = spec_without_nulls.trim();
        let upper_trimmed = trimmed.to_uppercase();

        let (name, order) = if upper_trimmed.ends_with(" DESC") {
            (trimmed[..trimmed.len() - 5].trim(), SortOrder::Desc)
        } else if upper_trimmed.ends_with(" ASC") {
            (trimmed[..trimmed.len() - 4].trim(), SortOrder::Asc)
        } else {
            (trimmed, SortOrder::Asc)
        };

        Self {
            name: unquote_ident(name),
            order,
            nulls,
        }
    }

    /// Whether this key is an expression rather than a plain column.
    pub fn is_expression(&self) -> bool {
        self.name.contains('(') || self.name.contains(' ')
    }
}

/// Expression keys are emitted verbatim, column keys quoted.
fn render_index_key(key: &str) -> String {
    if key.contains('(') || key.contains(' ') {
        format!("({})", key)
    } else {
        strata_sql::quote_ident(key)
    }
}

fn unquote_ident(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        return s[1..s.len() - 1].replace("\"\"", "\"");
    }
    s.to_string()
}

/// Index access method.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexMethod {
    #[default]
    Btree,
    Hash,
    Gin,
    Gist,
    Spgist,
    Brin,
    Other(String),
}

impl IndexMethod {
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "btree" => IndexMethod::Btree,
            "hash" => IndexMethod::Hash,
            "gin" => IndexMethod::Gin,
            "gist" => IndexMethod::Gist,
            "spgist" => IndexMethod::Spgist,
            "brin" => IndexMethod::Brin,
            other => IndexMethod::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            IndexMethod::Btree => "btree",
            IndexMethod::Hash => "hash",
            IndexMethod::Gin => "gin",
            IndexMethod::Gist => "gist",
            IndexMethod::Spgist => "spgist",
            IndexMethod::Brin => "brin",
            IndexMethod::Other(name) => name,
        }
    }
}

/// A database index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    /// Owning table
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub columns: Vec<IndexColumn>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub method: IndexMethod,
    /// Optional WHERE clause for partial indexes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicate: Option<String>,
}

impl Index {
    pub fn new(table: impl Into<String>, name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            schema: None,
            columns: columns.iter().map(|c| IndexColumn::new(*c)).collect(),
            unique: false,
            method: IndexMethod::Btree,
            predicate: None,
        }
    }

    /// Whether two indexes build the same structure, ignoring their names.
    pub fn same_definition(&self, other: &Index) -> bool {
        self.columns == other.columns
            && self.unique == other.unique
            && self.method == other.method
            && self.predicate.as_deref().map(strata_sql::normalize_sql_expr)
                == other.predicate.as_deref().map(strata_sql::normalize_sql_expr)
    }
}

/// The kind of a table constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    Check,
    ForeignKey,
    PrimaryKey,
    Unique,
    Exclude,
}

impl ConstraintKind {
    /// Decode `pg_constraint.contype`.
    pub fn from_pg_code(code: &str) -> Option<Self> {
        match code {
            "c" => Some(ConstraintKind::Check),
            "f" => Some(ConstraintKind::ForeignKey),
            "p" => Some(ConstraintKind::PrimaryKey),
            "u" => Some(ConstraintKind::Unique),
            "x" => Some(ConstraintKind::Exclude),
            _ => None,
        }
    }
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConstraintKind::Check => "check",
            ConstraintKind::ForeignKey => "foreign key",
            ConstraintKind::PrimaryKey => "primary key",
            ConstraintKind::Unique => "unique",
            ConstraintKind::Exclude => "exclude",
        };
        write!(f, "{}", s)
    }
}

/// A table constraint, with its definition kept as opaque SQL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub name: String,
    /// Owning table
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub kind: ConstraintKind,
    /// Definition as `pg_get_constraintdef()` prints it, e.g. `CHECK ((price > 0))`
    pub definition: String,
    /// Columns the constraint covers, when known
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
}

impl Constraint {
    pub fn new(
        table: impl Into<String>,
        name: impl Into<String>,
        kind: ConstraintKind,
        definition: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            schema: None,
            kind,
            definition: definition.into(),
            columns: Vec::new(),
        }
    }

    /// A CHECK constraint named the way strata names them.
    pub fn check(table: impl Into<String>, expr: &str) -> Self {
        let table = table.into();
        let name = strata_sql::check_constraint_name(&table, expr);
        Self::new(table, name, ConstraintKind::Check, format!("CHECK ({})", expr))
    }

    pub fn with_columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Whether two constraints enforce the same rule, ignoring their names.
    pub fn same_definition(&self, other: &Constraint) -> bool {
        self.kind == other.kind
            && strata_sql::normalize_sql_expr(&self.definition)
                == strata_sql::normalize_sql_expr(&other.definition)
    }
}

/// A database table definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub columns: Vec<Column>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<PrimaryKey>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
    #[serde(default)]
    pub indexes: Vec<Index>,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            schema: None,
            columns,
            primary_key: None,
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
            constraints: Vec::new(),
            comment: None,
        }
    }

    /// Identity used to match tables across snapshots.
    pub fn key(&self) -> String {
        table_key(self.schema.as_deref(), &self.name)
    }

    /// The quoted, schema-qualified name for use in DDL.
    pub fn qualified_name(&self) -> String {
        strata_sql::qualified_name(self.schema.as_deref(), &self.name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Primary key columns, from the named key or the per-column flags.
    pub fn primary_key_columns(&self) -> Vec<String> {
        match &self.primary_key {
            Some(pk) => pk.columns.clone(),
            None => self
                .columns
                .iter()
                .filter(|c| c.primary_key)
                .map(|c| c.name.clone())
                .collect(),
        }
    }

    /// Foreign keys, including those only declared through column references.
    pub fn effective_foreign_keys(&self) -> Vec<ForeignKey> {
        let mut fks = self.foreign_keys.clone();
        for column in &self.columns {
            let Some(reference) = &column.references else {
                continue;
            };
            let covered = fks
                .iter()
                .any(|fk| fk.columns.len() == 1 && fk.columns[0] == column.name);
            if !covered {
                fks.push(ForeignKey {
                    name: foreign_key_name(&self.name, &[&column.name]),
                    columns: vec![column.name.clone()],
                    references_table: reference.table.clone(),
                    references_columns: vec![reference.column.clone()],
                    on_delete: reference.on_delete,
                    on_update: reference.on_update,
                });
            }
        }
        fks
    }

    /// All constraints of this table in canonical form.
    ///
    /// Primary and foreign keys are rendered from their structured form and
    /// included even when only declared through column flags, so a table
    /// built by hand compares equal to the same table read from the catalog.
    pub fn constraint_set(&self) -> Vec<Constraint> {
        let mut out = Vec::new();

        let pk_columns = self.primary_key_columns();
        let has_pk = !pk_columns.is_empty();
        if has_pk {
            let name = self
                .primary_key
                .as_ref()
                .map(|pk| pk.name.clone())
                .or_else(|| {
                    self.constraints
                        .iter()
                        .find(|c| c.kind == ConstraintKind::PrimaryKey)
                        .map(|c| c.name.clone())
                })
                .unwrap_or_else(|| primary_key_name(&self.name));
            out.push(Constraint {
                name,
                table: self.name.clone(),
                schema: self.schema.clone(),
                kind: ConstraintKind::PrimaryKey,
                definition: format!("PRIMARY KEY ({})", ident_list(&pk_columns)),
                columns: pk_columns,
            });
        }

        let fks = self.effective_foreign_keys();
        for fk in &fks {
            out.push(Constraint {
                name: fk.name.clone(),
                table: self.name.clone(),
                schema: self.schema.clone(),
                kind: ConstraintKind::ForeignKey,
                definition: fk.definition(),
                columns: fk.columns.clone(),
            });
        }

        for column in self.columns.iter().filter(|c| c.unique && !c.primary_key) {
            let declared = self
                .constraints
                .iter()
                .any(|c| c.kind == ConstraintKind::Unique && c.columns == [column.name.as_str()]);
            if !declared {
                out.push(Constraint {
                    name: unique_constraint_name(&self.name, &[&column.name]),
                    table: self.name.clone(),
                    schema: self.schema.clone(),
                    kind: ConstraintKind::Unique,
                    definition: format!("UNIQUE ({})", display_ident(&column.name)),
                    columns: vec![column.name.clone()],
                });
            }
        }

        for constraint in &self.constraints {
            match constraint.kind {
                ConstraintKind::PrimaryKey if has_pk => continue,
                ConstraintKind::ForeignKey if fks.iter().any(|fk| fk.name == constraint.name) => {
                    continue;
                }
                ConstraintKind::PrimaryKey | ConstraintKind::Unique
                    if !constraint.columns.is_empty() =>
                {
                    let keyword = if constraint.kind == ConstraintKind::Unique {
                        "UNIQUE"
                    } else {
                        "PRIMARY KEY"
                    };
                    let mut canonical = constraint.clone();
                    canonical.definition =
                        format!("{} ({})", keyword, ident_list(&constraint.columns));
                    out.push(canonical);
                }
                _ => out.push(constraint.clone()),
            }
        }

        out
    }

    /// Name of the unique constraint backing a column's `unique` flag.
    pub fn unique_constraint_for(&self, column: &str) -> String {
        self.constraints
            .iter()
            .find(|c| c.kind == ConstraintKind::Unique && c.columns == [column])
            .map(|c| c.name.clone())
            .unwrap_or_else(|| unique_constraint_name(&self.name, &[column]))
    }
}

/// Identity of a table across snapshots: `schema.name`, `public` when unset.
pub fn table_key(schema: Option<&str>, name: &str) -> String {
    format!("{}.{}", schema.unwrap_or("public"), name)
}

/// An output column of a view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewColumn {
    pub name: String,
    pub data_type: SqlType,
    #[serde(default = "default_true")]
    pub nullable: bool,
}

fn default_true() -> bool {
    true
}

/// A view or materialized view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct View {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub definition: String,
    #[serde(default)]
    pub columns: Vec<ViewColumn>,
    #[serde(default)]
    pub materialized: bool,
}

/// A complete database schema snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaModel {
    pub version: String,
    pub generated_at: DateTime<Utc>,
    pub tables: Vec<Table>,
    #[serde(default)]
    pub views: Vec<View>,
    #[serde(default)]
    pub functions: Vec<DatabaseFunction>,
    /// Every table's indexes, flattened
    #[serde(default)]
    pub indexes: Vec<Index>,
    /// Every table's constraints, flattened
    #[serde(default)]
    pub constraints: Vec<Constraint>,
}

impl SchemaModel {
    /// Build a snapshot, deriving the flattened index and constraint lists.
    pub fn new(tables: Vec<Table>, views: Vec<View>, functions: Vec<DatabaseFunction>) -> Self {
        let indexes = tables.iter().flat_map(|t| t.indexes.clone()).collect();
        let constraints = tables.iter().flat_map(|t| t.constraints.clone()).collect();
        Self {
            version: SNAPSHOT_VERSION.to_string(),
            generated_at: Utc::now(),
            tables,
            views,
            functions,
            indexes,
            constraints,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new(), Vec::new())
    }

    pub fn with_generated_at(mut self, at: DateTime<Utc>) -> Self {
        self.generated_at = at;
        self
    }

    /// Look a table up by name, in any schema.
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn table_by_key(&self, key: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.key() == key)
    }

    /// Check the model's structural invariants.
    ///
    /// Returns every violation found; an empty list means the model is sound.
    pub fn validate(&self) -> Vec<ModelViolation> {
        let mut violations = Vec::new();
        let mut index_names = HashSet::new();

        for table in &self.tables {
            let has_column = |name: &str| table.column(name).is_some();

            for column in table.primary_key_columns() {
                if !has_column(&column) {
                    violations.push(ModelViolation::UnknownColumn {
                        table: table.name.clone(),
                        column,
                        context: "primary key",
                    });
                }
            }

            for column in &table.columns {
                if let Some(reference) = &column.references
                    && !self.has_column(&reference.table, &reference.column)
                {
                    violations.push(ModelViolation::DanglingReference {
                        table: table.name.clone(),
                        column: column.name.clone(),
                        target: format!("{}.{}", reference.table, reference.column),
                    });
                }
            }

            for fk in &table.foreign_keys {
                for column in &fk.columns {
                    if !has_column(column) {
                        violations.push(ModelViolation::UnknownColumn {
                            table: table.name.clone(),
                            column: column.clone(),
                            context: "foreign key",
                        });
                    }
                }
                for column in &fk.references_columns {
                    if !self.has_column(&fk.references_table, column) {
                        violations.push(ModelViolation::DanglingReference {
                            table: table.name.clone(),
                            column: fk.columns.join(", "),
                            target: format!("{}.{}", fk.references_table, column),
                        });
                    }
                }
            }

            for index in &table.indexes {
                let qualified = table_key(index.schema.as_deref().or(table.schema.as_deref()), &index.name);
                if !index_names.insert(qualified) {
                    violations.push(ModelViolation::DuplicateIndexName(index.name.clone()));
                }
                for key in &index.columns {
                    if !key.is_expression() && !has_column(&key.name) {
                        violations.push(ModelViolation::UnknownColumn {
                            table: table.name.clone(),
                            column: key.name.clone(),
                            context: "index",
                        });
                    }
                }
            }
        }

        violations
    }

    fn has_column(&self, table: &str, column: &str) -> bool {
        self.table(table).is_some_and(|t| t.column(column).is_some())
    }
}

/// A broken invariant found by [`SchemaModel::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelViolation {
    UnknownColumn {
        table: String,
        column: String,
        context: &'static str,
    },
    DanglingReference {
        table: String,
        column: String,
        target: String,
    },
    DuplicateIndexName(String),
}

impl fmt::Display for ModelViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelViolation::UnknownColumn {
                table,
                column,
                context,
            } => write!(f, "{} on '{}' names unknown column '{}'", context, table, column),
            ModelViolation::DanglingReference {
                table,
                column,
                target,
            } => write!(f, "'{}.{}' references missing '{}'", table, column, target),
            ModelViolation::DuplicateIndexName(name) => {
                write!(f, "index name '{}' is used more than once", name)
            }
        }
    }
}

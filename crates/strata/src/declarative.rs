//! Declarative schema emission (Prisma schema language).
//!
//! Column types go through [`map_type`], which is total: a type with no
//! declarative counterpart becomes `String` with a comment, so rendering
//! never fails.

use std::collections::HashSet;
use strata_schema::{
    ColumnDefault, ConstraintKind, ForeignKey, ReferentialAction, SchemaModel, SqlType, Table,
    View,
};

/// A column type as the declarative schema spells it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclarativeType {
    /// Scalar name, e.g. `Int`, `String`, `DateTime`
    pub scalar: &'static str,
    /// Native type attribute without the `@db.` prefix, e.g. `VarChar(255)`
    pub native: Option<String>,
    /// Set when the engine type had no mapping and fell back to `String`
    pub unmapped: Option<String>,
}

impl DeclarativeType {
    fn plain(scalar: &'static str) -> Self {
        Self {
            scalar,
            native: None,
            unmapped: None,
        }
    }

    fn native(scalar: &'static str, native: impl Into<String>) -> Self {
        Self {
            scalar,
            native: Some(native.into()),
            unmapped: None,
        }
    }
}

/// Map an engine type to its declarative counterpart.
pub fn map_type(ty: &SqlType) -> DeclarativeType {
    let with_len = |name: &str| match ty.length {
        Some(n) => format!("{}({})", name, n),
        None => name.to_string(),
    };
    let with_precision = |name: &str| match ty.precision {
        Some(p) => format!("{}({})", name, p),
        None => name.to_string(),
    };

    match ty.name.as_str() {
        "smallint" => DeclarativeType::native("Int", "SmallInt"),
        "integer" => DeclarativeType::plain("Int"),
        "bigint" => DeclarativeType::plain("BigInt"),
        "numeric" => match (ty.precision, ty.scale) {
            (Some(p), Some(s)) => DeclarativeType::native("Decimal", format!("Decimal({}, {})", p, s)),
            _ => DeclarativeType::plain("Decimal"),
        },
        "real" => DeclarativeType::native("Float", "Real"),
        "double precision" => DeclarativeType::plain("Float"),
        "boolean" => DeclarativeType::plain("Boolean"),
        "varchar" => DeclarativeType::native("String", with_len("VarChar")),
        "char" => DeclarativeType::native("String", with_len("Char")),
        "text" => DeclarativeType::plain("String"),
        "citext" => DeclarativeType::native("String", "Citext"),
        "uuid" => DeclarativeType::native("String", "Uuid"),
        "json" => DeclarativeType::native("Json", "Json"),
        "jsonb" => DeclarativeType::plain("Json"),
        "bytea" => DeclarativeType::plain("Bytes"),
        "date" => DeclarativeType::native("DateTime", "Date"),
        "timestamp" => DeclarativeType::native("DateTime", with_precision("Timestamp")),
        "timestamptz" => DeclarativeType::native("DateTime", with_precision("Timestamptz")),
        "time" => DeclarativeType::native("DateTime", with_precision("Time")),
        "timetz" => DeclarativeType::native("DateTime", with_precision("Timetz")),
        "inet" => DeclarativeType::native("String", "Inet"),
        other => DeclarativeType {
            scalar: "String",
            native: None,
            unmapped: Some(other.to_string()),
        },
    }
}

/// Render a whole snapshot.
pub fn render_schema(model: &SchemaModel) -> String {
    let mut out = render_tables(&model.tables);
    for view in &model.views {
        out.push('\n');
        out.push_str(&render_view(view));
    }
    out
}

/// Render a set of tables. Relations to tables outside the set are left out.
pub fn render_tables(tables: &[Table]) -> String {
    let mut out = String::from(HEADER);
    for table in tables {
        out.push('\n');
        out.push_str(&render_model(table, tables));
    }
    out
}

const HEADER: &str = "// Generated by strata. Do not edit by hand.\n\ndatasource db {\n  provider = \"postgresql\"\n  url      = env(\"DATABASE_URL\")\n}\n";

fn render_model(table: &Table, all: &[Table]) -> String {
    let model_name = identifier(&table.name);
    let mut lines = Vec::new();
    let pk = table.primary_key_columns();
    let mut used: HashSet<String> = table.columns.iter().map(|c| identifier(&c.name)).collect();

    for column in &table.columns {
        let ty = map_type(&column.data_type);
        let mut field = format!("  {} {}", identifier(&column.name), ty.scalar);
        if column.data_type.array {
            field.push_str("[]");
        } else if column.nullable {
            field.push('?');
        }
        if pk.len() == 1 && pk[0] == column.name {
            field.push_str(" @id");
        }
        if let Some(default) = &column.default {
            field.push_str(&format!(" @default({})", default_attr(default)));
        } else if column.auto_increment {
            field.push_str(" @default(autoincrement())");
        }
        if column.unique && !column.primary_key {
            field.push_str(" @unique");
        }
        if identifier(&column.name) != column.name {
            field.push_str(&format!(" @map(\"{}\")", column.name));
        }
        if let Some(native) = &ty.native {
            field.push_str(&format!(" @db.{}", native));
        }
        if let Some(unmapped) = &ty.unmapped {
            field.push_str(&format!(" // unmapped type: {}", unmapped));
        }
        lines.push(field);
    }

    // Forward relations: one per foreign key whose target is in the set.
    for fk in table.effective_foreign_keys() {
        let Some(target) = find_table(all, &fk.references_table) else {
            continue;
        };
        let field_name = unique_name(relation_field_name(&fk, target), &mut used);
        let optional = fk
            .columns
            .iter()
            .any(|c| table.column(c).is_none_or(|col| col.nullable));
        let mut field = format!(
            "  {} {}{} @relation(\"{}\", fields: [{}], references: [{}]",
            field_name,
            identifier(&target.name),
            if optional { "?" } else { "" },
            fk.name,
            ident_list(&fk.columns),
            ident_list(&fk.references_columns)
        );
        if let Some(action) = action_name(fk.on_delete) {
            field.push_str(&format!(", onDelete: {}", action));
        }
        if let Some(action) = action_name(fk.on_update) {
            field.push_str(&format!(", onUpdate: {}", action));
        }
        field.push(')');
        lines.push(field);
    }

    // Back relations: every foreign key in the set that points at this table.
    for other in all {
        for fk in other.effective_foreign_keys() {
            if find_table(all, &fk.references_table).map(|t| t.key()) != Some(table.key()) {
                continue;
            }
            let one_to_one = fk.columns.len() == 1
                && other
                    .column(&fk.columns[0])
                    .is_some_and(|c| c.unique || c.primary_key);
            let base = if other.key() == table.key() {
                format!("{}_{}", identifier(&other.name), identifier(&fk.name))
            } else {
                identifier(&other.name)
            };
            let field_name = unique_name(base, &mut used);
            lines.push(format!(
                "  {} {}{} @relation(\"{}\")",
                field_name,
                identifier(&other.name),
                if one_to_one { "?" } else { "[]" },
                fk.name
            ));
        }
    }

    let mut block_attrs = Vec::new();
    if pk.len() > 1 {
        block_attrs.push(format!("  @@id([{}])", ident_list(&pk)));
    }
    for constraint in table.constraint_set() {
        if constraint.kind == ConstraintKind::Unique && constraint.columns.len() > 1 {
            block_attrs.push(format!(
                "  @@unique([{}], map: \"{}\")",
                ident_list(&constraint.columns),
                constraint.name
            ));
        }
    }
    for index in &table.indexes {
        if index.columns.iter().any(|c| c.is_expression()) {
            block_attrs.push(format!(
                "  // index {} uses expressions and is not representable",
                index.name
            ));
            continue;
        }
        let columns: Vec<String> = index.columns.iter().map(|c| c.name.clone()).collect();
        let kind = if index.unique { "unique" } else { "index" };
        block_attrs.push(format!(
            "  @@{}([{}], map: \"{}\")",
            kind,
            ident_list(&columns),
            index.name
        ));
    }
    if model_name != table.name {
        block_attrs.push(format!("  @@map(\"{}\")", table.name));
    }
    if let Some(schema) = table.schema.as_deref().filter(|s| *s != "public") {
        block_attrs.push(format!("  @@schema(\"{}\")", schema));
    }

    let mut out = String::new();
    if let Some(comment) = &table.comment {
        out.push_str(&format!("/// {}\n", comment));
    }
    out.push_str(&format!("model {} {{\n", model_name));
    for line in lines {
        out.push_str(&line);
        out.push('\n');
    }
    if !block_attrs.is_empty() {
        out.push('\n');
        for attr in block_attrs {
            out.push_str(&attr);
            out.push('\n');
        }
    }
    out.push_str("}\n");
    out
}

fn render_view(view: &View) -> String {
    let name = identifier(&view.name);
    let mut out = format!("view {} {{\n", name);
    for column in &view.columns {
        let ty = map_type(&column.data_type);
        let mut field = format!("  {} {}", identifier(&column.name), ty.scalar);
        if column.data_type.array {
            field.push_str("[]");
        } else if column.nullable {
            field.push('?');
        }
        if let Some(native) = &ty.native {
            field.push_str(&format!(" @db.{}", native));
        }
        if let Some(unmapped) = &ty.unmapped {
            field.push_str(&format!(" // unmapped type: {}", unmapped));
        }
        out.push_str(&field);
        out.push('\n');
    }
    if name != view.name {
        out.push_str(&format!("\n  @@map(\"{}\")\n", view.name));
    }
    out.push_str("}\n");
    out
}

fn default_attr(default: &ColumnDefault) -> String {
    match default {
        ColumnDefault::AutoIncrement => "autoincrement()".to_string(),
        ColumnDefault::String(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
        ColumnDefault::Bool(b) => b.to_string(),
        ColumnDefault::Integer(n) => n.to_string(),
        ColumnDefault::Float(f) => f.to_string(),
        ColumnDefault::Expression(expr) => {
            let lower = expr.trim().to_ascii_lowercase();
            if lower == "now()" || lower == "current_timestamp" {
                "now()".to_string()
            } else {
                format!("dbgenerated(\"{}\")", expr.replace('\\', "\\\\").replace('"', "\\\""))
            }
        }
    }
}

fn action_name(action: ReferentialAction) -> Option<&'static str> {
    match action {
        ReferentialAction::NoAction => None,
        ReferentialAction::Restrict => Some("Restrict"),
        ReferentialAction::Cascade => Some("Cascade"),
        ReferentialAction::SetNull => Some("SetNull"),
        ReferentialAction::SetDefault => Some("SetDefault"),
    }
}

fn find_table<'a>(all: &'a [Table], name: &str) -> Option<&'a Table> {
    all.iter().find(|t| t.name == name || t.key() == name)
}

/// `author_id` → `author`; composite keys fall back to the target name.
fn relation_field_name(fk: &ForeignKey, target: &Table) -> String {
    match fk.columns.as_slice() {
        [single] => match single.strip_suffix("_id") {
            Some(stem) if !stem.is_empty() => identifier(stem),
            _ => format!("{}_rel", identifier(single)),
        },
        _ => identifier(&target.name),
    }
}

fn unique_name(base: String, used: &mut HashSet<String>) -> String {
    let mut name = base.clone();
    let mut n = 2;
    while used.contains(&name) {
        name = format!("{}_{}", base, n);
        n += 1;
    }
    used.insert(name.clone());
    name
}

/// A valid declarative identifier for a database name.
fn identifier(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if !out.starts_with(|c: char| c.is_ascii_alphabetic()) {
        out.insert(0, 'x');
    }
    out
}

fn ident_list(names: &[String]) -> String {
    names
        .iter()
        .map(|n| identifier(n))
        .collect::<Vec<_>>()
        .join(", ")
}

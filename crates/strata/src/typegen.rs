//! Rust type definitions for an analyzed schema.
//!
//! Per table: a record struct, a `Create…` input without auto-increment or
//! defaulted columns, and an `Update…` input where every field is optional.
//! Views get a read-only record. Columns constrained to a fixed value set get
//! an enum.

use codegen::{Enum, Impl, Scope, Struct};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;
use strata_schema::{Column, ConstraintKind, SchemaModel, SqlType, Table};

const HEADER: &str = "// Generated by strata. Do not edit.";

static CHECK_COLUMN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)^\s*CHECK\s*[\(\s]*"?([a-z_][a-z0-9_]*)"?\)?(?:::[a-z ]+)?\s*(?:IN\s*\(|=\s*ANY\s*\()"#)
        .expect("valid regex")
});

static LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'((?:[^']|'')*)'").expect("valid regex"));

/// A column whose values are constrained to a fixed set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueSet {
    pub column: String,
    pub values: Vec<String>,
}

/// Extract `col IN ('a', 'b')` or `col = ANY (ARRAY['a', 'b'])` from a check
/// constraint definition.
pub fn value_set(definition: &str) -> Option<ValueSet> {
    let lowered = definition.to_ascii_lowercase();
    if lowered.contains(" and ") || lowered.contains(" or ") {
        return None;
    }
    let column = CHECK_COLUMN.captures(definition)?.get(1)?.as_str().to_string();
    let values: Vec<String> = LITERAL
        .captures_iter(definition)
        .filter_map(|c| c.get(1).map(|m| m.as_str().replace("''", "'")))
        .collect();
    if values.is_empty() {
        return None;
    }
    Some(ValueSet { column, values })
}

/// Render Rust definitions for every table and view in `model`.
///
/// Fails when two objects would produce the same type name.
pub fn generate_types(model: &SchemaModel) -> Result<String, String> {
    let mut scope = Scope::new();
    scope.raw(HEADER);

    let mut names = TypeNames::default();

    for table in &model.tables {
        let enums = table_enums(table);
        for column in &table.columns {
            if let Some(set) = enums.get(&column.name) {
                let name = names.claim(format!("{}{}", pascal_case(&table.name), pascal_case(&column.name)))?;
                push_value_enum(&mut scope, &name, &set.values);
            }
        }
        let mut aliases = HashMap::new();
        for column in &table.columns {
            if enums.contains_key(&column.name) || !looks_like_state(&column.name) {
                continue;
            }
            if column.data_type.is_textual() && !column.data_type.array {
                let name = names.claim(format!("{}{}", pascal_case(&table.name), pascal_case(&column.name)))?;
                scope.raw(format!("pub type {} = String;", name));
                aliases.insert(column.name.clone(), name);
            }
        }

        let field_type = |column: &Column| -> String {
            let enum_name = enums
                .get(&column.name)
                .map(|_| format!("{}{}", pascal_case(&table.name), pascal_case(&column.name)));
            let base = enum_name
                .or_else(|| aliases.get(&column.name).cloned())
                .unwrap_or_else(|| rust_type(&column.data_type));
            if column.nullable {
                format!("Option<{}>", base)
            } else {
                base
            }
        };

        let record = names.claim(pascal_case(&table.name))?;
        let mut st = record_struct(&record, &format!("A row of `{}`.", table.qualified_name()));
        for column in &table.columns {
            st.field(&format!("pub {}", field_name(&column.name)), field_type(column));
        }
        scope.push_struct(st);

        let create = names.claim(format!("Create{}", record))?;
        let mut st = record_struct(&create, &format!("Input for inserting into `{}`.", table.name));
        for column in table
            .columns
            .iter()
            .filter(|c| !c.is_auto_increment() && !c.has_default())
        {
            st.field(&format!("pub {}", field_name(&column.name)), field_type(column));
        }
        scope.push_struct(st);

        let update = names.claim(format!("Update{}", record))?;
        let mut st = record_struct(&update, &format!("Changes to a row of `{}`.", table.name));
        for column in table.columns.iter().filter(|c| !c.primary_key) {
            st.field(
                &format!("pub {}", field_name(&column.name)),
                format!("Option<{}>", field_type(column)),
            );
        }
        scope.push_struct(st);
    }

    for view in &model.views {
        let name = names.claim(pascal_case(&view.name))?;
        let mut st = record_struct(&name, &format!("A row of the view `{}`.", view.name));
        for column in &view.columns {
            let ty = rust_type(&column.data_type);
            let ty = if column.nullable { format!("Option<{}>", ty) } else { ty };
            st.field(&format!("pub {}", field_name(&column.name)), ty);
        }
        scope.push_struct(st);
    }

    Ok(scope.to_string())
}

#[derive(Default)]
struct TypeNames(HashSet<String>);

impl TypeNames {
    fn claim(&mut self, name: String) -> Result<String, String> {
        if self.0.insert(name.clone()) {
            Ok(name)
        } else {
            Err(format!("two schema objects both map to the type name `{}`", name))
        }
    }
}

fn record_struct(name: &str, doc: &str) -> Struct {
    let mut st = Struct::new(name);
    st.vis("pub");
    st.doc(doc);
    st.derive("Debug");
    st.derive("Clone");
    st.derive("PartialEq");
    st
}

fn table_enums(table: &Table) -> HashMap<String, ValueSet> {
    table
        .constraints
        .iter()
        .filter(|c| c.kind == ConstraintKind::Check)
        .filter_map(|c| value_set(&c.definition))
        .filter(|set| table.column(&set.column).is_some())
        .map(|set| (set.column.clone(), set))
        .collect()
}

fn push_value_enum(scope: &mut Scope, name: &str, values: &[String]) {
    let variants: Vec<(String, &String)> = values.iter().map(|v| (variant_name(v), v)).collect();

    let mut en = Enum::new(name);
    en.vis("pub");
    en.derive("Debug");
    en.derive("Clone");
    en.derive("Copy");
    en.derive("PartialEq");
    en.derive("Eq");
    for (variant, _) in &variants {
        en.new_variant(variant);
    }
    scope.push_enum(en);

    let mut imp = Impl::new(name);
    let as_str = imp
        .new_fn("as_str")
        .vis("pub")
        .arg_ref_self()
        .ret("&'static str")
        .line("match self {");
    for (variant, value) in &variants {
        as_str.line(format!("    {}::{} => {:?},", name, variant, value));
    }
    as_str.line("}");

    let parse = imp
        .new_fn("parse")
        .vis("pub")
        .arg("value", "&str")
        .ret("Option<Self>")
        .line("match value {");
    for (variant, value) in &variants {
        parse.line(format!("    {:?} => Some({}::{}),", value, name, variant));
    }
    parse.line("    _ => None,").line("}");
    scope.push_impl(imp);
}

fn looks_like_state(column: &str) -> bool {
    let column = column.to_ascii_lowercase();
    ["status", "type", "state", "kind"]
        .iter()
        .any(|s| column == *s || column.ends_with(&format!("_{}", s)))
}

/// The Rust type used for a column of `ty`.
pub fn rust_type(ty: &SqlType) -> String {
    if ty.array {
        return format!("Vec<{}>", rust_type(&ty.element()));
    }
    match ty.name.as_str() {
        "smallint" => "i16",
        "integer" => "i32",
        "bigint" => "i64",
        "real" => "f32",
        "double precision" => "f64",
        "numeric" => "rust_decimal::Decimal",
        "boolean" => "bool",
        "uuid" => "uuid::Uuid",
        "json" | "jsonb" => "serde_json::Value",
        "bytea" => "Vec<u8>",
        "date" => "chrono::NaiveDate",
        "time" => "chrono::NaiveTime",
        "timestamp" => "chrono::NaiveDateTime",
        "timestamptz" => "chrono::DateTime<chrono::Utc>",
        _ => "String",
    }
    .to_string()
}

fn pascal_case(name: &str) -> String {
    let mut out = String::new();
    for part in name.split(|c: char| !c.is_ascii_alphanumeric()).filter(|p| !p.is_empty()) {
        let mut chars = part.chars();
        if let Some(first) = chars.next() {
            out.push(first.to_ascii_uppercase());
            out.push_str(chars.as_str());
        }
    }
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, 'T');
    }
    out
}

fn variant_name(value: &str) -> String {
    let name = pascal_case(value);
    if name == "Self" { "Self_".to_string() } else { name }
}

const KEYWORDS: &[&str] = &[
    "as", "async", "await", "break", "const", "continue", "dyn", "else", "enum", "extern", "false",
    "fn", "for", "if", "impl", "in", "let", "loop", "match", "mod", "move", "mut", "pub", "ref",
    "return", "static", "struct", "trait", "true", "type", "unsafe", "use", "where", "while",
];

fn field_name(column: &str) -> String {
    let mut name: String = column
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    if KEYWORDS.contains(&name.as_str()) {
        format!("r#{}", name)
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_schema::{Column, Constraint, View, ViewColumn};

    fn orders() -> Table {
        let mut table = Table::new(
            "orders",
            vec![
                Column::new("id", SqlType::bigint()).primary_key().auto_increment(),
                Column::new("status", SqlType::text()).not_null(),
                Column::new("kind", SqlType::text()),
                Column::new("total", SqlType::numeric(10, 2)).not_null(),
                Column::new("placed_at", SqlType::timestamptz())
                    .not_null()
                    .default(strata_schema::ColumnDefault::Expression("now()".into())),
            ],
        );
        table.constraints.push(Constraint::new(
            "orders",
            "orders_status_check",
            ConstraintKind::Check,
            "CHECK ((status = ANY (ARRAY['pending'::text, 'shipped'::text])))",
        ));
        table
    }

    #[test]
    fn test_value_set_forms() {
        assert_eq!(
            value_set("CHECK ((status = ANY (ARRAY['pending'::text, 'shipped'::text])))"),
            Some(ValueSet {
                column: "status".into(),
                values: vec!["pending".into(), "shipped".into()],
            })
        );
        assert_eq!(
            value_set("CHECK (((kind)::text = ANY ((ARRAY['a'::character varying, 'b'::character varying])::text[])))")
                .map(|s| s.column),
            Some("kind".into())
        );
        assert_eq!(
            value_set("CHECK (role IN ('admin', 'o''brien'))").map(|s| s.values),
            Some(vec!["admin".into(), "o'brien".into()])
        );
        assert_eq!(value_set("CHECK ((price > 0))"), None);
        assert_eq!(value_set("CHECK ((a = ANY (ARRAY['x'])) AND (b > 0))"), None);
    }

    #[test]
    fn test_generated_types_for_table() {
        let model = SchemaModel::new(vec![orders()], vec![], vec![]);
        let code = generate_types(&model).unwrap();

        assert!(code.starts_with(HEADER));
        assert!(code.contains("pub enum OrdersStatus {"));
        assert!(code.contains("Pending,"));
        assert!(code.contains("OrdersStatus::Shipped => \"shipped\","));
        assert!(code.contains("pub type OrdersKind = String;"));
        assert!(code.contains("pub struct Orders {"));
        assert!(code.contains("pub status: OrdersStatus,"));
        assert!(code.contains("pub kind: Option<OrdersKind>,"));
        assert!(code.contains("pub total: rust_decimal::Decimal,"));

        let create = &code[code.find("pub struct CreateOrders").unwrap()..];
        let create = &create[..create.find('}').unwrap()];
        assert!(!create.contains("pub id"));
        assert!(!create.contains("placed_at"));
        assert!(create.contains("pub total"));

        assert!(code.contains("pub placed_at: Option<chrono::DateTime<chrono::Utc>>,"));
    }

    #[test]
    fn test_view_record_and_keyword_fields() {
        let view = View {
            name: "order_totals".into(),
            schema: None,
            definition: "SELECT 1".into(),
            columns: vec![
                ViewColumn {
                    name: "type".into(),
                    data_type: SqlType::text().array_of(),
                    nullable: false,
                },
                ViewColumn {
                    name: "sum".into(),
                    data_type: SqlType::bigint(),
                    nullable: true,
                },
            ],
            materialized: false,
        };
        let model = SchemaModel::new(vec![], vec![view], vec![]);
        let code = generate_types(&model).unwrap();
        assert!(code.contains("pub struct OrderTotals {"));
        assert!(code.contains("pub r#type: Vec<String>,"));
        assert!(code.contains("pub sum: Option<i64>,"));
    }

    #[test]
    fn test_colliding_names_fail() {
        let model = SchemaModel::new(
            vec![
                Table::new("user_roles", vec![Column::new("id", SqlType::integer())]),
                Table::new("user__roles", vec![Column::new("id", SqlType::integer())]),
            ],
            vec![],
            vec![],
        );
        let err = generate_types(&model).unwrap_err();
        assert!(err.contains("UserRoles"), "{}", err);
    }
}

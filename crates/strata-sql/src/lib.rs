//! SQL quoting and deterministic object naming.
//!
//! Everything that renders DDL goes through these helpers so that identifiers
//! are always quoted the same way and generated constraint/index names match
//! what Postgres would pick on its own.

/// Postgres truncates identifiers longer than this many bytes.
pub const PG_IDENT_MAX: usize = 63;

/// A PostgreSQL string literal wrapper.
///
/// Display writes the value escaped and quoted with single quotes.
///
/// # Example
/// ```
/// use strata_sql::Lit;
/// assert_eq!(format!("{}", Lit("foo")), "'foo'");
/// assert_eq!(format!("{}", Lit("it's")), "'it''s'");
/// ```
pub struct Lit<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> std::fmt::Display for Lit<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "'")?;
        for c in self.0.as_ref().chars() {
            if c == '\'' {
                write!(f, "''")?;
            } else {
                write!(f, "{}", c)?;
            }
        }
        write!(f, "'")
    }
}

/// A PostgreSQL identifier wrapper.
///
/// Display writes the value escaped and quoted with double quotes.
///
/// # Example
/// ```
/// use strata_sql::Ident;
/// assert_eq!(format!("{}", Ident("user")), "\"user\"");
/// assert_eq!(format!("{}", Ident("bla\"h")), "\"bla\"\"h\"");
/// ```
pub struct Ident<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> std::fmt::Display for Ident<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"")?;
        for c in self.0.as_ref().chars() {
            if c == '"' {
                write!(f, "\"\"")?;
            } else {
                write!(f, "{}", c)?;
            }
        }
        write!(f, "\"")
    }
}

/// Escape a string literal for SQL.
pub fn escape_string(s: &str) -> String {
    format!("{}", Lit(s))
}

/// Quote a PostgreSQL identifier.
///
/// Always quotes identifiers to avoid issues with reserved keywords like
/// `user`, `order`, `table`, `group`, etc. Doubles any embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("{}", Ident(name))
}

/// Quote an identifier only where Postgres itself would.
///
/// This mirrors how the catalog prints identifiers inside constraint and
/// index definitions, so definitions rendered here compare equal to what
/// `pg_get_constraintdef()` returns.
///
/// ```
/// assert_eq!(strata_sql::display_ident("user_id"), "user_id");
/// assert_eq!(strata_sql::display_ident("userId"), "\"userId\"");
/// assert_eq!(strata_sql::display_ident("order"), "\"order\"");
/// ```
pub fn display_ident(name: &str) -> String {
    let plain = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '$');
    if plain && !RESERVED_WORDS.contains(&name) {
        name.to_string()
    } else {
        quote_ident(name)
    }
}

/// Reserved keywords that must always be quoted as identifiers.
const RESERVED_WORDS: &[&str] = &[
    "all", "analyse", "analyze", "and", "any", "array", "as", "asc", "asymmetric", "both",
    "case", "cast", "check", "collate", "column", "constraint", "create", "current_catalog",
    "current_date", "current_role", "current_time", "current_timestamp", "current_user",
    "default", "deferrable", "desc", "distinct", "do", "else", "end", "except", "false",
    "fetch", "for", "foreign", "from", "grant", "group", "having", "in", "initially",
    "intersect", "into", "lateral", "leading", "limit", "localtime", "localtimestamp", "not",
    "null", "offset", "on", "only", "or", "order", "placing", "primary", "references",
    "returning", "select", "session_user", "some", "symmetric", "table", "then", "to",
    "trailing", "true", "union", "unique", "user", "using", "variadic", "when", "where",
    "window", "with",
];

/// Quote a possibly schema-qualified relation name.
///
/// The `public` schema is left implicit so generated DDL stays readable.
///
/// ```
/// assert_eq!(strata_sql::qualified_name(None, "users"), "\"users\"");
/// assert_eq!(strata_sql::qualified_name(Some("public"), "users"), "\"users\"");
/// assert_eq!(strata_sql::qualified_name(Some("billing"), "invoices"), "\"billing\".\"invoices\"");
/// ```
pub fn qualified_name(schema: Option<&str>, name: &str) -> String {
    match schema {
        Some(schema) if schema != "public" => format!("{}.{}", Ident(schema), Ident(name)),
        _ => quote_ident(name),
    }
}

/// Generate a standard index name for a table and columns.
///
/// Uses the convention `idx_{table}_{columns}` where columns are joined by underscore.
///
/// # Examples
///
/// ```
/// assert_eq!(strata_sql::index_name("user", &["email"]), "idx_user_email");
/// assert_eq!(strata_sql::index_name("post", &["author_id", "created_at"]), "idx_post_author_id_created_at");
/// ```
pub fn index_name(table: &str, columns: &[impl AsRef<str>]) -> String {
    truncate_ident(format!("idx_{}_{}", table, join(columns)))
}

/// Generate a standard unique index name for a table and columns.
///
/// ```
/// assert_eq!(strata_sql::unique_index_name("category", &["shop_id", "handle"]), "uq_category_shop_id_handle");
/// ```
pub fn unique_index_name(table: &str, columns: &[impl AsRef<str>]) -> String {
    truncate_ident(format!("uq_{}_{}", table, join(columns)))
}

/// The name Postgres gives a table's primary key constraint.
pub fn primary_key_name(table: &str) -> String {
    truncate_ident(format!("{}_pkey", table))
}

/// The name Postgres gives a foreign key constraint declared without a name.
///
/// ```
/// assert_eq!(strata_sql::foreign_key_name("orders", &["user_id"]), "orders_user_id_fkey");
/// ```
pub fn foreign_key_name(table: &str, columns: &[impl AsRef<str>]) -> String {
    truncate_ident(format!("{}_{}_fkey", table, join(columns)))
}

/// The name Postgres gives a unique constraint declared without a name.
///
/// ```
/// assert_eq!(strata_sql::unique_constraint_name("users", &["email"]), "users_email_key");
/// ```
pub fn unique_constraint_name(table: &str, columns: &[impl AsRef<str>]) -> String {
    truncate_ident(format!("{}_{}_key", table, join(columns)))
}

/// Generate a deterministic CHECK constraint name for a table and expression.
///
/// Constraint names must be unique within a schema, so we include the table name
/// and a stable hash of the expression (after whitespace normalization).
pub fn check_constraint_name(table: &str, expr: &str) -> String {
    let normalized = normalize_sql_expr(expr);
    let hex = blake3::hash(normalized.as_bytes()).to_hex().to_string();
    let suffix = &hex[..16];

    let prefix_overhead = "ck__".len(); // "ck_" + "_" between table and suffix
    let max_table_len = PG_IDENT_MAX.saturating_sub(prefix_overhead + suffix.len());

    format!("ck_{}_{}", floor_char_boundary(table, max_table_len), suffix)
}

fn join(columns: &[impl AsRef<str>]) -> String {
    let cols: Vec<&str> = columns.iter().map(|c| c.as_ref()).collect();
    cols.join("_")
}

fn truncate_ident(name: String) -> String {
    if name.len() <= PG_IDENT_MAX {
        return name;
    }
    floor_char_boundary(&name, PG_IDENT_MAX).to_string()
}

fn floor_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    // Names are expected to be ASCII snake_case; still, avoid splitting UTF-8.
    let mut len = max;
    while len > 0 && !s.is_char_boundary(len) {
        len -= 1;
    }
    &s[..len]
}

/// Collapse whitespace outside of quoted sections.
///
/// Used to compare constraint definitions and index predicates that the
/// catalog may pretty-print differently from how they were declared.
///
/// ```
/// assert_eq!(
///     strata_sql::normalize_sql_expr("  price  >\n 0 AND note <> 'a  b' "),
///     "price > 0 AND note <> 'a  b'"
/// );
/// ```
pub fn normalize_sql_expr(expr: &str) -> String {
    let mut out = String::with_capacity(expr.len());
    let mut pending_space = false;

    let mut in_single_quote = false;
    let mut in_double_quote = false;

    let mut chars = expr.chars().peekable();
    while let Some(ch) = chars.next() {
        if in_single_quote {
            out.push(ch);
            if ch == '\'' {
                // SQL escapes single quotes by doubling them: ''
                if let Some(escaped) = chars.next_if_eq(&'\'') {
                    out.push(escaped);
                } else {
                    in_single_quote = false;
                }
            }
            continue;
        }

        if in_double_quote {
            out.push(ch);
            if ch == '"' {
                if let Some(escaped) = chars.next_if_eq(&'"') {
                    out.push(escaped);
                } else {
                    in_double_quote = false;
                }
            }
            continue;
        }

        match ch {
            c if c.is_whitespace() => {
                pending_space = true;
            }
            c => {
                if pending_space && !out.is_empty() {
                    out.push(' ');
                }
                pending_space = false;
                match c {
                    '\'' => in_single_quote = true,
                    '"' => in_double_quote = true,
                    _ => {}
                }
                out.push(c);
            }
        }
    }

    out
}

//! Column default values.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A column default, as far as it can be understood without parsing SQL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ColumnDefault {
    /// Sequence or identity backed (`serial`, `GENERATED ... AS IDENTITY`).
    AutoIncrement,
    /// A string literal, stored unquoted.
    String(String),
    Bool(bool),
    Integer(i64),
    Float(f64),
    /// Anything else, kept verbatim (`now()`, `gen_random_uuid()`, ...).
    Expression(String),
}

impl ColumnDefault {
    /// Parse a default expression as the catalog reports it.
    ///
    /// ```
    /// use strata_schema::ColumnDefault;
    /// assert_eq!(ColumnDefault::parse("nextval('users_id_seq'::regclass)"), ColumnDefault::AutoIncrement);
    /// assert_eq!(ColumnDefault::parse("'active'::character varying"), ColumnDefault::String("active".into()));
    /// assert_eq!(ColumnDefault::parse("(-1)"), ColumnDefault::Integer(-1));
    /// assert_eq!(ColumnDefault::parse("now()"), ColumnDefault::Expression("now()".into()));
    /// ```
    pub fn parse(raw: &str) -> ColumnDefault {
        let expr = raw.trim();
        if expr.to_ascii_lowercase().starts_with("nextval(") {
            return ColumnDefault::AutoIncrement;
        }

        let inner = strip_outer_parens(expr);

        if let Some((literal, cast)) = parse_string_literal(inner) {
            // Negative numbers come back as `'-1'::integer`.
            if is_numeric_cast(&cast) && looks_numeric(&literal) {
                if let Ok(n) = literal.parse::<i64>() {
                    return ColumnDefault::Integer(n);
                }
                if let Ok(f) = literal.parse::<f64>() {
                    return ColumnDefault::Float(f);
                }
            }
            return ColumnDefault::String(literal);
        }

        let uncast = strip_cast(inner);
        match uncast.to_ascii_lowercase().as_str() {
            "true" => return ColumnDefault::Bool(true),
            "false" => return ColumnDefault::Bool(false),
            _ => {}
        }

        let numeric = strip_outer_parens(uncast);
        if looks_numeric(numeric) {
            if let Ok(n) = numeric.parse::<i64>() {
                return ColumnDefault::Integer(n);
            }
            if let Ok(f) = numeric.parse::<f64>() {
                return ColumnDefault::Float(f);
            }
        }

        ColumnDefault::Expression(expr.to_string())
    }

    /// Render as a SQL expression suitable for `DEFAULT ...`.
    ///
    /// Returns `None` for [`ColumnDefault::AutoIncrement`], which is expressed
    /// through the column definition instead.
    pub fn to_sql(&self) -> Option<String> {
        match self {
            ColumnDefault::AutoIncrement => None,
            ColumnDefault::String(s) => Some(strata_sql::escape_string(s)),
            ColumnDefault::Bool(true) => Some("TRUE".to_string()),
            ColumnDefault::Bool(false) => Some("FALSE".to_string()),
            ColumnDefault::Integer(n) => Some(n.to_string()),
            ColumnDefault::Float(f) => Some(f.to_string()),
            ColumnDefault::Expression(e) => Some(e.clone()),
        }
    }
}

impl fmt::Display for ColumnDefault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_sql() {
            Some(sql) => write!(f, "{}", sql),
            None => write!(f, "auto_increment"),
        }
    }
}

fn strip_outer_parens(mut s: &str) -> &str {
    while s.starts_with('(') && s.ends_with(')') && parens_wrap_whole(s) {
        s = s[1..s.len() - 1].trim();
    }
    s
}

/// True when the first `(` closes at the very last character.
fn parens_wrap_whole(s: &str) -> bool {
    let mut depth = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return i == s.len() - 1;
                }
            }
            _ => {}
        }
    }
    false
}

/// `'it''s'::text` → (`it's`, `text`); `'a' || 'b'` is not a plain literal.
fn parse_string_literal(s: &str) -> Option<(String, String)> {
    let rest = s.strip_prefix('\'')?;
    let mut out = String::new();
    let mut chars = rest.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '\'' {
            if chars.next_if(|(_, next)| *next == '\'').is_some() {
                out.push('\'');
                continue;
            }
            let tail = rest[i + 1..].trim();
            if tail.is_empty() {
                return Some((out, String::new()));
            }
            let cast = tail.strip_prefix("::")?.trim();
            let is_type_name = cast.chars().all(|c| {
                c.is_ascii_alphanumeric() || matches!(c, '_' | ' ' | '(' | ')' | ',' | '[' | ']' | ':' | '.')
            });
            return is_type_name.then(|| (out, cast.to_ascii_lowercase()));
        }
        out.push(c);
    }
    None
}

fn is_numeric_cast(cast: &str) -> bool {
    matches!(
        cast,
        "integer" | "bigint" | "smallint" | "numeric" | "real" | "double precision"
    )
}

fn strip_cast(s: &str) -> &str {
    match s.find("::") {
        Some(idx) => s[..idx].trim(),
        None => s,
    }
}

fn looks_numeric(s: &str) -> bool {
    !s.is_empty()
        && s.chars().any(|c| c.is_ascii_digit())
        && s
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'))
}

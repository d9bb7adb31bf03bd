//! Normalized column types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A normalized column type.
///
/// `name` is the canonical lowercase spelling (`varchar`, `timestamptz`,
/// `double precision`, ...). Unknown catalog types are kept verbatim so
/// user-defined types survive a round trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SqlType {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<u32>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub array: bool,
}

impl SqlType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            length: None,
            precision: None,
            scale: None,
            array: false,
        }
    }

    pub fn smallint() -> Self {
        Self::new("smallint")
    }

    pub fn integer() -> Self {
        Self::new("integer")
    }

    pub fn bigint() -> Self {
        Self::new("bigint")
    }

    pub fn text() -> Self {
        Self::new("text")
    }

    pub fn boolean() -> Self {
        Self::new("boolean")
    }

    pub fn date() -> Self {
        Self::new("date")
    }

    pub fn timestamp() -> Self {
        Self::new("timestamp")
    }

    pub fn timestamptz() -> Self {
        Self::new("timestamptz")
    }

    pub fn varchar(length: u32) -> Self {
        Self {
            length: Some(length),
            ..Self::new("varchar")
        }
    }

    pub fn numeric(precision: u32, scale: u32) -> Self {
        Self {
            precision: Some(precision),
            scale: Some(scale),
            ..Self::new("numeric")
        }
    }

    /// The array type with this type as its element.
    pub fn array_of(mut self) -> Self {
        self.array = true;
        self
    }

    /// The element type, for array types.
    pub fn element(&self) -> SqlType {
        SqlType {
            array: false,
            ..self.clone()
        }
    }

    /// Normalize a raw catalog type string.
    ///
    /// Accepts what `format_type()` and `information_schema` produce as well
    /// as the short aliases people write by hand:
    ///
    /// ```
    /// use strata_schema::SqlType;
    /// assert_eq!(SqlType::parse("character varying(255)"), SqlType::varchar(255));
    /// assert_eq!(SqlType::parse("NUMERIC(10, 2)"), SqlType::numeric(10, 2));
    /// assert_eq!(SqlType::parse("timestamp with time zone").to_string(), "timestamptz");
    /// assert_eq!(SqlType::parse("_int4").to_string(), "integer[]");
    /// ```
    pub fn parse(raw: &str) -> SqlType {
        let mut base = raw.trim();
        let mut array = false;

        while let Some(stripped) = base.strip_suffix("[]") {
            base = stripped.trim_end();
            array = true;
        }
        // Element types of array columns show up as `_int4` in udt_name.
        if let Some(stripped) = base.strip_prefix('_')
            && !stripped.is_empty()
        {
            base = stripped;
            array = true;
        }

        let lower = base.to_ascii_lowercase();
        let (name, args) = split_modifiers(&lower);
        let canonical = canonical_name(&name);

        let args: Vec<u32> = args
            .iter()
            .filter_map(|arg| arg.trim().parse::<u32>().ok())
            .collect();

        let mut ty = SqlType::new(canonical);
        ty.array = array;
        match ty.name.as_str() {
            "varchar" | "char" | "bit" | "varbit" => ty.length = args.first().copied(),
            "numeric" => {
                ty.precision = args.first().copied();
                ty.scale = args.get(1).copied();
            }
            "timestamp" | "timestamptz" | "time" | "timetz" | "interval" => {
                ty.precision = args.first().copied();
            }
            _ => {}
        }
        ty
    }

    pub fn is_textual(&self) -> bool {
        matches!(self.name.as_str(), "text" | "varchar" | "char" | "citext")
    }

    pub fn is_integer(&self) -> bool {
        matches!(self.name.as_str(), "smallint" | "integer" | "bigint")
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        match (self.length, self.precision, self.scale) {
            (Some(length), _, _) => write!(f, "({})", length)?,
            (None, Some(precision), Some(scale)) => write!(f, "({},{})", precision, scale)?,
            (None, Some(precision), None) => write!(f, "({})", precision)?,
            _ => {}
        }
        if self.array {
            write!(f, "[]")?;
        }
        Ok(())
    }
}

/// Pull `(a,b)` out of a type name, wherever it appears.
///
/// `timestamp(3) with time zone` puts the modifier in the middle.
fn split_modifiers(s: &str) -> (String, Vec<String>) {
    let Some(open) = s.find('(') else {
        return (collapse_whitespace(s), Vec::new());
    };
    let Some(close) = s[open..].find(')').map(|i| open + i) else {
        return (collapse_whitespace(s), Vec::new());
    };
    let args = s[open + 1..close]
        .split(',')
        .map(|a| a.trim().to_string())
        .collect();
    let name = format!("{} {}", &s[..open], &s[close + 1..]);
    (collapse_whitespace(&name), args)
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn canonical_name(name: &str) -> &str {
    match name {
        "character varying" | "varchar" => "varchar",
        "character" | "char" | "bpchar" => "char",
        "integer" | "int" | "int4" | "serial" | "serial4" => "integer",
        "bigint" | "int8" | "bigserial" | "serial8" => "bigint",
        "smallint" | "int2" | "smallserial" | "serial2" => "smallint",
        "numeric" | "decimal" => "numeric",
        "real" | "float4" => "real",
        "double precision" | "float8" | "float" => "double precision",
        "boolean" | "bool" => "boolean",
        "timestamp" | "timestamp without time zone" => "timestamp",
        "timestamptz" | "timestamp with time zone" => "timestamptz",
        "time" | "time without time zone" => "time",
        "timetz" | "time with time zone" => "timetz",
        "bit varying" | "varbit" => "varbit",
        other => other,
    }
}

//! Stored functions and their argument lists.

use serde::{Deserialize, Serialize};

/// A stored function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseFunction {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub arguments: Vec<FunctionArgument>,
    pub return_type: String,
    pub language: String,
    pub definition: String,
}

/// How an argument is passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgumentMode {
    #[default]
    In,
    Out,
    InOut,
    Variadic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionArgument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub data_type: String,
    #[serde(default)]
    pub mode: ArgumentMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// Type names that span several words; their first word is never an argument name.
const MULTIWORD_TYPE_HEADS: &[&str] = &[
    "double",
    "character",
    "timestamp",
    "time",
    "bit",
    "interval",
];

impl FunctionArgument {
    /// Parse the output of `pg_get_function_arguments()`.
    ///
    /// ```
    /// use strata_schema::{ArgumentMode, FunctionArgument};
    /// let args = FunctionArgument::parse_list("user_id integer, OUT total numeric(10,2), label text DEFAULT 'x, y'::text");
    /// assert_eq!(args.len(), 3);
    /// assert_eq!(args[1].mode, ArgumentMode::Out);
    /// assert_eq!(args[1].data_type, "numeric(10,2)");
    /// assert_eq!(args[2].default.as_deref(), Some("'x, y'::text"));
    /// ```
    pub fn parse_list(list: &str) -> Vec<FunctionArgument> {
        split_top_level(list, ',')
            .into_iter()
            .map(|part| part.trim().to_string())
            .filter(|part| !part.is_empty())
            .map(|part| Self::parse(&part))
            .collect()
    }

    fn parse(spec: &str) -> FunctionArgument {
        let (spec, default) = split_default(spec);

        let mut words: Vec<&str> = spec.split_whitespace().collect();
        let mode = match words.first().map(|w| w.to_ascii_uppercase()) {
            Some(w) if w == "IN" => Some(ArgumentMode::In),
            Some(w) if w == "OUT" => Some(ArgumentMode::Out),
            Some(w) if w == "INOUT" => Some(ArgumentMode::InOut),
            Some(w) if w == "VARIADIC" => Some(ArgumentMode::Variadic),
            _ => None,
        };
        if mode.is_some() && words.len() > 1 {
            words.remove(0);
        }

        let has_name = words.len() >= 2
            && !MULTIWORD_TYPE_HEADS.contains(&words[0].to_ascii_lowercase().as_str());
        let (name, type_words) = if has_name {
            (Some(words[0].trim_matches('"').to_string()), &words[1..])
        } else {
            (None, &words[..])
        };

        FunctionArgument {
            name,
            data_type: type_words.join(" "),
            mode: mode.unwrap_or_default(),
            default,
        }
    }
}

fn split_default(spec: &str) -> (&str, Option<String>) {
    let upper = spec.to_ascii_uppercase();
    for keyword in [" DEFAULT ", " = "] {
        if let Some(idx) = find_top_level(&upper, keyword) {
            let default = spec[idx + keyword.len()..].trim().to_string();
            return (spec[..idx].trim(), Some(default));
        }
    }
    (spec, None)
}

fn find_top_level(s: &str, needle: &str) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_quote = false;
    for (i, c) in s.char_indices() {
        match c {
            '\'' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => depth -= 1,
            _ if !in_quote && depth == 0 && s[i..].starts_with(needle) => return Some(i),
            _ => {}
        }
    }
    None
}

/// Split on `sep` outside parentheses and single quotes.
pub(crate) fn split_top_level(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_quote = false;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '\'' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => depth -= 1,
            c if c == sep && !in_quote && depth == 0 => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

//! Migration files on disk.
//!
//! A migration is one `.sql` file. Its version and name come from the file
//! name (`001_create_users.sql`, `V1_2__add_index.sql`,
//! `20240105120000_backfill.sql`) and may be overridden by `-- @key: value`
//! directive lines. A `-- @rollback` line splits forward SQL from rollback
//! SQL; a companion `<stem>.down.sql` can supply rollback SQL instead.

use super::{Metadata, MetadataValue, Migration, MigrationKind, Version, checksum};
use crate::{Error, Result};
use camino::Utf8Path;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static DIRECTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^--\s*@([A-Za-z_][A-Za-z0-9_]*)\s*:\s*(.*?)\s*$").expect("valid regex")
});

const DOWN_SUFFIX: &str = ".down.sql";

fn is_rollback_marker(line: &str) -> bool {
    let line = line.trim();
    line.strip_prefix("--")
        .map(|rest| rest.trim().eq_ignore_ascii_case("@rollback"))
        .unwrap_or(false)
}

/// Version and name encoded in a file stem.
fn parse_stem(stem: &str) -> Option<(String, String)> {
    if let Some(rest) = stem.strip_prefix(['V', 'v'])
        && let Some((version, name)) = rest.split_once("__")
        && !version.is_empty()
        && version.chars().all(|c| c.is_ascii_digit() || c == '_' || c == '.')
    {
        return Some((version.replace('_', "."), name.to_string()));
    }

    let digits = stem.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let (version, rest) = stem.split_at(digits);
    let name = rest.trim_start_matches(['_', '-']);
    let name = if name.is_empty() { stem } else { name };
    Some((version.to_string(), name.to_string()))
}

/// Parse the text of a migration file named `file_name`.
///
/// `down` is the content of a companion `.down.sql` file, if any.
pub fn parse_migration(
    file_name: &str,
    text: &str,
    down: Option<&str>,
) -> std::result::Result<Migration, String> {
    let stem = file_name.strip_suffix(".sql").unwrap_or(file_name);

    let (forward, rollback_section) = match text
        .split('\n')
        .scan(0usize, |offset, line| {
            let start = *offset;
            *offset += line.len() + 1;
            Some((start, line))
        })
        .find(|(_, line)| is_rollback_marker(line))
    {
        Some((start, line)) => {
            let after = (start + line.len() + 1).min(text.len());
            (&text[..start], Some(text[after..].trim()))
        }
        None => (text, None),
    };
    let forward = forward.trim_end();

    let rollback_sql = match (rollback_section.filter(|s| !s.is_empty()), down.map(str::trim)) {
        (Some(_), Some(d)) if !d.is_empty() => {
            return Err(
                "rollback SQL is given both in a -- @rollback section and in a .down.sql file"
                    .to_string(),
            );
        }
        (Some(section), _) => Some(section.to_string()),
        (None, Some(d)) if !d.is_empty() => Some(d.to_string()),
        _ => None,
    };

    let mut directives: HashMap<String, String> = HashMap::new();
    let mut metadata = Metadata::new();
    for line in forward.lines() {
        let Some(caps) = DIRECTIVE.captures(line.trim()) else {
            continue;
        };
        let key = caps[1].to_ascii_lowercase();
        let value = caps[2].to_string();
        match key.as_str() {
            "id" | "version" | "name" | "description" | "type" | "transactional" | "created_at" => {
                directives.insert(key, value);
            }
            _ => {
                metadata.insert(key, MetadataValue::String(value));
            }
        }
    }

    let from_stem = parse_stem(stem);
    let version = match (directives.remove("version"), &from_stem) {
        (Some(v), _) if !v.is_empty() => v,
        (_, Some((v, _))) => v.clone(),
        _ => {
            return Err(
                "no version: name the file NNN_name.sql or V<n>__name.sql, or add -- @version:"
                    .to_string(),
            );
        }
    };
    let name = directives
        .remove("name")
        .filter(|n| !n.is_empty())
        .or_else(|| from_stem.map(|(_, n)| n))
        .unwrap_or_else(|| stem.to_string());
    let id = directives
        .remove("id")
        .filter(|i| !i.is_empty())
        .unwrap_or_else(|| stem.to_string());

    let kind = match directives.remove("type") {
        Some(t) => MigrationKind::parse(&t).ok_or_else(|| format!("unknown migration type '{}'", t))?,
        None => MigrationKind::default(),
    };
    let transactional = match directives.remove("transactional").as_deref() {
        None => true,
        Some(v) if v.eq_ignore_ascii_case("true") => true,
        Some(v) if v.eq_ignore_ascii_case("false") => false,
        Some(v) => return Err(format!("-- @transactional must be true or false, not '{}'", v)),
    };
    let created_at = match directives.remove("created_at") {
        Some(raw) => DateTime::parse_from_rfc3339(&raw)
            .map_err(|e| format!("bad -- @created_at '{}': {}", raw, e))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };

    if forward
        .lines()
        .all(|l| l.trim().is_empty() || l.trim_start().starts_with("--"))
    {
        return Err("no forward SQL".to_string());
    }

    Ok(Migration {
        id,
        version: Version::new(version),
        name,
        description: directives.remove("description").filter(|d| !d.is_empty()),
        kind,
        checksum: checksum(forward),
        sql: forward.to_string(),
        rollback_sql,
        created_at,
        transactional,
        metadata,
        ..Migration::new("", "", "", "")
    })
}

/// Read every migration under `dir`, sorted by version.
///
/// Duplicate ids or versions are an error.
pub fn discover(dir: &Utf8Path) -> Result<Vec<Migration>> {
    let discovery = |path: &Utf8Path, message: String| Error::Discovery {
        path: path.to_owned(),
        message,
    };

    let entries = dir
        .read_dir_utf8()
        .map_err(|e| discovery(dir, e.to_string()))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| discovery(dir, e.to_string()))?;
        let path = entry.path().to_owned();
        if path.is_file() && path.as_str().ends_with(".sql") && !path.as_str().ends_with(DOWN_SUFFIX) {
            files.push(path);
        }
    }
    files.sort();

    let mut migrations = Vec::with_capacity(files.len());
    for path in files {
        let file_name = path.file_name().unwrap_or(path.as_str());
        let text = std::fs::read_to_string(&path).map_err(|e| discovery(&path, e.to_string()))?;

        let stem = file_name.strip_suffix(".sql").unwrap_or(file_name);
        let down_path = path.with_file_name(format!("{}{}", stem, DOWN_SUFFIX));
        let down = if down_path.is_file() {
            Some(std::fs::read_to_string(&down_path).map_err(|e| discovery(&down_path, e.to_string()))?)
        } else {
            None
        };

        let mut migration =
            parse_migration(file_name, &text, down.as_deref()).map_err(|m| discovery(&path, m))?;
        migration.path = Some(path.clone());
        tracing::debug!(id = %migration.id, version = %migration.version, %path, "discovered migration");
        migrations.push(migration);
    }

    migrations.sort_by(|a, b| a.version.cmp(&b.version));

    let mut ids: HashMap<&str, &Migration> = HashMap::new();
    let mut versions: HashMap<&Version, &Migration> = HashMap::new();
    for migration in &migrations {
        let path = migration.path.as_deref().unwrap_or(dir);
        if let Some(other) = ids.insert(&migration.id, migration) {
            return Err(discovery(
                path,
                format!("id '{}' is also used by {}", migration.id, describe(other)),
            ));
        }
        if let Some(other) = versions.insert(&migration.version, migration) {
            return Err(discovery(
                path,
                format!("version {} is also used by {}", migration.version, describe(other)),
            ));
        }
    }

    Ok(migrations)
}

fn describe(migration: &Migration) -> String {
    match &migration.path {
        Some(path) => path.to_string(),
        None => migration.id.clone(),
    }
}

/// Split a script into statements at top-level semicolons.
///
/// Quoted strings, quoted identifiers, dollar-quoted bodies and comments are
/// never split. Statements consisting only of comments are dropped.
pub fn split_statements(sql: &str) -> Vec<String> {
    let bytes = sql.as_bytes();
    let mut statements = Vec::new();
    let mut start = 0;
    let mut has_code = false;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' | b'"' => {
                let quote = bytes[i];
                has_code = true;
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == quote {
                        if bytes.get(i + 1) == Some(&quote) {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
                i += 1;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let mut depth = 0usize;
                while i < bytes.len() {
                    if bytes[i] == b'/' && bytes.get(i + 1) == Some(&b'*') {
                        depth += 1;
                        i += 2;
                    } else if bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/') {
                        depth -= 1;
                        i += 2;
                        if depth == 0 {
                            break;
                        }
                    } else {
                        i += 1;
                    }
                }
            }
            b'$' => {
                has_code = true;
                match dollar_tag(&sql[i..]) {
                    Some(tag) => {
                        let body = i + tag.len();
                        i = match sql[body..].find(tag) {
                            Some(end) => body + end + tag.len(),
                            None => bytes.len(),
                        };
                    }
                    None => i += 1,
                }
            }
            b';' => {
                if has_code {
                    statements.push(sql[start..=i].trim().to_string());
                }
                i += 1;
                start = i;
                has_code = false;
            }
            c => {
                if !c.is_ascii_whitespace() {
                    has_code = true;
                }
                i += 1;
            }
        }
    }

    if has_code {
        statements.push(sql[start..].trim().to_string());
    }
    statements
}

/// Whether a script opens or ends a transaction itself at top level.
///
/// `BEGIN` inside a dollar-quoted function body does not count.
pub fn controls_transaction(sql: &str) -> bool {
    split_statements(sql).iter().any(|statement| {
        let mut words = strip_leading_comments(statement)
            .split(|c: char| c.is_whitespace() || c == ';')
            .filter(|w| !w.is_empty())
            .map(str::to_ascii_uppercase);
        match words.next().as_deref() {
            Some("BEGIN" | "COMMIT" | "END" | "ABORT") => true,
            Some("START") => words.next().as_deref() == Some("TRANSACTION"),
            Some("ROLLBACK") => words.next().as_deref() != Some("TO"),
            _ => false,
        }
    })
}

fn strip_leading_comments(mut s: &str) -> &str {
    loop {
        s = s.trim_start();
        if let Some(rest) = s.strip_prefix("--") {
            s = rest.split_once('\n').map(|(_, tail)| tail).unwrap_or("");
        } else if let Some(rest) = s.strip_prefix("/*") {
            s = rest.split_once("*/").map(|(_, tail)| tail).unwrap_or("");
        } else {
            return s;
        }
    }
}

/// The `$tag$` opening at the start of `s`, if any.
fn dollar_tag(s: &str) -> Option<&str> {
    let rest = &s[1..];
    let end = rest.find('$')?;
    let tag = &rest[..end];
    let valid = tag
        .chars()
        .enumerate()
        .all(|(i, c)| c == '_' || c.is_alphabetic() || (i > 0 && c.is_ascii_digit()));
    valid.then(|| &s[..end + 2])
}

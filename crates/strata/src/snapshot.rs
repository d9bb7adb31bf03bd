//! Persisted schema snapshots.
//!
//! `schema.json` is always written; the SQL script, declarative schema and
//! Rust types follow the introspector configuration. Every artifact is
//! rendered before anything touches the disk, then written to a temporary
//! name and renamed into place.

use crate::config::IntrospectorConfig;
use crate::events::{EngineEvent, EventSink};
use crate::{Error, Result, ddl, declarative, typegen};
use camino::{Utf8Path, Utf8PathBuf};
use strata_schema::SchemaModel;
use uuid::Uuid;

pub const SCHEMA_JSON: &str = "schema.json";
pub const SCHEMA_SQL: &str = "schema.sql";
pub const SCHEMA_DECLARATIVE: &str = "schema.prisma";
pub const SCHEMA_TYPES: &str = "schema_types.rs";

/// A rendered file, not yet written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub file_name: &'static str,
    pub contents: String,
}

/// Render every artifact `config` asks for.
///
/// Type generation is advisory: a failure is logged and reported as an
/// event, and the other artifacts are still produced.
pub fn render(
    model: &SchemaModel,
    config: &IntrospectorConfig,
    events: &dyn EventSink,
    correlation_id: Uuid,
) -> Result<Vec<Artifact>> {
    let json = serde_json::to_string_pretty(model).map_err(|e| Error::SnapshotWrite {
        path: config.output_dir.join(SCHEMA_JSON),
        source: std::io::Error::other(e),
    })?;
    let mut artifacts = vec![Artifact {
        file_name: SCHEMA_JSON,
        contents: json + "\n",
    }];

    if config.write_sql {
        artifacts.push(Artifact {
            file_name: SCHEMA_SQL,
            contents: ddl::schema_sql(model),
        });
    }
    if config.write_declarative {
        artifacts.push(Artifact {
            file_name: SCHEMA_DECLARATIVE,
            contents: declarative::render_schema(model),
        });
    }
    if config.generate_types {
        match typegen::generate_types(model) {
            Ok(code) => artifacts.push(Artifact {
                file_name: SCHEMA_TYPES,
                contents: code,
            }),
            Err(message) => {
                tracing::warn!(%correlation_id, %message, "skipping type generation");
                events.emit(&EngineEvent::TypeGenerationFailed {
                    correlation_id,
                    message,
                });
            }
        }
    }

    Ok(artifacts)
}

/// Write `artifacts` into `dir`, returning the final paths.
///
/// Files are first written as `.<name>.tmp`; renames only start once every
/// temporary file exists. On failure the temporary files are removed.
pub fn write(dir: &Utf8Path, artifacts: &[Artifact]) -> Result<Vec<Utf8PathBuf>> {
    std::fs::create_dir_all(dir).map_err(|source| Error::SnapshotWrite {
        path: dir.to_owned(),
        source,
    })?;

    let mut staged: Vec<(Utf8PathBuf, Utf8PathBuf)> = Vec::new();
    for artifact in artifacts {
        let tmp = dir.join(format!(".{}.tmp", artifact.file_name));
        if let Err(source) = std::fs::write(&tmp, &artifact.contents) {
            cleanup(&staged);
            let _ = std::fs::remove_file(&tmp);
            return Err(Error::SnapshotWrite { path: tmp, source });
        }
        staged.push((tmp, dir.join(artifact.file_name)));
    }

    let mut written = Vec::new();
    for (i, (tmp, path)) in staged.iter().enumerate() {
        if let Err(source) = std::fs::rename(tmp, path) {
            cleanup(&staged[i..]);
            return Err(Error::SnapshotWrite {
                path: path.clone(),
                source,
            });
        }
        written.push(path.clone());
    }
    Ok(written)
}

fn cleanup(staged: &[(Utf8PathBuf, Utf8PathBuf)]) {
    for (tmp, _) in staged {
        let _ = std::fs::remove_file(tmp);
    }
}

/// Load a snapshot. `path` may be the `schema.json` file or the directory
/// holding it.
pub fn load(path: impl AsRef<Utf8Path>) -> Result<SchemaModel> {
    let path = path.as_ref();
    let path = if path.is_dir() {
        path.join(SCHEMA_JSON)
    } else {
        path.to_owned()
    };
    let text = std::fs::read_to_string(&path).map_err(|e| Error::SnapshotRead {
        path: path.clone(),
        message: e.to_string(),
    })?;
    serde_json::from_str(&text).map_err(|e| Error::SnapshotRead {
        path,
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingSink;
    use strata_schema::{Column, SqlType, Table};

    fn model() -> SchemaModel {
        SchemaModel::new(
            vec![Table::new(
                "users",
                vec![
                    Column::new("id", SqlType::bigint()).primary_key().auto_increment(),
                    Column::new("email", SqlType::text()).not_null().unique(),
                ],
            )],
            vec![],
            vec![],
        )
    }

    fn dir() -> (tempfile::TempDir, Utf8PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        (tmp, path)
    }

    #[test]
    fn test_render_follows_config() {
        let sink = CollectingSink::new();
        let config = IntrospectorConfig {
            write_sql: false,
            write_declarative: true,
            generate_types: true,
            ..Default::default()
        };
        let artifacts = render(&model(), &config, &sink, Uuid::nil()).unwrap();
        let names: Vec<_> = artifacts.iter().map(|a| a.file_name).collect();
        assert_eq!(names, vec![SCHEMA_JSON, SCHEMA_DECLARATIVE, SCHEMA_TYPES]);
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_write_then_load_round_trips() {
        let (_guard, dir) = dir();
        let sink = CollectingSink::new();
        let original = model();
        let artifacts = render(&original, &IntrospectorConfig::default(), &sink, Uuid::nil()).unwrap();
        let written = write(&dir, &artifacts).unwrap();

        assert_eq!(written, vec![dir.join(SCHEMA_JSON), dir.join(SCHEMA_SQL)]);
        let leftovers: Vec<_> = std::fs::read_dir(&dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());

        assert_eq!(load(&dir).unwrap(), original);
        assert_eq!(load(dir.join(SCHEMA_JSON)).unwrap(), original);
    }

    #[test]
    fn test_load_reports_bad_json() {
        let (_guard, dir) = dir();
        std::fs::write(dir.join(SCHEMA_JSON), "{ not json").unwrap();
        let err = load(&dir).unwrap_err();
        assert_eq!(err.code().as_str(), "SCHEMA_ANALYSIS_FAILED");
        assert!(err.to_string().contains("schema.json"));
    }

    #[test]
    fn test_type_generation_failure_is_advisory() {
        let sink = CollectingSink::new();
        let model = SchemaModel::new(
            vec![
                Table::new("a_b", vec![Column::new("id", SqlType::integer())]),
                Table::new("a__b", vec![Column::new("id", SqlType::integer())]),
            ],
            vec![],
            vec![],
        );
        let config = IntrospectorConfig {
            generate_types: true,
            ..Default::default()
        };
        let artifacts = render(&model, &config, &sink, Uuid::nil()).unwrap();
        assert!(artifacts.iter().all(|a| a.file_name != SCHEMA_TYPES));
        assert!(matches!(
            sink.events().as_slice(),
            [EngineEvent::TypeGenerationFailed { .. }]
        ));
    }
}

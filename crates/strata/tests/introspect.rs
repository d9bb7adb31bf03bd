//! Reading a scripted catalog into a model, and persisting it.

mod common;

use camino::Utf8PathBuf;
use common::{FakeDb, row};
use std::sync::Arc;
use strata::introspect::stage;
use strata::snapshot::{SCHEMA_JSON, SCHEMA_SQL};
use strata::{
    CollectingSink, Column, ColumnDefault, Constraint, ConstraintKind, EngineEvent, ErrorCode,
    ForeignKey, Index, IndexColumn, IntrospectorConfig, PrimaryKey, ReferentialAction,
    SchemaIntrospector, SchemaModel, SqlType, Table, Value, diff,
};

fn column(name: &str, data_type: &str, nullable: bool, default: Option<&str>, identity: &str) -> strata::Row {
    row(&[
        ("name", Value::from(name)),
        ("data_type", Value::from(data_type)),
        ("nullable", Value::Bool(nullable)),
        ("default_expr", Value::from(default)),
        ("identity", Value::from(identity)),
        ("comment", Value::Null),
        ("primary_key", Value::Bool(name == "id")),
        ("is_unique", Value::Bool(name == "email")),
    ])
}

fn constraint(name: &str, kind: &str, definition: &str, columns: &str) -> strata::Row {
    row(&[
        ("name", Value::from(name)),
        ("kind", Value::from(kind)),
        ("definition", Value::from(definition)),
        ("columns", Value::from(columns)),
    ])
}

/// A `public` schema with users, posts, one view, one function, and the
/// tracking table.
fn scripted_catalog() -> FakeDb {
    let db = FakeDb::new();
    let users = ["public", "users"];
    let posts = ["public", "posts"];

    db.answer(
        stage::TABLES,
        &["public"],
        vec![
            row(&[("name", Value::from("posts")), ("comment", Value::Null)]),
            row(&[("name", Value::from("strata_migrations")), ("comment", Value::Null)]),
            row(&[("name", Value::from("users")), ("comment", Value::from("people who sign in"))]),
        ],
    );

    db.answer(
        stage::COLUMNS,
        &users,
        vec![
            column("id", "bigint", false, None, "a"),
            column("email", "character varying(255)", false, None, ""),
            column("created_at", "timestamp with time zone", false, Some("now()"), ""),
        ],
    );
    db.answer(
        stage::PRIMARY_KEY,
        &users,
        vec![row(&[("name", Value::from("users_pkey")), ("columns", Value::from("id"))])],
    );
    db.answer(
        stage::INDEXES,
        &users,
        vec![row(&[
            ("name", Value::from("idx_users_created_at")),
            ("is_unique", Value::Bool(false)),
            ("method", Value::from("btree")),
            ("predicate", Value::Null),
            ("keys", Value::from("created_at DESC")),
        ])],
    );
    db.answer(
        stage::CONSTRAINTS,
        &users,
        vec![
            constraint("users_email_key", "u", "UNIQUE (email)", "email"),
            constraint("users_pkey", "p", "PRIMARY KEY (id)", "id"),
        ],
    );

    db.answer(
        stage::COLUMNS,
        &posts,
        vec![
            column("id", "integer", false, Some("nextval('posts_id_seq'::regclass)"), ""),
            column("author_id", "bigint", false, None, ""),
            column("title", "text", false, None, ""),
            column("status", "character varying(20)", false, Some("'draft'::character varying"), ""),
        ],
    );
    db.answer(
        stage::PRIMARY_KEY,
        &posts,
        vec![row(&[("name", Value::from("posts_pkey")), ("columns", Value::from("id"))])],
    );
    db.answer(
        stage::FOREIGN_KEYS,
        &posts,
        vec![row(&[
            ("name", Value::from("posts_author_id_fkey")),
            ("columns", Value::from("author_id")),
            ("references_table", Value::from("users")),
            ("references_columns", Value::from("id")),
            ("on_delete", Value::from("c")),
            ("on_update", Value::from("a")),
        ])],
    );
    db.answer(
        stage::CONSTRAINTS,
        &posts,
        vec![
            constraint(
                "posts_author_id_fkey",
                "f",
                "FOREIGN KEY (author_id) REFERENCES users(id) ON DELETE CASCADE",
                "author_id",
            ),
            constraint("posts_pkey", "p", "PRIMARY KEY (id)", "id"),
            constraint(
                "posts_status_check",
                "c",
                "CHECK (status::text = ANY (ARRAY['draft'::character varying, 'published'::character varying]::text[]))",
                "status",
            ),
        ],
    );

    db.answer(
        stage::VIEWS,
        &["public"],
        vec![row(&[
            ("name", Value::from("published_posts")),
            ("definition", Value::from(" SELECT id, title FROM posts WHERE status = 'published';")),
            ("materialized", Value::Bool(false)),
        ])],
    );
    db.answer(
        stage::VIEW_COLUMNS,
        &["public", "published_posts"],
        vec![
            row(&[
                ("name", Value::from("id")),
                ("data_type", Value::from("integer")),
                ("nullable", Value::Bool(true)),
            ]),
            row(&[
                ("name", Value::from("title")),
                ("data_type", Value::from("text")),
                ("nullable", Value::Bool(true)),
            ]),
        ],
    );

    db.answer(
        stage::FUNCTIONS,
        &["public"],
        vec![row(&[
            ("name", Value::from("touch_updated_at")),
            ("arguments", Value::from("")),
            ("return_type", Value::from("trigger")),
            ("language", Value::from("plpgsql")),
            ("definition", Value::from("CREATE FUNCTION touch_updated_at() ...")),
        ])],
    );
    db
}

/// The same tables, declared by hand.
fn declared_tables() -> SchemaModel {
    let mut users = Table::new(
        "users",
        vec![
            Column::new("id", SqlType::bigint()).primary_key().auto_increment(),
            Column::new("email", SqlType::varchar(255)).not_null().unique(),
            Column::new("created_at", SqlType::timestamptz())
                .not_null()
                .default(ColumnDefault::Expression("now()".into())),
        ],
    );
    users.primary_key = Some(PrimaryKey {
        name: "users_pkey".into(),
        columns: vec!["id".into()],
    });
    users.indexes.push(Index {
        columns: vec![IndexColumn::desc("created_at")],
        ..Index::new("users", "idx_users_created_at", &[])
    });

    let mut posts = Table::new(
        "posts",
        vec![
            Column::new("id", SqlType::integer()).primary_key().auto_increment(),
            Column::new("author_id", SqlType::bigint()).not_null(),
            Column::new("title", SqlType::text()).not_null(),
            Column::new("status", SqlType::varchar(20))
                .not_null()
                .default(ColumnDefault::String("draft".into())),
        ],
    );
    posts.foreign_keys.push(ForeignKey {
        name: "posts_author_id_fkey".into(),
        columns: vec!["author_id".into()],
        references_table: "users".into(),
        references_columns: vec!["id".into()],
        on_delete: ReferentialAction::Cascade,
        on_update: ReferentialAction::NoAction,
    });
    posts.constraints.push(
        Constraint::new(
            "posts",
            "posts_status_check",
            ConstraintKind::Check,
            "CHECK (status::text = ANY (ARRAY['draft'::character varying, 'published'::character varying]::text[]))",
        )
        .with_columns(&["status"]),
    );

    SchemaModel::new(vec![posts, users], Vec::new(), Vec::new())
}

#[tokio::test]
async fn test_introspect_reads_every_stage() {
    let db = scripted_catalog();
    let introspector = SchemaIntrospector::new(&db, IntrospectorConfig::default());
    let model = introspector.introspect().await.unwrap();

    let names: Vec<&str> = model.tables.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["posts", "users"], "tracking table is skipped");
    assert!(model.tables.iter().all(|t| t.schema.is_none()));

    let users = model.table("users").unwrap();
    assert_eq!(users.comment.as_deref(), Some("people who sign in"));
    assert!(users.column("id").unwrap().is_auto_increment());
    assert!(users.column("email").unwrap().unique);
    assert_eq!(users.indexes[0].columns, vec![IndexColumn::desc("created_at")]);

    let posts = model.table("posts").unwrap();
    assert_eq!(posts.foreign_keys[0].on_delete, ReferentialAction::Cascade);
    assert_eq!(
        posts.column("status").unwrap().default,
        Some(ColumnDefault::String("draft".into()))
    );

    assert_eq!(model.views.len(), 1);
    assert_eq!(model.views[0].definition, "SELECT id, title FROM posts WHERE status = 'published';");
    assert_eq!(model.views[0].columns.len(), 2);
    assert_eq!(model.functions[0].language, "plpgsql");

    // Flattened lists are derived from the tables.
    assert_eq!(model.indexes.len(), 1);
    assert_eq!(model.constraints.len(), 5);
    assert!(model.validate().is_empty());
}

#[tokio::test]
async fn test_introspected_model_matches_declared_tables() {
    let db = scripted_catalog();
    let config = IntrospectorConfig {
        include_views: false,
        include_functions: false,
        ..Default::default()
    };
    let live = SchemaIntrospector::new(&db, config).introspect().await.unwrap();

    let changes = diff(&declared_tables(), &live);
    assert!(changes.is_empty(), "unexpected changes: {changes:#?}");
    assert!(diff(&live, &live).is_empty());
}

#[tokio::test]
async fn test_disabled_stages_are_not_queried() {
    let db = scripted_catalog();
    let config = IntrospectorConfig {
        include_views: false,
        include_functions: false,
        ..Default::default()
    };
    SchemaIntrospector::new(&db, config).introspect().await.unwrap();
    assert_eq!(db.count_marker(stage::VIEWS), 0);
    assert_eq!(db.count_marker(stage::FUNCTIONS), 0);
    assert_eq!(db.count_marker(stage::COLUMNS), 2);
}

#[tokio::test]
async fn test_other_namespaces_keep_their_schema() {
    let db = FakeDb::new();
    db.answer(
        stage::TABLES,
        &["billing"],
        vec![row(&[("name", Value::from("invoices")), ("comment", Value::Null)])],
    );
    db.answer(
        stage::COLUMNS,
        &["billing", "invoices"],
        vec![column("id", "bigint", false, None, "d")],
    );
    let config = IntrospectorConfig {
        schemas: vec!["billing".into()],
        ..Default::default()
    };
    let model = SchemaIntrospector::new(&db, config).introspect().await.unwrap();
    assert_eq!(model.tables[0].schema.as_deref(), Some("billing"));
    assert_eq!(model.tables[0].key(), "billing.invoices");
}

#[tokio::test]
async fn test_analyze_writes_snapshot_and_reports() {
    let db = scripted_catalog();
    let out = tempfile::tempdir().unwrap();
    let output_dir = Utf8PathBuf::from_path_buf(out.path().join("schema")).unwrap();
    let sink = CollectingSink::new();
    let config = IntrospectorConfig {
        output_dir: output_dir.clone(),
        generate_types: true,
        ..Default::default()
    };

    let model = SchemaIntrospector::new(&db, config)
        .with_events(Arc::new(sink.clone()))
        .analyze()
        .await
        .unwrap();

    let loaded = strata::snapshot::load(&output_dir).unwrap();
    assert_eq!(loaded, model);
    let sql = std::fs::read_to_string(output_dir.join(SCHEMA_SQL)).unwrap();
    assert!(sql.contains("CREATE TABLE \"users\""));
    assert!(output_dir.join(SCHEMA_JSON).is_file());

    let events = sink.events();
    assert!(matches!(
        events[0],
        EngineEvent::AnalysisCompleted {
            tables: 2,
            views: 1,
            functions: 1,
            ..
        }
    ));
    let written = events
        .iter()
        .filter(|e| matches!(e, EngineEvent::SnapshotWritten { .. }))
        .count();
    assert_eq!(written, 3);
}

#[tokio::test]
async fn test_failed_stage_writes_nothing() {
    let db = scripted_catalog();
    db.fail_stage(stage::INDEXES);
    let out = tempfile::tempdir().unwrap();
    let output_dir = Utf8PathBuf::from_path_buf(out.path().join("schema")).unwrap();
    let config = IntrospectorConfig {
        output_dir: output_dir.clone(),
        ..Default::default()
    };

    let err = SchemaIntrospector::new(&db, config).analyze().await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::SchemaAnalysisFailed);
    assert!(err.to_string().contains("reading indexes"), "{err}");
    assert!(!output_dir.exists());
}

//! Migration engine scenarios against an in-memory session.

mod common;

use common::{FakeDb, MigrationsDir};
use std::sync::Arc;
use strata::migrate::ATTEMPTS_KEY;
use strata::{
    CollectingSink, EngineConfig, EngineEvent, ErrorCode, LockConfig, MigrationEngine,
    MigrationStatus, RollbackOptions, RowExt, RunOptions,
};

const CREATE_USERS: &str = "CREATE TABLE users (id bigint PRIMARY KEY, email text NOT NULL);
-- @rollback
DROP TABLE users;
";

const ADD_EMAIL_INDEX: &str = "CREATE INDEX idx_users_email ON users (email);
-- @rollback
DROP INDEX idx_users_email;
";

const ADD_POSTS: &str = "CREATE TABLE posts (id bigint PRIMARY KEY);";

fn config(dir: &MigrationsDir) -> EngineConfig {
    EngineConfig {
        migrations_dir: dir.path.clone(),
        ..Default::default()
    }
}

fn two_migrations() -> MigrationsDir {
    let dir = MigrationsDir::new();
    dir.write("001_create_users.sql", CREATE_USERS)
        .write("002_add_email_index.sql", ADD_EMAIL_INDEX);
    dir
}

fn completed(ids: &[&str]) -> Vec<(String, String)> {
    ids.iter()
        .map(|id| (id.to_string(), "COMPLETED".to_string()))
        .collect()
}

#[tokio::test]
async fn test_happy_path_applies_in_order() {
    let dir = two_migrations();
    let db = FakeDb::new();
    let sink = CollectingSink::new();
    let engine = MigrationEngine::new(&db, config(&dir)).with_events(Arc::new(sink.clone()));

    let report = engine.run_migrations(RunOptions::default()).await.unwrap();
    assert!(report.is_success());
    let applied: Vec<&str> = report.applied.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(applied, vec!["001_create_users", "002_add_email_index"]);

    assert_eq!(
        db.tracking_rows(),
        completed(&["001_create_users", "002_add_email_index"])
    );
    let committed = db.committed();
    assert_eq!(committed.len(), 2);
    assert!(committed[0].contains("CREATE TABLE users"));
    assert!(committed[1].contains("CREATE INDEX idx_users_email"));
    assert!(!committed.iter().any(|sql| sql.contains("DROP TABLE")));

    let status = engine.get_migration_status().await.unwrap();
    let versions: Vec<&str> = status.iter().map(|m| m.version.as_str()).collect();
    assert_eq!(versions, vec!["001", "002"]);
    assert!(status.iter().all(|m| m.status == MigrationStatus::Completed));
    assert_eq!(status[0].attempts(), 1);

    assert!(!db.lock_held());
    assert!(!db.in_transaction());

    let events = sink.events();
    assert_eq!(events.len(), 4);
    assert!(matches!(&events[0], EngineEvent::MigrationStarted { id, .. } if id == "001_create_users"));
    assert!(matches!(&events[3], EngineEvent::MigrationCompleted { id, .. } if id == "002_add_email_index"));
    assert!(events.iter().all(|e| e.correlation_id() == report.correlation_id));
}

#[tokio::test]
async fn test_second_run_has_nothing_to_do() {
    let dir = two_migrations();
    let db = FakeDb::new();
    let engine = MigrationEngine::new(&db, config(&dir));

    engine.run_migrations(RunOptions::default()).await.unwrap();
    let report = engine.run_migrations(RunOptions::default()).await.unwrap();
    assert!(report.pending.is_empty());
    assert!(report.applied.is_empty());
    assert_eq!(db.committed().len(), 2);
}

#[tokio::test]
async fn test_initialize_is_idempotent() {
    let dir = MigrationsDir::new();
    let db = FakeDb::new();
    let engine = MigrationEngine::new(&db, config(&dir));

    engine.initialize().await.unwrap();
    engine.initialize().await.unwrap();
    assert_eq!(db.count_marker("tracking_create"), 2);
    let create = db
        .log()
        .into_iter()
        .find(|sql| sql.starts_with("-- strata:tracking_create"))
        .unwrap();
    assert!(create.contains("CREATE TABLE IF NOT EXISTS \"strata_migrations\""));
    assert!(create.contains("CREATE INDEX IF NOT EXISTS"));
    assert!(engine.get_migration_status().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_mid_batch_failure_stops_and_records_failure() {
    let dir = two_migrations();
    dir.write("002_add_email_index.sql", "CREATE INDEX idx_users_email ON users (emial oops);")
        .write("003_add_posts.sql", ADD_POSTS);
    let db = FakeDb::new();
    db.fail_on("oops");
    let engine = MigrationEngine::new(&db, config(&dir));

    let report = engine
        .run_migrations(RunOptions {
            force: false,
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(!report.is_success());
    assert_eq!(report.applied.len(), 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].id, "002_add_email_index");
    assert!(report.failed[0].error.contains("syntax error"));
    assert_eq!(report.skipped, vec!["003_add_posts".to_string()]);

    assert_eq!(
        db.tracking_rows(),
        vec![
            ("001_create_users".to_string(), "COMPLETED".to_string()),
            ("002_add_email_index".to_string(), "FAILED".to_string()),
        ]
    );
    let failed = db.tracking_row("002_add_email_index").unwrap();
    assert!(failed.string("error").unwrap().contains("syntax error"));

    // The failed script was rolled back and the third never ran.
    let committed = db.committed();
    assert_eq!(committed.len(), 1);
    assert!(!db.log().iter().any(|sql| sql.contains("CREATE TABLE posts")));
    assert!(!db.lock_held());
}

#[tokio::test]
async fn test_force_continues_past_failure() {
    let dir = two_migrations();
    dir.write("002_add_email_index.sql", "CREATE INDEX oops;")
        .write("003_add_posts.sql", ADD_POSTS);
    let db = FakeDb::new();
    db.fail_on("oops");
    let engine = MigrationEngine::new(&db, config(&dir));

    let report = engine
        .run_migrations(RunOptions {
            force: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(report.applied.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert!(report.skipped.is_empty());
    assert_eq!(
        db.tracking_row("003_add_posts").unwrap().string("status").unwrap(),
        "COMPLETED"
    );
}

#[tokio::test]
async fn test_forced_failure_is_retried_after_later_migrations() {
    let dir = two_migrations();
    dir.write("002_add_email_index.sql", "CREATE INDEX oops;")
        .write("003_add_posts.sql", ADD_POSTS);
    let db = FakeDb::new();
    db.fail_on("oops");
    let engine = MigrationEngine::new(&db, config(&dir));
    engine
        .run_migrations(RunOptions {
            force: true,
            ..Default::default()
        })
        .await
        .unwrap();

    dir.write("002_add_email_index.sql", ADD_EMAIL_INDEX);
    let report = engine.run_migrations(RunOptions::default()).await.unwrap();
    let applied: Vec<&str> = report.applied.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(applied, vec!["002_add_email_index"]);
    assert_eq!(
        db.tracking_rows(),
        completed(&["001_create_users", "002_add_email_index", "003_add_posts"])
    );
    let status = engine.get_migration_status().await.unwrap();
    let retried = status.iter().find(|m| m.id == "002_add_email_index").unwrap();
    assert_eq!(retried.attempts(), 2);

    // A file never seen before still may not slip in below applied versions.
    dir.write("000_seed.sql", "INSERT INTO users VALUES (1, 'a@example.com');");
    let err = engine.run_migrations(RunOptions::default()).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::MigrationOutOfOrder);
    assert!(err.to_string().contains("000_seed"), "{err}");
}

#[tokio::test]
async fn test_single_migration_failure_is_an_error() {
    let dir = MigrationsDir::new();
    dir.write("001_broken.sql", "CREATE TABLE oops;");
    let db = FakeDb::new();
    db.fail_on("oops");
    let engine = MigrationEngine::new(&db, config(&dir));

    let err = engine.run_migrations(RunOptions::default()).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::MigrationExecutionFailed);
    let message = err.to_string();
    assert!(message.contains("001_broken"), "{message}");
    assert!(message.contains("version 001"), "{message}");
    assert_eq!(db.tracking_rows(), vec![("001_broken".to_string(), "FAILED".to_string())]);
    assert!(!db.lock_held());
}

#[tokio::test]
async fn test_retry_after_failure_counts_attempts() {
    let dir = MigrationsDir::new();
    dir.write("001_broken.sql", "CREATE TABLE oops;");
    let db = FakeDb::new();
    db.fail_on("oops");
    let engine = MigrationEngine::new(&db, config(&dir));
    engine.run_migrations(RunOptions::default()).await.unwrap_err();

    dir.write("001_broken.sql", "CREATE TABLE fixed (id int);");
    let report = engine.run_migrations(RunOptions::default()).await.unwrap();
    assert_eq!(report.applied.len(), 1);

    let status = engine.get_migration_status().await.unwrap();
    assert_eq!(status[0].status, MigrationStatus::Completed);
    assert_eq!(status[0].attempts(), 2);
    assert!(status[0].metadata.contains_key(ATTEMPTS_KEY));
}

#[tokio::test]
async fn test_batch_size_limits_the_run() {
    let dir = two_migrations();
    dir.write("003_add_posts.sql", ADD_POSTS);
    let db = FakeDb::new();
    let engine = MigrationEngine::new(&db, config(&dir));

    let report = engine
        .run_migrations(RunOptions {
            batch_size: Some(1),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(report.pending.len(), 3);
    assert_eq!(report.applied.len(), 1);
    assert_eq!(report.skipped, vec!["002_add_email_index", "003_add_posts"]);
}

#[tokio::test]
async fn test_edited_applied_migration_is_a_checksum_mismatch() {
    let dir = two_migrations();
    let db = FakeDb::new();
    let engine = MigrationEngine::new(&db, config(&dir));
    engine.run_migrations(RunOptions::default()).await.unwrap();

    dir.write(
        "001_create_users.sql",
        &CREATE_USERS.replace("email text", "email varchar(255)"),
    );
    dir.write("003_add_posts.sql", ADD_POSTS);
    let err = engine.run_migrations(RunOptions::default()).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ChecksumMismatch);
    assert!(err.to_string().contains("001_create_users"));
    assert!(db.tracking_row("003_add_posts").is_none());
    assert!(!db.lock_held());

    let report = engine.status_report().await.unwrap();
    assert!(report.entries[0].modified);
    assert!(!report.entries[1].modified);
    assert!(!report.entries[2].tracked);
}

#[tokio::test]
async fn test_checksum_validation_can_be_disabled() {
    let dir = two_migrations();
    let db = FakeDb::new();
    let engine = MigrationEngine::new(
        &db,
        EngineConfig {
            validate_checksums: false,
            ..config(&dir)
        },
    );
    engine.run_migrations(RunOptions::default()).await.unwrap();
    dir.write("001_create_users.sql", "CREATE TABLE users (id int);");
    engine.run_migrations(RunOptions::default()).await.unwrap();
}

#[tokio::test]
async fn test_out_of_order_migration_is_refused_unless_allowed() {
    let dir = MigrationsDir::new();
    dir.write("001_create_users.sql", CREATE_USERS)
        .write("003_add_posts.sql", ADD_POSTS);
    let db = FakeDb::new();
    let engine = MigrationEngine::new(&db, config(&dir));
    engine.run_migrations(RunOptions::default()).await.unwrap();

    dir.write("002_add_email_index.sql", ADD_EMAIL_INDEX);
    let err = engine.run_migrations(RunOptions::default()).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::MigrationOutOfOrder);

    let lenient = MigrationEngine::new(
        &db,
        EngineConfig {
            allow_out_of_order: true,
            ..config(&dir)
        },
    );
    let report = lenient.run_migrations(RunOptions::default()).await.unwrap();
    assert_eq!(report.applied.len(), 1);
    assert_eq!(report.applied[0].id, "002_add_email_index");
}

#[tokio::test]
async fn test_dry_run_touches_nothing() {
    let dir = two_migrations();
    let db = FakeDb::new();
    let engine = MigrationEngine::new(&db, config(&dir));

    let report = engine
        .run_migrations(RunOptions {
            dry_run: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(report.dry_run);
    assert_eq!(report.pending.len(), 2);
    assert!(report.applied.is_empty());

    // Only the existence probe ran: no tracking table, no lock, no SQL.
    assert_eq!(db.log().len(), 1);
    assert_eq!(db.count_marker("tracking_exists"), 1);
    assert!(db.committed().is_empty());
}

#[tokio::test]
async fn test_busy_lock_times_out() {
    let dir = two_migrations();
    let db = FakeDb::new();
    db.hold_lock_elsewhere();
    let engine = MigrationEngine::new(
        &db,
        EngineConfig {
            lock: LockConfig {
                timeout_secs: 0,
                ..Default::default()
            },
            ..config(&dir)
        },
    );

    let err = engine.run_migrations(RunOptions::default()).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::MigrationLockFailed);
    assert!(db.committed().is_empty());
}

#[tokio::test]
async fn test_disabled_lock_is_never_taken() {
    let dir = two_migrations();
    let db = FakeDb::new();
    db.hold_lock_elsewhere();
    let engine = MigrationEngine::new(
        &db,
        EngineConfig {
            lock: LockConfig {
                enabled: false,
                ..Default::default()
            },
            ..config(&dir)
        },
    );
    engine.run_migrations(RunOptions::default()).await.unwrap();
    assert_eq!(db.count_marker("lock_acquire"), 0);
}

#[tokio::test]
async fn test_non_transactional_script_runs_statement_by_statement() {
    let dir = MigrationsDir::new();
    dir.write(
        "001_concurrent_index.sql",
        "-- @transactional: false
CREATE INDEX CONCURRENTLY idx_a ON a (x);
CREATE INDEX CONCURRENTLY idx_b ON b (y);
",
    );
    let db = FakeDb::new();
    let engine = MigrationEngine::new(&db, config(&dir));
    engine.run_migrations(RunOptions::default()).await.unwrap();

    assert!(!db.log().iter().any(|sql| sql == "BEGIN"));
    let committed = db.committed();
    assert_eq!(committed.len(), 2);
    assert!(committed[0].contains("idx_a") && !committed[0].contains("idx_b"));
    assert!(committed[1].contains("idx_b"));
}

#[tokio::test]
async fn test_transactional_file_with_its_own_commit_is_rejected() {
    let dir = MigrationsDir::new();
    let script = "BEGIN;\nCREATE TABLE users (id bigint);\nCOMMIT;\n";
    dir.write("001_create_users.sql", script);
    let db = FakeDb::new();
    let engine = MigrationEngine::new(&db, config(&dir));

    let err = engine.run_migrations(RunOptions::default()).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::MigrationDiscoveryFailed);
    assert!(err.to_string().contains("-- @transactional: false"), "{err}");
    assert!(db.committed().is_empty());
    assert!(db.tracking_rows().is_empty());
    assert!(!db.lock_held());

    dir.write(
        "001_create_users.sql",
        &format!("-- @transactional: false\n{script}"),
    );
    engine.run_migrations(RunOptions::default()).await.unwrap();
    assert!(db.committed().iter().any(|sql| sql.contains("CREATE TABLE users")));
    assert_eq!(db.tracking_rows(), completed(&["001_create_users"]));
}

#[tokio::test]
async fn test_rollback_runs_section_and_marks_row() {
    let dir = two_migrations();
    let db = FakeDb::new();
    let engine = MigrationEngine::new(&db, config(&dir));
    engine.run_migrations(RunOptions::default()).await.unwrap();

    let report = engine
        .rollback_migrations(None, RollbackOptions::default())
        .await
        .unwrap();
    assert!(report.is_success());
    assert_eq!(report.rolled_back.len(), 1);
    assert_eq!(report.rolled_back[0].id, "002_add_email_index");

    assert!(db.committed().last().unwrap().contains("DROP INDEX idx_users_email"));
    assert_eq!(
        db.tracking_row("002_add_email_index").unwrap().string("status").unwrap(),
        MigrationStatus::RolledBack.as_str()
    );
    assert_eq!(
        db.tracking_row("001_create_users").unwrap().string("status").unwrap(),
        "COMPLETED"
    );
}

#[tokio::test]
async fn test_rollback_to_target_uses_down_files() {
    let dir = MigrationsDir::new();
    dir.write("001_create_users.sql", CREATE_USERS)
        .write("002_add_posts.sql", ADD_POSTS)
        .write("002_add_posts.down.sql", "DROP TABLE posts;")
        .write("003_add_email_index.sql", ADD_EMAIL_INDEX);
    let db = FakeDb::new();
    let engine = MigrationEngine::new(&db, config(&dir));
    engine.run_migrations(RunOptions::default()).await.unwrap();

    let report = engine
        .rollback_migrations(Some("001"), RollbackOptions::default())
        .await
        .unwrap();
    let ids: Vec<&str> = report.rolled_back.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["003_add_email_index", "002_add_posts"]);

    let committed = db.committed();
    let tail = &committed[committed.len() - 2..];
    assert!(tail[0].contains("DROP INDEX"));
    assert_eq!(tail[1], "DROP TABLE posts;");

    // A rolled-back migration is pending again.
    let report = engine
        .run_migrations(RunOptions {
            dry_run: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(report.pending.len(), 2);
}

#[tokio::test]
async fn test_rollback_without_sql_fails() {
    let dir = MigrationsDir::new();
    dir.write("001_add_posts.sql", ADD_POSTS);
    let db = FakeDb::new();
    let sink = CollectingSink::new();
    let engine = MigrationEngine::new(&db, config(&dir)).with_events(Arc::new(sink.clone()));
    engine.run_migrations(RunOptions::default()).await.unwrap();

    let err = engine
        .rollback_migrations(None, RollbackOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::RollbackExecutionFailed);
    assert!(err.to_string().contains("no rollback SQL"));
    assert_eq!(
        db.tracking_row("001_add_posts").unwrap().string("status").unwrap(),
        "COMPLETED"
    );
    assert!(
        sink.events()
            .iter()
            .any(|e| matches!(e, EngineEvent::RollbackFailed { .. }))
    );
}

#[tokio::test]
async fn test_rollback_refuses_an_edited_file() {
    let dir = MigrationsDir::new();
    dir.write("001_create_users.sql", CREATE_USERS);
    let db = FakeDb::new();
    let engine = MigrationEngine::new(&db, config(&dir));
    engine.run_migrations(RunOptions::default()).await.unwrap();

    let tampered = CREATE_USERS.replace("DROP TABLE users;", "DROP TABLE accounts CASCADE;");
    dir.write("001_create_users.sql", &tampered);
    let err = engine
        .rollback_migrations(None, RollbackOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ChecksumMismatch);
    assert!(err.to_string().contains("001_create_users"), "{err}");
    assert!(!db.committed().iter().any(|sql| sql.contains("accounts")));
    assert_eq!(db.tracking_rows(), completed(&["001_create_users"]));
    assert!(!db.lock_held());

    dir.write(
        "001_create_users.sql",
        &CREATE_USERS.replace("email text", "email varchar(255)"),
    );
    let err = engine
        .rollback_migrations(None, RollbackOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ChecksumMismatch);

    let lenient = MigrationEngine::new(
        &db,
        EngineConfig {
            validate_checksums: false,
            ..config(&dir)
        },
    );
    lenient
        .rollback_migrations(None, RollbackOptions::default())
        .await
        .unwrap();
    assert_eq!(db.committed().last().unwrap(), "DROP TABLE users;");
}

#[tokio::test]
async fn test_rollback_dry_run_lists_targets() {
    let dir = two_migrations();
    let db = FakeDb::new();
    let engine = MigrationEngine::new(&db, config(&dir));
    engine.run_migrations(RunOptions::default()).await.unwrap();
    let before = db.log().len();

    let report = engine
        .rollback_migrations(
            Some("0"),
            RollbackOptions {
                dry_run: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let ids: Vec<&str> = report.targets.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["002_add_email_index", "001_create_users"]);
    assert!(report.rolled_back.is_empty());
    assert_eq!(db.count_marker("tracking_status"), 0);
    assert_eq!(db.log().len(), before + 2);
}

#[tokio::test]
async fn test_forget_removes_failed_rows_only() {
    let dir = two_migrations();
    dir.write("002_add_email_index.sql", "CREATE INDEX oops;");
    let db = FakeDb::new();
    db.fail_on("oops");
    let engine = MigrationEngine::new(&db, config(&dir));
    engine.run_migrations(RunOptions::default()).await.unwrap();

    assert!(!engine.forget_migration("001_create_users").await.unwrap());
    assert!(engine.forget_migration("002_add_email_index").await.unwrap());
    assert!(!engine.forget_migration("002_add_email_index").await.unwrap());
    assert_eq!(db.tracking_rows(), completed(&["001_create_users"]));
}

#[tokio::test]
async fn test_status_report_flags_missing_files() {
    let dir = two_migrations();
    let db = FakeDb::new();
    let engine = MigrationEngine::new(&db, config(&dir));
    engine.run_migrations(RunOptions::default()).await.unwrap();

    dir.remove("002_add_email_index.sql");
    dir.write("003_add_posts.sql", ADD_POSTS);
    let report = engine.status_report().await.unwrap();
    let rows: Vec<(&str, bool, bool)> = report
        .entries
        .iter()
        .map(|e| (e.migration.id.as_str(), e.tracked, e.missing_file))
        .collect();
    assert_eq!(
        rows,
        vec![
            ("001_create_users", true, false),
            ("002_add_email_index", true, true),
            ("003_add_posts", false, false),
        ]
    );
    assert_eq!(report.count(MigrationStatus::Completed), 2);
    assert_eq!(report.count(MigrationStatus::Pending), 1);
}

#[tokio::test]
async fn test_missing_directory_is_a_discovery_error() {
    let db = FakeDb::new();
    let engine = MigrationEngine::new(
        &db,
        EngineConfig {
            migrations_dir: "/nonexistent/strata/migrations".into(),
            ..Default::default()
        },
    );
    let err = engine.run_migrations(RunOptions::default()).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::MigrationDiscoveryFailed);
    assert!(!db.lock_held());
}

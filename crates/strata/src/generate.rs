//! Migration generation: ordered forward and reverse DDL from schema changes.

use crate::diff::{SchemaChange, diff};
use crate::solver::{order_changes, verify};
use crate::{Error, Result, ddl, declarative};
use strata_schema::{SchemaModel, Table};

/// Knobs for [`generate`] and the other entry points.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct GeneratorOptions {
    /// Also produce reverse DDL
    pub include_rollback: bool,
    /// Wrap statements in `BEGIN; ... COMMIT;`
    pub transactional: bool,
    /// Build and drop indexes `CONCURRENTLY`, outside the transaction block
    pub concurrent_indexes: bool,
    /// Also render the declarative schema
    pub declarative: bool,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            include_rollback: true,
            transactional: true,
            concurrent_indexes: false,
            declarative: false,
        }
    }
}

/// Where a statement runs relative to the transaction block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    BeforeTransaction,
    InTransaction,
    AfterTransaction,
}

/// One generated DDL statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub placement: Placement,
}

/// The result of generating a migration.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedMigration {
    /// Forward statements, in execution order
    pub up: Vec<Statement>,
    /// Reverse statements, when rollback was requested
    pub down: Option<Vec<Statement>>,
    /// Notes for a human, rendered as SQL comments above the statements
    pub advisories: Vec<String>,
    pub declarative_schema: Option<String>,
    pub transactional: bool,
}

impl GeneratedMigration {
    pub fn is_empty(&self) -> bool {
        self.up.is_empty()
    }

    /// Forward DDL as a runnable script.
    pub fn up_sql(&self) -> String {
        let mut out = String::new();
        for advisory in &self.advisories {
            out.push_str("-- ");
            out.push_str(advisory);
            out.push('\n');
        }
        out.push_str(&render(&self.up, self.transactional));
        out
    }

    /// Reverse DDL as a runnable script.
    pub fn down_sql(&self) -> Option<String> {
        self.down
            .as_ref()
            .map(|down| render(down, self.transactional))
    }

    /// Whether any statement has to run outside a transaction.
    pub fn needs_autocommit(&self) -> bool {
        self.up
            .iter()
            .chain(self.down.iter().flatten())
            .any(|s| s.placement != Placement::InTransaction)
    }

    /// Render a migration file that the engine can discover.
    ///
    /// The engine wraps each migration in a transaction itself, so the
    /// statements are written bare. Migrations with statements that cannot
    /// run in a transaction opt out with `-- @transactional: false` and carry
    /// their own `BEGIN`/`COMMIT`.
    pub fn to_migration_file(&self, name: &str, description: &str) -> String {
        let autocommit = self.needs_autocommit();
        let body = |statements: &[Statement]| {
            if autocommit {
                render(statements, self.transactional)
            } else {
                render(statements, false)
            }
        };

        let mut out = String::new();
        out.push_str(&format!("-- @name: {}\n", name));
        if !description.is_empty() {
            out.push_str(&format!("-- @description: {}\n", description));
        }
        if autocommit {
            out.push_str("-- @transactional: false\n");
        }
        for advisory in &self.advisories {
            out.push_str(&format!("-- {}\n", advisory));
        }
        out.push('\n');
        out.push_str(&body(&self.up));

        if let Some(down) = &self.down {
            out.push_str("\n-- @rollback\n");
            out.push_str(&body(down));
        }
        out
    }
}

fn render(statements: &[Statement], transactional: bool) -> String {
    let mut out = String::new();
    if !transactional {
        for statement in statements {
            push_line(&mut out, &statement.sql);
        }
        return out;
    }

    let placed = |p: Placement| {
        statements
            .iter()
            .filter(|s| s.placement == p)
            .map(|s| s.sql.as_str())
            .collect::<Vec<_>>()
    };
    for sql in placed(Placement::BeforeTransaction) {
        push_line(&mut out, sql);
    }
    let inside = placed(Placement::InTransaction);
    if !inside.is_empty() {
        push_line(&mut out, "BEGIN;");
        for sql in inside {
            push_line(&mut out, sql);
        }
        push_line(&mut out, "COMMIT;");
    }
    for sql in placed(Placement::AfterTransaction) {
        push_line(&mut out, sql);
    }
    out
}

fn push_line(out: &mut String, sql: &str) {
    out.push_str(sql);
    out.push('\n');
}

/// Order and render `changes`, without checking them against a schema.
pub fn generate(changes: &[SchemaChange], opts: &GeneratorOptions) -> Result<GeneratedMigration> {
    let mut migration = build(changes, None, opts).map_err(Error::MigrationGeneration)?;
    if opts.declarative {
        let tables: Vec<Table> = changes
            .iter()
            .filter_map(|c| match c {
                SchemaChange::CreateTable(t) => Some(t.clone()),
                _ => None,
            })
            .collect();
        migration.declarative_schema = Some(declarative::render_tables(&tables));
    }
    Ok(migration)
}

/// Order and render `changes`, simulating the plan against `base` first.
pub fn generate_against(
    base: &SchemaModel,
    changes: &[SchemaChange],
    opts: &GeneratorOptions,
) -> Result<GeneratedMigration> {
    build(changes, Some(base), opts).map_err(Error::MigrationGeneration)
}

/// Diff two models and generate the migration between them.
///
/// The forward plan is verified against `old`. The reverse plan is
/// verified against `new`.
pub fn diff_and_generate(
    old: &SchemaModel,
    new: &SchemaModel,
    opts: &GeneratorOptions,
) -> Result<GeneratedMigration> {
    let changes = diff(old, new);
    let mut migration = generate_against(old, &changes, opts)?;
    if opts.include_rollback {
        verify(new, &order_changes(&invert_all(&changes)))
            .map_err(|e| Error::MigrationGeneration(format!("rollback plan: {}", e)))?;
    }
    if opts.declarative {
        migration.declarative_schema = Some(declarative::render_schema(new));
    }
    Ok(migration)
}

/// A migration that creates one table with its indexes and constraints.
pub fn create_table(table: &Table, opts: &GeneratorOptions) -> Result<GeneratedMigration> {
    generate(&[SchemaChange::CreateTable(table.clone())], opts)
}

/// Reverse the list and invert each change.
pub fn invert_all(changes: &[SchemaChange]) -> Vec<SchemaChange> {
    changes.iter().rev().map(SchemaChange::invert).collect()
}

/// Shared by every entry point; errors are plain messages so each caller
/// can wrap them in its own error code.
pub(crate) fn build(
    changes: &[SchemaChange],
    base: Option<&SchemaModel>,
    opts: &GeneratorOptions,
) -> std::result::Result<GeneratedMigration, String> {
    let steps = order_changes(changes);
    if let Some(base) = base {
        verify(base, &steps).map_err(|e| e.to_string())?;
    }

    let mut advisories = Vec::new();
    for step in &steps {
        match step {
            SchemaChange::DropTable(t) => {
                advisories.push(format!("destructive: drops table {} and its data", t.name));
            }
            SchemaChange::DropColumn { table, column, .. } => advisories.push(format!(
                "destructive: drops column {}.{} and its data",
                table, column.name
            )),
            _ => {}
        }
    }

    let up = render_steps(&steps, opts);
    let down = opts
        .include_rollback
        .then(|| render_steps(&order_changes(&invert_all(changes)), opts));

    tracing::debug!(
        changes = changes.len(),
        statements = up.len(),
        "generated migration"
    );

    Ok(GeneratedMigration {
        up,
        down,
        advisories,
        declarative_schema: None,
        transactional: opts.transactional,
    })
}

fn render_steps(steps: &[SchemaChange], opts: &GeneratorOptions) -> Vec<Statement> {
    let mut out: Vec<Statement> = Vec::new();
    for step in steps {
        let placement = match step {
            SchemaChange::DropIndex(_) if opts.concurrent_indexes => Placement::BeforeTransaction,
            SchemaChange::CreateIndex(_) if opts.concurrent_indexes => Placement::AfterTransaction,
            _ => Placement::InTransaction,
        };
        for sql in ddl::change_sql(step, opts.concurrent_indexes) {
            if !out.iter().any(|s| s.sql == sql) {
                out.push(Statement { sql, placement });
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_schema::{Column, ConstraintKind, Index, SqlType};

    fn id() -> Column {
        Column::new("id", SqlType::bigint()).primary_key().auto_increment()
    }

    fn model(tables: Vec<Table>) -> SchemaModel {
        SchemaModel::new(tables, Vec::new(), Vec::new())
    }

    fn sqls(statements: &[Statement]) -> Vec<&str> {
        statements.iter().map(|s| s.sql.as_str()).collect()
    }

    fn users_and_posts() -> (Table, Table) {
        let users = Table::new("users", vec![id(), Column::new("email", SqlType::text()).not_null()]);
        let posts = Table::new(
            "posts",
            vec![
                id(),
                Column::new("author_id", SqlType::bigint())
                    .not_null()
                    .references("users", "id"),
            ],
        );
        (users, posts)
    }

    #[test]
    fn test_create_table_migration() {
        let (_, mut posts) = users_and_posts();
        posts
            .indexes
            .push(Index::new("posts", "idx_posts_author_id", &["author_id"]));
        let migration = create_table(&posts, &GeneratorOptions::default()).unwrap();
        insta::assert_snapshot!(migration.up_sql(), @r#"
        BEGIN;
        CREATE TABLE "posts" (
            "id" bigint GENERATED BY DEFAULT AS IDENTITY NOT NULL,
            "author_id" bigint NOT NULL,
            CONSTRAINT "posts_pkey" PRIMARY KEY (id)
        );
        CREATE INDEX "idx_posts_author_id" ON "posts" ("author_id");
        ALTER TABLE "posts" ADD CONSTRAINT "posts_author_id_fkey" FOREIGN KEY (author_id) REFERENCES users(id);
        COMMIT;
        "#);
        assert_eq!(
            migration.down_sql().unwrap(),
            "BEGIN;\nALTER TABLE \"posts\" DROP CONSTRAINT \"posts_author_id_fkey\";\nDROP TABLE \"posts\";\nCOMMIT;\n"
        );
    }

    #[test]
    fn test_drop_constraint_precedes_drop_table() {
        let (users, posts) = users_and_posts();
        let check = strata_schema::Constraint::new(
            "posts",
            "ck_author",
            ConstraintKind::Check,
            "CHECK ((author_id > 0))",
        );
        let changes = vec![
            SchemaChange::DropTable(posts.clone()),
            SchemaChange::DropConstraint(check),
            SchemaChange::DropTable(users),
        ];
        let migration = generate(&changes, &GeneratorOptions::default()).unwrap();
        let up = sqls(&migration.up);
        let drop_check = up.iter().position(|s| s.contains("\"ck_author\"")).unwrap();
        let drop_fk = up.iter().position(|s| s.contains("posts_author_id_fkey")).unwrap();
        let drop_posts = up.iter().position(|s| *s == "DROP TABLE \"posts\";").unwrap();
        assert!(drop_check < drop_posts);
        assert!(drop_fk < drop_posts);
        assert_eq!(migration.advisories.len(), 2);
    }

    #[test]
    fn test_diff_and_generate_verifies_and_rolls_back() {
        let (users, posts) = users_and_posts();
        let old = model(vec![users.clone()]);
        let new = model(vec![users, posts]);
        let migration = diff_and_generate(&old, &new, &GeneratorOptions::default()).unwrap();
        assert_eq!(migration.up.len(), 2);
        let down = migration.down.as_ref().unwrap();
        assert_eq!(
            sqls(down),
            vec![
                "ALTER TABLE \"posts\" DROP CONSTRAINT \"posts_author_id_fkey\";",
                "DROP TABLE \"posts\";",
            ]
        );
    }

    #[test]
    fn test_generate_against_rejects_impossible_plan() {
        let change = SchemaChange::AddColumn {
            schema: None,
            table: "missing".into(),
            column: Column::new("x", SqlType::integer()),
        };
        let err = generate_against(&SchemaModel::empty(), &[change], &GeneratorOptions::default())
            .unwrap_err();
        assert_eq!(err.code().as_str(), "MIGRATION_GENERATION_FAILED");
    }

    #[test]
    fn test_concurrent_indexes_sit_outside_transaction() {
        let old_index = Index::new("users", "idx_old", &["email"]);
        let new_index = Index::new("users", "idx_new", &["email"]);
        let opts = GeneratorOptions {
            concurrent_indexes: true,
            ..Default::default()
        };
        let changes = vec![
            SchemaChange::DropIndex(old_index),
            SchemaChange::CreateIndex(new_index),
            SchemaChange::AddColumn {
                schema: None,
                table: "users".into(),
                column: Column::new("bio", SqlType::text()),
            },
        ];
        let migration = generate(&changes, &opts).unwrap();
        insta::assert_snapshot!(migration.up_sql(), @r#"
        DROP INDEX CONCURRENTLY "idx_old";
        BEGIN;
        ALTER TABLE "users" ADD COLUMN "bio" text;
        COMMIT;
        CREATE INDEX CONCURRENTLY "idx_new" ON "users" ("email");
        "#);
        assert!(migration.needs_autocommit());
        assert!(
            migration
                .to_migration_file("swap_index", "")
                .contains("-- @transactional: false\n")
        );
    }

    #[test]
    fn test_non_transactional_output_is_bare() {
        let opts = GeneratorOptions {
            transactional: false,
            include_rollback: false,
            ..Default::default()
        };
        let migration = generate(
            &[SchemaChange::CreateIndex(Index::new("users", "idx_users_email", &["email"]))],
            &opts,
        )
        .unwrap();
        assert_eq!(
            migration.up_sql(),
            "CREATE INDEX \"idx_users_email\" ON \"users\" (\"email\");\n"
        );
        assert!(migration.down_sql().is_none());
    }

    #[test]
    fn test_empty_change_list_generates_nothing() {
        let migration = generate(&[], &GeneratorOptions::default()).unwrap();
        assert!(migration.is_empty());
        assert_eq!(migration.up_sql(), "");
    }

    #[test]
    fn test_migration_file_has_rollback_section() {
        let (users, _) = users_and_posts();
        let migration = create_table(&users, &GeneratorOptions::default()).unwrap();
        let file = migration.to_migration_file("create_users", "Create the users table");
        assert!(file.starts_with("-- @name: create_users\n-- @description: Create the users table\n\n"));
        assert!(file.contains("\n-- @rollback\nDROP TABLE \"users\";\n"));
        assert!(!file.contains("BEGIN;"));
    }
}

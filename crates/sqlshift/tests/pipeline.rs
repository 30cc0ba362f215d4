//! End-to-end generation runs against on-disk scratch and migration directories.

use std::path::{Path, PathBuf};

use sqlshift::introspect::table_exists;
use sqlshift::prelude::*;
use sqlx::sqlite::SqlitePool;
use tempfile::TempDir;

fn config(dir: &TempDir) -> GenerateConfig {
    GenerateConfig::new()
        .migrations_dir(dir.path().join("migrations"))
        .scratch_dir(dir.path().join("scratch"))
}

fn migration_files(dir: &TempDir) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir.path().join("migrations"))
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    files.sort();
    files
}

/// Applies the committed migrations to a fresh database file and returns it.
async fn seeded_database(dir: &TempDir, name: &str) -> (PathBuf, SqlitePool) {
    let path = dir.path().join(name);
    let pool = connect(&format!("sqlite://{}", path.display())).await.unwrap();
    let executor = MigrationExecutor::new(pool.clone());
    executor.init().await.unwrap();
    let migrations = load_migrations(&dir.path().join("migrations")).unwrap();
    executor.apply_all(&migrations).await.unwrap();
    (path, pool)
}

async fn insert(pool: &SqlitePool, sql: &str) {
    sqlx::query(sql).execute(pool).await.unwrap();
}

fn database_url(path: &Path) -> String {
    format!("sqlite://{}", path.display())
}

async fn names(pool: &SqlitePool) -> Vec<String> {
    sqlx::query_scalar("SELECT name FROM users ORDER BY id")
        .fetch_all(pool)
        .await
        .unwrap()
}

fn users() -> TableSchema {
    TableSchema::new("users")
        .column(ColumnSchema::new("id", "INTEGER").primary_key())
        .column(ColumnSchema::new("name", "TEXT"))
}

fn posts() -> TableSchema {
    TableSchema::new("posts")
        .column(ColumnSchema::new("id", "INTEGER").primary_key().auto_increment())
        .column(ColumnSchema::new("title", "varchar(200)").not_null())
        .column(ColumnSchema::new("userId", "INTEGER").not_null())
        .column(ColumnSchema::new("published", "BOOLEAN").not_null().default("0"))
        .index(IndexSchema::new("IDX_posts_userId", &["userId"]))
        .references("userId", "users", "id")
}

#[tokio::test]
async fn second_run_detects_no_changes() {
    let dir = TempDir::new().unwrap();
    let models = DeclaredModels::new().table(users()).table(posts());

    let first = Orchestrator::new(config(&dir), models.clone()).run().await.unwrap();
    assert_eq!(first.written(), 2, "{first:?}");
    assert!(!first.has_failures());

    let second = Orchestrator::new(config(&dir), models).run().await.unwrap();
    assert!(second.no_changes(), "{second:?}");
    assert_eq!(migration_files(&dir).len(), 2);
}

#[tokio::test]
async fn generated_migrations_apply_and_revert() {
    let dir = TempDir::new().unwrap();
    let models = DeclaredModels::new().table(users()).table(posts());
    Orchestrator::new(config(&dir), models).run().await.unwrap();

    let (_, pool) = seeded_database(&dir, "app.db").await;
    assert!(table_exists(&pool, "users").await.unwrap());
    assert!(table_exists(&pool, "posts").await.unwrap());

    let migrations = load_migrations(&dir.path().join("migrations")).unwrap();
    let executor = MigrationExecutor::new(pool.clone());
    let reverted = executor.revert_last(&migrations, 2).await.unwrap();
    assert_eq!(reverted.len(), 2);
    assert!(!table_exists(&pool, "users").await.unwrap());
    assert!(!table_exists(&pool, "posts").await.unwrap());
}

#[tokio::test]
async fn not_null_column_with_default_warns_and_uses_alter() {
    let dir = TempDir::new().unwrap();
    Orchestrator::new(config(&dir), DeclaredModels::new().table(users()))
        .run()
        .await
        .unwrap();

    let (inspect, pool) = seeded_database(&dir, "inspect.db").await;
    insert(&pool, "INSERT INTO users (name) VALUES ('a'), ('b'), ('c')").await;
    pool.close().await;

    let desired = users().column(ColumnSchema::new("email", "TEXT").not_null().default("''"));
    let report = Orchestrator::new(
        config(&dir).inspect_database(&inspect),
        DeclaredModels::new().table(desired),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(report.written(), 1, "{report:?}");
    let outcome = &report.outcomes[0];
    assert_eq!(outcome.action, Some(MigrationAction::Update));
    assert_eq!(outcome.changes.len(), 1);
    assert!(outcome
        .warnings
        .iter()
        .any(|w| w.contains("3 existing row(s) receive the default")));

    let TableStatus::Written { path } = &outcome.status else {
        panic!("unexpected status: {:?}", outcome.status);
    };
    let migration = Migration::load(path).unwrap();
    assert_eq!(migration.up.len(), 1);
    assert!(migration.up[0].starts_with("ALTER TABLE \"users\" ADD COLUMN \"email\""));
    assert!(migration.up[0].ends_with("NOT NULL DEFAULT ''"));
}

#[tokio::test]
async fn unsafe_type_change_blocks_the_table() {
    let dir = TempDir::new().unwrap();
    let orders = |status_type: &str| {
        TableSchema::new("orders")
            .column(ColumnSchema::new("id", "INTEGER").primary_key())
            .column(ColumnSchema::new("status", status_type))
    };
    Orchestrator::new(config(&dir), DeclaredModels::new().table(orders("TEXT")))
        .run()
        .await
        .unwrap();

    let (inspect, pool) = seeded_database(&dir, "inspect.db").await;
    insert(&pool, "INSERT INTO orders (status) VALUES ('pending')").await;
    pool.close().await;

    let report = Orchestrator::new(
        config(&dir).inspect_database(&inspect),
        DeclaredModels::new().table(orders("INTEGER")),
    )
    .run()
    .await
    .unwrap();

    assert!(report.has_failures());
    let TableStatus::ValidationFailed { errors, .. } = &report.outcomes[0].status else {
        panic!("unexpected status: {:?}", report.outcomes[0].status);
    };
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("Unsafe type change for orders.status: TEXT → INTEGER"));
    assert!(errors[0].contains("UPDATE \"orders\" SET \"status\" = ? WHERE \"status\" = ?"));
    assert_eq!(migration_files(&dir).len(), 1);
}

#[tokio::test]
async fn forced_run_writes_despite_validation_errors() {
    let dir = TempDir::new().unwrap();
    Orchestrator::new(config(&dir), DeclaredModels::new().table(users()))
        .run()
        .await
        .unwrap();

    let (inspect, pool) = seeded_database(&dir, "inspect.db").await;
    insert(&pool, "INSERT INTO users (name) VALUES (NULL)").await;
    pool.close().await;

    let desired = TableSchema::new("users")
        .column(ColumnSchema::new("id", "INTEGER").primary_key())
        .column(ColumnSchema::new("name", "TEXT").not_null().default("''"));
    let report = Orchestrator::new(
        config(&dir).inspect_database(&inspect).force(true),
        DeclaredModels::new().table(desired),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(report.written(), 1, "{report:?}");
    assert!(report.outcomes[0]
        .warnings
        .iter()
        .any(|w| w.starts_with("forced: Column users.name becomes NOT NULL")));
}

#[tokio::test]
async fn renamed_index_on_same_columns_is_unchanged() {
    let dir = TempDir::new().unwrap();
    let committed = Migration {
        name: "1000_create_orders".to_string(),
        table_name: "orders".to_string(),
        action: MigrationAction::Create,
        description: "Create table orders".to_string(),
        timestamp: 1000,
        changes: Vec::new(),
        up: vec![
            "CREATE TABLE \"orders\" (\"id\" INTEGER PRIMARY KEY, \"customerId\" INTEGER)"
                .to_string(),
            "CREATE INDEX \"idx_abc123\" ON \"orders\" (\"customerId\")".to_string(),
        ],
        down: vec!["DROP TABLE \"orders\"".to_string()],
    };
    committed.save(&dir.path().join("migrations")).unwrap();

    let desired = TableSchema::new("orders")
        .column(ColumnSchema::new("id", "INTEGER").primary_key())
        .column(ColumnSchema::new("customerId", "INTEGER"))
        .index(IndexSchema::new("IDX_orders_customerId", &["customerId"]));
    let report = Orchestrator::new(config(&dir), DeclaredModels::new().table(desired))
        .run()
        .await
        .unwrap();

    assert!(report.no_changes(), "{report:?}");
}

#[tokio::test]
async fn foreign_key_cycle_is_reported_once() {
    let dir = TempDir::new().unwrap();
    let table = |name: &str, target: &str| {
        TableSchema::new(name)
            .column(ColumnSchema::new("id", "INTEGER").primary_key())
            .column(ColumnSchema::new("ref", "INTEGER"))
            .references("ref", target, "id")
    };
    let models = DeclaredModels::new()
        .table(table("a", "b"))
        .table(table("b", "c"))
        .table(table("c", "a"));

    let report = Orchestrator::new(config(&dir).dry_run(true).verify(false), models)
        .run()
        .await
        .unwrap();

    assert_eq!(report.cycle_warnings.len(), 1);
    let warning = &report.cycle_warnings[0];
    assert!(warning.starts_with("Foreign key cycle: "));
    for name in ["a", "b", "c"] {
        assert!(warning.contains(name));
    }
    assert_eq!(report.planned(), 3);
}

#[tokio::test]
async fn missing_inspection_database_fails_the_run() {
    let dir = TempDir::new().unwrap();
    let result = Orchestrator::new(
        config(&dir).inspect_database(Path::new("/nonexistent/inspect.db")),
        DeclaredModels::new().table(users()),
    )
    .run()
    .await;

    assert!(matches!(result, Err(MigrateError::Environment(_))));
    let scratch: Vec<_> = std::fs::read_dir(dir.path().join("scratch"))
        .unwrap()
        .collect();
    assert!(scratch.is_empty());
}

#[tokio::test]
async fn application_database_blocks_unsafe_type_change_by_default() {
    let dir = TempDir::new().unwrap();
    let orders = |status_type: &str| {
        TableSchema::new("orders")
            .column(ColumnSchema::new("id", "INTEGER").primary_key())
            .column(ColumnSchema::new("status", status_type))
    };
    Orchestrator::new(config(&dir), DeclaredModels::new().table(orders("TEXT")))
        .run()
        .await
        .unwrap();

    let (app, pool) = seeded_database(&dir, "app.db").await;
    insert(&pool, "INSERT INTO orders (status) VALUES ('pending')").await;
    pool.close().await;

    let report = Orchestrator::new(
        config(&dir).inspect_database_url(&database_url(&app)),
        DeclaredModels::new().table(orders("INTEGER")),
    )
    .run()
    .await
    .unwrap();

    assert!(report.has_failures(), "{report:?}");
    let TableStatus::ValidationFailed { errors, .. } = &report.outcomes[0].status else {
        panic!("unexpected status: {:?}", report.outcomes[0].status);
    };
    assert!(errors[0].contains("Unsafe type change for orders.status"));
    assert_eq!(migration_files(&dir).len(), 1);
}

#[tokio::test]
async fn application_database_blocks_not_null_column_without_default() {
    let dir = TempDir::new().unwrap();
    Orchestrator::new(config(&dir), DeclaredModels::new().table(users()))
        .run()
        .await
        .unwrap();

    let (app, pool) = seeded_database(&dir, "app.db").await;
    insert(&pool, "INSERT INTO users (name) VALUES ('ann'), ('bob')").await;
    pool.close().await;

    let desired = users().column(ColumnSchema::new("email", "TEXT").not_null());
    let report = Orchestrator::new(
        config(&dir).inspect_database_url(&database_url(&app)),
        DeclaredModels::new().table(desired),
    )
    .run()
    .await
    .unwrap();

    let TableStatus::ValidationFailed { errors, .. } = &report.outcomes[0].status else {
        panic!("unexpected status: {:?}", report.outcomes[0].status);
    };
    assert!(errors[0].contains("users.email is added as NOT NULL without a default"));
    assert!(errors[0].contains("2 row(s)"));
    assert_eq!(migration_files(&dir).len(), 1);
}

#[tokio::test]
async fn rebuilt_tables_round_trip_and_settle() {
    let dir = TempDir::new().unwrap();
    let before = DeclaredModels::new()
        .table(
            TableSchema::new("users")
                .column(ColumnSchema::new("id", "INTEGER").primary_key())
                .column(ColumnSchema::new("name", "TEXT"))
                .column(ColumnSchema::new("legacy", "TEXT")),
        )
        .table(
            TableSchema::new("posts")
                .column(ColumnSchema::new("id", "INTEGER").primary_key())
                .column(ColumnSchema::new("userId", "INTEGER"))
                .column(ColumnSchema::new("title", "TEXT").default("'draft'"))
                .column(ColumnSchema::new("slug", "TEXT")),
        );
    let after = DeclaredModels::new()
        .table(
            TableSchema::new("users")
                .column(ColumnSchema::new("id", "INTEGER").primary_key())
                .column(ColumnSchema::new("name", "varchar(100)").not_null().default("''")),
        )
        .table(
            TableSchema::new("posts")
                .column(ColumnSchema::new("id", "INTEGER").primary_key())
                .column(ColumnSchema::new("userId", "INTEGER"))
                .column(ColumnSchema::new("title", "TEXT").default("'untitled'"))
                .column(ColumnSchema::new("slug", "TEXT").unique())
                .index(IndexSchema::new("IDX_posts_title", &["title"]))
                .references("userId", "users", "id"),
        );

    let first = Orchestrator::new(config(&dir), before).run().await.unwrap();
    assert_eq!(first.written(), 2, "{first:?}");

    let second = Orchestrator::new(config(&dir), after.clone()).run().await.unwrap();
    assert_eq!(second.written(), 2, "{second:?}");
    for outcome in &second.outcomes {
        assert_eq!(outcome.action, Some(MigrationAction::Update));
        assert!(outcome.warnings.is_empty(), "{outcome:?}");
        let TableStatus::Written { path } = &outcome.status else {
            panic!("unexpected status: {:?}", outcome.status);
        };
        let migration = Migration::load(path).unwrap();
        assert!(migration.up.iter().any(|sql| sql.contains("temporary_")));
        assert!(migration.down.iter().any(|sql| sql.contains("temporary_")));
    }

    let third = Orchestrator::new(config(&dir), after).run().await.unwrap();
    assert!(third.no_changes(), "{third:?}");
    assert_eq!(migration_files(&dir).len(), 4);
}

#[tokio::test]
async fn rebuild_keeps_rows_through_apply_and_revert() {
    let dir = TempDir::new().unwrap();
    let before = users().column(ColumnSchema::new("legacy", "TEXT"));
    Orchestrator::new(config(&dir), DeclaredModels::new().table(before))
        .run()
        .await
        .unwrap();

    let (app, pool) = seeded_database(&dir, "app.db").await;
    insert(&pool, "INSERT INTO users (name, legacy) VALUES ('ann', 'x'), ('bob', 'y')").await;
    pool.close().await;

    let after = users().index(IndexSchema::new("IDX_users_name", &["name"]));
    let report = Orchestrator::new(
        config(&dir).inspect_database_url(&database_url(&app)),
        DeclaredModels::new().table(after),
    )
    .run()
    .await
    .unwrap();
    assert_eq!(report.written(), 1, "{report:?}");
    assert!(report.outcomes[0]
        .warnings
        .iter()
        .any(|w| w.contains("Removing column users.legacy discards 2 non-null value(s)")));

    let pool = connect(&database_url(&app)).await.unwrap();
    let executor = MigrationExecutor::new(pool.clone());
    let migrations = load_migrations(&dir.path().join("migrations")).unwrap();
    assert_eq!(executor.apply_all(&migrations).await.unwrap(), 1);
    assert_eq!(names(&pool).await, ["ann", "bob"]);
    let table = get_table_schema(&pool, "users").await.unwrap().unwrap();
    assert!(table.get_column("legacy").is_none());
    assert_eq!(table.indexes.len(), 1);

    let reverted = executor.revert_last(&migrations, 1).await.unwrap();
    assert_eq!(reverted.len(), 1);
    assert_eq!(names(&pool).await, ["ann", "bob"]);
    let table = get_table_schema(&pool, "users").await.unwrap().unwrap();
    assert!(table.get_column("legacy").is_some());
    assert!(table.indexes.is_empty());
}

//! Schema introspection.
//!
//! Reads a live SQLite catalog through `PRAGMA table_info`, `index_list`,
//! `index_info` and `foreign_key_list` and produces a [`TableSchema`].
//! Auto-maintained indexes (those backing PRIMARY KEY and UNIQUE column
//! constraints) are folded into the column flags instead of being reported as
//! secondary indexes.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use tracing::debug;

use crate::error::{MigrateError, Result};
use crate::history::HISTORY_TABLE;
use crate::schema::{
    foreign_key_name, ColumnSchema, DatabaseSchema, ForeignKeyAction, ForeignKeySchema,
    IndexSchema, TableSchema,
};

/// Prefix SQLite uses for indexes it creates for PRIMARY KEY/UNIQUE constraints.
const AUTO_INDEX_PREFIX: &str = "sqlite_autoindex_";

fn quoted_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"'(?:[^']|'')*'|"(?:[^"]|"")*""#).expect("Invalid quoted text regex")
    })
}

fn autoincrement_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)\bPRIMARY\s+KEY(?:\s+(?:ASC|DESC))?(?:\s+ON\s+CONFLICT\s+\w+)?\s+AUTOINCREMENT\b",
        )
        .expect("Invalid autoincrement regex")
    })
}

/// Whether a `CREATE TABLE` statement puts AUTOINCREMENT on its primary key.
/// String literals and quoted identifiers are ignored.
fn declares_autoincrement(create_sql: &str) -> bool {
    let bare = quoted_pattern().replace_all(create_sql, "''");
    autoincrement_pattern().is_match(&bare)
}

/// Returns the schema of `table`, or `None` if the table does not exist.
///
/// Any catalog failure other than the table being absent is returned as
/// [`MigrateError::Introspection`].
pub async fn get_table_schema(pool: &SqlitePool, table: &str) -> Result<Option<TableSchema>> {
    let create_sql: Option<Option<String>> =
        sqlx::query_scalar("SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(table)
            .fetch_optional(pool)
            .await
            .map_err(|e| MigrateError::introspection(table, e))?;

    let Some(create_sql) = create_sql else {
        return Ok(None);
    };
    let autoincrement = create_sql.as_deref().is_some_and(declares_autoincrement);

    let mut columns = read_columns(pool, table, autoincrement).await?;
    let indexes = read_indexes(pool, table, &mut columns).await?;
    let foreign_keys = read_foreign_keys(pool, table).await?;

    debug!(
        table = %table,
        columns = columns.len(),
        indexes = indexes.len(),
        foreign_keys = foreign_keys.len(),
        "Introspected table"
    );

    Ok(Some(TableSchema {
        name: table.to_string(),
        columns,
        indexes,
        foreign_keys,
    }))
}

/// Lists user tables, excluding SQLite internals and the migration history table.
pub async fn list_tables(pool: &SqlitePool) -> Result<Vec<String>> {
    let names: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' \
         AND name NOT LIKE 'sqlite_%' AND name != ? ORDER BY name",
    )
    .bind(HISTORY_TABLE)
    .fetch_all(pool)
    .await?;
    Ok(names)
}

/// Lists every index in the catalog as `(index name, table name)` pairs.
pub async fn list_index_names(pool: &SqlitePool) -> Result<Vec<(String, String)>> {
    let rows: Vec<(String, String)> = sqlx::query_as(
        "SELECT name, tbl_name FROM sqlite_master WHERE type = 'index' ORDER BY name",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Introspects every user table.
pub async fn get_database_schema(pool: &SqlitePool) -> Result<DatabaseSchema> {
    let mut schema = DatabaseSchema::new();
    for name in list_tables(pool).await? {
        if let Some(table) = get_table_schema(pool, &name).await? {
            schema.tables.push(table);
        }
    }
    Ok(schema)
}

/// Returns true if `table` exists.
pub async fn table_exists(pool: &SqlitePool, table: &str) -> Result<bool> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(table)
            .fetch_one(pool)
            .await
            .map_err(|e| MigrateError::introspection(table, e))?;
    Ok(count > 0)
}

fn pragma(name: &str, argument: &str) -> String {
    format!("PRAGMA {}(\"{}\")", name, argument.replace('"', "\"\""))
}

async fn read_columns(
    pool: &SqlitePool,
    table: &str,
    autoincrement: bool,
) -> Result<Vec<ColumnSchema>> {
    let rows = sqlx::query(&pragma("table_info", table))
        .fetch_all(pool)
        .await
        .map_err(|e| MigrateError::introspection(table, e))?;

    let mut columns = Vec::with_capacity(rows.len());
    let mut primary_count = 0;
    for row in &rows {
        let get = |e| MigrateError::introspection(table, e);
        let name: String = row.try_get("name").map_err(get)?;
        let sql_type: Option<String> = row.try_get("type").map_err(get)?;
        let not_null: i64 = row.try_get("notnull").map_err(get)?;
        let default: Option<String> = row.try_get("dflt_value").map_err(get)?;
        let pk: i64 = row.try_get("pk").map_err(get)?;

        if pk > 0 {
            primary_count += 1;
        }
        columns.push(ColumnSchema {
            name,
            sql_type: sql_type.unwrap_or_default(),
            nullable: not_null == 0 && pk == 0,
            primary: pk > 0,
            unique: false,
            default,
            auto_increment: false,
        });
    }

    // AUTOINCREMENT is only legal on a single INTEGER PRIMARY KEY column.
    if autoincrement && primary_count == 1 {
        for column in columns.iter_mut().filter(|c| c.primary) {
            column.auto_increment = column.sql_type.eq_ignore_ascii_case("INTEGER");
        }
    }

    Ok(columns)
}

async fn read_indexes(
    pool: &SqlitePool,
    table: &str,
    columns: &mut [ColumnSchema],
) -> Result<Vec<IndexSchema>> {
    let rows = sqlx::query(&pragma("index_list", table))
        .fetch_all(pool)
        .await
        .map_err(|e| MigrateError::introspection(table, e))?;

    let mut indexes = Vec::new();
    for row in &rows {
        let get = |e| MigrateError::introspection(table, e);
        let name: String = row.try_get("name").map_err(get)?;
        let unique: i64 = row.try_get("unique").map_err(get)?;
        let origin: String = row.try_get("origin").map_err(get)?;

        let index_columns = read_index_columns(pool, table, &name).await?;

        // "pk" backs the primary key, "u" a UNIQUE constraint in the table DDL.
        if origin == "pk" {
            continue;
        }
        if origin == "u" || name.starts_with(AUTO_INDEX_PREFIX) {
            if let [single] = index_columns.as_slice() {
                if let Some(column) = columns.iter_mut().find(|c| &c.name == single) {
                    column.unique = true;
                }
            } else {
                debug!(table = %table, index = %name, "Ignoring multi-column UNIQUE constraint");
            }
            continue;
        }

        indexes.push(IndexSchema {
            name,
            columns: index_columns,
            unique: unique != 0,
        });
    }

    indexes.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(indexes)
}

async fn read_index_columns(pool: &SqlitePool, table: &str, index: &str) -> Result<Vec<String>> {
    let rows = sqlx::query(&pragma("index_info", index))
        .fetch_all(pool)
        .await
        .map_err(|e| MigrateError::introspection(table, e))?;

    let mut ordered = BTreeMap::new();
    for row in &rows {
        let get = |e| MigrateError::introspection(table, e);
        let seqno: i64 = row.try_get("seqno").map_err(get)?;
        // Expression index terms have no column name.
        let name: Option<String> = row.try_get("name").map_err(get)?;
        ordered.insert(seqno, name.unwrap_or_else(|| "<expression>".to_string()));
    }
    Ok(ordered.into_values().collect())
}

async fn read_foreign_keys(pool: &SqlitePool, table: &str) -> Result<Vec<ForeignKeySchema>> {
    let rows = sqlx::query(&pragma("foreign_key_list", table))
        .fetch_all(pool)
        .await
        .map_err(|e| MigrateError::introspection(table, e))?;

    let mut foreign_keys = Vec::with_capacity(rows.len());
    for row in &rows {
        let get = |e| MigrateError::introspection(table, e);
        let referenced_table: String = row.try_get("table").map_err(get)?;
        let column: String = row.try_get("from").map_err(get)?;
        let to: Option<String> = row.try_get("to").map_err(get)?;
        let on_update: String = row.try_get("on_update").map_err(get)?;
        let on_delete: String = row.try_get("on_delete").map_err(get)?;

        // A REFERENCES clause without a column targets the parent's primary key.
        let referenced_column = match to {
            Some(to) => to,
            None => referenced_primary_key(pool, table, &referenced_table).await?,
        };

        foreign_keys.push(ForeignKeySchema {
            name: foreign_key_name(table, &column),
            column,
            referenced_table,
            referenced_column,
            on_delete: ForeignKeyAction::parse(&on_delete),
            on_update: ForeignKeyAction::parse(&on_update),
        });
    }

    foreign_keys.sort_by_key(ForeignKeySchema::logical_key);
    Ok(foreign_keys)
}

async fn referenced_primary_key(
    pool: &SqlitePool,
    table: &str,
    referenced_table: &str,
) -> Result<String> {
    let rows = sqlx::query(&pragma("table_info", referenced_table))
        .fetch_all(pool)
        .await
        .map_err(|e| MigrateError::introspection(table, e))?;

    for row in &rows {
        let pk: i64 = row
            .try_get("pk")
            .map_err(|e| MigrateError::introspection(table, e))?;
        if pk == 1 {
            return row
                .try_get("name")
                .map_err(|e| MigrateError::introspection(table, e));
        }
    }
    Ok("rowid".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn create_test_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory SQLite pool")
    }

    async fn exec(pool: &SqlitePool, sql: &str) {
        sqlx::query(sql).execute(pool).await.unwrap();
    }

    #[test]
    fn test_declares_autoincrement() {
        assert!(declares_autoincrement(
            "CREATE TABLE \"t\" (\"id\" INTEGER PRIMARY KEY AUTOINCREMENT)"
        ));
        assert!(declares_autoincrement(
            "create table t (id integer primary key desc autoincrement)"
        ));
        assert!(!declares_autoincrement(
            "CREATE TABLE t (id INTEGER PRIMARY KEY, kind TEXT DEFAULT 'AUTOINCREMENT')"
        ));
        assert!(!declares_autoincrement(
            "CREATE TABLE t (id INTEGER PRIMARY KEY, \"autoincrement\" INTEGER)"
        ));
    }

    #[tokio::test]
    async fn test_autoincrement_text_in_default_is_ignored() {
        let pool = create_test_pool().await;
        exec(
            &pool,
            "CREATE TABLE t (id INTEGER PRIMARY KEY, kind TEXT DEFAULT 'PRIMARY KEY AUTOINCREMENT')",
        )
        .await;

        let table = get_table_schema(&pool, "t").await.unwrap().unwrap();
        assert!(!table.get_column("id").unwrap().auto_increment);
    }

    #[tokio::test]
    async fn test_missing_table_is_none() {
        let pool = create_test_pool().await;
        assert!(get_table_schema(&pool, "nope").await.unwrap().is_none());
        assert!(!table_exists(&pool, "nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_columns_and_flags() {
        let pool = create_test_pool().await;
        exec(
            &pool,
            "CREATE TABLE chat (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title varchar NOT NULL DEFAULT 'Untitled',
                slug TEXT UNIQUE,
                createdAt datetime NOT NULL DEFAULT (datetime('now')),
                archived boolean
            )",
        )
        .await;

        let table = get_table_schema(&pool, "chat").await.unwrap().unwrap();
        assert_eq!(table.columns.len(), 5);

        let id = table.get_column("id").unwrap();
        assert!(id.primary && id.auto_increment && !id.nullable);

        let title = table.get_column("title").unwrap();
        assert_eq!(title.sql_type, "varchar");
        assert!(!title.nullable);
        assert_eq!(title.default.as_deref(), Some("'Untitled'"));

        assert!(table.get_column("slug").unwrap().unique);
        assert!(table.get_column("archived").unwrap().nullable);
        // The UNIQUE constraint's auto-index is not a secondary index.
        assert!(table.indexes.is_empty());
    }

    #[tokio::test]
    async fn test_indexes_preserve_column_order() {
        let pool = create_test_pool().await;
        exec(&pool, "CREATE TABLE message (id INTEGER PRIMARY KEY, chatId INTEGER, createdAt TEXT)").await;
        exec(&pool, "CREATE UNIQUE INDEX idx_message_chat ON message (createdAt, chatId)").await;

        let table = get_table_schema(&pool, "message").await.unwrap().unwrap();
        assert_eq!(table.indexes.len(), 1);
        assert_eq!(table.indexes[0].name, "idx_message_chat");
        assert_eq!(table.indexes[0].columns, vec!["createdAt", "chatId"]);
        assert!(table.indexes[0].unique);
    }

    #[tokio::test]
    async fn test_foreign_keys() {
        let pool = create_test_pool().await;
        exec(&pool, "CREATE TABLE chat (id INTEGER PRIMARY KEY)").await;
        exec(
            &pool,
            "CREATE TABLE message (
                id INTEGER PRIMARY KEY,
                chatId INTEGER REFERENCES chat (id) ON DELETE CASCADE,
                parentId INTEGER REFERENCES chat
            )",
        )
        .await;

        let table = get_table_schema(&pool, "message").await.unwrap().unwrap();
        assert_eq!(table.foreign_keys.len(), 2);

        let chat = &table.foreign_keys[0];
        assert_eq!(chat.name, "FK_message_chatId");
        assert_eq!(chat.logical_key(), "chatId->chat.id");
        assert_eq!(chat.on_delete, Some(ForeignKeyAction::Cascade));
        assert_eq!(chat.on_update, None);

        // Implicit reference resolves to the parent's primary key.
        assert_eq!(table.foreign_keys[1].logical_key(), "parentId->chat.id");
    }

    #[tokio::test]
    async fn test_list_tables_skips_history() {
        let pool = create_test_pool().await;
        exec(&pool, "CREATE TABLE b (id INTEGER PRIMARY KEY)").await;
        exec(&pool, "CREATE TABLE a (id INTEGER PRIMARY KEY AUTOINCREMENT)").await;
        exec(&pool, &format!("CREATE TABLE {} (id INTEGER)", HISTORY_TABLE)).await;

        // AUTOINCREMENT creates sqlite_sequence, which must not be listed.
        assert_eq!(list_tables(&pool).await.unwrap(), vec!["a", "b"]);
    }
}

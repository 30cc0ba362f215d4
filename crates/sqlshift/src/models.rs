//! Desired-schema input.
//!
//! The desired schema never comes from migrations. A [`ModelSource`] builds it
//! directly inside an empty database, the same way an application would
//! synchronize its models on startup.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;

use crate::dialect::SqliteDialect;
use crate::error::{MigrateError, Result};
use crate::executor::execute_statements;
use crate::schema::{DatabaseSchema, TableSchema};
use crate::statement::Statement;

/// Something that can create the desired schema in an empty database.
#[allow(async_fn_in_trait)]
pub trait ModelSource {
    /// Creates every table, index and foreign key in `pool`.
    async fn synchronize(&self, pool: &SqlitePool) -> Result<()>;
}

/// Models declared as [`TableSchema`] values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeclaredModels {
    tables: Vec<TableSchema>,
}

impl DeclaredModels {
    /// Creates an empty model set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a table.
    #[must_use]
    pub fn table(mut self, table: TableSchema) -> Self {
        self.tables.push(table);
        self
    }

    /// Declared tables.
    #[must_use]
    pub fn tables(&self) -> &[TableSchema] {
        &self.tables
    }

    /// Reads a JSON array of table definitions.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let models: Self = serde_json::from_str(&contents).map_err(|e| MigrateError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        models.check().map_err(|message| MigrateError::ParseError {
            path: path.to_path_buf(),
            message,
        })?;
        Ok(models)
    }

    /// Rejects duplicate table or column names, and index names reused
    /// across tables (SQLite index names are database-wide and
    /// case-insensitive).
    fn check(&self) -> std::result::Result<(), String> {
        let mut tables = std::collections::BTreeSet::new();
        let mut indexes: std::collections::BTreeMap<String, &str> =
            std::collections::BTreeMap::new();
        for table in &self.tables {
            if !tables.insert(table.name.as_str()) {
                return Err(format!("table {} is declared twice", table.name));
            }
            for index in &table.indexes {
                if let Some(owner) =
                    indexes.insert(index.name.to_ascii_lowercase(), table.name.as_str())
                {
                    return Err(format!(
                        "index name {} is declared on both {} and {}",
                        index.name, owner, table.name
                    ));
                }
            }
            let mut columns = std::collections::BTreeSet::new();
            for column in &table.columns {
                if !columns.insert(column.name.as_str()) {
                    return Err(format!(
                        "column {}.{} is declared twice",
                        table.name, column.name
                    ));
                }
            }
        }
        Ok(())
    }
}

impl From<DatabaseSchema> for DeclaredModels {
    fn from(schema: DatabaseSchema) -> Self {
        Self {
            tables: schema.tables,
        }
    }
}

impl ModelSource for DeclaredModels {
    async fn synchronize(&self, pool: &SqlitePool) -> Result<()> {
        self.check().map_err(MigrateError::InvalidModels)?;

        let mut statements = vec![Statement::foreign_keys(false)];
        for table in &self.tables {
            statements.push(Statement::create_table(table.clone()));
            statements.extend(
                table
                    .indexes
                    .iter()
                    .map(|i| Statement::create_index(&table.name, i.clone())),
            );
        }
        statements.push(Statement::foreign_keys(true));

        let sql = SqliteDialect::new().render_all(&statements);
        execute_statements(pool, &sql).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspect::get_table_schema;
    use crate::schema::{ColumnSchema, IndexSchema};
    use sqlx::sqlite::SqlitePoolOptions;
    use tempfile::TempDir;

    async fn create_test_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory SQLite pool")
    }

    #[tokio::test]
    async fn test_synchronize_creates_tables_in_any_order() {
        let pool = create_test_pool().await;
        // `message` references `chat`, which is declared after it.
        let models = DeclaredModels::new()
            .table(
                TableSchema::new("message")
                    .column(ColumnSchema::new("id", "INTEGER").primary_key())
                    .column(ColumnSchema::new("chatId", "INTEGER"))
                    .references("chatId", "chat", "id")
                    .index(IndexSchema::new("IDX_message_chatId", &["chatId"])),
            )
            .table(TableSchema::new("chat").column(ColumnSchema::new("id", "INTEGER").primary_key()));

        models.synchronize(&pool).await.unwrap();

        let message = get_table_schema(&pool, "message").await.unwrap().unwrap();
        assert_eq!(message.indexes.len(), 1);
        assert_eq!(message.foreign_keys[0].referenced_table, "chat");
        assert!(get_table_schema(&pool, "chat").await.unwrap().is_some());
    }

    #[test]
    fn test_load_models_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("models.json");
        fs::write(
            &path,
            r#"[
                {
                    "table": "users",
                    "columns": [
                        { "name": "id", "type": "INTEGER", "primary": true, "nullable": false },
                        { "name": "email", "type": "varchar", "nullable": false, "unique": true }
                    ],
                    "indexes": [ { "name": "IDX_users_email", "columns": ["email"], "unique": false } ]
                }
            ]"#,
        )
        .unwrap();

        let models = DeclaredModels::load(&path).unwrap();
        assert_eq!(models.tables().len(), 1);
        let users = &models.tables()[0];
        assert_eq!(users.name, "users");
        assert!(users.columns[1].unique);
        assert!(users.foreign_keys.is_empty());
    }

    #[test]
    fn test_load_rejects_duplicates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("models.json");
        fs::write(
            &path,
            r#"[{ "table": "a", "columns": [ { "name": "x", "type": "TEXT" }, { "name": "x", "type": "TEXT" } ] }]"#,
        )
        .unwrap();

        let err = DeclaredModels::load(&path).unwrap_err();
        assert!(err.to_string().contains("column a.x is declared twice"));
    }

    #[tokio::test]
    async fn test_synchronize_rejects_index_name_shared_across_tables() {
        let pool = create_test_pool().await;
        let models = DeclaredModels::new()
            .table(
                TableSchema::new("users")
                    .column(ColumnSchema::new("name", "TEXT"))
                    .index(IndexSchema::new("idx_name", &["name"])),
            )
            .table(
                TableSchema::new("teams")
                    .column(ColumnSchema::new("title", "TEXT"))
                    .index(IndexSchema::new("IDX_NAME", &["title"])),
            );

        let err = models.synchronize(&pool).await.unwrap_err();
        assert!(matches!(err, MigrateError::InvalidModels(_)));
        assert!(err
            .to_string()
            .contains("index name IDX_NAME is declared on both users and teams"));
        assert!(get_table_schema(&pool, "users").await.unwrap().is_none());
    }
}

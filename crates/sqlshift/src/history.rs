//! Migration history tracking.
//!
//! This module manages the `sqlshift_migrations` table that records which
//! migration files have been applied to a database. The table is bookkeeping
//! only and is never reported by the introspector.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;

use crate::error::{MigrateError, Result};

/// Name of the history table.
pub const HISTORY_TABLE: &str = "sqlshift_migrations";

/// SQL to create the migrations history table.
pub const CREATE_MIGRATIONS_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS sqlshift_migrations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    table_name TEXT NOT NULL,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
)
"#;

/// A record of an applied migration.
#[derive(Debug, Clone)]
pub struct AppliedMigration {
    /// Unique ID in the history table.
    pub id: i64,
    /// Migration name.
    pub name: String,
    /// Table the migration changed.
    pub table_name: String,
    /// When the migration was applied.
    pub applied_at: DateTime<Utc>,
}

type AppliedRow = (i64, String, String, String);

impl From<AppliedRow> for AppliedMigration {
    fn from((id, name, table_name, applied_at): AppliedRow) -> Self {
        Self {
            id,
            name,
            table_name,
            applied_at: parse_applied_at(&applied_at),
        }
    }
}

fn parse_applied_at(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| {
            // SQLite datetime('now') format
            chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
                .map(|dt| dt.and_utc())
                .unwrap_or_else(|_| Utc::now())
        })
}

/// Manages the migration history in the database.
pub struct MigrationHistory {
    pool: SqlitePool,
}

impl MigrationHistory {
    /// Creates a new migration history manager.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Ensures the history table exists.
    pub async fn ensure_table(&self) -> Result<()> {
        sqlx::query(CREATE_MIGRATIONS_TABLE_SQL)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Records a migration as applied.
    pub async fn record_applied(&self, name: &str, table_name: &str) -> Result<()> {
        sqlx::query("INSERT INTO sqlshift_migrations (name, table_name) VALUES (?, ?)")
            .bind(name)
            .bind(table_name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Removes a migration record (for revert).
    pub async fn record_unapplied(&self, name: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM sqlshift_migrations WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(MigrateError::MigrationNotFound(name.to_string()));
        }

        Ok(())
    }

    /// Checks if a migration has been applied.
    pub async fn is_applied(&self, name: &str) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM sqlshift_migrations WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.is_some())
    }

    /// Gets all applied migrations in application order.
    pub async fn get_applied(&self) -> Result<Vec<AppliedMigration>> {
        let rows: Vec<AppliedRow> = sqlx::query_as(
            "SELECT id, name, table_name, applied_at FROM sqlshift_migrations ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(AppliedMigration::from).collect())
    }

    /// Gets the most recently applied migration.
    pub async fn get_last_applied(&self) -> Result<Option<AppliedMigration>> {
        let row: Option<AppliedRow> = sqlx::query_as(
            "SELECT id, name, table_name, applied_at FROM sqlshift_migrations ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(AppliedMigration::from))
    }

    /// Counts applied migrations.
    pub async fn count_applied(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sqlshift_migrations")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    /// Gets the names of all applied migrations.
    pub async fn get_applied_set(&self) -> Result<HashSet<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT name FROM sqlshift_migrations")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }
}

//! Migration executor.
//!
//! This module splits migration SQL into statements, runs a statement list
//! atomically, and applies or reverts migration files against a database.

use sqlx::sqlite::{SqliteConnection, SqlitePool};
use sqlx::Connection;
use tracing::{debug, info, warn};

use crate::error::{MigrateError, Result};
use crate::history::MigrationHistory;
use crate::migration::Migration;

/// Splits SQL text into statements on `;`, ignoring semicolons inside
/// quotes, bracketed identifiers and comments. Comments are dropped and
/// empty statements are skipped.
#[must_use]
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut chars = sql.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\'' | '"' | '`' | '[' => {
                let close = if ch == '[' { ']' } else { ch };
                current.push(ch);
                while let Some(inner) = chars.next() {
                    current.push(inner);
                    if inner == close {
                        // Doubled quote is an escaped quote.
                        if close != ']' && chars.peek() == Some(&close) {
                            if let Some(escaped) = chars.next() {
                                current.push(escaped);
                            }
                            continue;
                        }
                        break;
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                for inner in chars.by_ref() {
                    if inner == '\n' {
                        current.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut previous = '\0';
                for inner in chars.by_ref() {
                    if previous == '*' && inner == '/' {
                        break;
                    }
                    previous = inner;
                }
                current.push(' ');
            }
            ';' => {
                push_statement(&mut statements, &current);
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    push_statement(&mut statements, &current);
    statements
}

fn push_statement(statements: &mut Vec<String>, text: &str) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        statements.push(trimmed.to_string());
    }
}

fn is_pragma(sql: &str) -> bool {
    sql.trim_start()
        .get(..6)
        .is_some_and(|head| head.eq_ignore_ascii_case("PRAGMA"))
}

/// Runs `statements` on a single connection.
///
/// Leading `PRAGMA` statements run first, the remaining statements run in
/// one transaction, and trailing `PRAGMA` statements run after the commit.
/// SQLite ignores `PRAGMA foreign_keys` inside a transaction, so pragmas are
/// never part of it. On failure the transaction is rolled back, the trailing
/// pragmas still run so the pooled connection is left as the statement list
/// intends, and the error names the failing statement.
pub async fn execute_statements(pool: &SqlitePool, statements: &[String]) -> Result<()> {
    let body_start = statements
        .iter()
        .position(|s| !is_pragma(s))
        .unwrap_or(statements.len());
    let body_end = statements
        .iter()
        .rposition(|s| !is_pragma(s))
        .map_or(body_start, |i| i + 1);

    let mut conn = pool.acquire().await?;

    for (index, sql) in statements[..body_start].iter().enumerate() {
        debug!(sql = %sql, "Executing SQL");
        sqlx::query(sql)
            .execute(&mut *conn)
            .await
            .map_err(|e| execution_error(index, sql, &e))?;
    }

    if body_start < body_end {
        let body = &statements[body_start..body_end];
        if let Err(e) = run_transaction(&mut conn, body, body_start).await {
            for sql in &statements[body_end..] {
                if let Err(restore) = sqlx::query(sql).execute(&mut *conn).await {
                    warn!(sql = %sql, error = %restore, "Failed to restore connection pragma");
                }
            }
            return Err(e);
        }
    }

    for (offset, sql) in statements[body_end..].iter().enumerate() {
        debug!(sql = %sql, "Executing SQL");
        sqlx::query(sql)
            .execute(&mut *conn)
            .await
            .map_err(|e| execution_error(body_end + offset, sql, &e))?;
    }

    Ok(())
}

/// Runs `statements` in one transaction, rolling back on the first failure.
/// `offset` is the position of the first statement in the full list.
async fn run_transaction(
    conn: &mut SqliteConnection,
    statements: &[String],
    offset: usize,
) -> Result<()> {
    let mut tx = conn.begin().await?;
    for (position, sql) in statements.iter().enumerate() {
        debug!(sql = %sql, "Executing SQL");
        if let Err(e) = sqlx::query(sql).execute(&mut *tx).await {
            let error = execution_error(offset + position, sql, &e);
            tx.rollback().await?;
            return Err(error);
        }
    }
    tx.commit().await?;
    Ok(())
}

/// Splits `sql` and runs it with [`execute_statements`].
pub async fn execute_sql(pool: &SqlitePool, sql: &str) -> Result<()> {
    execute_statements(pool, &split_statements(sql)).await
}

fn execution_error(index: usize, statement: &str, error: &sqlx::Error) -> MigrateError {
    let message = match error {
        sqlx::Error::Database(db) => db.message().to_string(),
        other => other.to_string(),
    };
    MigrateError::Execution {
        index,
        statement: statement.to_string(),
        message,
    }
}

/// Applied/pending state of one migration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    /// Migration name.
    pub name: String,
    /// Table the migration changes.
    pub table_name: String,
    /// Whether it is recorded in the history table.
    pub applied: bool,
}

/// Applies and reverts migration files against a database.
pub struct MigrationExecutor {
    pool: SqlitePool,
    history: MigrationHistory,
    dry_run: bool,
}

impl MigrationExecutor {
    /// Creates a new migration executor.
    pub fn new(pool: SqlitePool) -> Self {
        let history = MigrationHistory::new(pool.clone());
        Self {
            pool,
            history,
            dry_run: false,
        }
    }

    /// Enables dry-run mode (SQL is printed but not executed).
    #[must_use]
    pub fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }

    /// Ensures the history table exists.
    pub async fn init(&self) -> Result<()> {
        self.history.ensure_table().await
    }

    /// Returns the migration history.
    #[must_use]
    pub fn history(&self) -> &MigrationHistory {
        &self.history
    }

    /// Checks if a migration has been applied.
    pub async fn is_applied(&self, name: &str) -> Result<bool> {
        self.history.is_applied(name).await
    }

    /// Applies a single migration. Already-applied migrations are skipped.
    pub async fn apply(&self, migration: &Migration) -> Result<()> {
        if self.history.is_applied(&migration.name).await? {
            warn!(name = %migration.name, "Migration already applied, skipping");
            return Ok(());
        }

        info!(name = %migration.name, table = %migration.table_name, "Applying migration");

        if self.dry_run {
            println!("-- {}", migration.name);
            println!("{}", migration.up_sql());
            return Ok(());
        }

        execute_statements(&self.pool, &migration.up).await?;
        self.history
            .record_applied(&migration.name, &migration.table_name)
            .await?;

        info!(name = %migration.name, "Migration applied successfully");
        Ok(())
    }

    /// Reverts a single migration by running its `down` statements.
    pub async fn revert(&self, migration: &Migration) -> Result<()> {
        if !self.history.is_applied(&migration.name).await? {
            warn!(name = %migration.name, "Migration not applied, skipping revert");
            return Ok(());
        }

        info!(name = %migration.name, table = %migration.table_name, "Reverting migration");

        if self.dry_run {
            println!("-- {} (revert)", migration.name);
            println!("{}", migration.down_sql());
            return Ok(());
        }

        execute_statements(&self.pool, &migration.down).await?;
        self.history.record_unapplied(&migration.name).await?;

        info!(name = %migration.name, "Migration reverted successfully");
        Ok(())
    }

    /// Applies every pending migration in order. Returns how many ran.
    pub async fn apply_all(&self, migrations: &[Migration]) -> Result<usize> {
        let pending = self.pending(migrations).await?;
        for migration in &pending {
            self.apply(migration).await?;
        }
        Ok(pending.len())
    }

    /// Reverts the `count` most recently applied migrations, newest first.
    /// Returns the reverted names.
    pub async fn revert_last(&self, migrations: &[Migration], count: usize) -> Result<Vec<String>> {
        let applied = self.history.get_applied().await?;
        let mut reverted = Vec::new();

        for record in applied.iter().rev().take(count) {
            let migration = migrations
                .iter()
                .find(|m| m.name == record.name)
                .ok_or_else(|| MigrateError::MigrationNotFound(record.name.clone()))?;
            self.revert(migration).await?;
            reverted.push(migration.name.clone());
        }

        Ok(reverted)
    }

    /// Returns pending migrations (not yet applied).
    pub async fn pending<'a>(&self, migrations: &'a [Migration]) -> Result<Vec<&'a Migration>> {
        let applied = self.history.get_applied_set().await?;
        Ok(migrations
            .iter()
            .filter(|m| !applied.contains(&m.name))
            .collect())
    }

    /// Applied/pending state of every migration file.
    pub async fn status(&self, migrations: &[Migration]) -> Result<Vec<MigrationStatus>> {
        let applied = self.history.get_applied_set().await?;

        let unknown: Vec<&String> = applied
            .iter()
            .filter(|name| !migrations.iter().any(|m| &m.name == *name))
            .collect();
        if !unknown.is_empty() {
            warn!(count = unknown.len(), "History records migrations with no file");
        }

        Ok(migrations
            .iter()
            .map(|m| MigrationStatus {
                name: m.name.clone(),
                table_name: m.table_name.clone(),
                applied: applied.contains(&m.name),
            })
            .collect())
    }
}

//! Migration files.
//!
//! A migration is plain data: metadata plus the ordered SQL statements for
//! `up` and `down`, stored as one pretty-printed JSON document per changed
//! table. Nothing is compiled or loaded dynamically; the executor runs the SQL
//! text directly.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dialect::SqliteDialect;
use crate::diff::SchemaDiff;
use crate::error::{MigrateError, Result};
use crate::generator::MigrationPlan;

/// What a migration does to its table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationAction {
    /// The table is new.
    Create,
    /// The table exists and changes shape.
    Update,
    /// The table is removed.
    Drop,
}

impl MigrationAction {
    /// Lowercase name used in file names.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Drop => "drop",
        }
    }
}

impl fmt::Display for MigrationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A generated migration for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Migration {
    /// Unique name, `<timestamp>_<action>_<table>`.
    pub name: String,
    /// Table the migration changes.
    pub table_name: String,
    /// Create, update or drop.
    pub action: MigrationAction,
    /// One-line summary.
    pub description: String,
    /// Creation time in milliseconds since the epoch.
    pub timestamp: i64,
    /// Human-readable change lines.
    #[serde(default)]
    pub changes: Vec<String>,
    /// Statements applied by `up`, in order.
    pub up: Vec<String>,
    /// Statements applied by `down`, in order.
    pub down: Vec<String>,
}

impl Migration {
    /// Builds a migration from a generated plan and the diff it came from.
    #[must_use]
    pub fn from_plan(
        plan: &MigrationPlan,
        diff: &SchemaDiff,
        timestamp: i64,
        dialect: &SqliteDialect,
    ) -> Self {
        let description = match plan.action {
            MigrationAction::Create => format!("Create table {}", plan.table),
            MigrationAction::Update => format!("Update table {}", plan.table),
            MigrationAction::Drop => format!("Drop table {}", plan.table),
        };
        Self {
            name: format!("{}_{}_{}", timestamp, plan.action, plan.table),
            table_name: plan.table.clone(),
            action: plan.action,
            description,
            timestamp,
            changes: diff.describe(),
            up: plan.up_sql(dialect),
            down: plan.down_sql(dialect),
        }
    }

    /// File name inside the migrations directory.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}.json", self.name)
    }

    /// `up` as semicolon-separated SQL text.
    #[must_use]
    pub fn up_sql(&self) -> String {
        join_statements(&self.up)
    }

    /// `down` as semicolon-separated SQL text.
    #[must_use]
    pub fn down_sql(&self) -> String {
        join_statements(&self.down)
    }

    /// Reads a migration file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(|e| MigrateError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Writes this migration into `dir`, refusing to overwrite.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name());
        if path.exists() {
            return Err(MigrateError::MigrationExists(path));
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json + "\n")?;
        debug!(path = %path.display(), "Wrote migration file");
        Ok(path)
    }
}

fn join_statements(statements: &[String]) -> String {
    if statements.is_empty() {
        return String::new();
    }
    format!("{};", statements.join(";\n"))
}

/// Loads every `*.json` migration in `dir`, ordered by timestamp then name.
pub fn load_migrations(dir: &Path) -> Result<Vec<Migration>> {
    if !dir.is_dir() {
        return Err(MigrateError::MigrationsDirNotFound(dir.to_path_buf()));
    }

    let mut migrations = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            migrations.push(Migration::load(&path)?);
        }
    }
    migrations.sort_by(|a, b| (a.timestamp, &a.name).cmp(&(b.timestamp, &b.name)));
    Ok(migrations)
}

/// Like [`load_migrations`], but a missing directory means no migrations.
pub fn load_migrations_or_empty(dir: &Path) -> Result<Vec<Migration>> {
    match load_migrations(dir) {
        Err(MigrateError::MigrationsDirNotFound(_)) => Ok(Vec::new()),
        other => other,
    }
}

/// Millisecond clock that never returns the same value twice.
///
/// Migration names sort by timestamp, so two files written in the same
/// millisecond still need distinct, increasing stamps.
#[derive(Debug, Default)]
pub struct MigrationClock {
    last: AtomicI64,
}

impl MigrationClock {
    /// Creates a clock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a clock whose next tick is strictly after `floor`.
    #[must_use]
    pub fn after(floor: i64) -> Self {
        Self {
            last: AtomicI64::new(floor),
        }
    }

    /// Returns the next timestamp: the current time, or one past the previous
    /// value if the clock has not advanced.
    pub fn next(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let previous = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        now.max(previous + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::SchemaDiff;
    use crate::generator::MigrationGenerator;
    use crate::schema::{ColumnSchema, TableSchema};
    use tempfile::TempDir;

    fn users() -> TableSchema {
        TableSchema::new("users")
            .column(ColumnSchema::new("id", "INTEGER").primary_key())
            .column(ColumnSchema::new("name", "TEXT").not_null())
    }

    fn create_users(timestamp: i64) -> Migration {
        let table = users();
        let plan = MigrationGenerator::with_suffix("1")
            .generate(None, Some(&table))
            .unwrap();
        Migration::from_plan(
            &plan,
            &SchemaDiff::create(&table),
            timestamp,
            &SqliteDialect::new(),
        )
    }

    #[test]
    fn test_from_plan() {
        let migration = create_users(1_700_000_000_000);
        assert_eq!(migration.name, "1700000000000_create_users");
        assert_eq!(migration.file_name(), "1700000000000_create_users.json");
        assert_eq!(migration.action, MigrationAction::Create);
        assert_eq!(migration.description, "Create table users");
        assert_eq!(migration.changes[0], "+ Created table users");
        assert_eq!(migration.down_sql(), "DROP TABLE \"users\";");
        assert!(migration.up_sql().starts_with("CREATE TABLE \"users\""));
    }

    #[test]
    fn test_save_load_and_ordering() {
        let dir = TempDir::new().unwrap();
        let later = create_users(2_000);
        let mut earlier = create_users(1_000);
        earlier.table_name = "accounts".to_string();
        earlier.name = "1000_create_accounts".to_string();

        later.save(dir.path()).unwrap();
        earlier.save(dir.path()).unwrap();
        fs::write(dir.path().join("README.md"), "not a migration").unwrap();

        let loaded = load_migrations(dir.path()).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0], earlier);
        assert_eq!(loaded[1], later);
    }

    #[test]
    fn test_save_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        let migration = create_users(1_000);
        migration.save(dir.path()).unwrap();
        assert!(matches!(
            migration.save(dir.path()),
            Err(MigrateError::MigrationExists(_))
        ));
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            load_migrations(dir.path()),
            Err(MigrateError::ParseError { .. })
        ));
    }

    #[test]
    fn test_missing_directory() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing");
        assert!(matches!(
            load_migrations(&missing),
            Err(MigrateError::MigrationsDirNotFound(_))
        ));
        assert!(load_migrations_or_empty(&missing).unwrap().is_empty());
    }

    #[test]
    fn test_clock_is_strictly_increasing() {
        let clock = MigrationClock::new();
        let mut previous = clock.next();
        for _ in 0..1000 {
            let next = clock.next();
            assert!(next > previous);
            previous = next;
        }

        let far_future = chrono::Utc::now().timestamp_millis() + 60_000;
        let clock = MigrationClock::after(far_future);
        assert_eq!(clock.next(), far_future + 1);
    }
}

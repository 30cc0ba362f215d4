//! Migration SQL generator.
//!
//! Turns the current and desired definition of one table into a
//! [`MigrationPlan`]: the ordered statements for `up` and for `down`.
//!
//! Two strategies are used:
//!
//! - the cheap path (`ALTER TABLE ... ADD COLUMN`, `CREATE INDEX`,
//!   `DROP INDEX`) when the diff only adds plain columns or touches indexes;
//! - table recreation for everything SQLite cannot alter in place: column
//!   modifications and removals, any foreign key change, and added columns
//!   `ADD COLUMN` rejects.
//!
//! `down` is the forward plan from the desired definition back to the current
//! one, so each direction picks its own strategy.

use serde::Serialize;
use tracing::debug;

use crate::dialect::SqliteDialect;
use crate::diff::{compare, SchemaDiff};
use crate::error::{MigrateError, Result};
use crate::migration::MigrationAction;
use crate::schema::TableSchema;
use crate::statement::Statement;

/// Generated statements for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationPlan {
    /// Table the plan applies to.
    pub table: String,
    /// Whether the table is created, updated or dropped.
    pub action: MigrationAction,
    /// Statements that move current → desired.
    pub up: Vec<Statement>,
    /// Statements that move desired → current.
    pub down: Vec<Statement>,
}

impl MigrationPlan {
    /// Returns true if there is nothing to apply.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.up.is_empty()
    }

    /// Returns true if either direction rebuilds the table.
    #[must_use]
    pub fn uses_recreation(&self) -> bool {
        self.up.iter().chain(&self.down).any(Statement::is_recreation)
    }

    /// Rendered `up` statements.
    #[must_use]
    pub fn up_sql(&self, dialect: &SqliteDialect) -> Vec<String> {
        dialect.render_all(&self.up)
    }

    /// Rendered `down` statements.
    #[must_use]
    pub fn down_sql(&self, dialect: &SqliteDialect) -> Vec<String> {
        dialect.render_all(&self.down)
    }
}

/// Generates migration plans.
#[derive(Debug, Clone)]
pub struct MigrationGenerator {
    suffix: String,
}

impl Default for MigrationGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationGenerator {
    /// Creates a generator whose temporary tables are suffixed with the
    /// current time in milliseconds.
    #[must_use]
    pub fn new() -> Self {
        Self {
            suffix: chrono::Utc::now().timestamp_millis().to_string(),
        }
    }

    /// Uses a fixed temporary-table suffix.
    #[must_use]
    pub fn with_suffix(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
        }
    }

    /// Name of the temporary table used when rebuilding `table`.
    #[must_use]
    pub fn temp_table_name(&self, table: &str) -> String {
        format!("temporary_{}_{}", table, self.suffix)
    }

    /// Plans the migration of one table. Either side may be absent.
    pub fn generate(
        &self,
        current: Option<&TableSchema>,
        desired: Option<&TableSchema>,
    ) -> Result<MigrationPlan> {
        let (table, action) = match (current, desired) {
            (None, Some(d)) => (d.name.clone(), MigrationAction::Create),
            (Some(c), None) => (c.name.clone(), MigrationAction::Drop),
            (Some(_), Some(d)) => (d.name.clone(), MigrationAction::Update),
            (None, None) => {
                return Err(MigrateError::generation(
                    "<unknown>",
                    "table is absent on both sides",
                ))
            }
        };

        let up = self.forward(current, desired)?;
        let down = self.forward(desired, current)?;
        debug!(table = %table, up = up.len(), down = down.len(), "Planned migration");

        Ok(MigrationPlan {
            table,
            action,
            up,
            down,
        })
    }

    /// Statements that take the database from `from` to `to`.
    fn forward(
        &self,
        from: Option<&TableSchema>,
        to: Option<&TableSchema>,
    ) -> Result<Vec<Statement>> {
        match (from, to) {
            (None, None) => Ok(Vec::new()),
            (Some(from), None) => Ok(vec![Statement::drop_table(&from.name)]),
            (None, Some(to)) => {
                check_table(to)?;
                let mut statements = vec![Statement::create_table(to.clone())];
                statements.extend(index_statements(to));
                Ok(statements)
            }
            (Some(from), Some(to)) => {
                let diff = compare(from, to);
                if !diff.has_changes() {
                    Ok(Vec::new())
                } else if diff.requires_recreation() {
                    self.recreate(from, to)
                } else {
                    Ok(alter_in_place(&diff))
                }
            }
        }
    }

    /// create-temp → copy → drop-original → rename → recreate indexes,
    /// with foreign key enforcement off for the duration.
    fn recreate(&self, from: &TableSchema, to: &TableSchema) -> Result<Vec<Statement>> {
        check_table(to)?;

        let copy_columns: Vec<String> = to
            .columns
            .iter()
            .filter(|c| from.get_column(&c.name).is_some())
            .map(|c| c.name.clone())
            .collect();

        let mut statements = vec![
            Statement::foreign_keys(false),
            Statement::recreate_table(to.clone(), self.temp_table_name(&to.name), copy_columns),
        ];
        statements.extend(index_statements(to));
        statements.push(Statement::foreign_keys(true));
        Ok(statements)
    }
}

fn alter_in_place(diff: &SchemaDiff) -> Vec<Statement> {
    let mut statements: Vec<Statement> = diff
        .removed_indexes
        .iter()
        .map(|i| Statement::drop_index(&i.name))
        .collect();
    statements.extend(
        diff.added_columns
            .iter()
            .map(|c| Statement::add_column(&diff.table, c.clone())),
    );
    statements.extend(
        diff.added_indexes
            .iter()
            .map(|i| Statement::create_index(&diff.table, i.clone())),
    );
    statements
}

fn index_statements(table: &TableSchema) -> impl Iterator<Item = Statement> + '_ {
    let mut indexes: Vec<_> = table.indexes.iter().collect();
    indexes.sort_by(|a, b| a.name.cmp(&b.name));
    indexes
        .into_iter()
        .map(|i| Statement::create_index(&table.name, i.clone()))
}

fn check_table(table: &TableSchema) -> Result<()> {
    if table.columns.is_empty() {
        return Err(MigrateError::generation(&table.name, "table has no columns"));
    }
    if let Some(index) = table
        .indexes
        .iter()
        .find(|i| i.columns.iter().any(|c| c.starts_with('<')))
    {
        return Err(MigrateError::generation(
            &table.name,
            format!("index {} is built on an expression and cannot be regenerated", index.name),
        ));
    }
    Ok(())
}

//! Migration validation.
//!
//! Checks a [`SchemaDiff`] against the data it will touch before the
//! generated SQL is trusted. Blocking problems are errors; anything the
//! caller should merely know about is a warning.
//!
//! Data-dependent checks run against an inspection database. A table or
//! column missing from that database counts as empty.

use std::collections::{BTreeMap, BTreeSet};

use sqlx::sqlite::SqlitePool;
use tracing::debug;

use crate::compat::{CompatibilityTable, Safety};
use crate::dialect::SqliteDialect;
use crate::diff::{DiffKind, SchemaDiff};
use crate::error::{MigrateError, Result};
use crate::introspect::get_table_schema;
use crate::schema::{ColumnSchema, DatabaseSchema, ForeignKeySchema, TableSchema};

/// Outcome of validating one table's diff.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    /// Blocking problems.
    pub errors: Vec<String>,
    /// Non-blocking notices.
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// True iff there are no errors.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Converts a failed result into [`MigrateError::Validation`].
    pub fn into_result(self, table: &str) -> Result<Vec<String>> {
        if self.is_valid() {
            Ok(self.warnings)
        } else {
            Err(MigrateError::Validation {
                table: table.to_string(),
                errors: self.errors,
            })
        }
    }
}

/// Run-wide information the per-table checks need.
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext<'a> {
    /// `(index, table)` pairs present in the current database's catalog.
    pub catalog_indexes: &'a [(String, String)],
}

/// Validates diffs before their migration is written.
#[derive(Debug, Clone, Default)]
pub struct MigrationValidator {
    compat: CompatibilityTable,
    dialect: SqliteDialect,
}

impl MigrationValidator {
    /// Creates a validator with the default type compatibility table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a custom type compatibility table.
    #[must_use]
    pub fn with_compatibility(mut self, compat: CompatibilityTable) -> Self {
        self.compat = compat;
        self
    }

    /// Validates `diff`. `inspect` is the database whose data is checked.
    pub async fn validate(
        &self,
        diff: &SchemaDiff,
        inspect: &SqlitePool,
        context: ValidationContext<'_>,
    ) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();
        let table = diff.table.as_str();

        self.check_index_names(diff, context, &mut result);

        let existing = get_table_schema(inspect, table).await?;
        let probe = DataProbe {
            pool: inspect,
            dialect: &self.dialect,
            table,
            existing: existing.as_ref(),
        };

        match diff.kind {
            DiffKind::Create => {}
            DiffKind::Drop => {
                let rows = probe.row_count().await?;
                if rows > 0 {
                    result
                        .warnings
                        .push(format!("Table {} will be dropped with {} row(s)", table, rows));
                }
            }
            DiffKind::Update => {
                self.check_update(diff, &probe, &mut result).await?;
            }
        }

        debug!(
            table = %table,
            errors = result.errors.len(),
            warnings = result.warnings.len(),
            "Validated diff"
        );
        Ok(result)
    }

    async fn check_update(
        &self,
        diff: &SchemaDiff,
        probe: &DataProbe<'_>,
        result: &mut ValidationResult,
    ) -> Result<()> {
        let table = diff.table.as_str();
        let rows = probe.row_count().await?;

        for column in &diff.added_columns {
            check_added_column(table, column, rows, result);
        }

        for column in &diff.removed_columns {
            let values = probe.non_null_count(&column.name).await?;
            if values > 0 {
                result.warnings.push(format!(
                    "Removing column {}.{} discards {} non-null value(s)",
                    table, column.name, values
                ));
            }
        }

        for change in &diff.modified_columns {
            if change.becomes_not_null() {
                let nulls = probe.null_count(&change.name).await?;
                if nulls > 0 {
                    result.errors.push(format!(
                        "Column {}.{} becomes NOT NULL but {} row(s) hold NULL. Fill them first: UPDATE {} SET {} = ? WHERE {} IS NULL",
                        table,
                        change.name,
                        nulls,
                        self.dialect.quote_identifier(table),
                        self.dialect.quote_identifier(&change.name),
                        self.dialect.quote_identifier(&change.name)
                    ));
                }
            }

            if change.type_changed(table)
                && self.compat.classify(&change.old_type, &change.new_type)
                    == Safety::RequiresEmptyColumn
            {
                let values = probe.non_null_count(&change.name).await?;
                if values > 0 {
                    result.errors.push(format!(
                        "Unsafe type change for {}.{}: {} → {} with {} non-null value(s). Convert the data first: {}",
                        table,
                        change.name,
                        change.old_type,
                        change.new_type,
                        values,
                        self.remediation_hint(table, &change.name)
                    ));
                }
            }

            if change.becomes_unique() {
                let duplicates = probe.duplicate_count(&change.name).await?;
                if duplicates > 0 {
                    result.errors.push(format!(
                        "Column {}.{} becomes UNIQUE but {} value(s) are duplicated",
                        table, change.name, duplicates
                    ));
                }
            }
        }

        for fk in &diff.added_foreign_keys {
            let orphans = probe.orphan_count(fk).await?;
            if orphans > 0 {
                result.warnings.push(format!(
                    "Foreign key {}.{} → {}.{} has {} orphan value(s)",
                    table, fk.column, fk.referenced_table, fk.referenced_column, orphans
                ));
            }
        }

        Ok(())
    }

    /// Parameterized statement for cleaning a column before an unsafe
    /// conversion.
    #[must_use]
    pub fn remediation_hint(&self, table: &str, column: &str) -> String {
        let column = self.dialect.quote_identifier(column);
        format!(
            "UPDATE {} SET {} = ? WHERE {} = ?",
            self.dialect.quote_identifier(table),
            column,
            column
        )
    }

    /// Index names are global in SQLite. Clashes between desired tables are
    /// rejected by the model source before this runs.
    fn check_index_names(
        &self,
        diff: &SchemaDiff,
        context: ValidationContext<'_>,
        result: &mut ValidationResult,
    ) {
        let table = diff.table.as_str();
        let recreated = diff.requires_recreation();

        for index in &diff.added_indexes {
            let name = index.name.as_str();
            let catalog_owner = context.catalog_indexes.iter().find(|(existing, owner)| {
                existing.eq_ignore_ascii_case(name)
                    && (owner != table
                        || !(recreated
                            || diff
                                .removed_indexes
                                .iter()
                                .any(|i| i.name.eq_ignore_ascii_case(name))))
            });
            if let Some((_, owner)) = catalog_owner {
                result.errors.push(format!(
                    "Index name {} already exists on table {}",
                    name, owner
                ));
            }
        }
    }
}

fn check_added_column(
    table: &str,
    column: &ColumnSchema,
    rows: i64,
    result: &mut ValidationResult,
) {
    if rows == 0 || column.nullable {
        return;
    }
    if column.has_default() {
        result.warnings.push(format!(
            "Column {}.{} is added as NOT NULL; {} existing row(s) receive the default {}",
            table,
            column.name,
            rows,
            column.default.as_deref().unwrap_or_default()
        ));
    } else {
        result.errors.push(format!(
            "Column {}.{} is added as NOT NULL without a default but the table has {} row(s)",
            table, column.name, rows
        ));
    }
}

/// Counting queries against the inspection database.
struct DataProbe<'a> {
    pool: &'a SqlitePool,
    dialect: &'a SqliteDialect,
    table: &'a str,
    existing: Option<&'a TableSchema>,
}

impl DataProbe<'_> {
    fn has_column(&self, column: &str) -> bool {
        self.existing
            .is_some_and(|t| t.get_column(column).is_some())
    }

    async fn count(&self, sql: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(sql).fetch_one(self.pool).await?;
        Ok(count)
    }

    async fn row_count(&self) -> Result<i64> {
        if self.existing.is_none() {
            return Ok(0);
        }
        self.count(&format!(
            "SELECT COUNT(*) FROM {}",
            self.dialect.quote_identifier(self.table)
        ))
        .await
    }

    async fn non_null_count(&self, column: &str) -> Result<i64> {
        if !self.has_column(column) {
            return Ok(0);
        }
        self.count(&format!(
            "SELECT COUNT(*) FROM {} WHERE {} IS NOT NULL",
            self.dialect.quote_identifier(self.table),
            self.dialect.quote_identifier(column)
        ))
        .await
    }

    async fn null_count(&self, column: &str) -> Result<i64> {
        if !self.has_column(column) {
            return Ok(0);
        }
        self.count(&format!(
            "SELECT COUNT(*) FROM {} WHERE {} IS NULL",
            self.dialect.quote_identifier(self.table),
            self.dialect.quote_identifier(column)
        ))
        .await
    }

    /// Number of distinct non-null values that occur more than once.
    async fn duplicate_count(&self, column: &str) -> Result<i64> {
        if !self.has_column(column) {
            return Ok(0);
        }
        let column = self.dialect.quote_identifier(column);
        self.count(&format!(
            "SELECT COUNT(*) FROM (SELECT {c} FROM {t} WHERE {c} IS NOT NULL GROUP BY {c} HAVING COUNT(*) > 1)",
            c = column,
            t = self.dialect.quote_identifier(self.table)
        ))
        .await
    }

    /// Rows whose foreign key value has no match in the referenced table.
    async fn orphan_count(&self, fk: &ForeignKeySchema) -> Result<i64> {
        if !self.has_column(&fk.column) {
            return Ok(0);
        }
        let referenced = get_table_schema(self.pool, &fk.referenced_table).await?;
        let column = self.dialect.quote_identifier(&fk.column);
        let table = self.dialect.quote_identifier(self.table);

        let sql = match referenced {
            Some(r) if r.get_column(&fk.referenced_column).is_some() => format!(
                "SELECT COUNT(*) FROM {t} WHERE {c} IS NOT NULL AND {c} NOT IN (SELECT {rc} FROM {rt} WHERE {rc} IS NOT NULL)",
                t = table,
                c = column,
                rt = self.dialect.quote_identifier(&fk.referenced_table),
                rc = self.dialect.quote_identifier(&fk.referenced_column)
            ),
            _ => format!("SELECT COUNT(*) FROM {} WHERE {} IS NOT NULL", table, column),
        };
        self.count(&sql).await
    }
}

/// Finds foreign key cycles among `schema`'s tables.
///
/// Each cycle is returned once, as the table path in traversal order
/// (`[a, b, c]` for `a → b → c → a`). Self-references are one-table cycles.
#[must_use]
pub fn detect_cycles(schema: &DatabaseSchema) -> Vec<Vec<String>> {
    let mut graph: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for table in &schema.tables {
        let edges = graph.entry(table.name.as_str()).or_default();
        for fk in &table.foreign_keys {
            edges.insert(fk.referenced_table.as_str());
        }
    }

    let mut visited = BTreeSet::new();
    let mut path = Vec::new();
    let mut cycles = Vec::new();
    let nodes: Vec<&str> = graph.keys().copied().collect();
    for node in nodes {
        if !visited.contains(node) {
            visit(node, &graph, &mut visited, &mut path, &mut cycles);
        }
    }
    cycles
}

fn visit<'a>(
    node: &'a str,
    graph: &BTreeMap<&'a str, BTreeSet<&'a str>>,
    visited: &mut BTreeSet<&'a str>,
    path: &mut Vec<&'a str>,
    cycles: &mut Vec<Vec<String>>,
) {
    visited.insert(node);
    path.push(node);

    if let Some(edges) = graph.get(node) {
        for &next in edges {
            if let Some(start) = path.iter().position(|&n| n == next) {
                cycles.push(path[start..].iter().map(ToString::to_string).collect());
            } else if !visited.contains(next) {
                visit(next, graph, visited, path, cycles);
            }
        }
    }

    path.pop();
}

/// Warning text for a cycle: `Foreign key cycle: a -> b -> c -> a`.
#[must_use]
pub fn cycle_warning(cycle: &[String]) -> String {
    let mut path = cycle.to_vec();
    if let Some(first) = cycle.first() {
        path.push(first.clone());
    }
    format!("Foreign key cycle: {}", path.join(" -> "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::compare;
    use crate::schema::IndexSchema;
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

    fn users() -> TableSchema {
        TableSchema::new("users")
            .column(ColumnSchema::new("id", "INTEGER").primary_key())
            .column(ColumnSchema::new("name", "TEXT"))
    }

    async fn users_pool(rows: usize) -> SqlitePool {
        let pool = create_test_pool().await;
        exec(&pool, "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)").await;
        for i in 0..rows {
            exec(&pool, &format!("INSERT INTO users (name) VALUES ('user{}')", i)).await;
        }
        pool
    }

    async fn validate(diff: &SchemaDiff, pool: &SqlitePool) -> ValidationResult {
        let context = ValidationContext {
            catalog_indexes: &[],
        };
        MigrationValidator::new()
            .validate(diff, pool, context)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_not_null_without_default_blocks_on_populated_table() {
        let pool = users_pool(2).await;
        let desired = users().column(ColumnSchema::new("email", "TEXT").not_null());
        let result = validate(&compare(&users(), &desired), &pool).await;

        assert!(!result.is_valid());
        assert!(result.errors[0].contains("users.email"));
        assert!(result.clone().into_result("users").is_err());
    }

    #[tokio::test]
    async fn test_not_null_without_default_is_fine_on_empty_table() {
        let pool = users_pool(0).await;
        let desired = users().column(ColumnSchema::new("email", "TEXT").not_null());
        let result = validate(&compare(&users(), &desired), &pool).await;
        assert!(result.is_valid());
        assert!(result.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_not_null_with_default_warns() {
        let pool = users_pool(3).await;
        let desired = users().column(ColumnSchema::new("email", "varchar").not_null().default("''"));
        let result = validate(&compare(&users(), &desired), &pool).await;

        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("3 existing row(s)"));
    }

    #[tokio::test]
    async fn test_removed_column_with_data_warns() {
        let pool = users_pool(1).await;
        let desired = TableSchema::new("users").column(ColumnSchema::new("id", "INTEGER").primary_key());
        let result = validate(&compare(&users(), &desired), &pool).await;

        assert!(result.is_valid());
        assert!(result.warnings[0].contains("discards 1 non-null value(s)"));
    }

    #[tokio::test]
    async fn test_unsafe_type_change_errors_with_hint() {
        let pool = create_test_pool().await;
        exec(&pool, "CREATE TABLE orders (id INTEGER PRIMARY KEY, status TEXT)").await;
        exec(&pool, "INSERT INTO orders (status) VALUES ('pending')").await;

        let current = TableSchema::new("orders")
            .column(ColumnSchema::new("id", "INTEGER").primary_key())
            .column(ColumnSchema::new("status", "TEXT"));
        let mut desired = current.clone();
        desired.columns[1].sql_type = "INTEGER".to_string();

        let result = validate(&compare(&current, &desired), &pool).await;
        assert!(!result.is_valid());
        assert!(result.errors[0].contains("TEXT → INTEGER"));
        assert!(result.errors[0].contains("UPDATE \"orders\" SET \"status\" = ? WHERE \"status\" = ?"));
    }

    #[tokio::test]
    async fn test_widening_type_change_is_allowed() {
        let pool = users_pool(2).await;
        let mut desired = users();
        desired.columns[1].sql_type = "BLOB".to_string();
        let result = validate(&compare(&users(), &desired), &pool).await;
        assert!(result.is_valid());
    }

    #[tokio::test]
    async fn test_not_null_with_existing_nulls_errors() {
        let pool = users_pool(0).await;
        exec(&pool, "INSERT INTO users (name) VALUES (NULL)").await;
        let mut desired = users();
        desired.columns[1] = ColumnSchema::new("name", "TEXT").not_null();

        let result = validate(&compare(&users(), &desired), &pool).await;
        assert!(!result.is_valid());
        assert!(result.errors[0].contains("WHERE \"name\" IS NULL"));
    }

    #[tokio::test]
    async fn test_unique_with_duplicates_errors() {
        let pool = users_pool(0).await;
        exec(&pool, "INSERT INTO users (name) VALUES ('a'), ('a'), ('b')").await;
        let mut desired = users();
        desired.columns[1] = ColumnSchema::new("name", "TEXT").unique();

        let result = validate(&compare(&users(), &desired), &pool).await;
        assert!(!result.is_valid());
        assert!(result.errors[0].contains("1 value(s) are duplicated"));
    }

    #[tokio::test]
    async fn test_drop_populated_table_warns() {
        let pool = users_pool(4).await;
        let result = validate(&SchemaDiff::drop(&users()), &pool).await;
        assert!(result.is_valid());
        assert_eq!(result.warnings, vec!["Table users will be dropped with 4 row(s)"]);
    }

    #[tokio::test]
    async fn test_missing_table_counts_as_empty() {
        let pool = create_test_pool().await;
        let desired = users().column(ColumnSchema::new("email", "TEXT").not_null());
        let result = validate(&compare(&users(), &desired), &pool).await;
        assert!(result.is_valid());
    }

    #[tokio::test]
    async fn test_orphaned_foreign_key_values_warn() {
        let pool = create_test_pool().await;
        exec(&pool, "CREATE TABLE chat (id INTEGER PRIMARY KEY)").await;
        exec(&pool, "CREATE TABLE message (id INTEGER PRIMARY KEY, chatId INTEGER)").await;
        exec(&pool, "INSERT INTO chat (id) VALUES (1)").await;
        exec(&pool, "INSERT INTO message (chatId) VALUES (1), (2), (NULL)").await;

        let current = TableSchema::new("message")
            .column(ColumnSchema::new("id", "INTEGER").primary_key())
            .column(ColumnSchema::new("chatId", "INTEGER"));
        let desired = current.clone().references("chatId", "chat", "id");

        let result = validate(&compare(&current, &desired), &pool).await;
        assert!(result.is_valid());
        assert!(result.warnings[0].contains("1 orphan value(s)"));
    }

    #[tokio::test]
    async fn test_index_name_collisions() {
        let pool = users_pool(0).await;
        let desired_users = users().index(IndexSchema::new("idx_name", &["name"]));
        let diff = compare(&users(), &desired_users);

        // Present in the catalog on another table.
        let catalog = vec![("IDX_NAME".to_string(), "teams".to_string())];
        let context = ValidationContext {
            catalog_indexes: &catalog,
        };
        let result = MigrationValidator::new()
            .validate(&diff, &pool, context)
            .await
            .unwrap();
        assert!(result.errors[0].contains("already exists on table teams"));

        // The table's own index being rebuilt under the same name is fine.
        let catalog = vec![("idx_name".to_string(), "users".to_string())];
        let mut desired = desired_users.clone();
        desired.columns[1].sql_type = "varchar(50)".to_string();
        let diff = compare(&users(), &desired);
        assert!(diff.requires_recreation());
        let context = ValidationContext {
            catalog_indexes: &catalog,
        };
        let result = MigrationValidator::new()
            .validate(&diff, &pool, context)
            .await
            .unwrap();
        assert!(result.is_valid(), "{:?}", result.errors);
    }

    #[test]
    fn test_detect_three_table_cycle() {
        let schema = DatabaseSchema::new()
            .table(TableSchema::new("a").references("b_id", "b", "id"))
            .table(TableSchema::new("b").references("c_id", "c", "id"))
            .table(TableSchema::new("c").references("a_id", "a", "id"));

        let cycles = detect_cycles(&schema);
        assert_eq!(cycles, vec![vec!["a", "b", "c"]]);
        assert_eq!(cycle_warning(&cycles[0]), "Foreign key cycle: a -> b -> c -> a");
    }

    #[test]
    fn test_detect_self_reference_and_acyclic() {
        let schema = DatabaseSchema::new()
            .table(TableSchema::new("comment").references("parentId", "comment", "id"))
            .table(TableSchema::new("post").references("authorId", "users", "id"))
            .table(TableSchema::new("users"));
        assert_eq!(detect_cycles(&schema), vec![vec!["comment"]]);

        let acyclic = DatabaseSchema::new()
            .table(TableSchema::new("post").references("authorId", "users", "id"))
            .table(TableSchema::new("users"));
        assert!(detect_cycles(&acyclic).is_empty());
    }
}

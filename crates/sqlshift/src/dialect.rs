//! SQLite rendering of migration statements.
//!
//! SQLite has limited ALTER TABLE support: no ALTER COLUMN, no constraint
//! changes and no way to add or drop a foreign key. Everything beyond adding a
//! plain column or touching an index goes through the "table recreation"
//! strategy: create a new table, copy data, drop the old table, rename the new
//! table.

use std::sync::OnceLock;

use regex::Regex;

use crate::schema::{ColumnSchema, ForeignKeySchema, IndexSchema, TableSchema};
use crate::statement::Statement;

/// SQLite migration dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// Creates a new SQLite dialect.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Renders a statement as one or more SQL statements (no trailing `;`).
    #[must_use]
    pub fn render(&self, statement: &Statement) -> Vec<String> {
        match statement {
            Statement::CreateTable { table } => vec![self.create_table_sql(&table.name, table)],

            Statement::DropTable { name } => vec![self.drop_table_sql(name)],

            Statement::AddColumn { table, column } => vec![self.add_column_sql(table, column)],

            Statement::CreateIndex { table, index } => vec![self.create_index_sql(table, index)],

            Statement::DropIndex { name } => vec![self.drop_index_sql(name)],

            Statement::RecreateTable {
                table,
                temp_name,
                copy_columns,
            } => self.recreate_table_sql(table, temp_name, copy_columns),

            Statement::Pragma { name, value } => vec![format!("PRAGMA {} = {}", name, value)],
        }
    }

    /// Renders a list of statements in order.
    #[must_use]
    pub fn render_all(&self, statements: &[Statement]) -> Vec<String> {
        statements.iter().flat_map(|s| self.render(s)).collect()
    }

    /// Quote an identifier (table name, column name, etc.).
    #[must_use]
    pub fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Generates column definition SQL.
    #[must_use]
    pub fn column_definition(&self, column: &ColumnSchema, inline_primary: bool) -> String {
        let mut parts = vec![self.quote_identifier(&column.name)];
        if !column.sql_type.trim().is_empty() {
            parts.push(column.sql_type.trim().to_string());
        }

        if column.primary && inline_primary {
            parts.push("PRIMARY KEY".to_string());
            if column.auto_increment {
                parts.push("AUTOINCREMENT".to_string());
            }
        } else if !column.nullable {
            parts.push("NOT NULL".to_string());
        }

        if column.unique && !column.primary {
            parts.push("UNIQUE".to_string());
        }

        if let Some(default) = column.default.as_deref() {
            parts.push(format!("DEFAULT {}", render_default(default)));
        }

        parts.join(" ")
    }

    fn foreign_key_clause(&self, fk: &ForeignKeySchema) -> String {
        let mut sql = format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
            self.quote_identifier(&fk.name),
            self.quote_identifier(&fk.column),
            self.quote_identifier(&fk.referenced_table),
            self.quote_identifier(&fk.referenced_column)
        );
        if let Some(action) = fk.on_delete {
            sql.push_str(" ON DELETE ");
            sql.push_str(action.to_sql());
        }
        if let Some(action) = fk.on_update {
            sql.push_str(" ON UPDATE ");
            sql.push_str(action.to_sql());
        }
        sql
    }

    /// Generates SQL for creating `table`'s definition under the name `name`.
    fn create_table_sql(&self, name: &str, table: &TableSchema) -> String {
        let primary_key = table.primary_key();
        let inline_primary = primary_key.len() == 1;

        let mut defs: Vec<String> = table
            .columns
            .iter()
            .map(|c| self.column_definition(c, inline_primary))
            .collect();

        if primary_key.len() > 1 {
            let quoted: Vec<String> = primary_key
                .iter()
                .map(|c| self.quote_identifier(c))
                .collect();
            defs.push(format!("PRIMARY KEY ({})", quoted.join(", ")));
        }

        defs.extend(table.foreign_keys.iter().map(|fk| self.foreign_key_clause(fk)));

        format!(
            "CREATE TABLE {} (\n  {}\n)",
            self.quote_identifier(name),
            defs.join(",\n  ")
        )
    }

    fn drop_table_sql(&self, name: &str) -> String {
        format!("DROP TABLE {}", self.quote_identifier(name))
    }

    fn add_column_sql(&self, table: &str, column: &ColumnSchema) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.quote_identifier(table),
            self.column_definition(column, true)
        )
    }

    fn create_index_sql(&self, table: &str, index: &IndexSchema) -> String {
        let quoted: Vec<String> = index
            .columns
            .iter()
            .map(|c| self.quote_identifier(c))
            .collect();
        format!(
            "CREATE {}INDEX {} ON {} ({})",
            if index.unique { "UNIQUE " } else { "" },
            self.quote_identifier(&index.name),
            self.quote_identifier(table),
            quoted.join(", ")
        )
    }

    fn drop_index_sql(&self, name: &str) -> String {
        format!("DROP INDEX {}", self.quote_identifier(name))
    }

    /// create-temp → copy → drop-original → rename.
    fn recreate_table_sql(
        &self,
        table: &TableSchema,
        temp_name: &str,
        copy_columns: &[String],
    ) -> Vec<String> {
        let mut sql = vec![self.create_table_sql(temp_name, table)];

        if !copy_columns.is_empty() {
            let columns: Vec<String> = copy_columns
                .iter()
                .map(|c| self.quote_identifier(c))
                .collect();
            let columns = columns.join(", ");
            sql.push(format!(
                "INSERT INTO {} ({}) SELECT {} FROM {}",
                self.quote_identifier(temp_name),
                columns,
                columns,
                self.quote_identifier(&table.name)
            ));
        }

        sql.push(self.drop_table_sql(&table.name));
        sql.push(format!(
            "ALTER TABLE {} RENAME TO {}",
            self.quote_identifier(temp_name),
            self.quote_identifier(&table.name)
        ));
        sql
    }
}

/// Renders a raw default so that it is valid after `DEFAULT`.
///
/// Constants and the `CURRENT_*` keywords are emitted as is. Any other
/// expression must be parenthesized.
#[must_use]
pub fn render_default(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with('(') || is_constant_default(trimmed) || is_time_keyword(trimmed) {
        trimmed.to_string()
    } else {
        format!("({})", trimmed)
    }
}

/// Returns true if `raw` is a constant literal (string, number, blob, NULL,
/// TRUE/FALSE). Such defaults are allowed by `ALTER TABLE ... ADD COLUMN`.
#[must_use]
pub fn is_constant_default(raw: &str) -> bool {
    let trimmed = raw.trim();
    let upper = trimmed.to_ascii_uppercase();
    if matches!(upper.as_str(), "NULL" | "TRUE" | "FALSE") {
        return true;
    }
    if trimmed.len() >= 2 && trimmed.starts_with('\'') && trimmed.ends_with('\'') {
        return true;
    }
    if (upper.starts_with("X'")) && trimmed.ends_with('\'') {
        return true;
    }
    numeric_literal_pattern().is_match(trimmed)
}

/// Signed decimal (`12`, `1.5`, `.5`, `1e3`) or hexadecimal (`0x1F`) literal.
fn numeric_literal_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[+-]?(?:(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][+-]?\d+)?|0[xX][0-9A-Fa-f]+)$")
            .expect("Invalid numeric literal regex")
    })
}

/// Returns true for the `CURRENT_TIME`, `CURRENT_DATE` and
/// `CURRENT_TIMESTAMP` keywords.
#[must_use]
pub fn is_time_keyword(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_uppercase().as_str(),
        "CURRENT_TIMESTAMP" | "CURRENT_DATE" | "CURRENT_TIME"
    )
}

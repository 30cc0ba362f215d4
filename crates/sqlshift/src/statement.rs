//! Migration statements.
//!
//! The generator expresses every schema change as one of these tagged
//! variants. The [`SqliteDialect`](crate::dialect::SqliteDialect) turns them
//! into SQL text; keeping them as data lets the generator's choices be tested
//! without matching on SQL strings.

use serde::{Deserialize, Serialize};

use crate::schema::{ColumnSchema, IndexSchema, TableSchema};

/// A single DDL step of a migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Statement {
    /// Create a table with its columns, primary key and foreign keys inline.
    CreateTable {
        /// Full table definition. Indexes are not emitted by this statement.
        table: TableSchema,
    },

    /// Drop a table.
    DropTable {
        /// Table name.
        name: String,
    },

    /// Add a column to an existing table.
    AddColumn {
        /// Table name.
        table: String,
        /// Column definition.
        column: ColumnSchema,
    },

    /// Create an index.
    CreateIndex {
        /// Table name.
        table: String,
        /// Index definition.
        index: IndexSchema,
    },

    /// Drop an index.
    DropIndex {
        /// Index name.
        name: String,
    },

    /// Rebuild a table: create `temp_name` with the target definition, copy
    /// `copy_columns` over, drop the original and rename the copy into place.
    RecreateTable {
        /// Target table definition (its name is the final table name).
        table: TableSchema,
        /// Name of the temporary table used during the rebuild.
        temp_name: String,
        /// Columns present in both the old and new definitions.
        copy_columns: Vec<String>,
    },

    /// Set a connection pragma (`PRAGMA name = value`).
    Pragma {
        /// Pragma name.
        name: String,
        /// Pragma value.
        value: String,
    },
}

impl Statement {
    /// Creates a CreateTable statement.
    #[must_use]
    pub fn create_table(table: TableSchema) -> Self {
        Self::CreateTable { table }
    }

    /// Creates a DropTable statement.
    #[must_use]
    pub fn drop_table(name: impl Into<String>) -> Self {
        Self::DropTable { name: name.into() }
    }

    /// Creates an AddColumn statement.
    #[must_use]
    pub fn add_column(table: impl Into<String>, column: ColumnSchema) -> Self {
        Self::AddColumn {
            table: table.into(),
            column,
        }
    }

    /// Creates a CreateIndex statement.
    #[must_use]
    pub fn create_index(table: impl Into<String>, index: IndexSchema) -> Self {
        Self::CreateIndex {
            table: table.into(),
            index,
        }
    }

    /// Creates a DropIndex statement.
    #[must_use]
    pub fn drop_index(name: impl Into<String>) -> Self {
        Self::DropIndex { name: name.into() }
    }

    /// Creates a RecreateTable statement.
    #[must_use]
    pub fn recreate_table(
        table: TableSchema,
        temp_name: impl Into<String>,
        copy_columns: Vec<String>,
    ) -> Self {
        Self::RecreateTable {
            table,
            temp_name: temp_name.into(),
            copy_columns,
        }
    }

    /// `PRAGMA foreign_keys = ON|OFF`.
    #[must_use]
    pub fn foreign_keys(enabled: bool) -> Self {
        Self::Pragma {
            name: "foreign_keys".to_string(),
            value: if enabled { "ON" } else { "OFF" }.to_string(),
        }
    }

    /// Returns true for the table-rebuild sequence.
    #[must_use]
    pub fn is_recreation(&self) -> bool {
        matches!(self, Self::RecreateTable { .. })
    }

    /// Returns a human-readable description of this statement.
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::CreateTable { table } => format!("Create table {}", table.name),
            Self::DropTable { name } => format!("Drop table {}", name),
            Self::AddColumn { table, column } => {
                format!("Add column {} to {}", column.name, table)
            }
            Self::CreateIndex { table, index } => format!(
                "Create {}index {} on {} ({})",
                if index.unique { "unique " } else { "" },
                index.name,
                table,
                index.columns.join(", ")
            ),
            Self::DropIndex { name } => format!("Drop index {}", name),
            Self::RecreateTable { table, .. } => format!("Recreate table {}", table.name),
            Self::Pragma { name, value } => format!("Set {} = {}", name, value),
        }
    }
}

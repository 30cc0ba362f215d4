//! Schema representation types.
//!
//! These types describe the structure of a table as the engine reports it.
//! They are produced by the introspector for both the "current" and the
//! "desired" database, and the same builders are used to declare models.

use serde::{Deserialize, Serialize};

/// Foreign key action (ON DELETE, ON UPDATE).
///
/// `NO ACTION` is represented by the absence of an action on the foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForeignKeyAction {
    /// Restrict (same as no action but checked immediately).
    Restrict,
    /// Cascade the delete/update to referencing rows.
    Cascade,
    /// Set the foreign key column to NULL.
    SetNull,
    /// Set the foreign key column to its default value.
    SetDefault,
}

impl ForeignKeyAction {
    /// Returns the SQL representation of this action.
    #[must_use]
    pub fn to_sql(&self) -> &'static str {
        match self {
            Self::Restrict => "RESTRICT",
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
        }
    }

    /// Parses the action text reported by `PRAGMA foreign_key_list`.
    ///
    /// `NO ACTION` (the engine default) and unknown values map to `None`.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "RESTRICT" => Some(Self::Restrict),
            "CASCADE" => Some(Self::Cascade),
            "SET NULL" => Some(Self::SetNull),
            "SET DEFAULT" => Some(Self::SetDefault),
            _ => None,
        }
    }
}

/// Schema definition for a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    /// Column name.
    pub name: String,
    /// Engine-native type string (e.g. `INTEGER`, `varchar(255)`).
    #[serde(rename = "type")]
    pub sql_type: String,
    /// Whether the column allows NULL values.
    #[serde(default = "default_true")]
    pub nullable: bool,
    /// Whether this column is part of the primary key.
    #[serde(default)]
    pub primary: bool,
    /// Whether this column carries a UNIQUE constraint.
    #[serde(default)]
    pub unique: bool,
    /// Raw default expression as written in the DDL (`'x'`, `0`, `CURRENT_TIMESTAMP`).
    #[serde(default)]
    pub default: Option<String>,
    /// Whether this column auto-increments.
    #[serde(default)]
    pub auto_increment: bool,
}

fn default_true() -> bool {
    true
}

impl ColumnSchema {
    /// Creates a new nullable column.
    #[must_use]
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            nullable: true,
            primary: false,
            unique: false,
            default: None,
            auto_increment: false,
        }
    }

    /// Sets the column as NOT NULL.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Sets the column as nullable.
    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Sets a raw default expression (`0`, `'draft'`, `CURRENT_TIMESTAMP`).
    #[must_use]
    pub fn default(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }

    /// Sets a string literal default, quoting it.
    #[must_use]
    pub fn default_text(mut self, value: &str) -> Self {
        self.default = Some(format!("'{}'", value.replace('\'', "''")));
        self
    }

    /// Sets the column as the primary key.
    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary = true;
        self.nullable = false;
        self
    }

    /// Sets the column to auto-increment.
    #[must_use]
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    /// Sets the column as unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Returns true if the column has a non-NULL default.
    #[must_use]
    pub fn has_default(&self) -> bool {
        self.default
            .as_deref()
            .is_some_and(|d| !d.trim().eq_ignore_ascii_case("null"))
    }
}

/// Schema definition for an index.
///
/// The name is whatever the engine or the model assigned; two indexes are the
/// same index when their ordered columns and `unique` flag match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexSchema {
    /// Index name.
    pub name: String,
    /// Indexed columns, in order.
    pub columns: Vec<String>,
    /// Whether this is a unique index.
    #[serde(default)]
    pub unique: bool,
}

impl IndexSchema {
    /// Creates a non-unique index.
    #[must_use]
    pub fn new(name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            unique: false,
        }
    }

    /// Marks the index as unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Logical identity of the index within `table`: ordered columns plus the
    /// unique flag, ignoring the name. Column names qualified with the table
    /// name (`orders.customerId`) are reduced to the bare column.
    #[must_use]
    pub fn logical_key(&self, table: &str) -> String {
        let columns: Vec<&str> = self
            .columns
            .iter()
            .map(|c| strip_table_qualifier(c, table))
            .collect();
        format!("{}:{}", columns.join(","), self.unique)
    }
}

/// Schema definition for a single-column foreign key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForeignKeySchema {
    /// Constraint name, synthesized from table and column.
    pub name: String,
    /// Referencing column.
    pub column: String,
    /// Referenced table.
    pub referenced_table: String,
    /// Referenced column.
    pub referenced_column: String,
    /// Action on delete (`None` means NO ACTION).
    #[serde(default)]
    pub on_delete: Option<ForeignKeyAction>,
    /// Action on update (`None` means NO ACTION).
    #[serde(default)]
    pub on_update: Option<ForeignKeyAction>,
}

impl ForeignKeySchema {
    /// Creates a foreign key from `table.column` to `referenced_table.referenced_column`.
    #[must_use]
    pub fn new(
        table: &str,
        column: impl Into<String>,
        referenced_table: impl Into<String>,
        referenced_column: impl Into<String>,
    ) -> Self {
        let column = column.into();
        Self {
            name: foreign_key_name(table, &column),
            column,
            referenced_table: referenced_table.into(),
            referenced_column: referenced_column.into(),
            on_delete: None,
            on_update: None,
        }
    }

    /// Sets the ON DELETE action.
    #[must_use]
    pub fn on_delete(mut self, action: ForeignKeyAction) -> Self {
        self.on_delete = Some(action);
        self
    }

    /// Sets the ON UPDATE action.
    #[must_use]
    pub fn on_update(mut self, action: ForeignKeyAction) -> Self {
        self.on_update = Some(action);
        self
    }

    /// Logical identity: `column->referenced_table.referenced_column`.
    #[must_use]
    pub fn logical_key(&self) -> String {
        format!(
            "{}->{}.{}",
            self.column, self.referenced_table, self.referenced_column
        )
    }

    /// Returns true if both keys have the same ON DELETE/ON UPDATE actions.
    #[must_use]
    pub fn same_actions(&self, other: &Self) -> bool {
        self.on_delete == other.on_delete && self.on_update == other.on_update
    }
}

/// Deterministic foreign key name for `table.column`.
#[must_use]
pub fn foreign_key_name(table: &str, column: &str) -> String {
    format!("FK_{}_{}", table, column)
}

fn strip_table_qualifier<'a>(column: &'a str, table: &str) -> &'a str {
    match column.split_once('.') {
        Some((prefix, rest)) if prefix.eq_ignore_ascii_case(table) => rest,
        _ => column,
    }
}

/// Complete schema definition for a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name.
    #[serde(rename = "table")]
    pub name: String,
    /// Column definitions, in declaration order.
    pub columns: Vec<ColumnSchema>,
    /// Secondary index definitions.
    #[serde(default)]
    pub indexes: Vec<IndexSchema>,
    /// Foreign key definitions.
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeySchema>,
}

impl TableSchema {
    /// Creates a new table schema.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    /// Adds a column to the table.
    #[must_use]
    pub fn column(mut self, column: ColumnSchema) -> Self {
        self.columns.push(column);
        self
    }

    /// Adds an index.
    #[must_use]
    pub fn index(mut self, index: IndexSchema) -> Self {
        self.indexes.push(index);
        self
    }

    /// Adds a foreign key.
    #[must_use]
    pub fn foreign_key(mut self, fk: ForeignKeySchema) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    /// Adds a foreign key from `column` to `referenced_table.referenced_column`.
    #[must_use]
    pub fn references(
        self,
        column: &str,
        referenced_table: &str,
        referenced_column: &str,
    ) -> Self {
        let fk = ForeignKeySchema::new(&self.name, column, referenced_table, referenced_column);
        self.foreign_key(fk)
    }

    /// Gets a column by name.
    #[must_use]
    pub fn get_column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Primary key columns in declaration order.
    #[must_use]
    pub fn primary_key(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.primary)
            .map(|c| c.name.as_str())
            .collect()
    }
}

/// The complete database schema (all tables).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSchema {
    /// All tables in the database, ordered by name.
    pub tables: Vec<TableSchema>,
}

impl DatabaseSchema {
    /// Creates a new empty database schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a table to the schema.
    #[must_use]
    pub fn table(mut self, table: TableSchema) -> Self {
        self.tables.push(table);
        self
    }

    /// Gets a table by name.
    #[must_use]
    pub fn get_table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Returns table names.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|t| t.name.as_str())
    }
}

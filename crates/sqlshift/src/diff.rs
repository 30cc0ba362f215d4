//! Schema differ.
//!
//! Compares the "current" and "desired" [`TableSchema`] of one table and
//! produces a [`SchemaDiff`]. Indexes and foreign keys are matched by their
//! logical structure rather than by name, because two independently built
//! databases may assign different generated names to the same index.
//!
//! Output order is deterministic: columns follow declaration order, indexes
//! and foreign keys are sorted by their logical key.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::dialect::{is_constant_default, is_time_keyword};
use crate::schema::{ColumnSchema, ForeignKeyAction, ForeignKeySchema, IndexSchema, TableSchema};

/// How the table itself changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffKind {
    /// Table exists only in the desired schema.
    Create,
    /// Table exists on both sides.
    Update,
    /// Table exists only in the current schema.
    Drop,
}

/// A column present on both sides whose definition differs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnChange {
    /// Column name.
    pub name: String,
    /// Type before the change.
    pub old_type: String,
    /// Type after the change.
    pub new_type: String,
    /// Nullability before the change.
    pub old_nullable: bool,
    /// Nullability after the change.
    pub new_nullable: bool,
    /// Full column definition before the change.
    pub before: ColumnSchema,
    /// Full column definition after the change.
    pub after: ColumnSchema,
}

impl ColumnChange {
    fn new(before: &ColumnSchema, after: &ColumnSchema) -> Self {
        Self {
            name: after.name.clone(),
            old_type: before.sql_type.clone(),
            new_type: after.sql_type.clone(),
            old_nullable: before.nullable,
            new_nullable: after.nullable,
            before: before.clone(),
            after: after.clone(),
        }
    }

    /// Returns true if the normalized type changed.
    #[must_use]
    pub fn type_changed(&self, table: &str) -> bool {
        normalize_type(&self.old_type, table) != normalize_type(&self.new_type, table)
    }

    /// Returns true if nullability changed.
    #[must_use]
    pub fn nullability_changed(&self) -> bool {
        self.old_nullable != self.new_nullable
    }

    /// Returns true if the column went from nullable to NOT NULL.
    #[must_use]
    pub fn becomes_not_null(&self) -> bool {
        self.old_nullable && !self.new_nullable
    }

    /// Returns true if the normalized default changed.
    #[must_use]
    pub fn default_changed(&self) -> bool {
        normalize_default(self.before.default.as_deref())
            != normalize_default(self.after.default.as_deref())
    }

    /// Returns true if the column gained a UNIQUE constraint.
    #[must_use]
    pub fn becomes_unique(&self) -> bool {
        !self.before.unique && self.after.unique
    }
}

/// A foreign key present on both sides whose ON DELETE/ON UPDATE actions differ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKeyChange {
    /// Definition before the change.
    pub before: ForeignKeySchema,
    /// Definition after the change.
    pub after: ForeignKeySchema,
}

/// Structural difference between the current and desired schema of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaDiff {
    /// Table name.
    pub table: String,
    /// Whether the table is created, updated or dropped.
    pub kind: DiffKind,
    /// Columns only in the desired schema.
    pub added_columns: Vec<ColumnSchema>,
    /// Columns only in the current schema.
    pub removed_columns: Vec<ColumnSchema>,
    /// Columns on both sides with a different definition.
    pub modified_columns: Vec<ColumnChange>,
    /// Indexes only in the desired schema (by logical key).
    pub added_indexes: Vec<IndexSchema>,
    /// Indexes only in the current schema (by logical key).
    pub removed_indexes: Vec<IndexSchema>,
    /// Foreign keys only in the desired schema (by logical key).
    pub added_foreign_keys: Vec<ForeignKeySchema>,
    /// Foreign keys only in the current schema (by logical key).
    pub removed_foreign_keys: Vec<ForeignKeySchema>,
    /// Foreign keys on both sides whose actions differ.
    pub modified_foreign_keys: Vec<ForeignKeyChange>,
}

impl SchemaDiff {
    fn empty(table: &str, kind: DiffKind) -> Self {
        Self {
            table: table.to_string(),
            kind,
            added_columns: Vec::new(),
            removed_columns: Vec::new(),
            modified_columns: Vec::new(),
            added_indexes: Vec::new(),
            removed_indexes: Vec::new(),
            added_foreign_keys: Vec::new(),
            removed_foreign_keys: Vec::new(),
            modified_foreign_keys: Vec::new(),
        }
    }

    /// Diff for a table that only exists in the desired schema.
    #[must_use]
    pub fn create(desired: &TableSchema) -> Self {
        let mut diff = Self::empty(&desired.name, DiffKind::Create);
        diff.added_columns = desired.columns.clone();
        diff.added_indexes = sorted_indexes(&desired.name, &desired.indexes);
        diff.added_foreign_keys = sorted_foreign_keys(&desired.foreign_keys);
        diff
    }

    /// Diff for a table that only exists in the current schema.
    #[must_use]
    pub fn drop(current: &TableSchema) -> Self {
        let mut diff = Self::empty(&current.name, DiffKind::Drop);
        diff.removed_columns = current.columns.clone();
        diff.removed_indexes = sorted_indexes(&current.name, &current.indexes);
        diff.removed_foreign_keys = sorted_foreign_keys(&current.foreign_keys);
        diff
    }

    /// True iff any sub-collection is non-empty.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !(self.added_columns.is_empty()
            && self.removed_columns.is_empty()
            && self.modified_columns.is_empty()
            && self.added_indexes.is_empty()
            && self.removed_indexes.is_empty()
            && self.added_foreign_keys.is_empty()
            && self.removed_foreign_keys.is_empty()
            && self.modified_foreign_keys.is_empty())
    }

    /// Returns true if an existing table can only reach the desired shape by
    /// being rebuilt: any column modification or removal, any foreign-key
    /// change, or an added column `ALTER TABLE ADD COLUMN` cannot express.
    #[must_use]
    pub fn requires_recreation(&self) -> bool {
        self.kind == DiffKind::Update
            && (!self.modified_columns.is_empty()
                || !self.removed_columns.is_empty()
                || !self.added_foreign_keys.is_empty()
                || !self.removed_foreign_keys.is_empty()
                || !self.modified_foreign_keys.is_empty()
                || self.added_columns.iter().any(|c| !can_add_column(c)))
    }

    /// Human-readable change lines embedded in the migration artifact.
    #[must_use]
    pub fn describe(&self) -> Vec<String> {
        let mut lines = Vec::new();
        match self.kind {
            DiffKind::Create => lines.push(format!("+ Created table {}", self.table)),
            DiffKind::Drop => {
                lines.push(format!("- Dropped table {}", self.table));
                return lines;
            }
            DiffKind::Update => {}
        }

        for column in &self.added_columns {
            lines.push(format!("+ Added column {} ({})", column.name, column_summary(column)));
        }
        for column in &self.removed_columns {
            lines.push(format!("- Removed column {}", column.name));
        }
        for change in &self.modified_columns {
            lines.push(format!(
                "◎ Modified column {}: {}",
                change.name,
                describe_column_change(&self.table, change)
            ));
        }
        for index in &self.added_indexes {
            lines.push(format!(
                "+ Added {}index on ({})",
                if index.unique { "unique " } else { "" },
                index.columns.join(", ")
            ));
        }
        for index in &self.removed_indexes {
            lines.push(format!(
                "- Removed {}index on ({})",
                if index.unique { "unique " } else { "" },
                index.columns.join(", ")
            ));
        }
        for fk in &self.added_foreign_keys {
            lines.push(format!("+ Added foreign key {}", describe_foreign_key(fk)));
        }
        for fk in &self.removed_foreign_keys {
            lines.push(format!("- Removed foreign key {}", describe_foreign_key(fk)));
        }
        for change in &self.modified_foreign_keys {
            lines.push(format!(
                "◎ Modified foreign key {}: ON DELETE {} → {}, ON UPDATE {} → {}",
                describe_foreign_key(&change.after),
                action_name(change.before.on_delete),
                action_name(change.after.on_delete),
                action_name(change.before.on_update),
                action_name(change.after.on_update)
            ));
        }
        lines
    }
}

/// Compares the current and desired definitions of the same table.
#[must_use]
pub fn compare(current: &TableSchema, desired: &TableSchema) -> SchemaDiff {
    let table = desired.name.as_str();
    let mut diff = SchemaDiff::empty(table, DiffKind::Update);

    for column in &desired.columns {
        match current.get_column(&column.name) {
            None => diff.added_columns.push(column.clone()),
            Some(before) if !columns_equivalent(table, before, column) => diff
                .modified_columns
                .push(ColumnChange::new(before, column)),
            Some(_) => {}
        }
    }
    for column in &current.columns {
        if desired.get_column(&column.name).is_none() {
            diff.removed_columns.push(column.clone());
        }
    }

    let current_indexes = index_map(&current.name, &current.indexes);
    let desired_indexes = index_map(table, &desired.indexes);
    for (key, index) in &desired_indexes {
        if !current_indexes.contains_key(key) {
            diff.added_indexes.push((*index).clone());
        }
    }
    for (key, index) in &current_indexes {
        if !desired_indexes.contains_key(key) {
            diff.removed_indexes.push((*index).clone());
        }
    }

    let current_fks = foreign_key_map(&current.foreign_keys);
    let desired_fks = foreign_key_map(&desired.foreign_keys);
    for (key, fk) in &desired_fks {
        match current_fks.get(key) {
            None => diff.added_foreign_keys.push((*fk).clone()),
            Some(before) if !before.same_actions(fk) => {
                diff.modified_foreign_keys.push(ForeignKeyChange {
                    before: (*before).clone(),
                    after: (*fk).clone(),
                });
            }
            Some(_) => {}
        }
    }
    for (key, fk) in &current_fks {
        if !desired_fks.contains_key(key) {
            diff.removed_foreign_keys.push((*fk).clone());
        }
    }

    diff
}

/// Diffs a table that may be missing on either side.
///
/// Returns `None` when the table is absent from both.
#[must_use]
pub fn compare_optional(
    current: Option<&TableSchema>,
    desired: Option<&TableSchema>,
) -> Option<SchemaDiff> {
    match (current, desired) {
        (None, None) => None,
        (None, Some(desired)) => Some(SchemaDiff::create(desired)),
        (Some(current), None) => Some(SchemaDiff::drop(current)),
        (Some(current), Some(desired)) => Some(compare(current, desired)),
    }
}

fn columns_equivalent(table: &str, a: &ColumnSchema, b: &ColumnSchema) -> bool {
    normalize_type(&a.sql_type, table) == normalize_type(&b.sql_type, table)
        && a.nullable == b.nullable
        && a.primary == b.primary
        && a.unique == b.unique
        && normalize_default(a.default.as_deref()) == normalize_default(b.default.as_deref())
}

/// Returns true if `ALTER TABLE ... ADD COLUMN` can add `column` as declared.
#[must_use]
pub fn can_add_column(column: &ColumnSchema) -> bool {
    if column.primary || column.unique {
        return false;
    }
    if !column.nullable && !column.has_default() {
        return false;
    }
    column
        .default
        .as_deref()
        .map_or(true, |d| is_constant_default(strip_parens(d)))
}

fn index_map<'a>(table: &str, indexes: &'a [IndexSchema]) -> BTreeMap<String, &'a IndexSchema> {
    indexes.iter().map(|i| (i.logical_key(table), i)).collect()
}

fn foreign_key_map(fks: &[ForeignKeySchema]) -> BTreeMap<String, &ForeignKeySchema> {
    fks.iter().map(|fk| (fk.logical_key(), fk)).collect()
}

fn sorted_indexes(table: &str, indexes: &[IndexSchema]) -> Vec<IndexSchema> {
    index_map(table, indexes).into_values().cloned().collect()
}

fn sorted_foreign_keys(fks: &[ForeignKeySchema]) -> Vec<ForeignKeySchema> {
    foreign_key_map(fks).into_values().cloned().collect()
}

/// Normalizes a type for comparison: case-insensitive, whitespace-insensitive,
/// and without a `table.` qualifier.
#[must_use]
pub fn normalize_type(sql_type: &str, table: &str) -> String {
    let compact: String = sql_type
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace(" (", "(")
        .replace("( ", "(")
        .replace(" )", ")")
        .replace(", ", ",")
        .replace('"', "")
        .to_ascii_uppercase();
    let qualifier = format!("{}.", table.to_ascii_uppercase());
    match compact.strip_prefix(&qualifier) {
        Some(rest) => rest.to_string(),
        None => compact,
    }
}

/// A default value reduced to its kind and comparable content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedDefault {
    /// Constant literal (strings unquoted, booleans as 0/1).
    Literal(String),
    /// Function call or keyword expression, lowercased without whitespace.
    Expression(String),
}

/// Normalizes a raw default. `NULL` and no default compare equal.
#[must_use]
pub fn normalize_default(raw: Option<&str>) -> Option<NormalizedDefault> {
    let raw = strip_parens(raw?.trim());
    let upper = raw.to_ascii_uppercase();

    match upper.as_str() {
        "" | "NULL" => return None,
        "TRUE" => return Some(NormalizedDefault::Literal("1".to_string())),
        "FALSE" => return Some(NormalizedDefault::Literal("0".to_string())),
        _ => {}
    }

    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        let inner = &raw[1..raw.len() - 1];
        return Some(NormalizedDefault::Literal(inner.replace("''", "'")));
    }
    if is_constant_default(raw) {
        return Some(NormalizedDefault::Literal(raw.trim_start_matches('+').to_string()));
    }
    if is_time_keyword(raw) {
        return Some(NormalizedDefault::Expression(upper.to_ascii_lowercase()));
    }

    let compact: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase();
    Some(NormalizedDefault::Expression(compact))
}

/// Removes balanced outer parentheses: `((x))` → `x`.
fn strip_parens(raw: &str) -> &str {
    let mut current = raw.trim();
    while current.starts_with('(') && current.ends_with(')') && wraps_whole(current) {
        current = current[1..current.len() - 1].trim();
    }
    current
}

fn wraps_whole(s: &str) -> bool {
    let mut depth = 0usize;
    let mut in_quote = false;
    for (i, ch) in s.char_indices() {
        match ch {
            '\'' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => {
                depth = depth.saturating_sub(1);
                if depth == 0 && i != s.len() - 1 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

fn column_summary(column: &ColumnSchema) -> String {
    let mut parts = vec![column.sql_type.clone()];
    if column.primary {
        parts.push("PRIMARY KEY".to_string());
    }
    if !column.nullable && !column.primary {
        parts.push("NOT NULL".to_string());
    }
    if column.unique {
        parts.push("UNIQUE".to_string());
    }
    if let Some(default) = &column.default {
        parts.push(format!("DEFAULT {}", default));
    }
    parts.join(" ")
}

fn describe_column_change(table: &str, change: &ColumnChange) -> String {
    let mut parts = Vec::new();
    if change.type_changed(table) {
        parts.push(format!("type {} → {}", change.old_type, change.new_type));
    }
    if change.nullability_changed() {
        parts.push(format!(
            "{} → {}",
            nullability(change.old_nullable),
            nullability(change.new_nullable)
        ));
    }
    if change.default_changed() {
        parts.push(format!(
            "default {} → {}",
            change.before.default.as_deref().unwrap_or("none"),
            change.after.default.as_deref().unwrap_or("none")
        ));
    }
    if change.before.primary != change.after.primary {
        parts.push(format!(
            "primary key {} → {}",
            change.before.primary, change.after.primary
        ));
    }
    if change.before.unique != change.after.unique {
        parts.push(format!("unique {} → {}", change.before.unique, change.after.unique));
    }
    parts.join(", ")
}

fn nullability(nullable: bool) -> &'static str {
    if nullable {
        "NULL"
    } else {
        "NOT NULL"
    }
}

fn describe_foreign_key(fk: &ForeignKeySchema) -> String {
    format!("{} → {}.{}", fk.column, fk.referenced_table, fk.referenced_column)
}

fn action_name(action: Option<ForeignKeyAction>) -> &'static str {
    action.map_or("NO ACTION", |a| a.to_sql())
}

//! Schema diffing and migration generation for SQLite.
//!
//! `sqlshift` compares the schema your committed migrations produce with the
//! schema your models declare, and writes one migration file per changed
//! table:
//! - Both schemas are built from scratch in disposable databases on every run,
//!   so a second run with unchanged models detects nothing
//! - Indexes and foreign keys are matched by structure, not by name
//! - Changes SQLite cannot alter in place are generated as table recreation
//! - Generated migrations are validated against existing data and executed on
//!   a clone before they are accepted
//!
//! # Architecture
//!
//! - **Introspect** - Reads a table's columns, indexes and foreign keys
//! - **Diff** - Compares current and desired table schemas
//! - **Generator** - Turns a table's change into `up`/`down` statements
//! - **Validation** - Checks a change against the data it touches
//! - **Verify** - Runs generated SQL on a disposable clone
//! - **Orchestrator** - Drives a complete generation run
//! - **Executor** - Applies and reverts migration files, tracking history
//!
//! # Example
//!
//! ```rust,ignore
//! use sqlshift::prelude::*;
//!
//! let models = DeclaredModels::new().table(
//!     TableSchema::new("users")
//!         .column(ColumnSchema::new("id", "INTEGER").primary_key().auto_increment())
//!         .column(ColumnSchema::new("email", "varchar(255)").not_null().unique())
//!         .column(ColumnSchema::new("createdAt", "datetime").default("CURRENT_TIMESTAMP")),
//! );
//!
//! let report = Orchestrator::new(GenerateConfig::default(), models).run().await?;
//! println!("{}", report);
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Generate migrations from a models file
//! sqlshift generate --models models.json
//!
//! # Show what would be generated
//! sqlshift generate --models models.json --dry-run
//!
//! # Apply pending migrations
//! sqlshift migrate
//!
//! # Revert the last migration
//! sqlshift revert --count 1
//! ```

pub mod compat;
pub mod config;
pub mod dialect;
pub mod diff;
pub mod disposable;
pub mod error;
pub mod executor;
pub mod generator;
pub mod history;
pub mod introspect;
pub mod migration;
pub mod models;
pub mod orchestrator;
pub mod schema;
pub mod statement;
pub mod validation;
pub mod verify;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::compat::{CompatibilityTable, ConversionRule, Safety, TypeFamily};
    pub use crate::config::GenerateConfig;
    pub use crate::dialect::SqliteDialect;
    pub use crate::diff::{compare, ColumnChange, DiffKind, ForeignKeyChange, SchemaDiff};
    pub use crate::disposable::{connect, DisposableDatabase};
    pub use crate::error::{MigrateError, Result};
    pub use crate::executor::{execute_sql, split_statements, MigrationExecutor};
    pub use crate::generator::{MigrationGenerator, MigrationPlan};
    pub use crate::history::MigrationHistory;
    pub use crate::introspect::{get_database_schema, get_table_schema};
    pub use crate::migration::{load_migrations, Migration, MigrationAction};
    pub use crate::models::{DeclaredModels, ModelSource};
    pub use crate::orchestrator::{GenerationReport, Orchestrator, TableOutcome, TableStatus};
    pub use crate::schema::{
        ColumnSchema, DatabaseSchema, ForeignKeyAction, ForeignKeySchema, IndexSchema,
        TableSchema,
    };
    pub use crate::statement::Statement;
    pub use crate::validation::{MigrationValidator, ValidationResult};
    pub use crate::verify::{MigrationVerifier, VerificationReport};
}

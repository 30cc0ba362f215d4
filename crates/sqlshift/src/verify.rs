//! Execution check for generated migrations.
//!
//! Before a migration file is accepted it is run against its own disposable
//! clone that has replayed the committed history: a cheap `EXPLAIN` pass
//! rejects malformed SQL, then `up`, `down` and `up` again run for real. The
//! clone is always discarded; this only proves the SQL executes.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use sqlx::sqlite::SqlitePool;
use tracing::{debug, info, warn};

use crate::diff::compare_optional;
use crate::disposable::DisposableDatabase;
use crate::error::{MigrateError, Result};
use crate::executor::execute_statements;
use crate::introspect::get_database_schema;
use crate::migration::Migration;
use crate::schema::DatabaseSchema;

/// Outcome of verifying one migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    /// Migration name.
    pub migration: String,
    /// Whether `up`, `down` and `up` all ran cleanly.
    pub success: bool,
    /// Time spent executing the three passes.
    pub duration: Duration,
    /// Failure reason, naming the statement and engine error.
    pub error: Option<String>,
    /// Non-blocking findings, such as `down` not restoring the schema.
    pub warnings: Vec<String>,
}

impl VerificationReport {
    fn failed(migration: &Migration, duration: Duration, error: &MigrateError) -> Self {
        Self {
            migration: migration.name.clone(),
            success: false,
            duration,
            error: Some(error.to_string()),
            warnings: Vec::new(),
        }
    }
}

/// Statement prefixes `EXPLAIN` cannot meaningfully check.
const UNEXPLAINABLE: &[&str] = &[
    "PRAGMA", "BEGIN", "COMMIT", "END", "ROLLBACK", "SAVEPOINT", "RELEASE", "EXPLAIN",
];

/// Engine messages that indicate malformed SQL rather than a missing object.
const SYNTAX_ERRORS: &[&str] = &["syntax error", "incomplete input", "unrecognized token"];

/// Runs `EXPLAIN` on each statement and fails on the first malformed one.
///
/// Statements may refer to objects created by earlier statements of the same
/// migration, so only syntax-class errors fail the check.
pub async fn syntax_check(pool: &SqlitePool, statements: &[String]) -> Result<()> {
    for (index, sql) in statements.iter().enumerate() {
        let head = sql
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();
        if UNEXPLAINABLE.contains(&head.as_str()) {
            continue;
        }

        let explained = format!("EXPLAIN {}", sql);
        if let Err(sqlx::Error::Database(db)) = sqlx::query(&explained).fetch_all(pool).await {
            let message = db.message().to_string();
            if SYNTAX_ERRORS.iter().any(|s| message.contains(s)) {
                return Err(MigrateError::Execution {
                    index,
                    statement: sql.clone(),
                    message,
                });
            }
            debug!(index, message = %message, "Ignoring non-syntax EXPLAIN error");
        }
    }
    Ok(())
}

/// Verifies generated migrations on disposable clones.
#[derive(Debug, Clone)]
pub struct MigrationVerifier {
    scratch_dir: PathBuf,
    run_id: String,
    keep: bool,
}

impl MigrationVerifier {
    /// Creates a verifier that places clones in `scratch_dir`.
    #[must_use]
    pub fn new(scratch_dir: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            run_id: run_id.into(),
            keep: false,
        }
    }

    /// Keeps clone files after verification.
    #[must_use]
    pub fn keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    /// Replays `history` into a fresh clone, then checks `candidate`.
    ///
    /// Errors are returned only when the clone itself cannot be built;
    /// problems with `candidate` are reported in the [`VerificationReport`].
    pub async fn verify(
        &self,
        history: &[Migration],
        candidate: &Migration,
        sequence: usize,
    ) -> Result<VerificationReport> {
        let label = format!("verify{}", sequence);
        let db = DisposableDatabase::create(&self.scratch_dir, &label, &self.run_id)
            .await?
            .keep(self.keep);

        let outcome = match db.replay(history).await {
            Ok(()) => Ok(self.check(db.pool(), candidate).await),
            Err(e) => Err(e),
        };

        if let Err(e) = db.teardown().await {
            warn!(error = %e, "Failed to tear down verification clone");
        }

        let report = outcome?;
        if report.success {
            info!(
                migration = %report.migration,
                duration_ms = report.duration.as_millis() as u64,
                "Migration verified"
            );
        } else {
            warn!(
                migration = %report.migration,
                error = report.error.as_deref().unwrap_or_default(),
                "Migration failed verification"
            );
        }
        Ok(report)
    }

    async fn check(&self, pool: &SqlitePool, candidate: &Migration) -> VerificationReport {
        let start = Instant::now();

        if let Err(e) = syntax_check(pool, &candidate.up).await {
            return VerificationReport::failed(candidate, start.elapsed(), &e);
        }
        if let Err(e) = syntax_check(pool, &candidate.down).await {
            return VerificationReport::failed(candidate, start.elapsed(), &e);
        }

        match self.round_trip(pool, candidate).await {
            Ok(warnings) => VerificationReport {
                migration: candidate.name.clone(),
                success: true,
                duration: start.elapsed(),
                error: None,
                warnings,
            },
            Err(e) => VerificationReport::failed(candidate, start.elapsed(), &e),
        }
    }

    /// up → down → up. Returns warnings if `down` did not restore the schema.
    async fn round_trip(&self, pool: &SqlitePool, candidate: &Migration) -> Result<Vec<String>> {
        let before = get_database_schema(pool).await?;

        execute_statements(pool, &candidate.up).await?;
        execute_statements(pool, &candidate.down).await?;
        let reverted = get_database_schema(pool).await?;
        execute_statements(pool, &candidate.up).await?;

        Ok(schema_mismatches(&before, &reverted))
    }
}

/// Describes every table that differs between `expected` and `actual`.
#[must_use]
pub fn schema_mismatches(expected: &DatabaseSchema, actual: &DatabaseSchema) -> Vec<String> {
    let names: BTreeSet<&str> = expected.table_names().chain(actual.table_names()).collect();
    names
        .into_iter()
        .filter_map(|name| compare_optional(expected.get_table(name), actual.get_table(name)))
        .filter(|diff| diff.has_changes())
        .map(|diff| {
            format!(
                "Reverting does not restore table {}: {}",
                diff.table,
                diff.describe().join("; ")
            )
        })
        .collect()
}

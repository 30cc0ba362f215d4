//! Generation run.
//!
//! Builds two disposable databases from scratch on every run, one by
//! replaying the committed migrations ("current") and one from the models
//! ("desired"), diffs every table found in either, and turns each changed
//! table into its own migration file. Because both sides are rebuilt from
//! their source of truth each time, a second run with unchanged models finds
//! nothing to do.
//!
//! Tables are processed one at a time in name order. A failure in one table
//! (introspection, generation, validation, verification) is recorded in the
//! [`GenerationReport`] and the run moves on. Disposable databases are torn
//! down on every exit path.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use sqlx::sqlite::SqlitePool;
use tracing::{info, warn};

use crate::config::GenerateConfig;
use crate::dialect::SqliteDialect;
use crate::diff::{compare_optional, SchemaDiff};
use crate::disposable::{open_read_only, DisposableDatabase, RunLock};
use crate::error::Result;
use crate::generator::MigrationGenerator;
use crate::introspect::{get_table_schema, list_index_names, list_tables};
use crate::migration::{load_migrations_or_empty, Migration, MigrationAction, MigrationClock};
use crate::models::ModelSource;
use crate::schema::{DatabaseSchema, TableSchema};
use crate::validation::{cycle_warning, detect_cycles, MigrationValidator, ValidationContext};
use crate::verify::MigrationVerifier;

/// What happened to one changed table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TableStatus {
    /// Migration file written.
    Written {
        /// Path of the new file.
        path: PathBuf,
    },
    /// Dry run: the file that would have been written.
    Planned {
        /// File name inside the migrations directory.
        file_name: String,
    },
    /// Blocking validation errors; nothing was written.
    ValidationFailed {
        /// Error messages.
        errors: Vec<String>,
        /// The migration that would have been written.
        draft: Box<Migration>,
    },
    /// The generated SQL did not run cleanly on a clone; nothing was written.
    VerificationFailed {
        /// Failing statement and engine error.
        error: String,
    },
    /// The table could not be introspected or generated.
    Skipped {
        /// Reason.
        reason: String,
    },
}

/// Result for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableOutcome {
    /// Table name.
    pub table: String,
    /// Create, update or drop, when known.
    pub action: Option<MigrationAction>,
    /// Human-readable change lines.
    pub changes: Vec<String>,
    /// Validation and verification warnings.
    pub warnings: Vec<String>,
    /// Outcome.
    pub status: TableStatus,
}

impl TableOutcome {
    fn skipped(table: &str, reason: impl Into<String>) -> Self {
        Self {
            table: table.to_string(),
            action: None,
            changes: Vec::new(),
            warnings: Vec::new(),
            status: TableStatus::Skipped {
                reason: reason.into(),
            },
        }
    }

    /// Returns true for validation or verification failures.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(
            self.status,
            TableStatus::ValidationFailed { .. } | TableStatus::VerificationFailed { .. }
        )
    }
}

/// Summary of a generation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GenerationReport {
    /// One entry per changed or skipped table, in table-name order.
    pub outcomes: Vec<TableOutcome>,
    /// Foreign key cycles in the desired schema.
    pub cycle_warnings: Vec<String>,
}

impl GenerationReport {
    /// Returns true if no table changed and nothing failed or was skipped.
    #[must_use]
    pub fn no_changes(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Returns true if any table failed validation or verification.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(TableOutcome::is_failure)
    }

    /// Number of files written.
    #[must_use]
    pub fn written(&self) -> usize {
        self.count(|s| matches!(s, TableStatus::Written { .. }))
    }

    /// Number of files a dry run would write.
    #[must_use]
    pub fn planned(&self) -> usize {
        self.count(|s| matches!(s, TableStatus::Planned { .. }))
    }

    /// Number of failed tables.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failure()).count()
    }

    /// Number of skipped tables.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, TableStatus::Skipped { .. }))
    }

    fn count(&self, predicate: impl Fn(&TableStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| predicate(&o.status)).count()
    }
}

impl fmt::Display for GenerationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.no_changes() {
            return write!(f, "No changes detected");
        }
        write!(
            f,
            "{} written, {} planned, {} failed, {} skipped",
            self.written(),
            self.planned(),
            self.failed(),
            self.skipped()
        )
    }
}

/// Runs generation for a model source.
pub struct Orchestrator<M: ModelSource> {
    config: GenerateConfig,
    models: M,
    validator: MigrationValidator,
}

impl<M: ModelSource> Orchestrator<M> {
    /// Creates an orchestrator.
    pub fn new(config: GenerateConfig, models: M) -> Self {
        Self {
            config,
            models,
            validator: MigrationValidator::new(),
        }
    }

    /// Uses a custom validator.
    #[must_use]
    pub fn with_validator(mut self, validator: MigrationValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &GenerateConfig {
        &self.config
    }

    /// Runs one complete generation.
    pub async fn run(&self) -> Result<GenerationReport> {
        let _lock = RunLock::acquire(&self.config.scratch_dir)?;
        let started = chrono::Utc::now().timestamp_millis();
        let run_id = format!("{}_{}", started, std::process::id());

        let committed = load_migrations_or_empty(&self.config.migrations_dir)?;
        info!(
            committed = committed.len(),
            dir = %self.config.migrations_dir.display(),
            "Starting generation run"
        );

        let current = DisposableDatabase::create(&self.config.scratch_dir, "current", &run_id)
            .await?
            .keep(self.config.keep_scratch);
        let desired =
            DisposableDatabase::create(&self.config.scratch_dir, "desired", &run_id).await;
        let desired = match desired {
            Ok(db) => db.keep(self.config.keep_scratch),
            Err(e) => {
                teardown(current).await;
                return Err(e);
            }
        };

        let result = self
            .generate(&committed, &current, &desired, &run_id, started)
            .await;

        teardown(current).await;
        teardown(desired).await;

        let report = result?;
        info!(summary = %report, "Generation run finished");
        Ok(report)
    }

    async fn generate(
        &self,
        committed: &[Migration],
        current: &DisposableDatabase,
        desired: &DisposableDatabase,
        run_id: &str,
        started: i64,
    ) -> Result<GenerationReport> {
        current.replay(committed).await?;
        self.models.synchronize(desired.pool()).await?;

        let inspect_pool = match &self.config.inspect_database {
            Some(path) => Some(open_read_only(path).await?),
            None => {
                warn!("No inspection database; data-dependent validation is skipped");
                None
            }
        };
        let inspect = inspect_pool.as_ref().unwrap_or_else(|| current.pool());

        let mut report = GenerationReport::default();
        let tables = self.introspect(current.pool(), desired.pool(), &mut report).await?;

        let desired_schema = DatabaseSchema {
            tables: tables.iter().filter_map(|(_, _, d)| d.clone()).collect(),
        };
        for cycle in detect_cycles(&desired_schema) {
            let warning = cycle_warning(&cycle);
            warn!(cycle = %warning, "Foreign key cycle in desired schema");
            report.cycle_warnings.push(warning);
        }

        let catalog = list_index_names(current.pool()).await?;
        let context = ValidationContext {
            catalog_indexes: &catalog,
        };

        let mut run = TableRun {
            generator: MigrationGenerator::with_suffix(started.to_string()),
            verifier: MigrationVerifier::new(&self.config.scratch_dir, run_id)
                .keep(self.config.keep_scratch),
            clock: MigrationClock::after(committed.last().map_or(0, |m| m.timestamp)),
            accepted: committed.to_vec(),
            dialect: SqliteDialect::new(),
        };

        for (name, current_table, desired_table) in &tables {
            let Some(diff) = compare_optional(current_table.as_ref(), desired_table.as_ref()) else {
                continue;
            };
            if !diff.has_changes() {
                continue;
            }

            let outcome = self
                .process_table(
                    &mut run,
                    &diff,
                    current_table.as_ref(),
                    desired_table.as_ref(),
                    inspect,
                    context,
                )
                .await?;
            log_outcome(name, &outcome);
            report.outcomes.push(outcome);
        }

        // Skipped tables were recorded first; keep the report in name order.
        report.outcomes.sort_by(|a, b| a.table.cmp(&b.table));

        if let Some(pool) = inspect_pool {
            pool.close().await;
        }
        Ok(report)
    }

    /// Introspects both sides of every table. Tables that fail on either side
    /// are recorded as skipped and left out of the result.
    async fn introspect(
        &self,
        current: &SqlitePool,
        desired: &SqlitePool,
        report: &mut GenerationReport,
    ) -> Result<Vec<(String, Option<TableSchema>, Option<TableSchema>)>> {
        let names: BTreeSet<String> = list_tables(current)
            .await?
            .into_iter()
            .chain(list_tables(desired).await?)
            .collect();

        let mut tables = Vec::new();
        for name in names {
            let current_table = get_table_schema(current, &name).await;
            let desired_table = get_table_schema(desired, &name).await;
            match (current_table, desired_table) {
                (Ok(c), Ok(d)) => tables.push((name, c, d)),
                (Err(e), _) | (_, Err(e)) => {
                    warn!(table = %name, error = %e, "Skipping table with unknown schema");
                    report
                        .outcomes
                        .push(TableOutcome::skipped(&name, format!("unknown schema: {}", e)));
                }
            }
        }
        Ok(tables)
    }

    async fn process_table(
        &self,
        run: &mut TableRun,
        diff: &SchemaDiff,
        current: Option<&TableSchema>,
        desired: Option<&TableSchema>,
        inspect: &SqlitePool,
        context: ValidationContext<'_>,
    ) -> Result<TableOutcome> {
        let table = diff.table.as_str();

        let plan = match run.generator.generate(current, desired) {
            Ok(plan) => plan,
            Err(e) => return Ok(TableOutcome::skipped(table, e.to_string())),
        };

        let validation = match self.validator.validate(diff, inspect, context).await {
            Ok(validation) => validation,
            Err(e) => return Ok(TableOutcome::skipped(table, e.to_string())),
        };

        let migration = Migration::from_plan(&plan, diff, run.clock.next(), &run.dialect);
        let mut outcome = TableOutcome {
            table: table.to_string(),
            action: Some(plan.action),
            changes: migration.changes.clone(),
            warnings: validation.warnings.clone(),
            status: TableStatus::Skipped {
                reason: String::new(),
            },
        };

        if !validation.is_valid() {
            if !self.config.force {
                outcome.status = TableStatus::ValidationFailed {
                    errors: validation.errors,
                    draft: Box::new(migration),
                };
                return Ok(outcome);
            }
            warn!(table = %table, "Writing migration despite validation errors");
            outcome
                .warnings
                .extend(validation.errors.iter().map(|e| format!("forced: {}", e)));
        }

        if self.config.verify {
            let sequence = run.accepted.len();
            match run.verifier.verify(&run.accepted, &migration, sequence).await {
                Ok(report) if report.success => outcome.warnings.extend(report.warnings),
                Ok(report) => {
                    outcome.status = TableStatus::VerificationFailed {
                        error: report.error.unwrap_or_default(),
                    };
                    return Ok(outcome);
                }
                Err(e) => {
                    outcome.status = TableStatus::VerificationFailed {
                        error: e.to_string(),
                    };
                    return Ok(outcome);
                }
            }
        }

        outcome.status = if self.config.dry_run {
            TableStatus::Planned {
                file_name: migration.file_name(),
            }
        } else {
            TableStatus::Written {
                path: migration.save(&self.config.migrations_dir)?,
            }
        };
        run.accepted.push(migration);
        Ok(outcome)
    }
}

/// Per-run state shared across tables.
struct TableRun {
    generator: MigrationGenerator,
    verifier: MigrationVerifier,
    clock: MigrationClock,
    /// Committed migrations plus those accepted earlier in this run.
    accepted: Vec<Migration>,
    dialect: SqliteDialect,
}

async fn teardown(db: DisposableDatabase) {
    let label = db.label().to_string();
    if let Err(e) = db.teardown().await {
        warn!(label = %label, error = %e, "Failed to tear down disposable database");
    }
}

fn log_outcome(table: &str, outcome: &TableOutcome) {
    for warning in &outcome.warnings {
        warn!(table = %table, "{}", warning);
    }
    match &outcome.status {
        TableStatus::Written { path } => {
            info!(table = %table, path = %path.display(), "Wrote migration");
        }
        TableStatus::Planned { file_name } => {
            info!(table = %table, file = %file_name, "Would write migration");
        }
        TableStatus::ValidationFailed { errors, .. } => {
            for error in errors {
                warn!(table = %table, "{}", error);
            }
        }
        TableStatus::VerificationFailed { error } => {
            warn!(table = %table, error = %error, "Verification failed");
        }
        TableStatus::Skipped { reason } => {
            warn!(table = %table, reason = %reason, "Skipped table");
        }
    }
}

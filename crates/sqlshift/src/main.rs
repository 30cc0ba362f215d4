//! sqlshift CLI
//!
//! Command-line tool for generating and running SQLite migrations.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use sqlshift::migration::load_migrations_or_empty;
use sqlshift::prelude::*;

/// Schema diffing and migration generation for SQLite.
#[derive(Parser)]
#[command(name = "sqlshift")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database URL (SQLite path or connection string).
    #[arg(short, long, env = "DATABASE_URL", default_value = "sqlite:db.sqlite3")]
    database: String,

    /// Migrations directory (overrides the configuration file).
    #[arg(short, long)]
    migrations_dir: Option<PathBuf>,

    /// Directory for disposable databases (overrides the configuration file).
    #[arg(long)]
    scratch_dir: Option<PathBuf>,

    /// Configuration file (defaults to ./sqlshift.json if present).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate migrations from model changes.
    Generate {
        /// Models file (JSON array of table definitions).
        #[arg(long, default_value = "models.json")]
        models: PathBuf,

        /// Print the file names that would be written.
        #[arg(long)]
        dry_run: bool,

        /// Write migrations even when validation fails.
        #[arg(long)]
        force: bool,

        /// Skip executing generated migrations on a disposable clone.
        #[arg(long)]
        no_verify: bool,

        /// Database to consult for data-dependent validation (read-only).
        /// Defaults to the `--database` file when it exists.
        #[arg(long)]
        inspect: Option<PathBuf>,
    },

    /// Apply pending migrations.
    Migrate {
        /// Show SQL without executing (dry run).
        #[arg(long)]
        dry_run: bool,
    },

    /// Revert applied migrations, newest first.
    Revert {
        /// Number of migrations to revert.
        #[arg(short, long, default_value_t = 1)]
        count: usize,

        /// Show SQL without executing (dry run).
        #[arg(long)]
        dry_run: bool,
    },

    /// Show migration status.
    Status,

    /// Show SQL for a migration without executing.
    Sql {
        /// Migration name.
        name: String,

        /// Show revert SQL instead of forward SQL.
        #[arg(short, long)]
        reverse: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = GenerateConfig::discover(cli.config.as_deref())?;
    if let Some(dir) = cli.migrations_dir {
        config = config.migrations_dir(dir);
    }
    if let Some(dir) = cli.scratch_dir {
        config = config.scratch_dir(dir);
    }

    match cli.command {
        Commands::Generate {
            models,
            dry_run,
            force,
            no_verify,
            inspect,
        } => {
            let dry_run = config.dry_run || dry_run;
            let force = config.force || force;
            let verify = config.verify && !no_verify;
            let mut config = config.dry_run(dry_run).force(force).verify(verify);
            if let Some(path) = inspect {
                config = config.inspect_database(path);
            }
            let config = config.inspect_database_url(&cli.database);
            let models = DeclaredModels::load(&models)?;
            let report = Orchestrator::new(config, models).run().await?;
            print_report(&report);

            if report.has_failures() {
                return Ok(ExitCode::FAILURE);
            }
        }

        Commands::Migrate { dry_run } => {
            let migrations = load_migrations_or_empty(&config.migrations_dir)?;
            let pool = connect(&cli.database).await?;
            let executor = MigrationExecutor::new(pool).dry_run(dry_run);
            executor.init().await?;

            if dry_run {
                info!("Dry run mode - SQL will be printed but not executed.");
            }

            let applied = executor.apply_all(&migrations).await?;
            if applied == 0 {
                info!("No migrations to apply.");
            } else {
                info!(count = applied, "Applied migrations");
            }
        }

        Commands::Revert { count, dry_run } => {
            let migrations = load_migrations_or_empty(&config.migrations_dir)?;
            let pool = connect(&cli.database).await?;
            let executor = MigrationExecutor::new(pool).dry_run(dry_run);
            executor.init().await?;

            let reverted = executor.revert_last(&migrations, count).await?;
            if reverted.is_empty() {
                info!("No migrations to revert.");
            }
        }

        Commands::Status => {
            let migrations = load_migrations_or_empty(&config.migrations_dir)?;
            let pool = connect(&cli.database).await?;
            let executor = MigrationExecutor::new(pool);
            executor.init().await?;

            let status = executor.status(&migrations).await?;
            if status.is_empty() {
                info!("No migration files found.");
            } else {
                println!("\nMigrations:");
                println!("{:-<60}", "");
                for entry in &status {
                    println!(
                        " [{}] {} ({})",
                        if entry.applied { "X" } else { " " },
                        entry.name,
                        entry.table_name
                    );
                }
                println!();
            }
        }

        Commands::Sql { name, reverse } => {
            let migrations = load_migrations(&config.migrations_dir)?;
            let migration = migrations
                .iter()
                .find(|m| m.name == name || m.file_name() == name)
                .ok_or_else(|| MigrateError::MigrationNotFound(name.clone()))?;

            println!("-- {}", migration.description);
            for change in &migration.changes {
                println!("-- {}", change);
            }
            if reverse {
                println!("{}", migration.down_sql());
            } else {
                println!("{}", migration.up_sql());
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn print_report(report: &GenerationReport) {
    for warning in &report.cycle_warnings {
        println!("warning: {}", warning);
    }

    for outcome in &report.outcomes {
        match &outcome.status {
            TableStatus::Written { path } => println!("Created {}", path.display()),
            TableStatus::Planned { file_name } => println!("Would create {}", file_name),
            TableStatus::ValidationFailed { errors, .. } => {
                println!("Validation failed for {}:", outcome.table);
                for error in errors {
                    println!("  - {}", error);
                }
            }
            TableStatus::VerificationFailed { error } => {
                println!("Verification failed for {}: {}", outcome.table, error);
            }
            TableStatus::Skipped { reason } => {
                println!("Skipped {}: {}", outcome.table, reason);
            }
        }
        for change in &outcome.changes {
            println!("    {}", change);
        }
    }

    println!("{}", report);
}

//! Disposable databases.
//!
//! Every generation run works on throwaway SQLite files in a scratch
//! directory: one rebuilt from the committed migrations, one synchronized
//! from the models, and one per verified migration. Each file name carries a
//! run id so concurrent runs never share a file, and a lock file keeps a
//! second run out of the same scratch directory.
//!
//! Files are removed by [`DisposableDatabase::teardown`], with a best-effort
//! fallback on drop.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{debug, error, warn};

use crate::error::{MigrateError, Result};
use crate::executor::execute_statements;
use crate::migration::Migration;

/// Opens (and creates if needed) the database at `url`, e.g.
/// `sqlite://app.db` or `app.db`.
pub async fn connect(url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Opens an existing database file without write access.
pub async fn open_read_only(path: &Path) -> Result<SqlitePool> {
    if !path.is_file() {
        return Err(MigrateError::Environment(format!(
            "inspection database {} does not exist",
            path.display()
        )));
    }
    let options = SqliteConnectOptions::new().filename(path).read_only(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// A throwaway SQLite database file.
#[derive(Debug)]
pub struct DisposableDatabase {
    label: String,
    path: PathBuf,
    pool: SqlitePool,
    keep: bool,
    torn_down: bool,
}

impl DisposableDatabase {
    /// Creates an empty database at `{scratch_dir}/{label}_{run_id}.sqlite3`.
    pub async fn create(scratch_dir: &Path, label: &str, run_id: &str) -> Result<Self> {
        fs::create_dir_all(scratch_dir).map_err(|e| {
            MigrateError::Environment(format!(
                "cannot create scratch directory {}: {}",
                scratch_dir.display(),
                e
            ))
        })?;

        let path = scratch_dir.join(format!("{}_{}.sqlite3", label, run_id));
        remove_database_files(&path)?;

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| {
                MigrateError::Environment(format!("cannot create {}: {}", path.display(), e))
            })?;

        debug!(label = %label, path = %path.display(), "Created disposable database");
        Ok(Self {
            label: label.to_string(),
            path,
            pool,
            keep: false,
            torn_down: false,
        })
    }

    /// Keeps the file on teardown (for debugging).
    #[must_use]
    pub fn keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    /// Label given at creation.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Database file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Connection pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Applies the `up` statements of `migrations` in order.
    pub async fn replay(&self, migrations: &[Migration]) -> Result<()> {
        for migration in migrations {
            if let Err(e) = execute_statements(&self.pool, &migration.up).await {
                error!(
                    label = %self.label,
                    migration = %migration.name,
                    error = %e,
                    "Replaying migration failed"
                );
                return Err(e);
            }
        }
        debug!(label = %self.label, count = migrations.len(), "Replayed migrations");
        Ok(())
    }

    /// Closes the pool and deletes the database files.
    pub async fn teardown(mut self) -> Result<()> {
        self.torn_down = true;
        self.pool.close().await;
        if self.keep {
            debug!(path = %self.path.display(), "Keeping disposable database");
            return Ok(());
        }
        remove_database_files(&self.path)?;
        debug!(label = %self.label, "Removed disposable database");
        Ok(())
    }
}

impl Drop for DisposableDatabase {
    fn drop(&mut self) {
        if self.torn_down || self.keep {
            return;
        }
        if let Err(e) = remove_database_files(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove disposable database");
        }
    }
}

/// Removes a database file and its WAL/SHM companions.
fn remove_database_files(path: &Path) -> Result<()> {
    let mut candidates = vec![path.to_path_buf()];
    for suffix in ["-wal", "-shm", "-journal"] {
        let mut name = path.as_os_str().to_owned();
        name.push(suffix);
        candidates.push(PathBuf::from(name));
    }

    for candidate in candidates {
        match fs::remove_file(&candidate) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(MigrateError::Environment(format!(
                    "cannot remove {}: {}",
                    candidate.display(),
                    e
                )))
            }
        }
    }
    Ok(())
}

/// Exclusive lock on a scratch directory for the duration of a run.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Name of the lock file inside the scratch directory.
    pub const FILE_NAME: &'static str = ".generate.lock";

    /// Takes the lock, failing with [`MigrateError::AlreadyRunning`] if
    /// another run holds it.
    pub fn acquire(scratch_dir: &Path) -> Result<Self> {
        fs::create_dir_all(scratch_dir)?;
        let path = scratch_dir.join(Self::FILE_NAME);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(MigrateError::AlreadyRunning(path));
            }
            Err(e) => return Err(e.into()),
        };
        writeln!(file, "{}", std::process::id())?;
        Ok(Self { path })
    }

    /// Lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to release run lock");
        }
    }
}

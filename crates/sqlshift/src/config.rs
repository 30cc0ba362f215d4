//! Generation settings.
//!
//! Settings come from an optional JSON file (`sqlshift.json` by default);
//! command-line flags override individual fields.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "sqlshift.json";

/// Settings for a generation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerateConfig {
    /// Directory holding committed migration files.
    pub migrations_dir: PathBuf,
    /// Directory for disposable databases and the run lock.
    pub scratch_dir: PathBuf,
    /// Report intended file names without writing anything.
    pub dry_run: bool,
    /// Write migrations even when validation fails.
    pub force: bool,
    /// Run each generated migration on a disposable clone before accepting it.
    pub verify: bool,
    /// Leave disposable databases on disk.
    pub keep_scratch: bool,
    /// Database consulted read-only by data-dependent validation. The CLI
    /// falls back to the `--database` file when it exists. Without one, the
    /// row checks have nothing to read and are skipped.
    pub inspect_database: Option<PathBuf>,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            migrations_dir: PathBuf::from("migrations"),
            scratch_dir: std::env::temp_dir().join("sqlshift"),
            dry_run: false,
            force: false,
            verify: true,
            keep_scratch: false,
            inspect_database: None,
        }
    }
}

impl GenerateConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a configuration file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(|e| MigrateError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Reads `path` if given, else `sqlshift.json` if present, else defaults.
    pub fn discover(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Self::load(Path::new(DEFAULT_CONFIG_FILE))
            }
            None => Ok(Self::default()),
        }
    }

    /// Sets the migrations directory.
    #[must_use]
    pub fn migrations_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.migrations_dir = dir.into();
        self
    }

    /// Sets the scratch directory.
    #[must_use]
    pub fn scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    /// Enables dry-run mode.
    #[must_use]
    pub fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }

    /// Writes migrations even when validation fails.
    #[must_use]
    pub fn force(mut self, enabled: bool) -> Self {
        self.force = enabled;
        self
    }

    /// Enables or disables execution verification.
    #[must_use]
    pub fn verify(mut self, enabled: bool) -> Self {
        self.verify = enabled;
        self
    }

    /// Keeps disposable databases on disk.
    #[must_use]
    pub fn keep_scratch(mut self, enabled: bool) -> Self {
        self.keep_scratch = enabled;
        self
    }

    /// Uses `path` for data-dependent validation.
    #[must_use]
    pub fn inspect_database(mut self, path: impl Into<PathBuf>) -> Self {
        self.inspect_database = Some(path.into());
        self
    }

    /// Inspects the database behind `url` unless an inspection database is
    /// already set. URLs that name no existing file leave the setting empty.
    #[must_use]
    pub fn inspect_database_url(mut self, url: &str) -> Self {
        if self.inspect_database.is_none() {
            self.inspect_database = database_file(url).filter(|path| path.is_file());
        }
        self
    }
}

/// Extracts the file path from a SQLite URL (`sqlite://app.db`,
/// `sqlite:app.db?mode=rwc` or a bare path). In-memory URLs have no file.
#[must_use]
pub fn database_file(url: &str) -> Option<PathBuf> {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url);
    let path = path.split_once('?').map_or(path, |(path, _)| path);
    let path = path.strip_prefix("file:").unwrap_or(path);

    if path.is_empty() || path == ":memory:" || path.starts_with(":memory:") {
        return None;
    }
    Some(PathBuf::from(path))
}

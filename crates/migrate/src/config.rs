//! Migrator configuration
//!
//! Loaded from a YAML file, then overridden from `DATAMIGRATE_*` environment
//! variables. Verbosity is carried here and threaded into every runner rather
//! than living in a process-wide flag.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{MigrateResult, MigrationError};

pub const ENV_PATH: &str = "DATAMIGRATE_PATH";
pub const ENV_EXTENSION: &str = "DATAMIGRATE_EXTENSION";
pub const ENV_TABLE: &str = "DATAMIGRATE_TABLE";
pub const ENV_VERBOSE: &str = "DATAMIGRATE_VERBOSE";
pub const ENV_TIMESTAMPED: &str = "DATAMIGRATE_TIMESTAMPED";

/// Configuration for discovery, bookkeeping and reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigratorConfig {
    /// Directory where migration files are stored
    pub migrations_path: PathBuf,
    /// File extension of migration files, without the dot
    pub extension: String,
    /// Table name for tracking applied versions
    pub ledger_table: String,
    /// Announce progress at info level
    pub verbose: bool,
    /// Prefix generated migrations with a UTC timestamp instead of a sequence number
    pub timestamped_migrations: bool,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            migrations_path: PathBuf::from("db/migrate"),
            extension: "sql".to_string(),
            ledger_table: "data_migrations".to_string(),
            verbose: true,
            timestamped_migrations: true,
        }
    }
}

impl MigratorConfig {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> MigrateResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content).map_err(|e| {
            MigrationError::config(format!("failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Default configuration with environment overrides applied
    pub fn from_env() -> MigrateResult<Self> {
        Self::default().with_env_overrides()
    }

    /// Apply `DATAMIGRATE_*` environment overrides
    pub fn with_env_overrides(self) -> MigrateResult<Self> {
        self.with_overrides(|key| env::var(key).ok())
    }

    /// Apply `DATAMIGRATE_*` overrides read through `lookup`
    pub fn with_overrides<F>(mut self, lookup: F) -> MigrateResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_PATH) {
            self.migrations_path = PathBuf::from(path);
        }
        if let Some(extension) = lookup(ENV_EXTENSION) {
            self.extension = extension.trim_start_matches('.').to_string();
        }
        if let Some(table) = lookup(ENV_TABLE) {
            self.ledger_table = table;
        }
        if let Some(verbose) = lookup(ENV_VERBOSE) {
            self.verbose = parse_bool(ENV_VERBOSE, &verbose)?;
        }
        if let Some(timestamped) = lookup(ENV_TIMESTAMPED) {
            self.timestamped_migrations = parse_bool(ENV_TIMESTAMPED, &timestamped)?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn with_migrations_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.migrations_path = path.into();
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> MigrateResult<()> {
        if self.ledger_table.is_empty() {
            return Err(MigrationError::config("ledger_table must not be empty"));
        }
        let mut chars = self.ledger_table.chars();
        let valid_start = chars
            .next()
            .map_or(false, |c| c.is_ascii_alphabetic() || c == '_');
        if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(MigrationError::config(format!(
                "ledger_table '{}' is not a plain SQL identifier",
                self.ledger_table
            )));
        }
        if self.extension.contains(['.', '/', '\\']) {
            return Err(MigrationError::config(format!(
                "extension '{}' must not contain dots or path separators",
                self.extension
            )));
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> MigrateResult<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(MigrationError::config(format!(
            "{} expects a boolean, got '{}'",
            key, other
        ))),
    }
}

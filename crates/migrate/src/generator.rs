//! New migration files
//!
//! Creates an empty SQL script named `<version>_<name>.<ext>` in the configured
//! migrations directory.

use chrono::{DateTime, Utc};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use crate::config::MigratorConfig;
use crate::descriptor::parse_identifier;
use crate::error::{MigrateResult, MigrationError};
use crate::source::DirectorySource;

/// Create a new migration file and return its path
pub fn create_migration(config: &MigratorConfig, name: &str) -> MigrateResult<PathBuf> {
    create_migration_at(config, name, Utc::now())
}

pub(crate) fn create_migration_at(
    config: &MigratorConfig,
    name: &str,
    now: DateTime<Utc>,
) -> MigrateResult<PathBuf> {
    let raw_name = normalize_name(name);
    // validate the name on its own before looking at the directory
    let candidate = parse_identifier(&format!("0_{}", raw_name)).map_err(|_| {
        MigrationError::MalformedIdentifier {
            identifier: name.to_string(),
        }
    })?;

    let source = DirectorySource::new(&config.migrations_path, config.extension.clone());
    let existing: Vec<_> = source
        .scan()?
        .into_iter()
        .filter_map(|(identifier, _)| parse_identifier(&identifier).ok())
        .collect();

    if existing
        .iter()
        .any(|parsed| parsed.name.eq_ignore_ascii_case(&candidate.name))
    {
        return Err(MigrationError::DuplicateName {
            name: candidate.name,
        });
    }

    let version = if config.timestamped_migrations {
        now.format("%Y%m%d%H%M%S").to_string()
    } else {
        let last = existing.iter().map(|p| p.version).max().unwrap_or(0);
        let next = last.checked_add(1).ok_or_else(|| {
            MigrationError::config(format!(
                "no sequential version left after {}; switch to timestamped migrations",
                last
            ))
        })?;
        format!("{:03}", next)
    };
    let numeric: u64 = version.parse().map_err(|_| MigrationError::MalformedIdentifier {
        identifier: version.clone(),
    })?;
    if existing.iter().any(|parsed| parsed.version == numeric) {
        return Err(MigrationError::DuplicateVersion { version: numeric });
    }

    fs::create_dir_all(&config.migrations_path)?;

    let identifier = format!("{}_{}", version, raw_name);
    let path = config
        .migrations_path
        .join(format!("{}.{}", identifier, config.extension));

    let mut file = OpenOptions::new().write(true).create_new(true).open(&path)?;
    file.write_all(template(&candidate.name, &identifier, now).as_bytes())?;

    tracing::info!(target: "datamigrate", path = %path.display(), "created migration");
    Ok(path)
}

fn normalize_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            ' ' | '-' => '_',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}

fn template(name: &str, identifier: &str, now: DateTime<Utc>) -> String {
    format!(
        "-- Migration: {}\n\
         -- ID: {}\n\
         -- Created: {}\n\n\
         -- up\n\n\n\
         -- down\n\
         -- Add '-- irreversible' here if this migration cannot be reverted\n\n",
        name,
        identifier,
        now.format("%Y-%m-%d %H:%M:%S UTC")
    )
}

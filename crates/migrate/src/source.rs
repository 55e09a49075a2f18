//! Migration sources
//!
//! A source enumerates candidate identifiers at a location, each paired with
//! the body that executes it. Validation happens in [`MigrationSet`].
//!
//! [`MigrationSet`]: crate::set::MigrationSet

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::body::{MigrationBody, Store};
use crate::error::{MigrateResult, MigrationError};
use crate::script::{ScriptExecutor, SqlScriptBody};

/// One candidate migration yielded by a source
pub struct SourceEntry<S: Store> {
    pub identifier: String,
    pub body: Arc<dyn MigrationBody<S>>,
}

impl<S: Store> SourceEntry<S> {
    pub fn new(identifier: impl Into<String>, body: Arc<dyn MigrationBody<S>>) -> Self {
        Self {
            identifier: identifier.into(),
            body,
        }
    }
}

/// Enumerates migrations at some location
pub trait MigrationSource<S: Store>: Send + Sync {
    /// Every candidate, in any order
    fn entries(&self) -> MigrateResult<Vec<SourceEntry<S>>>;
}

/// Migrations registered in code
pub struct EmbeddedSource<S: Store> {
    entries: Vec<(String, Arc<dyn MigrationBody<S>>)>,
}

impl<S: Store> EmbeddedSource<S> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register a body under an identifier such as `3_backfill_slugs`
    pub fn with<B>(mut self, identifier: impl Into<String>, body: B) -> Self
    where
        B: MigrationBody<S> + 'static,
    {
        self.entries.push((identifier.into(), Arc::new(body)));
        self
    }

    pub fn with_shared(
        mut self,
        identifier: impl Into<String>,
        body: Arc<dyn MigrationBody<S>>,
    ) -> Self {
        self.entries.push((identifier.into(), body));
        self
    }
}

impl<S: Store> Default for EmbeddedSource<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Store> MigrationSource<S> for EmbeddedSource<S> {
    fn entries(&self) -> MigrateResult<Vec<SourceEntry<S>>> {
        Ok(self
            .entries
            .iter()
            .map(|(identifier, body)| SourceEntry::new(identifier.clone(), Arc::clone(body)))
            .collect())
    }
}

/// SQL script files in a directory
///
/// Every non-hidden file carrying the configured extension is a candidate;
/// its file stem is the identifier. A missing directory is an empty source.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    path: PathBuf,
    extension: String,
}

impl DirectorySource {
    pub fn new(path: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            extension: extension.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Candidate files as `(identifier, path)` pairs
    pub fn scan(&self) -> MigrateResult<Vec<(String, PathBuf)>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.path).map_err(|e| {
            MigrationError::source_error(format!(
                "Failed to read migrations directory {}: {}",
                self.path.display(),
                e
            ))
        })?;

        let mut candidates = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                MigrationError::source_error(format!("Failed to read directory entry: {}", e))
            })?;

            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            if file_name.to_string_lossy().starts_with('.') {
                continue;
            }
            if path.extension().map_or(true, |ext| ext != self.extension.as_str()) {
                continue;
            }

            let identifier = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .ok_or_else(|| MigrationError::MalformedIdentifier {
                    identifier: file_name.to_string_lossy().into_owned(),
                })?;
            candidates.push((identifier, path));
        }

        Ok(candidates)
    }
}

impl<S> MigrationSource<S> for DirectorySource
where
    S: ScriptExecutor + Store,
{
    fn entries(&self) -> MigrateResult<Vec<SourceEntry<S>>> {
        self.scan()?
            .into_iter()
            .map(|(identifier, path)| {
                let body = SqlScriptBody::load(&path)?;
                Ok(SourceEntry::new(identifier, Arc::new(body)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::NoopBody;
    use crate::script::tests::RecordingExecutor;
    use tempfile::TempDir;

    #[test]
    fn test_embedded_source_preserves_registrations() {
        let source = EmbeddedSource::<()>::new()
            .with("2_b", NoopBody)
            .with("1_a", NoopBody);

        let identifiers: Vec<String> = source
            .entries()
            .unwrap()
            .into_iter()
            .map(|e| e.identifier)
            .collect();
        assert_eq!(identifiers, vec!["2_b", "1_a"]);
    }

    #[test]
    fn test_directory_scan_filters_candidates() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("1_create_users.sql"), "-- up\n").unwrap();
        fs::write(temp_dir.path().join("2_seed_roles.sql"), "-- up\n").unwrap();
        fs::write(temp_dir.path().join("README.md"), "notes").unwrap();
        fs::write(temp_dir.path().join(".3_hidden.sql"), "-- up\n").unwrap();
        fs::create_dir(temp_dir.path().join("4_nested.sql")).unwrap();

        let source = DirectorySource::new(temp_dir.path(), "sql");
        let mut identifiers: Vec<String> = source.scan().unwrap().into_iter().map(|(id, _)| id).collect();
        identifiers.sort();
        assert_eq!(identifiers, vec!["1_create_users", "2_seed_roles"]);
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let source = DirectorySource::new(temp_dir.path().join("absent"), "sql");
        let entries = MigrationSource::<RecordingExecutor>::entries(&source).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_directory_source_loads_scripts() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join("10_add_flag.sql"),
            "-- up\nUPDATE users SET flag = true;\n-- down\nUPDATE users SET flag = false;\n",
        )
        .unwrap();

        let source = DirectorySource::new(temp_dir.path(), "sql");
        let entries = MigrationSource::<RecordingExecutor>::entries(&source).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].identifier, "10_add_flag");
    }
}

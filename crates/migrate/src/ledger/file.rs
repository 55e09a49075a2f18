//! JSON file ledger
//!
//! Stores `{version, applied_at}` records. Every write goes to a sibling temp
//! file which is flushed to disk and then renamed over the ledger, so a crash
//! leaves either the old or the new contents on disk. A missing file is an
//! empty ledger; a file that exists but holds nothing is treated as damaged.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::VersionLedger;
use crate::error::{MigrateResult, MigrationError};

/// One applied version as stored on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub version: String,
    pub applied_at: DateTime<Utc>,
}

/// Ledger persisted to a JSON file
#[derive(Debug)]
pub struct FileLedger {
    path: PathBuf,
    // serializes read-modify-write cycles within this process
    lock: Mutex<()>,
}

impl FileLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records as stored, in file order
    pub async fn records(&self) -> MigrateResult<Vec<LedgerRecord>> {
        let _guard = self.lock.lock().await;
        self.read_records().await
    }

    async fn read_records(&self) -> MigrateResult<Vec<LedgerRecord>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(MigrationError::ledger(
                    format!("Failed to read ledger {}", self.path.display()),
                    e,
                ))
            }
        };
        // a successful write always leaves at least "[]" behind
        if content.trim().is_empty() {
            return Err(MigrationError::Ledger {
                message: format!("Ledger {} exists but is empty", self.path.display()),
                source: None,
            });
        }
        serde_json::from_str(&content).map_err(|e| {
            MigrationError::ledger(format!("Failed to parse ledger {}", self.path.display()), e)
        })
    }

    async fn write_records(&self, records: &[LedgerRecord]) -> MigrateResult<()> {
        let json = serde_json::to_string_pretty(records)
            .map_err(|e| MigrationError::ledger("Failed to serialize ledger", e))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                MigrationError::ledger(format!("Failed to create {}", parent.display()), e)
            })?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        let write_err = |e: std::io::Error| {
            MigrationError::ledger(format!("Failed to write {}", tmp.display()), e)
        };
        let mut file = tokio::fs::File::create(&tmp).await.map_err(write_err)?;
        file.write_all(json.as_bytes()).await.map_err(write_err)?;
        file.sync_all().await.map_err(write_err)?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            MigrationError::ledger(format!("Failed to replace {}", self.path.display()), e)
        })?;
        self.sync_parent().await
    }

    /// Persist the rename itself
    #[cfg(unix)]
    async fn sync_parent(&self) -> MigrateResult<()> {
        let parent = match self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => parent.to_path_buf(),
            None => PathBuf::from("."),
        };
        let dir = tokio::fs::File::open(&parent).await.map_err(|e| {
            MigrationError::ledger(format!("Failed to open {}", parent.display()), e)
        })?;
        dir.sync_all().await.map_err(|e| {
            MigrationError::ledger(format!("Failed to sync {}", parent.display()), e)
        })
    }

    #[cfg(not(unix))]
    async fn sync_parent(&self) -> MigrateResult<()> {
        Ok(())
    }
}

fn parse_version(record: &LedgerRecord) -> MigrateResult<u64> {
    record.version.trim().parse().map_err(|e| {
        MigrationError::ledger(format!("Invalid version '{}' in ledger", record.version), e)
    })
}

#[async_trait]
impl VersionLedger for FileLedger {
    async fn applied_versions(&self) -> MigrateResult<BTreeSet<u64>> {
        self.records().await?.iter().map(parse_version).collect()
    }

    async fn record_applied(&self, version: u64) -> MigrateResult<()> {
        let _guard = self.lock.lock().await;
        let mut records = self.read_records().await?;
        let key = version.to_string();
        if records.iter().any(|r| r.version == key) {
            return Ok(());
        }
        records.push(LedgerRecord {
            version: key,
            applied_at: Utc::now(),
        });
        self.write_records(&records).await
    }

    async fn record_reverted(&self, version: u64) -> MigrateResult<()> {
        let _guard = self.lock.lock().await;
        let mut records = self.read_records().await?;
        let key = version.to_string();
        let before = records.len();
        records.retain(|r| r.version != key);
        if records.len() == before {
            return Ok(());
        }
        self.write_records(&records).await
    }
}

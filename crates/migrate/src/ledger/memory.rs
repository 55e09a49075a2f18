use async_trait::async_trait;
use std::collections::BTreeSet;
use tokio::sync::Mutex;

use super::VersionLedger;
use crate::error::MigrateResult;

/// In-process ledger, useful for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryLedger {
    versions: Mutex<BTreeSet<u64>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger pre-populated with `versions`
    pub fn with_versions(versions: impl IntoIterator<Item = u64>) -> Self {
        Self {
            versions: Mutex::new(versions.into_iter().collect()),
        }
    }

    /// Copy of the current contents
    pub async fn snapshot(&self) -> BTreeSet<u64> {
        self.versions.lock().await.clone()
    }
}

#[async_trait]
impl VersionLedger for MemoryLedger {
    async fn applied_versions(&self) -> MigrateResult<BTreeSet<u64>> {
        Ok(self.snapshot().await)
    }

    async fn record_applied(&self, version: u64) -> MigrateResult<()> {
        self.versions.lock().await.insert(version);
        Ok(())
    }

    async fn record_reverted(&self, version: u64) -> MigrateResult<()> {
        self.versions.lock().await.remove(&version);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_and_revert() {
        let ledger = MemoryLedger::with_versions([1, 2]);
        ledger.record_applied(3).await.unwrap();
        ledger.record_reverted(1).await.unwrap();
        // reverting an absent version is not an error
        ledger.record_reverted(42).await.unwrap();

        let versions: Vec<u64> = ledger.applied_versions().await.unwrap().into_iter().collect();
        assert_eq!(versions, vec![2, 3]);
    }
}

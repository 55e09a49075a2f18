//! Version ledgers
//!
//! The ledger durably records which versions have been applied. The migrator
//! snapshots it once per run and pushes every change to it immediately after
//! the corresponding body succeeds.
//!
//! A ledger that shares a transaction with the store may open one unit of work
//! per step: the body and the ledger update then commit or roll back together.
//! The default step hooks do nothing.

use async_trait::async_trait;
use std::collections::BTreeSet;

use crate::error::MigrateResult;

pub mod file;
pub mod memory;
pub mod postgres;

pub use file::FileLedger;
pub use memory::MemoryLedger;
pub use postgres::{PgExecutor, PgLedger};

/// Durable set of applied versions
#[async_trait]
pub trait VersionLedger: Send + Sync {
    /// Every applied version
    async fn applied_versions(&self) -> MigrateResult<BTreeSet<u64>>;

    /// Record that `version` has been applied
    async fn record_applied(&self, version: u64) -> MigrateResult<()>;

    /// Remove the record for `version`
    async fn record_reverted(&self, version: u64) -> MigrateResult<()>;

    /// Open the unit of work for one step
    async fn begin_step(&self) -> MigrateResult<()> {
        Ok(())
    }

    /// Commit the body's effects together with the ledger update
    async fn commit_step(&self) -> MigrateResult<()> {
        Ok(())
    }

    /// Discard an open unit of work after a failure
    async fn abort_step(&self) -> MigrateResult<()> {
        Ok(())
    }
}

#[async_trait]
impl<L: VersionLedger + ?Sized> VersionLedger for &L {
    async fn applied_versions(&self) -> MigrateResult<BTreeSet<u64>> {
        (**self).applied_versions().await
    }

    async fn record_applied(&self, version: u64) -> MigrateResult<()> {
        (**self).record_applied(version).await
    }

    async fn record_reverted(&self, version: u64) -> MigrateResult<()> {
        (**self).record_reverted(version).await
    }

    async fn begin_step(&self) -> MigrateResult<()> {
        (**self).begin_step().await
    }

    async fn commit_step(&self) -> MigrateResult<()> {
        (**self).commit_step().await
    }

    async fn abort_step(&self) -> MigrateResult<()> {
        (**self).abort_step().await
    }
}

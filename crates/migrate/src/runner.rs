//! Migration Runner - invocation surface
//!
//! Every operation rediscovers the migration set and builds a fresh
//! [`Migrator`], so nothing read from the ledger outlives one invocation.
//! The runner does no locking of its own: callers must make sure only one run
//! touches a given store at a time.

use std::collections::BTreeSet;

use crate::announce::Announcer;
use crate::body::Store;
use crate::config::MigratorConfig;
use crate::definitions::{Direction, MigrationReport, MigrationStatus, StatusReport, StepTarget};
use crate::descriptor::MigrationDescriptor;
use crate::error::MigrateResult;
use crate::ledger::VersionLedger;
use crate::migrator::Migrator;
use crate::set::MigrationSet;
use crate::source::MigrationSource;

/// Entry point that applies and reverts migrations against one store
pub struct MigrationRunner<S: Store, L: VersionLedger> {
    source: Box<dyn MigrationSource<S>>,
    ledger: L,
    store: S,
    config: MigratorConfig,
}

impl<S: Store, L: VersionLedger> MigrationRunner<S, L> {
    /// Create a new migration runner
    pub fn new<Src>(source: Src, ledger: L, store: S, config: MigratorConfig) -> Self
    where
        Src: MigrationSource<S> + 'static,
    {
        Self {
            source: Box::new(source),
            ledger,
            store,
            config,
        }
    }

    pub fn config(&self) -> &MigratorConfig {
        &self.config
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Discover and validate the migration set
    pub fn discover(&self) -> MigrateResult<MigrationSet<S>> {
        MigrationSet::discover(self.source.as_ref())
    }

    fn announcer(&self) -> Announcer {
        Announcer::new(self.config.verbose)
    }

    async fn migrator<'r>(
        &'r self,
        set: &MigrationSet<S>,
        direction: Direction,
        target_version: Option<u64>,
    ) -> MigrateResult<Migrator<'r, S, L>> {
        Migrator::new(
            direction,
            set,
            &self.ledger,
            &self.store,
            target_version,
            self.announcer(),
        )
        .await
    }

    /// Move to `target_version`, or to the latest migration when omitted
    pub async fn migrate(&self, target_version: Option<u64>) -> MigrateResult<MigrationReport> {
        match target_version {
            None => self.up(None).await,
            // zero always means "before everything", even with nothing applied
            Some(0) => self.down(Some(0)).await,
            Some(target) if self.current_version().await? > target => {
                self.down(Some(target)).await
            }
            Some(target) => self.up(Some(target)).await,
        }
    }

    /// Apply every unapplied migration up to `target_version`
    pub async fn up(&self, target_version: Option<u64>) -> MigrateResult<MigrationReport> {
        self.migrate_in(Direction::Forward, target_version).await
    }

    /// Revert applied migrations down to, but not including, `target_version`
    pub async fn down(&self, target_version: Option<u64>) -> MigrateResult<MigrationReport> {
        self.migrate_in(Direction::Backward, target_version).await
    }

    async fn migrate_in(
        &self,
        direction: Direction,
        target_version: Option<u64>,
    ) -> MigrateResult<MigrationReport> {
        self.migrate_to(direction, target_version, false).await
    }

    async fn migrate_to(
        &self,
        direction: Direction,
        target_version: Option<u64>,
        target_is_floor: bool,
    ) -> MigrateResult<MigrationReport> {
        let set = self.discover()?;
        let mut migrator = self.migrator(&set, direction, target_version).await?;
        if target_is_floor {
            migrator = migrator.with_target_floor();
        }
        let report = migrator.migrate().await?;
        log_report(&report);
        Ok(report)
    }

    /// Execute exactly one version in `direction`
    pub async fn run(&self, direction: Direction, version: u64) -> MigrateResult<MigrationReport> {
        let set = self.discover()?;
        let mut migrator = self.migrator(&set, direction, Some(version)).await?;
        let report = migrator.run().await?;
        log_report(&report);
        Ok(report)
    }

    /// Revert the last `steps` applied migrations
    pub async fn rollback(&self, steps: usize) -> MigrateResult<MigrationReport> {
        self.step(Direction::Backward, steps).await
    }

    /// Apply the next `steps` migrations
    pub async fn forward(&self, steps: usize) -> MigrateResult<MigrationReport> {
        self.step(Direction::Forward, steps).await
    }

    async fn step(&self, direction: Direction, steps: usize) -> MigrateResult<MigrationReport> {
        let target = {
            let set = self.discover()?;
            let migrator = self.migrator(&set, direction, None).await?;
            migrator.step_target(steps)
        };

        match target {
            // a landed-on migration stays applied, even at version zero
            Some(StepTarget::Version(version)) => {
                self.migrate_to(direction, Some(version), true).await
            }
            Some(StepTarget::End) => self.migrate_in(direction, None).await,
            None => {
                tracing::info!(
                    target: "datamigrate",
                    direction = %direction,
                    steps,
                    "current migration not found, nothing to do"
                );
                Ok(MigrationReport::empty(direction))
            }
        }
    }

    /// Every version recorded in the ledger
    pub async fn applied_versions(&self) -> MigrateResult<BTreeSet<u64>> {
        self.ledger.applied_versions().await
    }

    /// Highest applied version, or zero
    pub async fn current_version(&self) -> MigrateResult<u64> {
        let applied = self.applied_versions().await?;
        Ok(MigrationSet::<S>::current_version(&applied))
    }

    /// Discovered migrations that have not been applied, ascending
    pub async fn pending(&self) -> MigrateResult<Vec<MigrationDescriptor<S>>> {
        let set = self.discover()?;
        let applied = self.applied_versions().await?;
        Ok(set.pending(&applied))
    }

    /// Applied flag for every discovered migration, plus orphaned ledger versions
    pub async fn status(&self) -> MigrateResult<StatusReport> {
        let set = self.discover()?;
        let applied = self.applied_versions().await?;

        let migrations = set
            .iter()
            .map(|descriptor| MigrationStatus {
                version: descriptor.version(),
                name: descriptor.name().to_string(),
                applied: applied.contains(&descriptor.version()),
            })
            .collect();
        let orphaned = applied
            .iter()
            .copied()
            .filter(|version| set.find(*version).is_none())
            .collect();

        Ok(StatusReport {
            migrations,
            orphaned,
        })
    }
}

fn log_report(report: &MigrationReport) {
    tracing::info!(
        target: "datamigrate",
        direction = %report.direction,
        executed = report.executed.len(),
        skipped = report.skipped.len(),
        elapsed_ms = report.elapsed.as_millis() as u64,
        "migration run finished"
    );
}

//! Migrator - plan computation and execution
//!
//! One `Migrator` serves one invocation: it snapshots the ledger when it is
//! built, computes the slice of the ordered migrations to walk, and executes
//! each step strictly in order. Every successful step is pushed to the ledger
//! before the next one starts; the first failure halts the plan and leaves
//! earlier steps committed.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use crate::announce::Announcer;
use crate::body::{StepContext, Store};
use crate::definitions::{Direction, MigrationReport, StepTarget};
use crate::descriptor::MigrationDescriptor;
use crate::error::{MigrateResult, MigrationError, StepError};
use crate::ledger::VersionLedger;
use crate::set::MigrationSet;

/// Plan state for a single invocation
pub struct Migrator<'a, S: Store, L: VersionLedger + ?Sized> {
    direction: Direction,
    target_version: Option<u64>,
    target_is_floor: bool,
    migrations: Vec<MigrationDescriptor<S>>,
    applied: BTreeSet<u64>,
    ledger: &'a L,
    store: &'a S,
    announcer: Announcer,
}

impl<'a, S: Store, L: VersionLedger + ?Sized> Migrator<'a, S, L> {
    /// Snapshot the ledger and order `set` for `direction`
    pub async fn new(
        direction: Direction,
        set: &MigrationSet<S>,
        ledger: &'a L,
        store: &'a S,
        target_version: Option<u64>,
        announcer: Announcer,
    ) -> MigrateResult<Self> {
        let applied = ledger.applied_versions().await?;
        Ok(Self {
            direction,
            target_version,
            target_is_floor: false,
            migrations: set.ordered(direction),
            applied,
            ledger,
            store,
            announcer,
        })
    }

    /// Keep an explicit backward target applied even when it is version zero
    pub fn with_target_floor(mut self) -> Self {
        self.target_is_floor = true;
        self
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn target_version(&self) -> Option<u64> {
        self.target_version
    }

    /// Migrations in traversal order
    pub fn migrations(&self) -> &[MigrationDescriptor<S>] {
        &self.migrations
    }

    /// Applied versions as currently known to this migrator
    pub fn applied_versions(&self) -> &BTreeSet<u64> {
        &self.applied
    }

    /// Highest applied version, or zero
    pub fn current_version(&self) -> u64 {
        MigrationSet::<S>::current_version(&self.applied)
    }

    /// Descriptor matching the current version, if one was discovered and
    /// is actually applied
    pub fn current_migration(&self) -> Option<&MigrationDescriptor<S>> {
        self.current_index().map(|index| &self.migrations[index])
    }

    fn current_index(&self) -> Option<usize> {
        let version = self.current_version();
        if !self.applied.contains(&version) {
            return None;
        }
        self.index_of(version)
    }

    fn index_of(&self, version: u64) -> Option<usize> {
        self.migrations.iter().position(|m| m.version() == version)
    }

    /// Slice of migrations the plan walks, before applied-state filtering
    pub fn plan(&self) -> MigrateResult<Vec<MigrationDescriptor<S>>> {
        let target = self.target_version.and_then(|version| self.index_of(version));
        if let (None, Some(version)) = (target, self.target_version) {
            if version > 0 {
                return Err(MigrationError::UnknownVersion { version });
            }
        }

        let Some(last) = self.migrations.len().checked_sub(1) else {
            return Ok(Vec::new());
        };

        let start = match self.direction {
            Direction::Forward => 0,
            Direction::Backward => self.current_index().unwrap_or(0),
        };
        let finish = target.unwrap_or(last);
        if start > finish {
            return Ok(Vec::new());
        }

        let mut runnable = self.migrations[start..=finish].to_vec();
        // Going down to an explicit target: the target is the new floor, not a
        // step. Zero means "revert everything" unless it came from a step walk.
        let zero_target = self.target_version == Some(0) && !self.target_is_floor;
        if self.direction.is_backward() && target.is_some() && !zero_target {
            runnable.pop();
        }
        Ok(runnable)
    }

    /// Walk the plan, executing every step not already in the requested state
    pub async fn migrate(&mut self) -> MigrateResult<MigrationReport> {
        let started = Instant::now();
        let runnable = self.plan()?;
        let mut report = MigrationReport::empty(self.direction);

        tracing::debug!(
            target: "datamigrate",
            direction = %self.direction,
            target = ?self.target_version,
            steps = runnable.len(),
            "computed migration plan"
        );

        for descriptor in &runnable {
            let applied = self.applied.contains(&descriptor.version());

            if self.direction.is_forward() && applied {
                report.skipped.push(descriptor.version());
                continue;
            }
            if self.direction.is_backward() && !applied {
                self.announcer.announce(descriptor, "never migrated, skipping");
                report.skipped.push(descriptor.version());
                continue;
            }

            self.execute(descriptor).await?;
            report.executed.push(descriptor.version());
        }

        report.elapsed = started.elapsed();
        Ok(report)
    }

    /// Execute exactly the target migration, unless it is already in the
    /// state the direction implies
    pub async fn run(&mut self) -> MigrateResult<MigrationReport> {
        let started = Instant::now();
        let version = self.target_version.unwrap_or(0);
        let descriptor = self
            .index_of(version)
            .map(|index| self.migrations[index].clone())
            .ok_or(MigrationError::UnknownVersion { version })?;

        let mut report = MigrationReport::empty(self.direction);
        let applied = self.applied.contains(&version);
        let needed = match self.direction {
            Direction::Forward => !applied,
            Direction::Backward => applied,
        };

        if needed {
            self.execute(&descriptor).await?;
            report.executed.push(version);
        } else {
            report.skipped.push(version);
        }

        report.elapsed = started.elapsed();
        Ok(report)
    }

    /// Migration reached by moving `steps` slots past the current migration
    /// in traversal order. `None` when the current position cannot be located
    /// or `steps` is zero.
    ///
    /// With nothing applied, a forward walk starts just before the first
    /// migration.
    pub fn step_target(&self, steps: usize) -> Option<StepTarget> {
        if steps == 0 {
            return None;
        }
        let landing = match self.current_index() {
            Some(start) => start.checked_add(steps),
            None if self.direction.is_forward() && self.applied.is_empty() => steps.checked_sub(1),
            None => return None,
        };

        Some(
            landing
                .and_then(|index| self.migrations.get(index))
                .map_or(StepTarget::End, |descriptor| {
                    StepTarget::Version(descriptor.version())
                }),
        )
    }

    async fn execute(&mut self, descriptor: &MigrationDescriptor<S>) -> MigrateResult<()> {
        self.ledger
            .begin_step()
            .await
            .map_err(|e| step_failed(descriptor, e))?;

        if let Err(e) = self.execute_step(descriptor).await {
            if let Err(abort) = self.ledger.abort_step().await {
                tracing::warn!(
                    target: "datamigrate",
                    version = descriptor.version(),
                    "failed to discard step: {}",
                    abort
                );
            }
            return Err(e);
        }

        let version = descriptor.version();
        match self.direction {
            Direction::Forward => self.applied.insert(version),
            Direction::Backward => self.applied.remove(&version),
        };
        Ok(())
    }

    /// Body, ledger update and commit for one step
    async fn execute_step(&self, descriptor: &MigrationDescriptor<S>) -> MigrateResult<()> {
        let body = Arc::clone(descriptor.body());
        let context = StepContext::new(self.store, self.announcer, descriptor.version());
        let outcome = match self.direction {
            Direction::Forward => {
                self.announcer
                    .timed(descriptor, self.direction, body.up_with(&context))
                    .await
            }
            Direction::Backward => {
                self.announcer
                    .timed(descriptor, self.direction, body.down_with(&context))
                    .await
            }
        };

        match outcome {
            Ok(_) => {}
            Err(StepError::Irreversible) => {
                return Err(MigrationError::Irreversible {
                    version: descriptor.version(),
                    name: descriptor.name().to_string(),
                })
            }
            Err(StepError::Failed(cause)) => {
                return Err(MigrationError::MigrationFailed {
                    version: descriptor.version(),
                    name: descriptor.name().to_string(),
                    source: cause.into(),
                })
            }
        }

        self.record_version_state(descriptor).await?;
        self.ledger
            .commit_step()
            .await
            .map_err(|e| step_failed(descriptor, e))
    }

    async fn record_version_state(&self, descriptor: &MigrationDescriptor<S>) -> MigrateResult<()> {
        let version = descriptor.version();
        let recorded = match self.direction {
            Direction::Forward => self.ledger.record_applied(version).await,
            Direction::Backward => self.ledger.record_reverted(version).await,
        };
        recorded.map_err(|e| step_failed(descriptor, e))
    }
}

/// Bookkeeping failure attributed to the step that was running
fn step_failed<S: Store>(descriptor: &MigrationDescriptor<S>, cause: MigrationError) -> MigrationError {
    MigrationError::MigrationFailed {
        version: descriptor.version(),
        name: descriptor.name().to_string(),
        source: Box::new(cause),
    }
}

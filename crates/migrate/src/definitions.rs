//! Migration Definitions - Core types shared across the migration system
//!
//! Direction of traversal, run reports and status rows.

use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Migration direction for execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Apply migrations in ascending version order
    Forward,
    /// Revert migrations in descending version order
    Backward,
}

impl Direction {
    pub fn is_forward(self) -> bool {
        matches!(self, Direction::Forward)
    }

    pub fn is_backward(self) -> bool {
        matches!(self, Direction::Backward)
    }

    /// Verb used when a step starts
    pub(crate) fn progressive(self) -> &'static str {
        match self {
            Direction::Forward => "migrating",
            Direction::Backward => "reverting",
        }
    }

    /// Verb used when a step finishes
    pub(crate) fn past(self) -> &'static str {
        match self {
            Direction::Forward => "migrated",
            Direction::Backward => "reverted",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Forward => write!(f, "up"),
            Direction::Backward => write!(f, "down"),
        }
    }
}

/// Where a relative step of `n` migrations lands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepTarget {
    /// A discovered migration. Going backward it is the floor and stays applied.
    Version(u64),
    /// The walk ran past the last migration in traversal order
    End,
}

/// Result of executing one plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub direction: Direction,
    /// Versions whose body ran and whose ledger entry was updated, in order
    pub executed: Vec<u64>,
    /// Versions in the plan that were already in the requested state
    pub skipped: Vec<u64>,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl MigrationReport {
    pub fn empty(direction: Direction) -> Self {
        Self {
            direction,
            executed: Vec::new(),
            skipped: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.executed.is_empty()
    }
}

/// Applied state of one discovered migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub version: u64,
    pub name: String,
    pub applied: bool,
}

/// Full status listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    /// Every discovered migration, ascending by version
    pub migrations: Vec<MigrationStatus>,
    /// Ledger versions with no matching migration
    pub orphaned: Vec<u64>,
}

impl StatusReport {
    pub fn pending_count(&self) -> usize {
        self.migrations.iter().filter(|m| !m.applied).count()
    }
}

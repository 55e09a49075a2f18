//! # datamigrate-core: sequential data migrations
//!
//! Applies and reverts an ordered set of versioned migrations against a
//! store while recording applied versions in a durable ledger.
//!
//! - [`MigrationSet`] discovers, validates and orders migrations.
//! - [`Migrator`] computes and executes the plan for one invocation.
//! - [`MigrationRunner`] exposes `migrate`, `rollback`, `forward` and `run`.

pub mod announce;
pub mod body;
pub mod config;
pub mod definitions;
pub mod descriptor;
pub mod error;
pub mod generator;
pub mod ledger;
pub mod migrator;
pub mod runner;
pub mod script;
pub mod set;
pub mod source;

pub use announce::Announcer;
pub use body::{
    step, FnBody, MigrationBody, NoopBody, StepContext, StepFuture, StepOutput, StepResult, Store,
};
pub use config::MigratorConfig;
pub use definitions::{Direction, MigrationReport, MigrationStatus, StatusReport, StepTarget};
pub use descriptor::{camelize, parse_identifier, MigrationDescriptor};
pub use error::{BoxError, MigrateResult, MigrationError, StepError};
pub use generator::create_migration;
pub use ledger::{FileLedger, MemoryLedger, PgExecutor, PgLedger, VersionLedger};
pub use migrator::Migrator;
pub use runner::MigrationRunner;
pub use script::{split_sql_statements, ScriptExecutor, ScriptSection, SqlScriptBody};
pub use set::MigrationSet;
pub use source::{DirectorySource, EmbeddedSource, MigrationSource, SourceEntry};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

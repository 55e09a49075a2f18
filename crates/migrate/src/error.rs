//! Error types for the migration system
//!
//! Discovery errors abort before anything runs. Execution errors abort the
//! remainder of a plan while leaving already committed steps in the ledger.

use thiserror::Error;

/// Boxed cause carried by wrapping variants
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type alias for migration operations
pub type MigrateResult<T> = Result<T, MigrationError>;

/// Error types for migration operations
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A discovered entry does not parse into version and name
    #[error("Illegal name for migration file: {identifier}\n\t(only lower case letters, numbers, and '_' allowed)")]
    MalformedIdentifier { identifier: String },

    /// Two discovered entries share a version number
    #[error("Multiple migrations have the version number {version}")]
    DuplicateVersion { version: u64 },

    /// Two discovered entries share a canonical name
    #[error("Multiple migrations have the name {name}")]
    DuplicateName { name: String },

    /// A requested target does not match any discovered migration
    #[error("No migration with version number {version}")]
    UnknownVersion { version: u64 },

    /// The backward operation of a migration is unsupported
    #[error("Migration {version} ({name}) is irreversible, it and all later migrations canceled")]
    Irreversible { version: u64, name: String },

    /// A migration body (or its ledger update) failed
    #[error("An error has occurred, {version} and all later migrations canceled:\n\n{source}")]
    MigrationFailed {
        version: u64,
        name: String,
        #[source]
        source: BoxError,
    },

    /// The version ledger could not be read or written
    #[error("Ledger error: {message}")]
    Ledger {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The migrations location could not be read
    #[error("Migration source error: {message}")]
    Source { message: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MigrationError {
    /// Create a ledger error wrapping an underlying cause
    pub fn ledger(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Ledger {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a source error
    pub fn source_error(message: impl Into<String>) -> Self {
        Self::Source {
            message: message.into(),
        }
    }

    /// Version of the migration that halted a plan, if any
    pub fn failed_version(&self) -> Option<u64> {
        match self {
            Self::Irreversible { version, .. } | Self::MigrationFailed { version, .. } => {
                Some(*version)
            }
            _ => None,
        }
    }

    /// True for errors raised while discovering migrations
    pub fn is_discovery_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedIdentifier { .. }
                | Self::DuplicateVersion { .. }
                | Self::DuplicateName { .. }
                | Self::Source { .. }
        )
    }
}

/// Error returned by a migration body
#[derive(Debug, Error)]
pub enum StepError {
    /// The body does not support running backward
    #[error("migration is irreversible")]
    Irreversible,

    /// The body ran and failed
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl StepError {
    /// Wrap any error as a body failure
    pub fn failed<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Failed(anyhow::Error::new(err))
    }
}

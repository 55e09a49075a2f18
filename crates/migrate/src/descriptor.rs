//! Migration descriptors
//!
//! A descriptor is the parsed identity of one discovered migration (version and
//! canonical name) plus the body that executes it. Descriptors are built once
//! per discovery pass and never change afterwards; only the version is ever
//! written to the ledger.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::sync::Arc;

use crate::body::{MigrationBody, Store};
use crate::error::{MigrateResult, MigrationError};

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9]+)_([a-z0-9_]+)$").expect("identifier pattern is valid"));

/// Version and canonical name parsed from a migration identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedIdentifier {
    pub version: u64,
    pub raw_name: String,
    pub name: String,
}

/// Parse `<digits>_<lowercase letters/digits/underscores>`, with an optional
/// extension already removed by the caller.
pub fn parse_identifier(identifier: &str) -> MigrateResult<ParsedIdentifier> {
    let malformed = || MigrationError::MalformedIdentifier {
        identifier: identifier.to_string(),
    };

    let captures = IDENTIFIER.captures(identifier).ok_or_else(malformed)?;
    let version = captures[1].parse::<u64>().map_err(|_| malformed())?;
    let raw_name = captures[2].to_string();
    let name = camelize(&raw_name);
    if name.is_empty() {
        return Err(malformed());
    }

    Ok(ParsedIdentifier {
        version,
        raw_name,
        name,
    })
}

/// snake_case to UpperCamelCase: `add_user_index` becomes `AddUserIndex`
pub fn camelize(raw: &str) -> String {
    raw.split('_')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// One discovered migration
pub struct MigrationDescriptor<S: Store> {
    version: u64,
    name: String,
    identifier: String,
    body: Arc<dyn MigrationBody<S>>,
}

impl<S: Store> MigrationDescriptor<S> {
    /// Build a descriptor from an identifier such as `20240101120000_backfill_emails`
    pub fn parse(identifier: &str, body: Arc<dyn MigrationBody<S>>) -> MigrateResult<Self> {
        let parsed = parse_identifier(identifier)?;
        Ok(Self {
            version: parsed.version,
            name: parsed.name,
            identifier: identifier.to_string(),
            body,
        })
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Canonical UpperCamelCase name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The identifier the descriptor was parsed from
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn body(&self) -> &Arc<dyn MigrationBody<S>> {
        &self.body
    }

    /// Key used for duplicate-name detection
    pub(crate) fn name_key(&self) -> String {
        self.name.to_lowercase()
    }
}

impl<S: Store> Clone for MigrationDescriptor<S> {
    fn clone(&self) -> Self {
        Self {
            version: self.version,
            name: self.name.clone(),
            identifier: self.identifier.clone(),
            body: Arc::clone(&self.body),
        }
    }
}

impl<S: Store> fmt::Debug for MigrationDescriptor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationDescriptor")
            .field("version", &self.version)
            .field("name", &self.name)
            .field("identifier", &self.identifier)
            .finish_non_exhaustive()
    }
}

impl<S: Store> PartialEq for MigrationDescriptor<S> {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version && self.name == other.name
    }
}

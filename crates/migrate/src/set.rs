//! Migration set - discovery, validation and ordering
//!
//! Builds the validated list of descriptors for one migrations location and
//! hands out direction-specific orderings of it.

use std::collections::{BTreeSet, HashMap};

use crate::body::Store;
use crate::definitions::Direction;
use crate::descriptor::MigrationDescriptor;
use crate::error::{MigrateResult, MigrationError};
use crate::source::MigrationSource;

/// Validated migrations, stored ascending by version
#[derive(Debug)]
pub struct MigrationSet<S: Store> {
    migrations: Vec<MigrationDescriptor<S>>,
}

impl<S: Store> MigrationSet<S> {
    /// Enumerate and validate every entry the source yields
    pub fn discover(source: &dyn MigrationSource<S>) -> MigrateResult<Self> {
        let descriptors = source
            .entries()?
            .into_iter()
            .map(|entry| MigrationDescriptor::parse(&entry.identifier, entry.body))
            .collect::<MigrateResult<Vec<_>>>()?;

        Self::from_descriptors(descriptors)
    }

    /// Validate already parsed descriptors
    pub fn from_descriptors(mut descriptors: Vec<MigrationDescriptor<S>>) -> MigrateResult<Self> {
        // Sort by identifier first so conflicts are reported the same way
        // regardless of enumeration order.
        descriptors.sort_by(|a, b| a.identifier().cmp(b.identifier()));

        let mut versions = BTreeSet::new();
        let mut names: HashMap<String, u64> = HashMap::new();
        for descriptor in &descriptors {
            if !versions.insert(descriptor.version()) {
                return Err(MigrationError::DuplicateVersion {
                    version: descriptor.version(),
                });
            }
            if names
                .insert(descriptor.name_key(), descriptor.version())
                .is_some()
            {
                return Err(MigrationError::DuplicateName {
                    name: descriptor.name().to_string(),
                });
            }
        }

        descriptors.sort_by_key(|d| d.version());
        Ok(Self {
            migrations: descriptors,
        })
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Ascending view
    pub fn iter(&self) -> impl Iterator<Item = &MigrationDescriptor<S>> {
        self.migrations.iter()
    }

    /// Fresh ordering for one traversal: ascending forward, descending backward
    pub fn ordered(&self, direction: Direction) -> Vec<MigrationDescriptor<S>> {
        let mut ordered = self.migrations.clone();
        if direction.is_backward() {
            ordered.reverse();
        }
        ordered
    }

    /// Descriptor whose version equals `version`
    pub fn find(&self, version: u64) -> Option<&MigrationDescriptor<S>> {
        self.migrations
            .binary_search_by_key(&version, |d| d.version())
            .ok()
            .map(|index| &self.migrations[index])
    }

    /// Resolve an explicit target. Zero is always legal and means "before
    /// everything", so it resolves to `None` unless a version-zero migration
    /// exists.
    pub fn resolve_target(&self, target: u64) -> MigrateResult<Option<&MigrationDescriptor<S>>> {
        match self.find(target) {
            Some(descriptor) => Ok(Some(descriptor)),
            None if target == 0 => Ok(None),
            None => Err(MigrationError::UnknownVersion { version: target }),
        }
    }

    /// Max applied version, or zero when nothing is applied
    pub fn current_version(applied: &BTreeSet<u64>) -> u64 {
        applied.iter().next_back().copied().unwrap_or(0)
    }

    /// Discovered migrations not present in `applied`, ascending
    pub fn pending(&self, applied: &BTreeSet<u64>) -> Vec<MigrationDescriptor<S>> {
        self.migrations
            .iter()
            .filter(|d| !applied.contains(&d.version()))
            .cloned()
            .collect()
    }
}

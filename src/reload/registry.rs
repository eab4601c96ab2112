//! Active route registry.
//!
//! The coordinator is the only writer. Everyone else gets a
//! [`RegistryView`] with read-only snapshot queries.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use super::loader::RouteDefinition;

/// One deployed route.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryEntry {
    pub id: String,
    pub definition: RouteDefinition,
    /// File that most recently contributed this id; `None` for routes
    /// registered outside the watched folder.
    pub owner: Option<PathBuf>,
}

/// Mapping of route id to the deployed definition and its owning file.
///
/// Ids are unique across the registry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActiveRegistry {
    entries: BTreeMap<String, RegistryEntry>,
}

impl ActiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&RegistryEntry> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Ids owned by `path`, in id order.
    pub fn ids_owned_by(&self, path: &Path) -> Vec<String> {
        self.entries
            .values()
            .filter(|e| e.owner.as_deref() == Some(path))
            .map(|e| e.id.clone())
            .collect()
    }

    /// Entries owned by `path`, in id order.
    pub fn owned_by<'a>(&'a self, path: &'a Path) -> impl Iterator<Item = &'a RegistryEntry> + 'a {
        self.entries
            .values()
            .filter(move |e| e.owner.as_deref() == Some(path))
    }

    /// Distinct owning files.
    pub fn owners(&self) -> Vec<PathBuf> {
        let mut owners: Vec<PathBuf> = self
            .entries
            .values()
            .filter_map(|e| e.owner.clone())
            .collect();
        owners.sort();
        owners.dedup();
        owners
    }

    /// All entries, in id order.
    pub fn all(&self) -> Vec<RegistryEntry> {
        self.entries.values().cloned().collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn insert(&mut self, entry: RegistryEntry) -> Option<RegistryEntry> {
        self.entries.insert(entry.id.clone(), entry)
    }

    pub(crate) fn remove(&mut self, id: &str) -> Option<RegistryEntry> {
        self.entries.remove(id)
    }
}

/// Read-only handle on the live registry.
#[derive(Debug, Clone)]
pub struct RegistryView {
    inner: Arc<RwLock<ActiveRegistry>>,
}

impl RegistryView {
    pub(crate) fn new(inner: Arc<RwLock<ActiveRegistry>>) -> Self {
        Self { inner }
    }

    pub fn get(&self, id: &str) -> Option<RegistryEntry> {
        self.inner.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().contains(id)
    }

    pub fn ids_owned_by(&self, path: &Path) -> Vec<String> {
        self.inner.read().ids_owned_by(path)
    }

    pub fn owners(&self) -> Vec<PathBuf> {
        self.inner.read().owners()
    }

    pub fn all(&self) -> Vec<RegistryEntry> {
        self.inner.read().all()
    }

    pub fn ids(&self) -> Vec<String> {
        self.inner.read().ids()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Copy of the whole registry at this instant.
    pub fn snapshot(&self) -> ActiveRegistry {
        self.inner.read().clone()
    }
}

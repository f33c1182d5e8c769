//! Store interface the index operations run against, plus an in-memory
//! implementation.
//!
//! A store is not safe for unsynchronized concurrent access: it is shared as
//! [`SharedStore`] and every operation locks it for the duration of its
//! `perform`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::types::{Attribute, Element, Location, Relationship, SourceContribution, SourceId};

/// A store behind the lock that serializes access to it.
pub type SharedStore<S> = Arc<Mutex<S>>;

/// Storage for index facts, keyed by the source that contributed them.
pub trait IndexStore: Send + 'static {
    /// Replace everything previously recorded for `source` with `contribution`.
    fn record_source(&mut self, source: &SourceId, contribution: SourceContribution);

    /// Forget everything contributed by `source`. Returns whether anything was known.
    fn remove_source(&mut self, source: &SourceId) -> bool;

    /// Locations related to `element` by `relationship`, in recording order.
    fn relationships(&self, element: &Element, relationship: &Relationship) -> Vec<Location>;

    /// Value of `attribute` on `element`, if recorded.
    fn attribute(&self, element: &Element, attribute: &Attribute) -> Option<String>;

    /// Number of recorded relationship facts.
    fn relationship_count(&self) -> usize;

    /// Number of sources with recorded facts.
    fn source_count(&self) -> usize;

    /// Drop all recorded facts.
    fn clear(&mut self);
}

/// `HashMap`-backed [`IndexStore`] that keeps each source's contribution intact.
///
/// Lookups scan the contributions; adequate for tests and small workspaces.
#[derive(Debug, Default)]
pub struct MemoryIndexStore {
    by_source: HashMap<SourceId, SourceContribution>,
}

impl MemoryIndexStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps the store for sharing with operations.
    #[must_use]
    pub fn shared(self) -> SharedStore<Self> {
        Arc::new(Mutex::new(self))
    }

    /// Sources currently known to the store.
    #[must_use]
    pub fn sources(&self) -> HashSet<SourceId> {
        self.by_source.keys().cloned().collect()
    }
}

impl IndexStore for MemoryIndexStore {
    fn record_source(&mut self, source: &SourceId, contribution: SourceContribution) {
        self.by_source.insert(source.clone(), contribution);
    }

    fn remove_source(&mut self, source: &SourceId) -> bool {
        self.by_source.remove(source).is_some()
    }

    fn relationships(&self, element: &Element, relationship: &Relationship) -> Vec<Location> {
        let mut sources: Vec<_> = self.by_source.iter().collect();
        sources.sort_by(|(a, _), (b, _)| a.cmp(b));
        sources
            .into_iter()
            .flat_map(|(_, contribution)| contribution.relationships.iter())
            .filter(|(e, r, _)| e == element && r == relationship)
            .map(|(_, _, location)| location.clone())
            .collect()
    }

    fn attribute(&self, element: &Element, attribute: &Attribute) -> Option<String> {
        self.by_source
            .values()
            .flat_map(|contribution| contribution.attributes.iter())
            .find(|(e, a, _)| e == element && a == attribute)
            .map(|(_, _, value)| value.clone())
    }

    fn relationship_count(&self) -> usize {
        self.by_source
            .values()
            .map(|contribution| contribution.relationships.len())
            .sum()
    }

    fn source_count(&self) -> usize {
        self.by_source.len()
    }

    fn clear(&mut self) {
        self.by_source.clear();
    }
}

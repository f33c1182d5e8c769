//! Concrete operations queued by the [`Index`](super::Index) facade.

use std::fmt;

use tracing::debug;

use super::store::{IndexStore, SharedStore};
use crate::operation::{Operation, OperationKind};
use crate::types::{Attribute, Element, Location, Relationship, SourceContribution, SourceId};

/// Receives the result of a relationship lookup.
pub trait RelationshipCallback: Send + Sync {
    fn has_relationships(
        &self,
        element: &Element,
        relationship: &Relationship,
        locations: Vec<Location>,
    );
}

impl<F> RelationshipCallback for F
where
    F: Fn(&Element, &Relationship, Vec<Location>) + Send + Sync,
{
    fn has_relationships(
        &self,
        element: &Element,
        relationship: &Relationship,
        locations: Vec<Location>,
    ) {
        self(element, relationship, locations);
    }
}

/// Receives the result of an attribute lookup.
pub trait AttributeCallback: Send + Sync {
    fn has_value(&self, element: &Element, attribute: &Attribute, value: Option<String>);
}

impl<F> AttributeCallback for F
where
    F: Fn(&Element, &Attribute, Option<String>) + Send + Sync,
{
    fn has_value(&self, element: &Element, attribute: &Attribute, value: Option<String>) {
        self(element, attribute, value);
    }
}

// ---------------------------------------------------------------------------
// IndexSourceOperation
// ---------------------------------------------------------------------------

/// Records the facts contributed by one source, replacing older ones.
pub struct IndexSourceOperation<S> {
    store: SharedStore<S>,
    source: SourceId,
    contribution: SourceContribution,
}

impl<S: IndexStore> IndexSourceOperation<S> {
    pub fn new(store: SharedStore<S>, source: SourceId, contribution: SourceContribution) -> Self {
        Self {
            store,
            source,
            contribution,
        }
    }
}

impl<S> fmt::Debug for IndexSourceOperation<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IndexSource({}, {} facts)",
            self.source,
            self.contribution.len()
        )
    }
}

impl<S: IndexStore> Operation for IndexSourceOperation<S> {
    fn kind(&self) -> OperationKind {
        OperationKind::Mutation
    }

    fn perform(&self) -> anyhow::Result<()> {
        let mut store = self.store.lock();
        store.record_source(&self.source, self.contribution.clone());
        debug!(source = %self.source, facts = self.contribution.len(), "indexed source");
        Ok(())
    }

    fn affinity(&self, source: &SourceId) -> bool {
        &self.source == source
    }

    fn source(&self) -> Option<&SourceId> {
        Some(&self.source)
    }
}

// ---------------------------------------------------------------------------
// RemoveSourceOperation
// ---------------------------------------------------------------------------

/// Forgets everything contributed by a source.
///
/// Enqueueing it discards any indexing of the same source still pending.
pub struct RemoveSourceOperation<S> {
    store: SharedStore<S>,
    source: SourceId,
}

impl<S: IndexStore> RemoveSourceOperation<S> {
    pub fn new(store: SharedStore<S>, source: SourceId) -> Self {
        Self { store, source }
    }
}

impl<S> fmt::Debug for RemoveSourceOperation<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RemoveSource({})", self.source)
    }
}

impl<S: IndexStore> Operation for RemoveSourceOperation<S> {
    fn kind(&self) -> OperationKind {
        OperationKind::Mutation
    }

    fn perform(&self) -> anyhow::Result<()> {
        let known = self.store.lock().remove_source(&self.source);
        debug!(source = %self.source, known, "removed source");
        Ok(())
    }

    fn as_removal(&self) -> Option<&SourceId> {
        Some(&self.source)
    }

    fn source(&self) -> Option<&SourceId> {
        Some(&self.source)
    }
}

// ---------------------------------------------------------------------------
// GetRelationshipsOperation
// ---------------------------------------------------------------------------

/// Looks up the locations related to an element and hands them to a callback.
pub struct GetRelationshipsOperation<S> {
    store: SharedStore<S>,
    element: Element,
    relationship: Relationship,
    callback: Box<dyn RelationshipCallback>,
}

impl<S: IndexStore> GetRelationshipsOperation<S> {
    pub fn new(
        store: SharedStore<S>,
        element: Element,
        relationship: Relationship,
        callback: impl RelationshipCallback + 'static,
    ) -> Self {
        Self {
            store,
            element,
            relationship,
            callback: Box::new(callback),
        }
    }
}

impl<S> fmt::Debug for GetRelationshipsOperation<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GetRelationships({}::{}, {})",
            self.element.source, self.element.name, self.relationship.0
        )
    }
}

impl<S: IndexStore> Operation for GetRelationshipsOperation<S> {
    fn kind(&self) -> OperationKind {
        OperationKind::Query
    }

    fn perform(&self) -> anyhow::Result<()> {
        let locations = self
            .store
            .lock()
            .relationships(&self.element, &self.relationship);
        // Deliver outside the store lock so callbacks can enqueue more work.
        self.callback
            .has_relationships(&self.element, &self.relationship, locations);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// GetAttributeOperation
// ---------------------------------------------------------------------------

/// Looks up an attribute value of an element and hands it to a callback.
pub struct GetAttributeOperation<S> {
    store: SharedStore<S>,
    element: Element,
    attribute: Attribute,
    callback: Box<dyn AttributeCallback>,
}

impl<S: IndexStore> GetAttributeOperation<S> {
    pub fn new(
        store: SharedStore<S>,
        element: Element,
        attribute: Attribute,
        callback: impl AttributeCallback + 'static,
    ) -> Self {
        Self {
            store,
            element,
            attribute,
            callback: Box::new(callback),
        }
    }
}

impl<S> fmt::Debug for GetAttributeOperation<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GetAttribute({}::{}, {})",
            self.element.source, self.element.name, self.attribute.0
        )
    }
}

impl<S: IndexStore> Operation for GetAttributeOperation<S> {
    fn kind(&self) -> OperationKind {
        OperationKind::Query
    }

    fn perform(&self) -> anyhow::Result<()> {
        let value = self.store.lock().attribute(&self.element, &self.attribute);
        self.callback.has_value(&self.element, &self.attribute, value);
        Ok(())
    }
}

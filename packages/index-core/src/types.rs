use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Identity of a source (typically a file URI) that index data is derived from.
///
/// Cheap to clone: the identifier is shared behind an `Arc<str>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(Arc<str>);

impl SourceId {
    /// Creates a source identity from any string-like value.
    #[must_use]
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SourceId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

/// A declared program element, identified by its qualified name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Element {
    /// Source that declares the element.
    pub source: SourceId,
    /// Fully qualified name within the source (e.g. `Foo.bar`).
    pub name: String,
}

impl Element {
    #[must_use]
    pub fn new(source: impl Into<SourceId>, name: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            name: name.into(),
        }
    }
}

/// Kind of relationship between an element and a location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Relationship(pub String);

impl Relationship {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

/// Named attribute attached to an element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Attribute(pub String);

impl Attribute {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

/// A region of a source that participates in a relationship.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    /// Source containing the region.
    pub source: SourceId,
    /// Byte offset of the region.
    pub offset: usize,
    /// Byte length of the region.
    pub length: usize,
}

impl Location {
    #[must_use]
    pub fn new(source: impl Into<SourceId>, offset: usize, length: usize) -> Self {
        Self {
            source: source.into(),
            offset,
            length,
        }
    }
}

/// Everything the traversal of one source contributed to the index.
///
/// Produced by an external AST visitor and handed to the index as a whole, so
/// re-indexing a source replaces its previous contribution atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceContribution {
    /// `(element, relationship, location)` triples found in the source.
    pub relationships: Vec<(Element, Relationship, Location)>,
    /// `(element, attribute, value)` triples found in the source.
    pub attributes: Vec<(Element, Attribute, String)>,
}

impl SourceContribution {
    /// Total number of facts in the contribution.
    #[must_use]
    pub fn len(&self) -> usize {
        self.relationships.len() + self.attributes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.relationships.is_empty() && self.attributes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_id_serializes_as_plain_string() {
        let id = SourceId::new("file:///a.dart");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"file:///a.dart\"");
        let back: SourceId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn contribution_len_counts_both_kinds() {
        let mut contribution = SourceContribution::default();
        assert!(contribution.is_empty());
        contribution.relationships.push((
            Element::new("a", "A"),
            Relationship::new("is-referenced-by"),
            Location::new("b", 10, 1),
        ));
        contribution.attributes.push((
            Element::new("a", "A"),
            Attribute::new("doc"),
            "class A".to_string(),
        ));
        assert_eq!(contribution.len(), 2);
        assert!(!contribution.is_empty());
    }
}

//! The operation contract consumed by [`OperationQueue`](crate::OperationQueue)
//! and [`OperationProcessor`](crate::OperationProcessor).

use std::fmt::Debug;

use crate::types::SourceId;

/// Classification of an operation, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Changes the contents of the index store.
    Mutation,
    /// Reads from the index store without changing it.
    Query,
}

/// A unit of work executed against the shared index store by the processor.
///
/// Implementations carry everything they need (including a handle to the
/// store) and lock the store themselves inside [`perform`](Self::perform): the
/// store, not the queue, is the mutual-exclusion boundary for side effects.
///
/// The `Debug` output is used as the operation's description when a failure is
/// reported.
pub trait Operation: Debug + Send + Sync {
    /// Mutation or query.
    fn kind(&self) -> OperationKind;

    /// Execute the operation. Errors and panics are contained by the processor.
    ///
    /// # Errors
    ///
    /// Returns any error raised while touching the store or delivering results.
    fn perform(&self) -> anyhow::Result<()>;

    /// Whether this operation only reads from the store.
    fn is_query(&self) -> bool {
        self.kind() == OperationKind::Query
    }

    /// Whether this operation should be discarded when `source` is removed.
    fn affinity(&self, _source: &SourceId) -> bool {
        false
    }

    /// `Some(source)` if this operation removes everything known about `source`.
    ///
    /// Enqueueing such an operation purges every pending operation with an
    /// [`affinity`](Self::affinity) to the same source first.
    fn as_removal(&self) -> Option<&SourceId> {
        None
    }

    /// The source this operation is about, if any.
    fn source(&self) -> Option<&SourceId> {
        None
    }
}

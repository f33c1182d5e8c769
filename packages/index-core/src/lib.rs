//! Index core: asynchronous operation queue, single-consumer processor, and
//! the queue-backed index facade.

pub mod config;
pub mod error;
pub mod index;
pub mod operation;
pub mod processor;
pub mod queue;
pub mod state;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use config::ProcessorConfig;
pub use error::{OperationFailure, ProcessorError};
pub use index::{Index, IndexStore, MemoryIndexStore};
pub use operation::{Operation, OperationKind};
pub use processor::{
    panic_message, FailureSink, OperationProcessor, PendingSources, TracingFailureSink,
};
pub use queue::{OperationQueue, QueuedOperation};
pub use state::{ProcessorEvent, ProcessorState};
pub use types::{Attribute, Element, Location, Relationship, SourceContribution, SourceId};

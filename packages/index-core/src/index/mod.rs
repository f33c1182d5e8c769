//! Asynchronous index facade.
//!
//! [`Index`] owns one indexing session: the store, the operation queue, and
//! the processor thread draining it. Every public call only enqueues work and
//! returns; results of lookups arrive through callbacks on the processor
//! thread.

pub mod operations;
pub mod store;

use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::ProcessorConfig;
use crate::error::ProcessorError;
use crate::processor::{FailureSink, OperationProcessor, PendingSources, TracingFailureSink};
use crate::queue::OperationQueue;
use crate::types::{Attribute, Element, Relationship, SourceContribution, SourceId};

pub use operations::{
    AttributeCallback, GetAttributeOperation, GetRelationshipsOperation, IndexSourceOperation,
    RelationshipCallback, RemoveSourceOperation,
};
pub use store::{IndexStore, MemoryIndexStore, SharedStore};

/// Queue-backed index over a store `S`.
pub struct Index<S: IndexStore> {
    store: SharedStore<S>,
    queue: Arc<OperationQueue>,
    processor: Arc<OperationProcessor>,
    worker: Mutex<Option<JoinHandle<Result<(), ProcessorError>>>>,
}

impl<S: IndexStore> Index<S> {
    /// Creates an index over `store` with the default processor config.
    #[must_use]
    pub fn new(store: S) -> Self {
        Self::with_config(
            store,
            ProcessorConfig::default(),
            Arc::new(TracingFailureSink),
        )
    }

    #[must_use]
    pub fn with_config(store: S, config: ProcessorConfig, sink: Arc<dyn FailureSink>) -> Self {
        let queue = Arc::new(OperationQueue::new());
        let processor = Arc::new(OperationProcessor::with_config(queue.clone(), config, sink));
        Self {
            store: Arc::new(Mutex::new(store)),
            queue,
            processor,
            worker: Mutex::new(None),
        }
    }

    /// Starts the processor thread and waits until it is running.
    ///
    /// Returns `false` if the index was stopped before it could start.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker thread cannot be spawned.
    pub fn start(&self) -> std::io::Result<bool> {
        let mut worker = self.worker.lock();
        if worker.is_none() {
            *worker = Some(self.processor.spawn()?);
        }
        drop(worker);
        Ok(self.processor.wait_for_running())
    }

    /// Records the facts found in `source`, replacing any earlier ones.
    pub fn index_source(&self, source: impl Into<SourceId>, contribution: SourceContribution) {
        self.queue.enqueue(Arc::new(IndexSourceOperation::new(
            self.store.clone(),
            source.into(),
            contribution,
        )));
    }

    /// Forgets everything about `source`, discarding its pending indexing.
    pub fn remove_source(&self, source: impl Into<SourceId>) {
        self.queue.enqueue(Arc::new(RemoveSourceOperation::new(
            self.store.clone(),
            source.into(),
        )));
    }

    /// Delivers the locations related to `element` to `callback`.
    pub fn get_relationships(
        &self,
        element: Element,
        relationship: Relationship,
        callback: impl RelationshipCallback + 'static,
    ) {
        self.queue.enqueue(Arc::new(GetRelationshipsOperation::new(
            self.store.clone(),
            element,
            relationship,
            callback,
        )));
    }

    /// Delivers the value of `attribute` on `element` to `callback`.
    pub fn get_attribute(
        &self,
        element: Element,
        attribute: Attribute,
        callback: impl AttributeCallback + 'static,
    ) {
        self.queue.enqueue(Arc::new(GetAttributeOperation::new(
            self.store.clone(),
            element,
            attribute,
            callback,
        )));
    }

    /// Holds queries back until the returned guard is dropped.
    ///
    /// Mutations keep flowing, so a bulk load is fully applied before any
    /// query observes the store.
    #[must_use]
    pub fn bulk_load(&self) -> BulkLoadGuard {
        self.queue.set_process_queries(false);
        info!("bulk load started, queries paused");
        BulkLoadGuard {
            queue: self.queue.clone(),
        }
    }

    /// Number of relationship facts in the store, read synchronously.
    #[must_use]
    pub fn relationship_count(&self) -> usize {
        self.store.lock().relationship_count()
    }

    /// Number of operations waiting to be performed.
    #[must_use]
    pub fn pending_operations(&self) -> usize {
        self.queue.size()
    }

    #[must_use]
    pub fn processor(&self) -> &Arc<OperationProcessor> {
        &self.processor
    }

    #[must_use]
    pub fn store(&self) -> &SharedStore<S> {
        &self.store
    }

    /// Stops the processor and reports the sources whose indexing is still pending.
    ///
    /// With `wait`, also joins the worker thread.
    pub fn stop(&self, wait: bool) -> PendingSources {
        let pending = self.processor.stop(wait);
        if wait {
            if let Some(handle) = self.worker.lock().take() {
                match handle.join() {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => warn!(error = %err, "index processor did not run"),
                    Err(_) => warn!("index processor thread panicked"),
                }
            }
        }
        pending
    }
}

/// Re-opens the query gate when dropped.
#[derive(Debug)]
pub struct BulkLoadGuard {
    queue: Arc<OperationQueue>,
}

impl Drop for BulkLoadGuard {
    fn drop(&mut self) {
        self.queue.set_process_queries(true);
        info!("bulk load finished, queries resumed");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;
    use crate::state::ProcessorState;
    use crate::types::Location;

    fn reference(from: &str, offset: usize) -> SourceContribution {
        SourceContribution {
            relationships: vec![(
                Element::new("lib.dart", "Foo"),
                Relationship::new("is-referenced-by"),
                Location::new(from, offset, 3),
            )],
            attributes: vec![(
                Element::new(from, "main"),
                Attribute::new("kind"),
                "function".to_string(),
            )],
        }
    }

    fn fast_index() -> Index<MemoryIndexStore> {
        Index::with_config(
            MemoryIndexStore::new(),
            ProcessorConfig {
                poll_interval: Duration::from_millis(10),
                ..ProcessorConfig::default()
            },
            Arc::new(TracingFailureSink),
        )
    }

    #[test]
    fn queries_observe_preceding_mutations() {
        let index = fast_index();
        let (tx, rx) = mpsc::channel();

        index.index_source("a.dart", reference("a.dart", 4));
        index.index_source("b.dart", reference("b.dart", 8));
        index.get_relationships(
            Element::new("lib.dart", "Foo"),
            Relationship::new("is-referenced-by"),
            move |_: &Element, _: &Relationship, locations: Vec<Location>| {
                let _ = tx.send(locations);
            },
        );
        assert!(index.start().unwrap());

        let locations = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(
            locations,
            vec![Location::new("a.dart", 4, 3), Location::new("b.dart", 8, 3)]
        );
        assert!(index.stop(true).is_empty());
        assert_eq!(index.processor().state(), ProcessorState::Stopped);
    }

    #[test]
    fn remove_source_before_processing_discards_indexing() {
        let index = fast_index();
        index.index_source("a.dart", reference("a.dart", 4));
        index.remove_source("a.dart");
        assert_eq!(index.pending_operations(), 1);

        let (tx, rx) = mpsc::channel();
        index.get_attribute(
            Element::new("a.dart", "main"),
            Attribute::new("kind"),
            move |_: &Element, _: &Attribute, value: Option<String>| {
                let _ = tx.send(value);
            },
        );
        assert!(index.start().unwrap());

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), None);
        index.stop(true);
        assert_eq!(index.relationship_count(), 0);
    }

    #[test]
    fn bulk_load_holds_queries_until_guard_drops() {
        let index = fast_index();
        assert!(index.start().unwrap());
        let (tx, rx) = mpsc::channel();

        let guard = index.bulk_load();
        index.get_attribute(
            Element::new("a.dart", "main"),
            Attribute::new("kind"),
            move |_: &Element, _: &Attribute, value: Option<String>| {
                let _ = tx.send(value);
            },
        );
        index.index_source("a.dart", reference("a.dart", 0));
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        drop(guard);
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            Some("function".to_string())
        );
        index.stop(true);
    }

    #[test]
    fn stop_before_start_reports_pending_sources() {
        let index = fast_index();
        index.index_source("a.dart", reference("a.dart", 0));
        index.index_source("b.dart", reference("b.dart", 0));

        let pending = index.stop(false);
        assert_eq!(
            pending.into_vec(),
            vec![SourceId::new("a.dart"), SourceId::new("b.dart")]
        );
        assert!(!index.start().unwrap());
    }
}

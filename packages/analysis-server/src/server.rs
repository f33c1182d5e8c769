//! Analysis server host.
//!
//! [`AnalysisServer`] turns client requests into [`ServerOperation`]s on a
//! [`ServerOperationQueue`] and drains that queue on a single tokio task. The
//! drain loop is the only place that talks to the [`AnalysisEngine`], so the
//! engine never sees concurrent calls.

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use index_core::{panic_message, SourceId};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::ServerConfig;
use crate::engine::{
    AnalysisEngine, AnalysisOptions, ChangeSet, ServerListener, SourceIndexer, Subscriptions,
};
use crate::operation::{ServerError, ServerOperation};
use crate::operations::{
    ApplyChangesOperation, CreateContextOperation, DeleteContextOperation, GetVersionOperation,
    NotificationOperation, PerformAnalysisOperation, SetOptionsOperation,
    SetPrioritySourcesOperation, ShutdownOperation, SubscribeOperation,
};
use crate::queue::{AddOutcome, BoxedOperation, ServerOperationQueue};

/// Lifecycle of the server.
///
/// State machine: Starting -> Ready -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Created, drain loop not started. Requests are queued.
    Starting,
    /// Drain loop running.
    Ready,
    /// Shutdown requested; new requests are rejected.
    Draining,
    /// Drain loop has exited.
    Stopped,
}

/// What the server remembers about one context.
#[derive(Debug, Default)]
struct ContextState {
    sdk_directory: String,
    options: AnalysisOptions,
    priority_sources: Vec<SourceId>,
    subscriptions: Subscriptions,
    known_sources: HashSet<SourceId>,
}

pub struct AnalysisServer {
    config: ServerConfig,
    queue: ServerOperationQueue,
    contexts: DashMap<String, ContextState>,
    priority_contexts: DashSet<String>,
    engine: Arc<dyn AnalysisEngine>,
    listener: Arc<dyn ServerListener>,
    indexer: Option<Arc<dyn SourceIndexer>>,
    health: ArcSwap<HealthState>,
    started: AtomicBool,
}

impl AnalysisServer {
    #[must_use]
    pub fn new(
        config: ServerConfig,
        engine: Arc<dyn AnalysisEngine>,
        listener: Arc<dyn ServerListener>,
    ) -> Self {
        Self {
            config,
            queue: ServerOperationQueue::new(),
            contexts: DashMap::new(),
            priority_contexts: DashSet::new(),
            engine,
            listener,
            indexer: None,
            health: ArcSwap::from_pointee(HealthState::Starting),
            started: AtomicBool::new(false),
        }
    }

    /// Feeds resolved analysis results into `indexer`.
    #[must_use]
    pub fn with_indexer(mut self, indexer: Arc<dyn SourceIndexer>) -> Self {
        self.indexer = Some(indexer);
        self
    }

    /// Spawns the drain loop on the current tokio runtime.
    ///
    /// The returned task finishes once a shutdown request has been taken. A
    /// server shut down before it started still drains that request.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::AlreadyStarted`] if the drain loop was started
    /// before; a server runs at most one loop in its lifetime.
    pub fn start(self: &Arc<Self>) -> Result<JoinHandle<()>, ServerError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(ServerError::AlreadyStarted);
        }
        // A shutdown requested before start keeps the server draining.
        let _ = self.transition_health(&[HealthState::Starting], HealthState::Ready);
        info!(version = %self.config.version, "analysis server started");
        let server = Arc::clone(self);
        Ok(tokio::spawn(async move { server.drain().await }))
    }

    /// Moves the health state to `to` if it is currently one of `from`.
    ///
    /// Returns the replaced state, or the current one if it was not in `from`.
    fn transition_health(
        &self,
        from: &[HealthState],
        to: HealthState,
    ) -> Result<HealthState, HealthState> {
        let next = Arc::new(to);
        loop {
            let current = self.health.load_full();
            if !from.contains(&*current) {
                return Err(*current);
            }
            let previous = self.health.compare_and_swap(&current, Arc::clone(&next));
            if Arc::ptr_eq(&*previous, &current) {
                return Ok(*current);
            }
        }
    }

    async fn drain(&self) {
        loop {
            let Some(op) = self.queue.take(self.config.poll_interval).await else {
                continue;
            };
            if op.is_shutdown() {
                self.queue.mark_last_operation_completed();
                break;
            }
            self.perform(&op);
            self.queue.mark_last_operation_completed();
        }

        let dropped = self.queue.clear();
        self.health.store(Arc::new(HealthState::Stopped));
        info!(dropped, "analysis server stopped");
    }

    fn perform(&self, op: &BoxedOperation) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| op.perform(self)));
        let err = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(err)) => err
                .downcast::<ServerError>()
                .unwrap_or_else(ServerError::Operation),
            Err(payload) => ServerError::Operation(anyhow::anyhow!(
                "panicked: {}",
                panic_message(payload.as_ref())
            )),
        };
        let operation = format!("{op:?}");
        error!(%operation, error = %err, "server operation failed");
        self.listener.server_error(&operation, &err);
    }

    // -----------------------------------------------------------------------
    // Requests
    // -----------------------------------------------------------------------

    /// Asks the drain loop for the server version.
    ///
    /// # Errors
    ///
    /// `ShuttingDown` once shutdown was requested; `ResponseDropped` if the
    /// server stopped before answering.
    pub async fn get_version(&self) -> Result<String, ServerError> {
        let (tx, rx) = oneshot::channel();
        self.submit(Box::new(GetVersionOperation::new(tx)))?;
        rx.await.map_err(|_| ServerError::ResponseDropped)
    }

    /// Registers a context and schedules its creation in the engine.
    ///
    /// # Errors
    ///
    /// `ContextAlreadyExists` if `context_id` is taken; `ShuttingDown` once
    /// shutdown was requested.
    pub fn create_context(&self, context_id: &str, sdk_directory: &str) -> Result<(), ServerError> {
        self.ensure_accepting()?;
        match self.contexts.entry(context_id.to_string()) {
            Entry::Occupied(_) => {
                return Err(ServerError::ContextAlreadyExists(context_id.to_string()));
            }
            Entry::Vacant(entry) => {
                entry.insert(ContextState {
                    sdk_directory: sdk_directory.to_string(),
                    ..ContextState::default()
                });
            }
        }
        self.submit(Box::new(CreateContextOperation {
            context_id: context_id.to_string(),
            sdk_directory: sdk_directory.to_string(),
        }))
    }

    /// Schedules deletion of a context. Its queued requests are discarded
    /// when the deletion runs.
    ///
    /// # Errors
    ///
    /// `InvalidContextId` for an unknown context; `ShuttingDown` once
    /// shutdown was requested.
    pub fn delete_context(&self, context_id: &str) -> Result<(), ServerError> {
        self.ensure_context(context_id)?;
        self.submit(Box::new(DeleteContextOperation {
            context_id: context_id.to_string(),
        }))
    }

    /// Schedules an edit of a context, followed by re-analysis.
    ///
    /// # Errors
    ///
    /// `InvalidContextId` for an unknown context; `ShuttingDown` once
    /// shutdown was requested.
    pub fn apply_changes(&self, context_id: &str, changes: ChangeSet) -> Result<(), ServerError> {
        self.ensure_context(context_id)?;
        self.submit(Box::new(ApplyChangesOperation {
            context_id: context_id.to_string(),
            changes,
        }))
    }

    /// Replaces a context's options. A still-queued earlier request is replaced.
    ///
    /// # Errors
    ///
    /// `InvalidContextId` for an unknown context; `ShuttingDown` once
    /// shutdown was requested.
    pub fn set_options(
        &self,
        context_id: &str,
        options: AnalysisOptions,
    ) -> Result<(), ServerError> {
        self.ensure_context(context_id)?;
        self.submit(Box::new(SetOptionsOperation {
            context_id: context_id.to_string(),
            options,
        }))
    }

    /// Replaces a context's priority sources. A context with at least one
    /// priority source has its analysis scheduled in the priority lanes.
    ///
    /// # Errors
    ///
    /// `InvalidContextId` for an unknown context; `ShuttingDown` once
    /// shutdown was requested.
    pub fn set_priority_sources(
        &self,
        context_id: &str,
        sources: Vec<SourceId>,
    ) -> Result<(), ServerError> {
        self.ensure_context(context_id)?;
        if sources.is_empty() {
            self.priority_contexts.remove(context_id);
        } else {
            self.priority_contexts.insert(context_id.to_string());
        }
        self.submit(Box::new(SetPrioritySourcesOperation {
            context_id: context_id.to_string(),
            sources,
        }))
    }

    /// Replaces the notifications a client receives for a context.
    ///
    /// # Errors
    ///
    /// `InvalidContextId` for an unknown context; `ShuttingDown` once
    /// shutdown was requested.
    pub fn subscribe(
        &self,
        context_id: &str,
        subscriptions: Subscriptions,
    ) -> Result<(), ServerError> {
        self.ensure_context(context_id)?;
        self.submit(Box::new(SubscribeOperation {
            context_id: context_id.to_string(),
            subscriptions,
        }))
    }

    /// Stops accepting requests and asks the drain loop to exit.
    ///
    /// The shutdown request overtakes everything queued; what is still
    /// queued when the loop exits is dropped. Calling again is a no-op.
    pub fn shutdown(&self) {
        let draining = self.transition_health(
            &[HealthState::Starting, HealthState::Ready],
            HealthState::Draining,
        );
        if draining.is_ok() {
            info!("analysis server shutting down");
            self.queue.add(Box::new(ShutdownOperation));
        }
    }

    /// Waits until nothing is queued or in flight, up to `timeout`.
    ///
    /// Returns `false` if the timeout expired first.
    pub async fn wait_for_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.queue.is_empty() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.config.idle_poll_interval).await;
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn version(&self) -> &str {
        &self.config.version
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        **self.health.load()
    }

    #[must_use]
    pub fn queue(&self) -> &ServerOperationQueue {
        &self.queue
    }

    #[must_use]
    pub fn listener(&self) -> &Arc<dyn ServerListener> {
        &self.listener
    }

    /// Ids of all registered contexts, sorted.
    #[must_use]
    pub fn context_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.contexts.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    #[must_use]
    pub fn is_priority_context(&self, context_id: &str) -> bool {
        self.priority_contexts.contains(context_id)
    }

    /// Options last applied to a context by the drain loop.
    #[must_use]
    pub fn context_options(&self, context_id: &str) -> Option<AnalysisOptions> {
        self.contexts.get(context_id).map(|state| state.options.clone())
    }

    /// Priority sources last applied to a context by the drain loop.
    #[must_use]
    pub fn priority_sources(&self, context_id: &str) -> Option<Vec<SourceId>> {
        self.contexts
            .get(context_id)
            .map(|state| state.priority_sources.clone())
    }

    /// Sources analysis has reported on for a context, sorted.
    #[must_use]
    pub fn known_sources(&self, context_id: &str) -> Option<Vec<SourceId>> {
        self.contexts.get(context_id).map(|state| {
            let mut sources: Vec<SourceId> = state.known_sources.iter().cloned().collect();
            sources.sort();
            sources
        })
    }

    // -----------------------------------------------------------------------
    // Drain-loop side, called from operations
    // -----------------------------------------------------------------------

    pub(crate) fn internal_create_context(
        &self,
        context_id: &str,
        sdk_directory: &str,
    ) -> anyhow::Result<()> {
        self.ensure_context(context_id)?;
        self.engine.create_context(context_id, sdk_directory)?;
        debug!(context = context_id, sdk = sdk_directory, "context created");
        self.schedule_perform_analysis(context_id, false);
        Ok(())
    }

    pub(crate) fn internal_delete_context(&self, context_id: &str) -> anyhow::Result<()> {
        let discarded = self.queue.remove_with_context_id(context_id);
        let Some((_, state)) = self.contexts.remove(context_id) else {
            return Err(ServerError::InvalidContextId(context_id.to_string()).into());
        };
        self.priority_contexts.remove(context_id);
        if let Some(indexer) = &self.indexer {
            for source in state.known_sources {
                indexer.remove_source(source);
            }
        }
        self.engine.delete_context(context_id)?;
        debug!(context = context_id, sdk = %state.sdk_directory, discarded, "context deleted");
        Ok(())
    }

    pub(crate) fn internal_apply_changes(
        &self,
        context_id: &str,
        changes: &ChangeSet,
    ) -> anyhow::Result<()> {
        self.ensure_context(context_id)?;
        self.engine.apply_changes(context_id, changes)?;
        if let Some(mut state) = self.contexts.get_mut(context_id) {
            for source in &changes.removed {
                state.known_sources.remove(source);
            }
        }
        if let Some(indexer) = &self.indexer {
            for source in &changes.removed {
                indexer.remove_source(source.clone());
            }
        }
        self.schedule_perform_analysis(context_id, false);
        Ok(())
    }

    pub(crate) fn internal_set_options(
        &self,
        context_id: &str,
        options: &AnalysisOptions,
    ) -> anyhow::Result<()> {
        self.ensure_context(context_id)?;
        self.engine.set_options(context_id, options)?;
        if let Some(mut state) = self.contexts.get_mut(context_id) {
            state.options = options.clone();
        }
        self.schedule_perform_analysis(context_id, false);
        Ok(())
    }

    pub(crate) fn internal_set_priority_sources(
        &self,
        context_id: &str,
        sources: &[SourceId],
    ) -> anyhow::Result<()> {
        self.ensure_context(context_id)?;
        self.engine.set_priority_sources(context_id, sources)?;
        if let Some(mut state) = self.contexts.get_mut(context_id) {
            state.priority_sources = sources.to_vec();
        }
        self.schedule_perform_analysis(context_id, false);
        Ok(())
    }

    pub(crate) fn internal_subscribe(
        &self,
        context_id: &str,
        subscriptions: &Subscriptions,
    ) -> anyhow::Result<()> {
        let Some(mut state) = self.contexts.get_mut(context_id) else {
            return Err(ServerError::InvalidContextId(context_id.to_string()).into());
        };
        state.subscriptions = subscriptions.clone();
        Ok(())
    }

    /// Runs one analysis step for a context.
    ///
    /// A step that reports results schedules a continuation and one
    /// notification per subscribed result; a step with nothing left to do
    /// ends the chain.
    pub(crate) fn internal_perform_analysis(&self, context_id: &str) -> anyhow::Result<()> {
        self.ensure_context(context_id)?;
        let Some(notices) = self.engine.perform_analysis_task(context_id)? else {
            debug!(context = context_id, "analysis complete");
            return Ok(());
        };

        let mut notifications = Vec::new();
        if let Some(mut state) = self.contexts.get_mut(context_id) {
            for notice in &notices {
                state.known_sources.insert(notice.source.clone());
                for (kind, sources) in &state.subscriptions {
                    if sources.contains(&notice.source) {
                        notifications.push((*kind, notice.clone()));
                    }
                }
            }
        }

        if let Some(indexer) = &self.indexer {
            for notice in &notices {
                if let Some(contribution) = &notice.contribution {
                    indexer.index_source(notice.source.clone(), contribution.clone());
                }
            }
        }

        for (kind, notice) in notifications {
            self.queue.add(Box::new(NotificationOperation {
                context_id: context_id.to_string(),
                kind,
                notice,
            }));
        }
        self.schedule_perform_analysis(context_id, true);
        Ok(())
    }

    fn schedule_perform_analysis(&self, context_id: &str, is_continue: bool) {
        let outcome = self.queue.add(Box::new(PerformAnalysisOperation {
            context_id: context_id.to_string(),
            is_priority: self.is_priority_context(context_id),
            is_continue,
        }));
        if outcome == AddOutcome::Merged {
            debug!(context = context_id, is_continue, "analysis already scheduled");
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn ensure_accepting(&self) -> Result<(), ServerError> {
        match self.health_state() {
            HealthState::Starting | HealthState::Ready => Ok(()),
            HealthState::Draining | HealthState::Stopped => Err(ServerError::ShuttingDown),
        }
    }

    fn ensure_context(&self, context_id: &str) -> Result<(), ServerError> {
        if self.contexts.contains_key(context_id) {
            Ok(())
        } else {
            Err(ServerError::InvalidContextId(context_id.to_string()))
        }
    }

    fn submit(&self, op: Box<dyn ServerOperation>) -> Result<(), ServerError> {
        self.ensure_accepting()?;
        self.queue.add(op);
        Ok(())
    }
}

impl std::fmt::Debug for AnalysisServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisServer")
            .field("version", &self.config.version)
            .field("health", &self.health_state())
            .field("contexts", &self.contexts.len())
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

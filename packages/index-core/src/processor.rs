//! Single-consumer processor that drains an [`OperationQueue`].
//!
//! Exactly one thread runs [`OperationProcessor::run`]. Producers keep
//! enqueueing while it works; `stop` is cooperative and never interrupts an
//! operation that is already being performed.

use std::any::Any;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::config::ProcessorConfig;
use crate::error::{OperationFailure, ProcessorError};
use crate::operation::Operation;
use crate::queue::OperationQueue;
use crate::state::{transition, ProcessorEvent, ProcessorState};
use crate::types::SourceId;

// ---------------------------------------------------------------------------
// FailureSink
// ---------------------------------------------------------------------------

/// Receives operations that failed while being performed.
///
/// Failures never leave the worker loop; this is where they end up.
pub trait FailureSink: Send + Sync {
    /// Called once per failed operation with its `Debug` description.
    fn operation_failed(&self, description: &str, failure: &OperationFailure);
}

/// Default sink: logs failures at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingFailureSink;

impl FailureSink for TracingFailureSink {
    fn operation_failed(&self, description: &str, failure: &OperationFailure) {
        error!(operation = description, error = %failure, "index operation failed");
    }
}

// ---------------------------------------------------------------------------
// PendingSources
// ---------------------------------------------------------------------------

/// Sources of mutations that were still queued when the processor stopped.
///
/// Deduplicated, in queue order. A host typically persists this list so the
/// sources can be re-indexed next session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PendingSources(Vec<SourceId>);

impl PendingSources {
    fn collect(ops: &[Arc<dyn Operation>]) -> Self {
        let mut seen = HashSet::new();
        let sources = ops
            .iter()
            .filter(|op| !op.is_query())
            .filter_map(|op| op.source())
            .filter(|source| seen.insert((*source).clone()))
            .cloned()
            .collect();
        Self(sources)
    }

    #[must_use]
    pub fn contains(&self, source: &SourceId) -> bool {
        self.0.contains(source)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceId> {
        self.0.iter()
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<SourceId> {
        self.0
    }
}

// ---------------------------------------------------------------------------
// OperationProcessor
// ---------------------------------------------------------------------------

/// Drains an [`OperationQueue`] on one dedicated thread until stopped.
pub struct OperationProcessor {
    queue: Arc<OperationQueue>,
    state: Mutex<ProcessorState>,
    config: ProcessorConfig,
    sink: Arc<dyn FailureSink>,
}

impl OperationProcessor {
    /// Creates a processor with default config that logs failures via `tracing`.
    #[must_use]
    pub fn new(queue: Arc<OperationQueue>) -> Self {
        Self::with_config(
            queue,
            ProcessorConfig::default(),
            Arc::new(TracingFailureSink),
        )
    }

    #[must_use]
    pub fn with_config(
        queue: Arc<OperationQueue>,
        config: ProcessorConfig,
        sink: Arc<dyn FailureSink>,
    ) -> Self {
        Self {
            queue,
            state: Mutex::new(ProcessorState::Ready),
            config,
            sink,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ProcessorState {
        *self.state.lock()
    }

    /// The queue this processor drains.
    #[must_use]
    pub fn queue(&self) -> &Arc<OperationQueue> {
        &self.queue
    }

    fn apply(&self, event: ProcessorEvent) -> Result<ProcessorState, ProcessorError> {
        let mut state = self.state.lock();
        let current = *state;
        let next = transition(current, event)?;
        if next != current {
            debug!(from = %current, to = %next, "processor state changed");
        }
        *state = next;
        Ok(next)
    }

    /// Drains the queue until [`stop`](Self::stop) is called.
    ///
    /// Blocks the calling thread. The processor is `Stopped` when this returns,
    /// including when the loop unwinds.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessorError::InvalidState`] if the processor is not `Ready`,
    /// i.e. it is already running or has been stopped.
    pub fn run(&self) -> Result<(), ProcessorError> {
        self.apply(ProcessorEvent::Run)?;
        let _exit = StopOnExit(self);
        info!("operation processor running");

        while self.state() == ProcessorState::Running {
            if let Some(op) = self.queue.dequeue(self.config.poll_interval) {
                self.perform(op.as_ref());
            }
        }

        info!(pending = self.queue.size(), "operation processor stopped");
        Ok(())
    }

    fn perform(&self, op: &dyn Operation) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| op.perform()));
        let failure = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(err)) => OperationFailure::Error(err),
            Err(payload) => OperationFailure::Panic(panic_message(payload.as_ref())),
        };
        self.sink.operation_failed(&format!("{op:?}"), &failure);
    }

    /// Requests the processor to stop and reports the sources still pending.
    ///
    /// A processor that never ran goes straight to `Stopped`. A running one is
    /// asked to stop after its current operation; with `wait` the call blocks
    /// until the loop has exited. Calling `stop` again is harmless.
    pub fn stop(&self, wait: bool) -> PendingSources {
        let state = self
            .apply(ProcessorEvent::Stop)
            .unwrap_or_else(|_| self.state());

        if wait && state == ProcessorState::StopRequested {
            while self.state() != ProcessorState::Stopped {
                thread::sleep(self.config.stop_poll_interval);
            }
        }

        self.pending_sources()
    }

    /// Waits until the processor has left `Ready`.
    ///
    /// Returns `true` if it is running, `false` if it went straight to being
    /// stopped (or stopped again before this call observed it).
    pub fn wait_for_running(&self) -> bool {
        while self.state() == ProcessorState::Ready {
            thread::sleep(self.config.stop_poll_interval);
        }
        self.state() == ProcessorState::Running
    }

    /// Sources of the mutations currently queued.
    #[must_use]
    pub fn pending_sources(&self) -> PendingSources {
        PendingSources::collect(&self.queue.snapshot())
    }

    /// Starts [`run`](Self::run) on a new thread named after the config.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS refuses to spawn the thread.
    pub fn spawn(self: &Arc<Self>) -> std::io::Result<JoinHandle<Result<(), ProcessorError>>> {
        let processor = Arc::clone(self);
        thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || processor.run())
    }
}

impl std::fmt::Debug for OperationProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationProcessor")
            .field("state", &self.state())
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

/// Moves the processor to `Stopped` when the worker loop is left, even by unwinding.
struct StopOnExit<'a>(&'a OperationProcessor);

impl Drop for StopOnExit<'_> {
    fn drop(&mut self) {
        let _ = self.0.apply(ProcessorEvent::LoopExited);
    }
}

/// Text of a caught panic payload.
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Prioritized, merging queue of server operations.
//!
//! One FIFO lane per [`ServerOperationPriority`]; `take` always serves the
//! most urgent non-empty lane. Operations that declare a [`MergeKey`]
//! coalesce with an already-queued operation under the same key, so a burst
//! of identical requests for one context leaves a single queued instance.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use crate::operation::{ServerOperation, ServerOperationPriority};

/// Owned handle to a queued operation.
pub type BoxedOperation = Box<dyn ServerOperation>;

/// Outcome of [`ServerOperationQueue::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// Appended to the end of its lane.
    Enqueued,
    /// Replaced an already-queued operation with the same merge key.
    Merged,
}

struct QueueState {
    lanes: [VecDeque<BoxedOperation>; ServerOperationPriority::ALL.len()],
    /// An operation has been taken and not yet marked completed.
    in_flight: bool,
}

impl QueueState {
    fn len(&self) -> usize {
        self.lanes.iter().map(VecDeque::len).sum()
    }
}

/// Queue shared between request producers and the server's drain loop.
pub struct ServerOperationQueue {
    state: Mutex<QueueState>,
    available: Notify,
}

impl ServerOperationQueue {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                lanes: Default::default(),
                in_flight: false,
            }),
            available: Notify::new(),
        }
    }

    /// Queues `op`, coalescing it with a queued operation under the same merge key.
    ///
    /// A merged operation takes the queued one's position when both share a
    /// lane; otherwise the old one is dropped and the new one appended to its
    /// own lane.
    pub fn add(&self, op: BoxedOperation) -> AddOutcome {
        let lane = op.priority().index();
        let mut state = self.state.lock();

        let mut outcome = AddOutcome::Enqueued;
        if let Some(key) = op.merge_key() {
            let existing = state.lanes.iter().enumerate().find_map(|(lane_idx, queued)| {
                queued
                    .iter()
                    .position(|q| q.merge_key().as_ref() == Some(&key))
                    .map(|pos| (lane_idx, pos))
            });
            if let Some((existing_lane, pos)) = existing {
                debug!(kind = key.kind, context = %key.context_id, "merged server operation");
                outcome = AddOutcome::Merged;
                if existing_lane == lane {
                    state.lanes[lane][pos] = op;
                    drop(state);
                    self.available.notify_one();
                    return outcome;
                }
                state.lanes[existing_lane].remove(pos);
            }
        }

        state.lanes[lane].push_back(op);
        drop(state);
        self.available.notify_one();
        outcome
    }

    /// Removes and returns the most urgent queued operation, if any.
    ///
    /// The operation counts as in flight until
    /// [`mark_last_operation_completed`](Self::mark_last_operation_completed).
    pub fn try_take(&self) -> Option<BoxedOperation> {
        let mut state = self.state.lock();
        let op = state.lanes.iter_mut().find_map(VecDeque::pop_front)?;
        state.in_flight = true;
        Some(op)
    }

    /// Like [`try_take`](Self::try_take), but waits up to `timeout` for an
    /// operation to arrive. A zero timeout never waits.
    pub async fn take(&self, timeout: Duration) -> Option<BoxedOperation> {
        let notified = self.available.notified();
        tokio::pin!(notified);
        // Register interest before checking so an add in between is not lost.
        notified.as_mut().enable();

        if let Some(op) = self.try_take() {
            return Some(op);
        }
        if timeout.is_zero() {
            return None;
        }
        let _ = tokio::time::timeout(timeout, notified).await;
        self.try_take()
    }

    /// Marks the operation returned by the last take as finished.
    pub fn mark_last_operation_completed(&self) {
        self.state.lock().in_flight = false;
    }

    /// Discards every queued operation bound to `context_id`. Returns how many.
    pub fn remove_with_context_id(&self, context_id: &str) -> usize {
        let mut state = self.state.lock();
        let before = state.len();
        for lane in &mut state.lanes {
            lane.retain(|op| op.context_id() != Some(context_id));
        }
        let removed = before - state.len();
        debug!(context = context_id, removed, "removed queued operations for context");
        removed
    }

    /// Drops every queued operation. Returns how many.
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let removed = state.len();
        for lane in &mut state.lanes {
            lane.clear();
        }
        removed
    }

    /// Number of queued operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    /// `true` if nothing is queued and the last taken operation has completed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let state = self.state.lock();
        !state.in_flight && state.len() == 0
    }
}

impl Default for ServerOperationQueue {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Two-lane operation queue shared by producers and the processor thread.
//!
//! Mutations are always handed out before queries. The query lane can be
//! gated off (e.g. while the index is being bulk loaded) without affecting
//! mutations. Enqueueing a removal purges pending work for the removed source.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::operation::Operation;

/// Shared handle to a queued operation.
pub type QueuedOperation = Arc<dyn Operation>;

#[derive(Default)]
struct Lanes {
    mutations: VecDeque<QueuedOperation>,
    queries: VecDeque<QueuedOperation>,
}

struct QueueState {
    lanes: Lanes,
    /// Whether the query lane is eligible for dequeue.
    process_queries: bool,
}

impl QueueState {
    fn len(&self) -> usize {
        self.lanes.mutations.len() + self.lanes.queries.len()
    }

    fn pop_next(&mut self) -> Option<QueuedOperation> {
        if let Some(op) = self.lanes.mutations.pop_front() {
            return Some(op);
        }
        if self.process_queries {
            return self.lanes.queries.pop_front();
        }
        None
    }
}

/// Thread-safe queue of pending index operations.
///
/// A single mutex guards both lanes and the query gate; the paired condition
/// variable wakes a consumer blocked in [`dequeue`](Self::dequeue). The lock is
/// never held while an operation runs.
pub struct OperationQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl OperationQueue {
    /// Creates an empty queue with the query gate open.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                lanes: Lanes::default(),
                process_queries: true,
            }),
            available: Condvar::new(),
        }
    }

    /// Adds an operation to the end of its lane.
    ///
    /// If the operation is a removal, every pending operation with an affinity
    /// to the removed source is discarded first, keeping the survivors in
    /// order. Returns the number of discarded operations.
    pub fn enqueue(&self, op: QueuedOperation) -> usize {
        let mut state = self.state.lock();

        let mut purged = 0;
        if let Some(source) = op.as_removal() {
            let before = state.len();
            state.lanes.mutations.retain(|pending| !pending.affinity(source));
            state.lanes.queries.retain(|pending| !pending.affinity(source));
            purged = before - state.len();
            if purged > 0 {
                debug!(source = %source, purged, "purged pending operations for removed source");
            }
        }

        if op.is_query() {
            state.lanes.queries.push_back(op);
        } else {
            state.lanes.mutations.push_back(op);
        }
        drop(state);

        self.available.notify_all();
        purged
    }

    /// Removes and returns the next operation to perform.
    ///
    /// Mutations come first; queries only while the gate is open. When nothing
    /// is eligible, a zero `timeout` returns `None` immediately; otherwise the
    /// call waits once for up to `timeout`, re-checks, and returns whatever is
    /// eligible by then. Spurious wakeups simply lead to that single re-check.
    pub fn dequeue(&self, timeout: Duration) -> Option<QueuedOperation> {
        let mut state = self.state.lock();
        if let Some(op) = state.pop_next() {
            return Some(op);
        }
        if timeout.is_zero() {
            return None;
        }
        // Timed out or woken: either way only one re-check.
        let _ = self.available.wait_for(&mut state, timeout);
        state.pop_next()
    }

    /// Number of pending operations in both lanes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.state.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Copy of the pending operations: mutations first, then queries.
    #[must_use]
    pub fn snapshot(&self) -> Vec<QueuedOperation> {
        let state = self.state.lock();
        state
            .lanes
            .mutations
            .iter()
            .chain(state.lanes.queries.iter())
            .cloned()
            .collect()
    }

    /// Opens or closes the query gate.
    ///
    /// Opening the gate while queries are pending wakes a blocked consumer.
    pub fn set_process_queries(&self, process: bool) {
        let mut state = self.state.lock();
        let was_open = state.process_queries;
        state.process_queries = process;
        let wake = process && !was_open && !state.lanes.queries.is_empty();
        drop(state);

        debug!(process_queries = process, "query gate changed");
        if wake {
            self.available.notify_all();
        }
    }

    /// Whether queries are currently eligible for dequeue.
    #[must_use]
    pub fn is_processing_queries(&self) -> bool {
        self.state.lock().process_queries
    }
}

impl Default for OperationQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for OperationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("OperationQueue")
            .field("mutations", &state.lanes.mutations.len())
            .field("queries", &state.lanes.queries.len())
            .field("process_queries", &state.process_queries)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Instant;

    use proptest::prelude::*;

    use super::*;
    use crate::testing::TestOp;

    fn names(ops: &[QueuedOperation]) -> Vec<String> {
        ops.iter().map(|op| format!("{op:?}")).collect()
    }

    fn drain(queue: &OperationQueue) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(op) = queue.dequeue(Duration::ZERO) {
            out.push(format!("{op:?}"));
        }
        out
    }

    #[test]
    fn mutations_come_out_in_fifo_order() {
        let queue = OperationQueue::new();
        queue.enqueue(TestOp::mutation("A").shared());
        queue.enqueue(TestOp::mutation("B").shared());

        assert_eq!(format!("{:?}", queue.dequeue(Duration::ZERO).unwrap()), "A");
        assert_eq!(format!("{:?}", queue.dequeue(Duration::ZERO).unwrap()), "B");
        assert!(queue.dequeue(Duration::ZERO).is_none());
    }

    #[test]
    fn mutation_precedes_query_regardless_of_arrival() {
        let queue = OperationQueue::new();
        queue.enqueue(TestOp::query("Q1").shared());
        queue.enqueue(TestOp::mutation("M1").shared());
        queue.enqueue(TestOp::query("Q2").shared());

        assert_eq!(drain(&queue), vec!["M1", "Q1", "Q2"]);
    }

    #[test]
    fn closed_gate_holds_back_queries() {
        let queue = OperationQueue::new();
        queue.set_process_queries(false);
        queue.enqueue(TestOp::query("Q").shared());

        assert!(queue.dequeue(Duration::ZERO).is_none());
        assert_eq!(queue.size(), 1);

        queue.set_process_queries(true);
        assert_eq!(format!("{:?}", queue.dequeue(Duration::ZERO).unwrap()), "Q");
    }

    #[test]
    fn closed_gate_still_releases_mutations() {
        let queue = OperationQueue::new();
        queue.set_process_queries(false);
        queue.enqueue(TestOp::query("Q").shared());
        queue.enqueue(TestOp::mutation("M").shared());

        assert_eq!(drain(&queue), vec!["M"]);
        assert!(!queue.is_processing_queries());
        assert_eq!(queue.size(), 1);
    }

    #[test]
    fn removal_purges_single_match_and_keeps_order() {
        let queue = OperationQueue::new();
        queue.enqueue(TestOp::mutation("A").with_source("a.dart").shared());
        queue.enqueue(TestOp::mutation("B").with_source("b.dart").shared());
        queue.enqueue(TestOp::mutation("C").with_source("c.dart").shared());

        let purged = queue.enqueue(TestOp::removal("R", "b.dart").shared());

        assert_eq!(purged, 1);
        assert_eq!(queue.size(), 3);
        assert_eq!(names(&queue.snapshot()), vec!["A", "C", "R"]);
    }

    #[test]
    fn removal_purges_across_both_lanes() {
        let queue = OperationQueue::new();
        queue.enqueue(TestOp::mutation("A").with_source("a.dart").shared());
        queue.enqueue(TestOp::query("Q").with_affinity("a.dart").shared());
        queue.enqueue(TestOp::mutation("B").with_source("b.dart").shared());
        queue.enqueue(TestOp::query("P").shared());

        let purged = queue.enqueue(TestOp::removal("R", "a.dart").shared());

        assert_eq!(purged, 2);
        assert_eq!(names(&queue.snapshot()), vec!["B", "R", "P"]);
    }

    #[test]
    fn removal_with_no_match_purges_nothing() {
        let queue = OperationQueue::new();
        queue.enqueue(TestOp::mutation("A").with_source("a.dart").shared());

        assert_eq!(queue.enqueue(TestOp::removal("R", "z.dart").shared()), 0);
        assert_eq!(queue.size(), 2);
    }

    #[test]
    fn snapshot_does_not_consume() {
        let queue = OperationQueue::new();
        queue.enqueue(TestOp::query("Q").shared());
        queue.enqueue(TestOp::mutation("M").shared());

        assert_eq!(names(&queue.snapshot()), vec!["M", "Q"]);
        assert_eq!(queue.size(), 2);
    }

    #[test]
    fn empty_queue_with_zero_timeout_never_blocks() {
        let queue = OperationQueue::new();
        let start = Instant::now();
        assert!(queue.dequeue(Duration::ZERO).is_none());
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn dequeue_times_out_when_nothing_arrives() {
        let queue = OperationQueue::new();
        let start = Instant::now();
        assert!(queue.dequeue(Duration::from_millis(20)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn blocked_dequeue_wakes_on_enqueue() {
        let queue = Arc::new(OperationQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.dequeue(Duration::from_secs(5)))
        };

        thread::sleep(Duration::from_millis(20));
        queue.enqueue(TestOp::mutation("late").shared());

        let op = consumer.join().unwrap();
        assert_eq!(format!("{:?}", op.unwrap()), "late");
    }

    #[test]
    fn opening_gate_wakes_blocked_consumer() {
        let queue = Arc::new(OperationQueue::new());
        queue.set_process_queries(false);
        queue.enqueue(TestOp::query("Q").shared());

        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let start = Instant::now();
                (queue.dequeue(Duration::from_secs(5)), start.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(20));
        queue.set_process_queries(true);

        let (op, waited) = consumer.join().unwrap();
        assert_eq!(format!("{:?}", op.unwrap()), "Q");
        assert!(waited < Duration::from_secs(5));
    }

    #[test]
    fn concurrent_producers_lose_nothing() {
        let queue = Arc::new(OperationQueue::new());
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..50 {
                        let name = format!("p{p}-{i}");
                        if i % 2 == 0 {
                            queue.enqueue(TestOp::mutation(&name).shared());
                        } else {
                            queue.enqueue(TestOp::query(&name).shared());
                        }
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        assert_eq!(queue.size(), 200);
        assert_eq!(drain(&queue).len(), 200);
    }

    #[derive(Debug, Clone)]
    enum Step {
        Mutation(u8),
        Query(u8),
        Remove(u8),
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            (0u8..4).prop_map(Step::Mutation),
            (0u8..4).prop_map(Step::Query),
            (0u8..4).prop_map(Step::Remove),
        ]
    }

    proptest! {
        #[test]
        fn size_tracks_enqueued_minus_purged(steps in proptest::collection::vec(step(), 0..64)) {
            let queue = OperationQueue::new();
            let mut enqueued = 0usize;
            let mut purged = 0usize;

            for (i, step) in steps.iter().enumerate() {
                let name = format!("op{i}");
                let op = match step {
                    Step::Mutation(s) => TestOp::mutation(&name).with_source(&format!("s{s}")),
                    Step::Query(s) => TestOp::query(&name).with_affinity(&format!("s{s}")),
                    Step::Remove(s) => TestOp::removal(&name, &format!("s{s}")),
                };
                purged += queue.enqueue(op.shared());
                enqueued += 1;
                prop_assert_eq!(queue.size(), enqueued - purged);
            }
        }

        #[test]
        fn dequeue_order_is_mutations_then_queries(
            kinds in proptest::collection::vec(any::<bool>(), 0..32)
        ) {
            let queue = OperationQueue::new();
            let mut mutations = Vec::new();
            let mut queries = Vec::new();
            for (i, is_query) in kinds.iter().enumerate() {
                let name = format!("op{i}");
                if *is_query {
                    queue.enqueue(TestOp::query(&name).shared());
                    queries.push(name);
                } else {
                    queue.enqueue(TestOp::mutation(&name).shared());
                    mutations.push(name);
                }
            }

            mutations.extend(queries);
            prop_assert_eq!(drain(&queue), mutations);
        }
    }
}

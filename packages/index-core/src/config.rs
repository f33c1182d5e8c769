use std::time::Duration;

/// Configuration for an [`OperationProcessor`](crate::OperationProcessor).
///
/// Controls how long the worker blocks waiting for work and how finely
/// lifecycle waits poll.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Upper bound on a single blocking dequeue. The worker re-checks its
    /// stop flag at least this often.
    pub poll_interval: Duration,
    /// Polling interval used by `stop(true)` and `wait_for_running()`.
    pub stop_poll_interval: Duration,
    /// Name given to the dedicated worker thread by `spawn`.
    pub thread_name: String,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            stop_poll_interval: Duration::from_millis(1),
            thread_name: "index-processor".to_string(),
        }
    }
}

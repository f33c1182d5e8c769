use std::time::Duration;

/// Server-level configuration for the analysis server.
///
/// Controls how the drain loop polls its queue and what it reports as its version.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Version string answered to version requests.
    pub version: String,
    /// Upper bound on a single wait for the next operation.
    pub poll_interval: Duration,
    /// Interval at which `wait_for_idle` re-checks the queue.
    pub idle_poll_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            poll_interval: Duration::from_millis(100),
            idle_poll_interval: Duration::from_millis(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.idle_poll_interval, Duration::from_millis(10));
    }
}

//! Runtime Configuration
//!
//! Tunables for a [`Runtime`](crate::reactive::Runtime). The serializable
//! part can be loaded from JSON; the tick driver is chosen in code.

use serde::Deserialize;

use crate::scheduler::TickDriver;

/// Default cap on how many times one watcher may run in one flush.
pub const DEFAULT_MAX_UPDATE_COUNT: usize = 100;

fn default_max_update_count() -> usize {
    DEFAULT_MAX_UPDATE_COUNT
}

fn default_async_flush() -> bool {
    true
}

/// Configuration for a reactive runtime.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// How many times a single watcher may run during one flush before the
    /// flush is aborted as an infinite update loop.
    #[serde(default = "default_max_update_count")]
    pub max_update_count: usize,

    /// When `false`, queued watchers are flushed inline at enqueue time
    /// instead of on the next tick.
    #[serde(default = "default_async_flush")]
    pub async_flush: bool,

    /// Suppress warnings (refused mutations, invalid watch paths).
    pub silent: bool,

    /// How tick flushes are scheduled.
    #[serde(skip)]
    pub driver: TickDriver,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_update_count: DEFAULT_MAX_UPDATE_COUNT,
            async_flush: true,
            silent: false,
            driver: TickDriver::default(),
        }
    }
}

impl RuntimeConfig {
    /// Parse the serializable fields from JSON. The driver stays `Manual`.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Use the given tick driver.
    ///
    /// # Panics
    ///
    /// Does not panic itself, but with [`TickDriver::Tokio`] every runtime
    /// built from this config must be mutated inside a
    /// `tokio::task::LocalSet`; scheduling a tick anywhere else panics.
    pub fn with_driver(mut self, driver: TickDriver) -> Self {
        self.driver = driver;
        self
    }

    /// Flush synchronously on enqueue.
    pub fn synchronous(mut self) -> Self {
        self.async_flush = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.max_update_count, 100);
        assert!(config.async_flush);
        assert!(!config.silent);
        assert!(matches!(config.driver, TickDriver::Manual));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = RuntimeConfig::from_json(r#"{ "max_update_count": 5 }"#).unwrap();
        assert_eq!(config.max_update_count, 5);
        assert!(config.async_flush);

        let config = RuntimeConfig::from_json(r#"{ "async_flush": false, "silent": true }"#).unwrap();
        assert!(!config.async_flush);
        assert!(config.silent);
        assert_eq!(config.max_update_count, DEFAULT_MAX_UPDATE_COUNT);
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(RuntimeConfig::from_json("{ max_update_count: }").is_err());
    }
}

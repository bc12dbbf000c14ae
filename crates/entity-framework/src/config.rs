//! # Runtime Configuration
//!
//! [`RuntimeConfig`] holds the knobs of an [`EntityRuntime`](crate::runtime::EntityRuntime)
//! that are not tied to one entity type. Per-type settings live in
//! [`EntityOptions`](crate::entity::EntityOptions).
//!
//! The struct deserializes with serde and every field has a default, so embedders can
//! load a partial config from whatever source they use:
//!
//! ```rust
//! use entity_framework::RuntimeConfig;
//!
//! let config: RuntimeConfig = serde_json::from_str(r#"{ "max_forward_hops": 2 }"#).unwrap();
//! assert_eq!(config.max_forward_hops, 2);
//! assert_eq!(config.shutdown_timeout, RuntimeConfig::default().shutdown_timeout);
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Longest chain of `Forward` replies `handle` follows before failing.
    pub max_forward_hops: usize,
    /// Upper bound on waiting for in-flight commands and effects during shutdown.
    pub shutdown_timeout: Duration,
    /// Upper bound on each store call; `None` waits indefinitely.
    pub store_timeout: Option<Duration>,
    /// Attempts per effect when its target fails with a retryable error.
    pub effect_max_attempts: u32,
    /// Pause before the first effect retry; doubled after every further attempt.
    pub effect_retry_backoff: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_forward_hops: 8,
            shutdown_timeout: Duration::from_secs(30),
            store_timeout: None,
            effect_max_attempts: 5,
            effect_retry_backoff: Duration::from_millis(50),
        }
    }
}

impl RuntimeConfig {
    pub fn with_max_forward_hops(mut self, hops: usize) -> Self {
        self.max_forward_hops = hops;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = Some(timeout);
        self
    }

    pub fn with_effect_retry(mut self, max_attempts: u32, backoff: Duration) -> Self {
        self.effect_max_attempts = max_attempts;
        self.effect_retry_backoff = backoff;
        self
    }
}

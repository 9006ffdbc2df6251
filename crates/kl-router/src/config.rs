use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Dispatch loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Name used in logs
    pub name: String,
    /// How long a single poll may block
    pub read_timeout_ms: u64,
    /// Upper bound on waiting for in-flight handlers during shutdown
    pub shutdown_timeout_secs: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            name: "kl-router".to_string(),
            read_timeout_ms: 10_000,
            shutdown_timeout_secs: 30,
        }
    }
}

impl RouterConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

//! Resource limits configuration for sandboxed execution

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Resource limits for code execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Execution budget when the caller does not ask for one
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Upper bound for caller-requested budgets
    #[serde(with = "humantime_serde")]
    pub max_timeout: Duration,

    /// How long to wait for pipes to drain after the child is gone
    #[serde(with = "humantime_serde")]
    pub kill_grace: Duration,

    /// Maximum captured bytes per output stream
    pub max_output_bytes: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30), // 30 seconds default
            max_timeout: Duration::from_secs(300),
            kill_grace: Duration::from_secs(2),
            max_output_bytes: 1024 * 1024, // 1 MB per stream
        }
    }
}

impl ResourceLimits {
    /// Budget for one call: the requested seconds clamped to `max_timeout`
    pub fn effective_timeout(&self, requested_secs: Option<u64>) -> Duration {
        match requested_secs {
            Some(secs) => Duration::from_secs(secs).min(self.max_timeout),
            None => self.timeout,
        }
    }
}

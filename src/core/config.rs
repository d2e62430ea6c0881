// src/core/config.rs

use std::num::NonZeroUsize;
use std::time::Duration;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SCAN_DEADLINE: Duration = Duration::from_secs(60);

/// Tunables of a single [`ScanOrchestrator`](crate::core::orchestrator::ScanOrchestrator).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    /// Timeout applied to probes that do not set their own.
    pub probe_timeout: Duration,
    /// Upper bound on the wall-clock time of a whole scan.
    pub scan_deadline: Duration,
    /// Maximum number of probes in flight at once. Never below 1.
    pub max_concurrency: usize,
    pub user_agent: String,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            scan_deadline: DEFAULT_SCAN_DEADLINE,
            max_concurrency: default_concurrency(),
            user_agent: format!("Scannerv2/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ScanConfig {
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_scan_deadline(mut self, deadline: Duration) -> Self {
        self.scan_deadline = deadline;
        self
    }

    /// Sets the in-flight limit; `0` is clamped to `1`.
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// Number of available execution units, at least 1.
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism().map(NonZeroUsize::get).unwrap_or(1)
}

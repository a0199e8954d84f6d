//! Request size, timing, queue, and activity stream limits.

use serde::Deserialize;

/// Per-request limits enforced by the pipeline.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Requests larger than this are rejected with 413.
    pub max_request_bytes: usize,

    /// If no pipeline task makes forward progress for this long, the
    /// request fails with a policy timeout.
    pub stall_threshold_ms: u64,

    /// Hard cap on total request time.
    pub overall_deadline_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_request_bytes: 10 * 1024 * 1024,
            stall_threshold_ms: 30_000,
            overall_deadline_ms: 600_000,
        }
    }
}

/// Bounded size of each orchestrator queue.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    /// Queue capacity; a full queue suspends the producing task.
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { capacity: 64 }
    }
}

/// Activity stream settings.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ActivityConfig {
    /// Per-connection token bucket refill rate for `/activity/stream`.
    pub rate_per_sec: u32,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self { rate_per_sec: 50 }
    }
}

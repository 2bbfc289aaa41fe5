//! Pipeline tunables and their defaults.

use std::time::Duration;

/// Non-DANGER events are shed once the cached normal backlog reaches this.
pub const DEFAULT_BACKLOG_THRESHOLD: u64 = 50_000;
/// Consecutive DANGER pops before a normal-queue pop must be attempted.
pub const DEFAULT_DANGER_BURST_LIMIT: u32 = 5;
/// Events per database write.
pub const DEFAULT_BATCH_SIZE: usize = 50;
/// Oldest a pending batch may get while the queues are idle.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(250);
/// Pause between polls when both queues are empty.
pub const DEFAULT_IDLE_DELAY: Duration = Duration::from_millis(50);
/// How often the backlog gauge samples queue lengths.
pub const DEFAULT_GAUGE_INTERVAL: Duration = Duration::from_secs(1);
/// How often the metrics reporter logs.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(60);
/// Wait before restarting a failed background task.
pub const DEFAULT_RESTART_BACKOFF: Duration = Duration::from_secs(1);

/// Tunables shared by the pipeline components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// See [`DEFAULT_BACKLOG_THRESHOLD`].
    pub backlog_threshold: u64,
    /// See [`DEFAULT_DANGER_BURST_LIMIT`].
    pub danger_burst_limit: u32,
    /// See [`DEFAULT_BATCH_SIZE`].
    pub batch_size: usize,
    /// See [`DEFAULT_FLUSH_INTERVAL`].
    pub flush_interval: Duration,
    /// See [`DEFAULT_IDLE_DELAY`].
    pub idle_delay: Duration,
    /// See [`DEFAULT_GAUGE_INTERVAL`].
    pub gauge_interval: Duration,
    /// See [`DEFAULT_REPORT_INTERVAL`].
    pub report_interval: Duration,
    /// See [`DEFAULT_RESTART_BACKOFF`].
    pub restart_backoff: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            backlog_threshold: DEFAULT_BACKLOG_THRESHOLD,
            danger_burst_limit: DEFAULT_DANGER_BURST_LIMIT,
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            idle_delay: DEFAULT_IDLE_DELAY,
            gauge_interval: DEFAULT_GAUGE_INTERVAL,
            report_interval: DEFAULT_REPORT_INTERVAL,
            restart_backoff: DEFAULT_RESTART_BACKOFF,
        }
    }
}

impl PipelineConfig {
    /// Clamps values that would stall the worker: a zero batch size or burst
    /// limit becomes 1.
    pub fn normalized(mut self) -> Self {
        self.batch_size = self.batch_size.max(1);
        self.danger_burst_limit = self.danger_burst_limit.max(1);
        self
    }
}

//! # Queue Metrics
//!
//! Drop counters for the pipeline and the reporter loop that periodically
//! logs them next to the current queue depths.
//!
//! Every shed or lost event bumps a monotonic total plus a per-kind counter.
//! Kinds are status strings for admission sheds (statuses outside the known
//! set all count under `other`) and fixed labels for the consumer side (`bad_json`, `db_error`, `moved_to_dlq`,
//! `dlq_push_failed`). Kind lookup ignores ASCII case; the first spelling
//! seen is the one reported. Counters only reset with the process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::core::error::PipelineError;
use crate::core::queue_store::{QueueName, QueueStore};

/// A shed event whose status is outside the known set.
pub const OTHER_STATUS: &str = "other";
/// A queued payload could not be decoded into an event.
pub const BAD_JSON: &str = "bad_json";
/// A batch write to the database failed.
pub const DB_ERROR: &str = "db_error";
/// An event of a failed batch reached the dead-letter queue.
pub const MOVED_TO_DLQ: &str = "moved_to_dlq";
/// An event of a failed batch could not even be dead-lettered and is lost.
pub const DLQ_PUSH_FAILED: &str = "dlq_push_failed";

struct KindCounter {
    label: String,
    count: AtomicU64,
}

/// Process-wide drop counters, injected into whoever sheds or loses events.
#[derive(Default)]
pub struct QueueMetrics {
    dropped_total: AtomicU64,
    dropped_by_kind: RwLock<HashMap<String, KindCounter>>,
}

impl QueueMetrics {
    /// All counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one dropped item of `kind`.
    pub fn record_drop(&self, kind: &str) {
        self.dropped_total.fetch_add(1, Ordering::Relaxed);

        let key = kind.to_ascii_lowercase();
        {
            let counters = self.dropped_by_kind.read().expect("QueueMetrics lock poisoned");
            if let Some(counter) = counters.get(&key) {
                counter.count.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }

        let mut counters = self.dropped_by_kind.write().expect("QueueMetrics lock poisoned");
        counters
            .entry(key)
            .or_insert_with(|| KindCounter {
                label: kind.to_string(),
                count: AtomicU64::new(0),
            })
            .count
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Sum of every recorded drop.
    pub fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }

    /// Drops recorded for `kind`, any case.
    pub fn dropped(&self, kind: &str) -> u64 {
        self.dropped_by_kind
            .read()
            .expect("QueueMetrics lock poisoned")
            .get(&kind.to_ascii_lowercase())
            .map_or(0, |counter| counter.count.load(Ordering::Relaxed))
    }

    /// Per-kind counts sorted by kind.
    pub fn dropped_by_kind(&self) -> Vec<(String, u64)> {
        let counters = self.dropped_by_kind.read().expect("QueueMetrics lock poisoned");
        let mut entries: Vec<(&String, &KindCounter)> = counters.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
            .into_iter()
            .map(|(_, counter)| (counter.label.clone(), counter.count.load(Ordering::Relaxed)))
            .collect()
    }

    /// `kind:count, ...`, or `-` when nothing was dropped.
    pub fn format_breakdown(&self) -> String {
        let entries = self.dropped_by_kind();
        if entries.is_empty() {
            return "-".to_string();
        }
        entries
            .iter()
            .map(|(kind, count)| format!("{kind}:{count}"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Reads all three queue lengths and logs them with the drop counters.
    /// Returns the logged line.
    pub async fn report_once(&self, store: &dyn QueueStore) -> Result<String, PipelineError> {
        let danger = store.length(QueueName::Danger).await?;
        let event = store.length(QueueName::Event).await?;
        let dlq = store.length(QueueName::DeadLetter).await?;

        let line = format!(
            "danger={danger} event={event} dlq={dlq} dropped_total={} dropped_by_type={}",
            self.dropped_total(),
            self.format_breakdown()
        );
        tracing::info!("[Queue] {}", line);
        Ok(line)
    }

    /// Reports every `period` until `token` is cancelled. The first report
    /// comes one full period after start.
    pub async fn run_reporter(
        &self,
        store: &dyn QueueStore,
        period: Duration,
        token: CancellationToken,
    ) -> Result<(), PipelineError> {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!("Metrics reporter received shutdown signal.");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    self.report_once(store).await?;
                }
            }
        }
    }
}

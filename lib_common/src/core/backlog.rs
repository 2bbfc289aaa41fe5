//! # Backlog Gauge
//!
//! Caches the lengths of `event_queue` and `danger_queue` so the admission
//! filter can decide per event without a store round-trip. A background
//! loop samples the store on a fixed tick and swaps the new values in.
//!
//! ## Lock-free reads
//!
//! Both counters are `AtomicU64`. The refresh performs its store queries
//! first and only then stores the results, so a reader never waits on an
//! in-flight refresh and sees values at most one tick old. `Relaxed` is
//! enough: the two numbers are independent signals and nothing else is
//! published through them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::core::error::PipelineError;
use crate::core::queue_store::{QueueName, QueueStore};

/// Cached queue lengths, shared by the gauge loop and the admission filter.
#[derive(Debug, Default)]
pub struct BacklogGauge {
    event_backlog: AtomicU64,
    danger_backlog: AtomicU64,
}

impl BacklogGauge {
    /// Starts with both backlogs at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Last sampled length of `event_queue`.
    pub fn event_backlog(&self) -> u64 {
        self.event_backlog.load(Ordering::Relaxed)
    }

    /// Last sampled length of `danger_queue`.
    pub fn danger_backlog(&self) -> u64 {
        self.danger_backlog.load(Ordering::Relaxed)
    }

    /// Replaces both cached values.
    pub fn set(&self, event_backlog: u64, danger_backlog: u64) {
        self.event_backlog.swap(event_backlog, Ordering::Relaxed);
        self.danger_backlog.swap(danger_backlog, Ordering::Relaxed);
    }

    /// Samples the store once.
    pub async fn refresh(&self, store: &dyn QueueStore) -> Result<(), PipelineError> {
        let event_len = store.length(QueueName::Event).await?;
        let danger_len = store.length(QueueName::Danger).await?;
        self.set(event_len, danger_len);
        Ok(())
    }

    /// Samples every `period` until `token` is cancelled.
    ///
    /// A store failure ends the loop with an error so the supervisor can
    /// restart it; the cached values stay at their last sample meanwhile.
    pub async fn run(
        &self,
        store: &dyn QueueStore,
        period: Duration,
        token: CancellationToken,
    ) -> Result<(), PipelineError> {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!("Backlog gauge received shutdown signal.");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    self.refresh(store).await?;
                    tracing::trace!(
                        event = self.event_backlog(),
                        danger = self.danger_backlog(),
                        "backlog sampled"
                    );
                }
            }
        }
    }
}

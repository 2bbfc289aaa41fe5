//! # Admission Filter
//!
//! Decides per event whether it is buffered for persistence. DANGER events
//! are always admitted. Everything else is admitted only while the cached
//! normal backlog is below the threshold; above it the event is shed and
//! counted under its status, or under `other` for statuses outside the known
//! set. Shedding only affects persistence: the
//! ingestor broadcasts every parsed event regardless of the outcome here.

use std::sync::Arc;

use crate::core::backlog::BacklogGauge;
use crate::core::event::{Event, Status};
use crate::core::metrics::{QueueMetrics, OTHER_STATUS};
use crate::core::queue_store::{QueueError, QueueName, QueueStore};

/// Outcome of offering an event to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Serialized and pushed onto the named list.
    Enqueued(QueueName),
    /// Shed because the normal backlog is at or above the threshold.
    Dropped,
}

/// Backlog-aware gate in front of the queue store.
pub struct AdmissionFilter {
    store: Arc<dyn QueueStore>,
    backlog: Arc<BacklogGauge>,
    metrics: Arc<QueueMetrics>,
    threshold: u64,
}

impl AdmissionFilter {
    /// Creates a filter that sheds non-DANGER events once the cached
    /// `event_queue` length reaches `threshold`.
    pub fn new(
        store: Arc<dyn QueueStore>,
        backlog: Arc<BacklogGauge>,
        metrics: Arc<QueueMetrics>,
        threshold: u64,
    ) -> Self {
        Self {
            store,
            backlog,
            metrics,
            threshold,
        }
    }

    /// The enqueue-or-drop decision. A drop is counted here, exactly once.
    pub fn should_enqueue(&self, event: &Event) -> bool {
        if event.is_danger() {
            return true;
        }
        if self.backlog.event_backlog() < self.threshold {
            return true;
        }
        let kind = match &event.status {
            Status::Other(_) => OTHER_STATUS,
            known => known.as_str(),
        };
        self.metrics.record_drop(kind);
        false
    }

    /// Applies the decision and pushes admitted events onto their list.
    pub async fn submit(&self, event: &Event) -> Result<Admission, QueueError> {
        if !self.should_enqueue(event) {
            tracing::debug!(device = %event.device_id, status = %event.status, "event shed under backlog pressure");
            return Ok(Admission::Dropped);
        }

        let queue = if event.is_danger() {
            QueueName::Danger
        } else {
            QueueName::Event
        };
        let payload = serde_json::to_string(event)?;
        self.store.push(queue, &payload).await?;
        Ok(Admission::Enqueued(queue))
    }
}

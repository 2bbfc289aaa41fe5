//! # Dispatch Worker
//!
//! Drains the two priority lists into the event sink.
//!
//! ## Per iteration
//!
//! 1.  Pick the next payload with [`PrioritySelector`]: `danger_queue`
//!     first, but after `danger_burst_limit` consecutive DANGER pops one
//!     `event_queue` pop must be attempted.
//! 2.  Nothing in either list: flush the pending batch if it is older than
//!     the flush interval, then sleep for the idle delay.
//! 3.  Decode the payload. Undecodable payloads are counted as `bad_json`
//!     and discarded.
//! 4.  Append to the batch; a full batch is flushed at once.
//!
//! ## Flush
//!
//! One bulk append. On failure nothing is retried in place: every member
//! is pushed onto `dlq_queue` individually (`moved_to_dlq`), and members
//! that cannot even be dead-lettered are counted as `dlq_push_failed` and
//! lost. The batch is empty after every flush attempt.

use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::config::PipelineConfig;
use crate::core::error::PipelineError;
use crate::core::event::Event;
use crate::core::metrics::{QueueMetrics, BAD_JSON, DB_ERROR, DLQ_PUSH_FAILED, MOVED_TO_DLQ};
use crate::core::queue_store::{QueueError, QueueName, QueueStore};
use crate::core::sink::EventSink;

/// Strict priority with a burst cap.
///
/// Tracks consecutive DANGER pops. Once the streak reaches the limit the
/// next attempt must go to the normal list; that attempt resets the streak
/// whether or not it yields an item, so DANGER traffic is never parked
/// behind an empty normal list.
#[derive(Debug, Clone)]
pub struct PrioritySelector {
    burst_limit: u32,
    streak: u32,
}

impl PrioritySelector {
    /// A selector allowing `burst_limit` consecutive DANGER pops (at least 1).
    pub fn new(burst_limit: u32) -> Self {
        Self {
            burst_limit: burst_limit.max(1),
            streak: 0,
        }
    }

    /// Whether the next attempt may go to `danger_queue`.
    pub fn may_take_danger(&self) -> bool {
        self.streak < self.burst_limit
    }

    /// A DANGER pop succeeded.
    pub fn record_danger(&mut self) {
        self.streak += 1;
    }

    /// A normal pop succeeded, or a forced normal attempt was made.
    pub fn record_normal(&mut self) {
        self.streak = 0;
    }

    /// Consecutive DANGER pops so far.
    pub fn streak(&self) -> u32 {
        self.streak
    }
}

/// The consumer half of the pipeline.
pub struct DispatchWorker {
    store: Arc<dyn QueueStore>,
    sink: Arc<dyn EventSink>,
    metrics: Arc<QueueMetrics>,
    config: PipelineConfig,
}

impl DispatchWorker {
    /// Creates a worker. Zero batch size or burst limit is treated as 1.
    pub fn new(
        store: Arc<dyn QueueStore>,
        sink: Arc<dyn EventSink>,
        metrics: Arc<QueueMetrics>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            sink,
            metrics,
            config: config.normalized(),
        }
    }

    /// Runs until `token` is cancelled.
    ///
    /// Any pending batch is flushed before returning, both on shutdown and
    /// when the queue store fails underneath the loop (the error is then
    /// handed to the supervisor).
    pub async fn run(&self, token: CancellationToken) -> Result<(), PipelineError> {
        let mut selector = PrioritySelector::new(self.config.danger_burst_limit);
        let mut batch: Vec<Event> = Vec::with_capacity(self.config.batch_size);
        let mut last_flush = Instant::now();

        tracing::info!(
            batch_size = self.config.batch_size,
            burst_limit = self.config.danger_burst_limit,
            "Dispatch worker started."
        );

        loop {
            if token.is_cancelled() {
                self.flush(&mut batch).await;
                tracing::info!("Dispatch worker received shutdown signal.");
                return Ok(());
            }

            let next = match self.next_payload(&mut selector).await {
                Ok(next) => next,
                Err(e) => {
                    self.flush(&mut batch).await;
                    return Err(e.into());
                }
            };

            let Some((_, payload)) = next else {
                if !batch.is_empty() && last_flush.elapsed() >= self.config.flush_interval {
                    self.flush(&mut batch).await;
                    last_flush = Instant::now();
                }
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(self.config.idle_delay) => {}
                }
                continue;
            };

            match serde_json::from_str::<Event>(&payload) {
                Ok(event) => batch.push(event),
                Err(e) => {
                    tracing::warn!("Discarding undecodable queue payload: {}", e);
                    self.metrics.record_drop(BAD_JSON);
                }
            }

            if batch.len() >= self.config.batch_size {
                self.flush(&mut batch).await;
                last_flush = Instant::now();
            }
        }
    }

    /// Pops the next payload according to the burst-capped priority rule.
    pub async fn next_payload(
        &self,
        selector: &mut PrioritySelector,
    ) -> Result<Option<(QueueName, String)>, QueueError> {
        let forced_normal = !selector.may_take_danger();

        if !forced_normal {
            if let Some(payload) = self.store.pop(QueueName::Danger).await? {
                selector.record_danger();
                return Ok(Some((QueueName::Danger, payload)));
            }
        }

        if let Some(payload) = self.store.pop(QueueName::Event).await? {
            selector.record_normal();
            return Ok(Some((QueueName::Event, payload)));
        }

        if forced_normal {
            selector.record_normal();
            if let Some(payload) = self.store.pop(QueueName::Danger).await? {
                selector.record_danger();
                return Ok(Some((QueueName::Danger, payload)));
            }
        }

        Ok(None)
    }

    /// Writes `batch` to the sink, dead-lettering it on failure. Always
    /// leaves `batch` empty.
    pub async fn flush(&self, batch: &mut Vec<Event>) {
        if batch.is_empty() {
            return;
        }

        match self.sink.append_batch(batch).await {
            Ok(()) => {
                tracing::debug!(count = batch.len(), "batch persisted");
            }
            Err(e) => {
                self.metrics.record_drop(DB_ERROR);
                tracing::error!(
                    count = batch.len(),
                    "[Worker] DB save failed, moving batch to DLQ: {}",
                    e
                );
                for event in batch.iter() {
                    self.dead_letter(event).await;
                }
            }
        }

        batch.clear();
    }

    async fn dead_letter(&self, event: &Event) {
        let pushed = match serde_json::to_string(event) {
            Ok(payload) => self.store.push(QueueName::DeadLetter, &payload).await,
            Err(e) => Err(QueueError::from(e)),
        };

        match pushed {
            Ok(()) => self.metrics.record_drop(MOVED_TO_DLQ),
            Err(e) => {
                self.metrics.record_drop(DLQ_PUSH_FAILED);
                tracing::error!(
                    device = %event.device_id,
                    created_at = %event.created_at,
                    "Event lost, dead-letter push failed: {}",
                    e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::Status;
    use crate::core::queue_store::MemoryQueueStore;
    use crate::core::sink::MemorySink;
    use chrono::Utc;
    use std::time::Duration;

    struct Fixture {
        store: Arc<MemoryQueueStore>,
        sink: Arc<MemorySink>,
        metrics: Arc<QueueMetrics>,
        worker: Arc<DispatchWorker>,
    }

    fn fixture(config: PipelineConfig) -> Fixture {
        let store = Arc::new(MemoryQueueStore::new());
        let sink = Arc::new(MemorySink::new());
        let metrics = Arc::new(QueueMetrics::new());
        let worker = Arc::new(DispatchWorker::new(
            store.clone(),
            sink.clone(),
            metrics.clone(),
            config,
        ));
        Fixture {
            store,
            sink,
            metrics,
            worker,
        }
    }

    fn event(device: &str, status: Status) -> Event {
        Event::new(device, status, None, Utc::now())
    }

    async fn enqueue(store: &MemoryQueueStore, queue: QueueName, event: &Event) {
        store
            .push(queue, &serde_json::to_string(event).unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn burst_cap_forces_a_normal_pop() {
        let fx = fixture(PipelineConfig::default());
        for i in 0..12 {
            enqueue(&fx.store, QueueName::Danger, &event(&format!("cam{i}"), Status::Danger)).await;
        }
        for i in 0..3 {
            enqueue(&fx.store, QueueName::Event, &event(&format!("bot{i}"), Status::Safe)).await;
        }

        let mut selector = PrioritySelector::new(5);
        let mut order = Vec::new();
        while let Some((queue, _)) = fx.worker.next_payload(&mut selector).await.unwrap() {
            order.push(queue);
        }

        use QueueName::{Danger as D, Event as N};
        assert_eq!(order, [D, D, D, D, D, N, D, D, D, D, D, N, D, D, N]);
    }

    #[tokio::test]
    async fn danger_is_not_parked_behind_an_empty_normal_queue() {
        let fx = fixture(PipelineConfig::default());
        for _ in 0..7 {
            enqueue(&fx.store, QueueName::Danger, &event("cam", Status::Danger)).await;
        }

        let mut selector = PrioritySelector::new(5);
        let mut popped = 0;
        while let Some((queue, _)) = fx.worker.next_payload(&mut selector).await.unwrap() {
            assert_eq!(queue, QueueName::Danger);
            popped += 1;
        }
        assert_eq!(popped, 7);
    }

    #[tokio::test]
    async fn queues_are_drained_in_fifo_order() {
        let fx = fixture(PipelineConfig::default());
        let first = event("bot1", Status::Safe);
        let second = event("bot2", Status::Safe);
        enqueue(&fx.store, QueueName::Event, &first).await;
        enqueue(&fx.store, QueueName::Event, &second).await;

        let mut selector = PrioritySelector::new(5);
        let (_, a) = fx.worker.next_payload(&mut selector).await.unwrap().unwrap();
        let (_, b) = fx.worker.next_payload(&mut selector).await.unwrap().unwrap();
        assert_eq!(serde_json::from_str::<Event>(&a).unwrap(), first);
        assert_eq!(serde_json::from_str::<Event>(&b).unwrap(), second);
    }

    #[tokio::test]
    async fn failed_flush_dead_letters_every_member_once() {
        let fx = fixture(PipelineConfig::default());
        fx.sink.set_failing(true);

        let mut batch = vec![event("cam1", Status::Danger), event("bot1", Status::Safe)];
        let expected = batch.clone();
        fx.worker.flush(&mut batch).await;

        assert!(batch.is_empty());
        let dlq: Vec<Event> = fx
            .store
            .snapshot(QueueName::DeadLetter)
            .iter()
            .map(|raw| serde_json::from_str(raw).unwrap())
            .collect();
        assert_eq!(dlq, expected);
        assert_eq!(fx.metrics.dropped(MOVED_TO_DLQ), 2);
        assert_eq!(fx.metrics.dropped(DB_ERROR), 1);
        assert_eq!(fx.metrics.dropped(DLQ_PUSH_FAILED), 0);
    }

    #[tokio::test]
    async fn unreachable_dlq_is_counted_not_swallowed() {
        let fx = fixture(PipelineConfig::default());
        fx.sink.set_failing(true);
        fx.store.reject_pushes(QueueName::DeadLetter, true);

        let mut batch = vec![event("bot1", Status::Safe), event("bot2", Status::Safe)];
        fx.worker.flush(&mut batch).await;

        assert!(batch.is_empty());
        assert_eq!(fx.metrics.dropped(DLQ_PUSH_FAILED), 2);
        assert_eq!(fx.metrics.dropped(MOVED_TO_DLQ), 0);
    }

    #[tokio::test]
    async fn successful_flush_writes_in_insertion_order() {
        let fx = fixture(PipelineConfig::default());
        let mut batch = vec![event("cam1", Status::Danger), event("Robot_01", Status::Safe)];
        fx.worker.flush(&mut batch).await;

        assert!(batch.is_empty());
        let rows = fx.sink.rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].cam_id, "cam1");
        assert_eq!(rows[1].cam_id, "Robot_01");
        assert!(fx.store.snapshot(QueueName::DeadLetter).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_batches_full_batches_and_ages_out_partials() {
        let config = PipelineConfig {
            batch_size: 3,
            ..PipelineConfig::default()
        };
        let fx = fixture(config);
        for i in 0..4 {
            enqueue(&fx.store, QueueName::Event, &event(&format!("bot{i}"), Status::Safe)).await;
        }
        fx.store.push(QueueName::Event, "not json").await.unwrap();

        let token = CancellationToken::new();
        let task = {
            let (worker, token) = (fx.worker.clone(), token.clone());
            tokio::spawn(async move { worker.run(token).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(fx.sink.batch_sizes(), [3]);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(fx.sink.batch_sizes(), [3, 1]);
        assert_eq!(fx.metrics.dropped(BAD_JSON), 1);

        token.cancel();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_flushes_the_pending_batch() {
        let fx = fixture(PipelineConfig::default());
        enqueue(&fx.store, QueueName::Danger, &event("cam1", Status::Danger)).await;

        let token = CancellationToken::new();
        let task = {
            let (worker, token) = (fx.worker.clone(), token.clone());
            tokio::spawn(async move { worker.run(token).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(fx.sink.rows().is_empty());

        token.cancel();
        assert!(task.await.unwrap().is_ok());
        assert_eq!(fx.sink.rows().len(), 1);
    }

    #[tokio::test]
    async fn store_outage_ends_the_run_with_an_error() {
        let fx = fixture(PipelineConfig::default());
        fx.store.set_offline(true);
        let result = fx.worker.run(CancellationToken::new()).await;
        assert!(matches!(result, Err(PipelineError::Queue(_))));
    }
}

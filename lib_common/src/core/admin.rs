//! # Admin / Recovery Surface
//!
//! Operator-facing operations over the queue store: queue lengths, a peek
//! at the newest dead-letter items and a bounded manual replay of the
//! dead-letter list back into `event_queue`.
//!
//! Replay only ever happens when an operator asks for it. Nothing in the
//! pipeline calls [`AdminSurface::replay_dlq`] on its own, so a poison
//! payload cannot loop between the worker and the dead-letter list.

use std::sync::Arc;

use serde::Serialize;

use crate::core::event::Event;
use crate::core::queue_store::{QueueError, QueueName, QueueStore};

/// `take` used when the caller gives none or an unusable one.
pub const DEFAULT_TAKE: usize = 50;
/// Upper bound on `take`.
pub const MAX_TAKE: usize = 500;

/// Current length of every list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueLengths {
    /// `danger_queue` length.
    pub danger: u64,
    /// `event_queue` length.
    pub event: u64,
    /// `dlq_queue` length.
    pub dlq: u64,
}

/// One dead-letter entry: the decoded event, or the raw text if it does not
/// decode. Never both.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DlqItem {
    /// The entry decoded as an event.
    Parsed {
        /// The decoded event.
        parsed: Event,
    },
    /// The entry as stored.
    Raw {
        /// The stored text.
        raw: String,
    },
}

impl DlqItem {
    fn from_payload(payload: String) -> Self {
        match serde_json::from_str::<Event>(&payload) {
            Ok(parsed) => DlqItem::Parsed { parsed },
            Err(_) => DlqItem::Raw { raw: payload },
        }
    }
}

/// Result of a dead-letter peek.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DlqPage {
    /// Number of items returned.
    pub count: usize,
    /// Oldest first.
    pub items: Vec<DlqItem>,
}

/// Result of a manual replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplayOutcome {
    /// Items moved to `event_queue`.
    pub replayed: usize,
    /// Items popped but not re-queued.
    pub failed: usize,
}

/// Parses a raw `take` query value. Absent, non-numeric or non-positive
/// values yield [`DEFAULT_TAKE`]; anything above [`MAX_TAKE`] is capped.
pub fn clamp_take(raw: Option<&str>) -> usize {
    match raw.and_then(|s| s.trim().parse::<i64>().ok()) {
        Some(n) if n > 0 => (n as u64).min(MAX_TAKE as u64) as usize,
        _ => DEFAULT_TAKE,
    }
}

/// Queue inspection and replay over a shared store.
#[derive(Clone)]
pub struct AdminSurface {
    store: Arc<dyn QueueStore>,
}

impl AdminSurface {
    /// Wraps `store`.
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self { store }
    }

    /// Lengths of all three lists.
    pub async fn queue_lengths(&self) -> Result<QueueLengths, QueueError> {
        Ok(QueueLengths {
            danger: self.store.length(QueueName::Danger).await?,
            event: self.store.length(QueueName::Event).await?,
            dlq: self.store.length(QueueName::DeadLetter).await?,
        })
    }

    /// The newest `take` dead-letter items, capped at [`MAX_TAKE`].
    pub async fn peek_dlq(&self, take: usize) -> Result<DlqPage, QueueError> {
        let take = take.clamp(1, MAX_TAKE) as i64;
        let items: Vec<DlqItem> = self
            .store
            .range(QueueName::DeadLetter, -take, -1)
            .await?
            .into_iter()
            .map(DlqItem::from_payload)
            .collect();

        Ok(DlqPage {
            count: items.len(),
            items,
        })
    }

    /// Moves up to `take` items from the head of `dlq_queue` to the tail of
    /// `event_queue`, stopping early once the dead-letter list is empty.
    ///
    /// A failed pop aborts the replay with an error. A failed push counts
    /// as `failed`; such items are offered back to `dlq_queue` once the
    /// loop is done.
    pub async fn replay_dlq(&self, take: usize) -> Result<ReplayOutcome, QueueError> {
        let take = take.clamp(1, MAX_TAKE);
        let mut outcome = ReplayOutcome::default();

        tracing::warn!(take, "manual DLQ replay, operator-initiated");

        // Failed items go back only after the loop: each item is popped at
        // most once per call.
        let mut returned = Vec::new();
        let mut pop_error = None;
        for _ in 0..take {
            let payload = match self.store.pop(QueueName::DeadLetter).await {
                Ok(Some(payload)) => payload,
                Ok(None) => break,
                Err(e) => {
                    pop_error = Some(e);
                    break;
                }
            };

            match self.store.push(QueueName::Event, &payload).await {
                Ok(()) => outcome.replayed += 1,
                Err(e) => {
                    outcome.failed += 1;
                    tracing::error!("DLQ replay push failed: {}", e);
                    returned.push(payload);
                }
            }
        }

        for payload in returned {
            if let Err(e) = self.store.push(QueueName::DeadLetter, &payload).await {
                tracing::error!("Replay item lost, could not return it to DLQ: {}", e);
            }
        }
        if let Some(e) = pop_error {
            return Err(e);
        }

        tracing::info!(
            replayed = outcome.replayed,
            failed = outcome.failed,
            "DLQ replay finished"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::Status;
    use crate::core::queue_store::MemoryQueueStore;
    use chrono::Utc;

    fn surface() -> (Arc<MemoryQueueStore>, AdminSurface) {
        let store = Arc::new(MemoryQueueStore::new());
        let admin = AdminSurface::new(store.clone());
        (store, admin)
    }

    async fn dead_letter(store: &MemoryQueueStore, device: &str) {
        let event = Event::new(device, Status::Safe, None, Utc::now());
        store
            .push(QueueName::DeadLetter, &serde_json::to_string(&event).unwrap())
            .await
            .unwrap();
    }

    #[test]
    fn take_is_defaulted_and_capped() {
        assert_eq!(clamp_take(None), 50);
        assert_eq!(clamp_take(Some("abc")), 50);
        assert_eq!(clamp_take(Some("0")), 50);
        assert_eq!(clamp_take(Some("-3")), 50);
        assert_eq!(clamp_take(Some("7")), 7);
        assert_eq!(clamp_take(Some("10000")), 500);
    }

    #[tokio::test]
    async fn lengths_cover_all_three_lists() {
        let (store, admin) = surface();
        store.push(QueueName::Danger, "a").await.unwrap();
        store.push(QueueName::Event, "b").await.unwrap();
        store.push(QueueName::Event, "c").await.unwrap();

        let lengths = admin.queue_lengths().await.unwrap();
        assert_eq!(lengths, QueueLengths { danger: 1, event: 2, dlq: 0 });
    }

    #[tokio::test]
    async fn peek_returns_newest_items_parsed_or_raw() {
        let (store, admin) = surface();
        dead_letter(&store, "old").await;
        dead_letter(&store, "bot1").await;
        store.push(QueueName::DeadLetter, "garbage").await.unwrap();

        let page = admin.peek_dlq(2).await.unwrap();
        assert_eq!(page.count, 2);
        match &page.items[0] {
            DlqItem::Parsed { parsed } => assert_eq!(parsed.device_id, "bot1"),
            other => panic!("expected parsed item, got {other:?}"),
        }
        assert_eq!(page.items[1], DlqItem::Raw { raw: "garbage".into() });

        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["items"][1]["raw"], "garbage");
        assert!(json["items"][1].get("parsed").is_none());
        assert_eq!(store.snapshot(QueueName::DeadLetter).len(), 3);
    }

    #[tokio::test]
    async fn replay_stops_when_the_dlq_runs_dry() {
        let (store, admin) = surface();
        for i in 0..3 {
            dead_letter(&store, &format!("bot{i}")).await;
        }
        let before = store.snapshot(QueueName::DeadLetter);

        let outcome = admin.replay_dlq(10).await.unwrap();
        assert_eq!(outcome, ReplayOutcome { replayed: 3, failed: 0 });
        assert!(store.snapshot(QueueName::DeadLetter).is_empty());
        assert_eq!(store.snapshot(QueueName::Event), before);
    }

    #[tokio::test]
    async fn replay_respects_take() {
        let (store, admin) = surface();
        for i in 0..5 {
            dead_letter(&store, &format!("bot{i}")).await;
        }
        let outcome = admin.replay_dlq(2).await.unwrap();
        assert_eq!(outcome.replayed, 2);
        assert_eq!(store.snapshot(QueueName::DeadLetter).len(), 3);
    }

    #[tokio::test]
    async fn failed_replay_pushes_go_back_to_the_dlq() {
        let (store, admin) = surface();
        dead_letter(&store, "bot1").await;
        dead_letter(&store, "bot2").await;
        store.reject_pushes(QueueName::Event, true);

        let before = store.snapshot(QueueName::DeadLetter);

        let outcome = admin.replay_dlq(50).await.unwrap();
        assert_eq!(outcome, ReplayOutcome { replayed: 0, failed: 2 });
        assert_eq!(store.snapshot(QueueName::DeadLetter), before);
        assert!(store.snapshot(QueueName::Event).is_empty());

        store.reject_pushes(QueueName::Event, false);
        let outcome = admin.replay_dlq(50).await.unwrap();
        assert_eq!(outcome, ReplayOutcome { replayed: 2, failed: 0 });
        assert!(store.snapshot(QueueName::DeadLetter).is_empty());
    }

    #[tokio::test]
    async fn store_outage_is_an_error() {
        let (store, admin) = surface();
        store.set_offline(true);
        assert!(admin.queue_lengths().await.is_err());
        assert!(admin.peek_dlq(5).await.is_err());
        assert!(admin.replay_dlq(5).await.is_err());
    }
}

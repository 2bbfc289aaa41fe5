//! # Queue Store Seam
//!
//! The pipeline buffers events in three named FIFO lists of an external
//! key-value store. Only four primitives are needed: push to tail, pop from
//! head, length and range read. The store's own atomicity is relied upon;
//! nothing here adds locking around them.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

/// The three lists the pipeline uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueueName {
    /// High-priority events (status DANGER).
    Danger,
    /// Everything else that was admitted.
    Event,
    /// Events whose database write failed, held for manual replay.
    DeadLetter,
}

impl QueueName {
    /// All lists, in reporting order.
    pub const ALL: [QueueName; 3] = [QueueName::Danger, QueueName::Event, QueueName::DeadLetter];

    /// Key of the list in the store.
    pub fn key(self) -> &'static str {
        match self {
            QueueName::Danger => "danger_queue",
            QueueName::Event => "event_queue",
            QueueName::DeadLetter => "dlq_queue",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Failures talking to the queue store.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The store could not be reached or rejected the command.
    #[error("queue store unavailable: {0}")]
    Unavailable(String),
    /// The event could not be turned into its transport form.
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Push/pop/length/range primitives on named lists.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Appends `payload` to the tail of `queue`.
    async fn push(&self, queue: QueueName, payload: &str) -> Result<(), QueueError>;

    /// Removes and returns the head of `queue`; `None` when it is empty.
    /// Never waits for an item to arrive.
    async fn pop(&self, queue: QueueName) -> Result<Option<String>, QueueError>;

    /// Current number of items in `queue`.
    async fn length(&self, queue: QueueName) -> Result<u64, QueueError>;

    /// Items between `start` and `stop` inclusive, Redis `LRANGE` style:
    /// negative indices count from the tail.
    async fn range(&self, queue: QueueName, start: i64, stop: i64) -> Result<Vec<String>, QueueError>;
}

/// In-process [`QueueStore`] with Redis list semantics.
///
/// Used for local runs and tests. Outages can be simulated per store or per
/// list to exercise the failure paths of the pipeline.
#[derive(Default)]
pub struct MemoryQueueStore {
    lists: Mutex<HashMap<QueueName, VecDeque<String>>>,
    offline: AtomicBool,
    rejected_pushes: Mutex<HashSet<QueueName>>,
}

impl MemoryQueueStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every operation fail until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Makes pushes to `queue` fail while other operations keep working.
    pub fn reject_pushes(&self, queue: QueueName, reject: bool) {
        let mut rejected = self.rejected_pushes.lock().expect("MemoryQueueStore poisoned");
        if reject {
            rejected.insert(queue);
        } else {
            rejected.remove(&queue);
        }
    }

    /// Copy of the whole list, head first.
    pub fn snapshot(&self, queue: QueueName) -> Vec<String> {
        let lists = self.lists.lock().expect("MemoryQueueStore poisoned");
        lists
            .get(&queue)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn check_online(&self) -> Result<(), QueueError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("memory store is offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn push(&self, queue: QueueName, payload: &str) -> Result<(), QueueError> {
        self.check_online()?;
        if self
            .rejected_pushes
            .lock()
            .expect("MemoryQueueStore poisoned")
            .contains(&queue)
        {
            return Err(QueueError::Unavailable(format!("push to {queue} rejected")));
        }
        let mut lists = self.lists.lock().expect("MemoryQueueStore poisoned");
        lists.entry(queue).or_default().push_back(payload.to_string());
        Ok(())
    }

    async fn pop(&self, queue: QueueName) -> Result<Option<String>, QueueError> {
        self.check_online()?;
        let mut lists = self.lists.lock().expect("MemoryQueueStore poisoned");
        Ok(lists.get_mut(&queue).and_then(VecDeque::pop_front))
    }

    async fn length(&self, queue: QueueName) -> Result<u64, QueueError> {
        self.check_online()?;
        let lists = self.lists.lock().expect("MemoryQueueStore poisoned");
        Ok(lists.get(&queue).map_or(0, |list| list.len() as u64))
    }

    async fn range(&self, queue: QueueName, start: i64, stop: i64) -> Result<Vec<String>, QueueError> {
        self.check_online()?;
        let lists = self.lists.lock().expect("MemoryQueueStore poisoned");
        let Some(list) = lists.get(&queue) else {
            return Ok(Vec::new());
        };

        let len = list.len() as i64;
        let resolve = |index: i64| if index < 0 { len + index } else { index };
        let start = resolve(start).max(0);
        let stop = resolve(stop).min(len - 1);
        if len == 0 || start > stop {
            return Ok(Vec::new());
        }

        Ok(list
            .iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .cloned()
            .collect())
    }
}

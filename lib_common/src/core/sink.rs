//! # Event Sink Seam
//!
//! The database is an external collaborator. The pipeline consumes exactly
//! one operation from it: append a batch of events as log rows.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::core::event::Event;

/// Failures writing a batch.
#[derive(Debug, Error)]
pub enum SinkError {
    /// No connection to the database could be obtained.
    #[error("database unavailable: {0}")]
    Unavailable(String),
    /// The database refused the write (constraint, type, syntax).
    #[error("database rejected the batch: {0}")]
    Rejected(String),
}

/// Row written for each event.
///
/// Exactly one of `cctv_log` and `robot_log` is populated, chosen by the
/// camera classification of the device id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventLogRow {
    /// Originating device.
    pub cam_id: String,
    /// Event creation time.
    pub created_at: DateTime<Utc>,
    /// Message, when the device is a camera.
    pub cctv_log: Option<String>,
    /// Message, when the device is a robot.
    pub robot_log: Option<String>,
    /// Snapshot image path, if any.
    pub snapshot_path: Option<String>,
}

impl From<&Event> for EventLogRow {
    fn from(event: &Event) -> Self {
        let (cctv_log, robot_log) = if event.is_cctv() {
            (Some(event.message.clone()), None)
        } else {
            (None, Some(event.message.clone()))
        };

        Self {
            cam_id: event.device_id.clone(),
            created_at: event.created_at,
            cctv_log,
            robot_log,
            snapshot_path: event.snapshot_path.clone(),
        }
    }
}

/// Bulk-append target for flushed batches.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Writes the whole batch or nothing.
    async fn append_batch(&self, batch: &[Event]) -> Result<(), SinkError>;
}

/// In-process [`EventSink`] that keeps rows in memory.
#[derive(Default)]
pub struct MemorySink {
    rows: Mutex<Vec<EventLogRow>>,
    batches: Mutex<Vec<usize>>,
    failing: AtomicBool,
}

impl MemorySink {
    /// Creates an empty, healthy sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every append fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Rows written so far, in write order.
    pub fn rows(&self) -> Vec<EventLogRow> {
        self.rows.lock().expect("MemorySink poisoned").clone()
    }

    /// Size of each successful batch, in write order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().expect("MemorySink poisoned").clone()
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn append_batch(&self, batch: &[Event]) -> Result<(), SinkError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::Unavailable("memory sink is failing".to_string()));
        }
        self.rows
            .lock()
            .expect("MemorySink poisoned")
            .extend(batch.iter().map(EventLogRow::from));
        self.batches.lock().expect("MemorySink poisoned").push(batch.len());
        Ok(())
    }
}

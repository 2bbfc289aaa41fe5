//! # Core Pipeline Module
//!
//! The event buffering and delivery pipeline of the gateway. A producer (the
//! socket ingestor) never waits on storage: it asks the [`AdmissionFilter`]
//! whether an event may be buffered, pushes it onto one of the priority
//! lists of a [`QueueStore`], and fans it out to live dashboards through the
//! [`Broadcaster`]. The [`DispatchWorker`] drains those lists with a
//! burst-capped priority rule, batches events into the [`EventSink`] and
//! dead-letters any batch the database refuses.
//!
//! ## Core Components:
//!
//! - **`event`**: the immutable `Event` and its transport/live forms.
//! - **`queue_store`**: the list-store seam and its in-process implementation.
//! - **`sink`**: the database seam (bulk append) and its in-process implementation.
//! - **`backlog`**: lock-free cache of queue lengths, refreshed every second.
//! - **`metrics`**: drop counters and the periodic queue report.
//! - **`admission`**: backlog-aware shedding of non-DANGER events.
//! - **`worker`**: priority dispatch, batching, flushing and dead-lettering.
//! - **`broadcaster`**: best-effort fan-out to dashboard subscribers.
//! - **`admin`**: queue inspection and manual dead-letter replay.
//! - **`supervisor`**: restart-with-backoff wrapper for background units.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Manual queue inspection and dead-letter replay.
pub mod admin;
/// Per-event enqueue-or-drop decision.
pub mod admission;
/// Cached queue lengths used as the admission signal.
pub mod backlog;
/// Best-effort live fan-out to dashboard subscribers.
pub mod broadcaster;
/// Pipeline tunables.
pub mod config;
/// Errors a supervised pipeline unit can fail with.
pub mod error;
/// The unit of work flowing through the pipeline.
pub mod event;
/// Drop counters and the periodic queue report.
pub mod metrics;
/// The list-store seam.
pub mod queue_store;
/// The database seam.
pub mod sink;
/// Restart-on-failure wrapper for long-lived tasks.
pub mod supervisor;
/// The priority-aware consumer.
pub mod worker;

// --- Public API Re-exports ---
pub use admin::{AdminSurface, DlqItem, DlqPage, QueueLengths, ReplayOutcome};
pub use admission::{Admission, AdmissionFilter};
pub use backlog::BacklogGauge;
pub use broadcaster::Broadcaster;
pub use config::PipelineConfig;
pub use error::PipelineError;
pub use event::{Event, LivePayload, Status};
pub use metrics::QueueMetrics;
pub use queue_store::{MemoryQueueStore, QueueError, QueueName, QueueStore};
pub use sink::{EventLogRow, EventSink, MemorySink, SinkError};
pub use supervisor::supervise;
pub use worker::{DispatchWorker, PrioritySelector};

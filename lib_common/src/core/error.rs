//! Errors surfaced by long-lived pipeline units to their supervisor.

use thiserror::Error;

use crate::core::queue_store::QueueError;
use crate::core::sink::SinkError;

/// Why a background unit stopped before shutdown was requested.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The queue store failed underneath the unit.
    #[error(transparent)]
    Queue(#[from] QueueError),
    /// The event sink failed underneath the unit.
    #[error(transparent)]
    Sink(#[from] SinkError),
}

//! # Data Ingestors Module
//!
//! Front doors through which device traffic enters the pipeline.
//!
//! ## Contained Modules:
//! - **`device_socket`**: the raw TCP listener for camera and robot status
//!   lines.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// The raw TCP ingest listener.
pub mod device_socket;

// --- Public API Re-exports ---
pub use device_socket::IngestListener;

//! # lib_common
//!
//! Shared engine for the lab guardian gateway. Field devices report status
//! lines over a raw socket; this crate buffers those events in a Redis list
//! store, drains them into PostgreSQL in batches, sheds low-priority load
//! under pressure and dead-letters failed writes for operator replay.
//!
//! Modules are gated by folder, see the crate features.

#[cfg(feature = "core")]
pub mod core;

#[cfg(feature = "connections")]
pub mod connections;

#[cfg(feature = "ingestors")]
pub mod ingestors;

#[cfg(feature = "loggers")]
pub mod loggers;

//! # Connections Module
//!
//! Adapters binding the pipeline seams to external services: the Redis list
//! store and the PostgreSQL event sink.

/// PostgreSQL bulk append into `event_logs`.
pub mod db_postgres;

/// Redis-backed priority and dead-letter lists.
pub mod cache_redis;

pub use cache_redis::RedisQueueStore;
pub use db_postgres::PostgresSink;

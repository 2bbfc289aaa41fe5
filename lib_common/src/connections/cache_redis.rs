//! # Redis Queue Store
//!
//! [`QueueStore`] over three Redis lists. Pushes go to the tail (`RPUSH`),
//! pops come from the head (`LPOP`), so every list is FIFO.
//!
//! The store holds a [`ConnectionManager`], which multiplexes commands over
//! one connection and reconnects on its own after the server goes away.
//! Commands issued while disconnected fail and surface as
//! [`QueueError::Unavailable`].

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError};

use crate::core::queue_store::{QueueError, QueueName, QueueStore};

impl From<RedisError> for QueueError {
    fn from(e: RedisError) -> Self {
        QueueError::Unavailable(e.to_string())
    }
}

/// Redis-backed list store.
#[derive(Clone)]
pub struct RedisQueueStore {
    conn: ConnectionManager,
}

impl RedisQueueStore {
    /// Opens a managed connection to `url` (e.g. `redis://127.0.0.1:6379/`).
    pub async fn connect(url: &str) -> Result<Self, QueueError> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!("Connected to Redis queue store.");
        Ok(Self { conn })
    }
}

#[async_trait]
impl QueueStore for RedisQueueStore {
    async fn push(&self, queue: QueueName, payload: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: u64 = conn.rpush(queue.key(), payload).await?;
        Ok(())
    }

    async fn pop(&self, queue: QueueName) -> Result<Option<String>, QueueError> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.lpop(queue.key(), None).await?;
        Ok(payload)
    }

    async fn length(&self, queue: QueueName) -> Result<u64, QueueError> {
        let mut conn = self.conn.clone();
        let len: u64 = conn.llen(queue.key()).await?;
        Ok(len)
    }

    async fn range(&self, queue: QueueName, start: i64, stop: i64) -> Result<Vec<String>, QueueError> {
        let mut conn = self.conn.clone();
        let items: Vec<String> = conn.lrange(queue.key(), start as isize, stop as isize).await?;
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn malformed_urls_are_rejected_before_connecting() {
        let result = RedisQueueStore::connect("not a url").await;
        assert!(matches!(result, Err(QueueError::Unavailable(_))));
    }
}

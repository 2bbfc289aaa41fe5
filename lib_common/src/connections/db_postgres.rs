//! # PostgreSQL Event Sink
//!
//! [`EventSink`] over a `deadpool_postgres` pool. Each flushed batch is
//! written inside one transaction, so the database sees all rows of the
//! batch or none of them.
//!
//! The pool is created lazily: no connection is opened until the first
//! flush or the schema bootstrap, so the gateway starts even while the
//! database is down.

use async_trait::async_trait;
use deadpool_postgres::{Config as DeadpoolConfig, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;

use crate::core::event::Event;
use crate::core::sink::{EventLogRow, EventSink, SinkError};

/// Creates the `event_logs` table when it is missing.
pub const CREATE_EVENT_LOGS: &str = "\
CREATE TABLE IF NOT EXISTS event_logs (
    id            BIGSERIAL PRIMARY KEY,
    created_at    TIMESTAMPTZ NOT NULL,
    cctv_log      TEXT,
    robot_log     TEXT,
    cam_id        TEXT NOT NULL,
    snapshot_path TEXT
)";

const INSERT_EVENT_LOG: &str = "\
INSERT INTO event_logs (created_at, cctv_log, robot_log, cam_id, snapshot_path) \
VALUES ($1, $2, $3, $4, $5)";

impl From<deadpool_postgres::PoolError> for SinkError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        SinkError::Unavailable(e.to_string())
    }
}

impl From<tokio_postgres::Error> for SinkError {
    fn from(e: tokio_postgres::Error) -> Self {
        SinkError::Rejected(e.to_string())
    }
}

/// Pooled PostgreSQL writer for `event_logs`.
#[derive(Clone)]
pub struct PostgresSink {
    pool: Pool,
}

impl PostgresSink {
    /// Builds a pool of at most `max_size` connections for `database_url`.
    pub fn connect(database_url: &str, max_size: usize) -> Result<Self, SinkError> {
        let mut cfg = DeadpoolConfig::new();
        cfg.url = Some(database_url.to_string());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(PoolConfig::new(max_size.max(1)));

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| SinkError::Unavailable(format!("Failed to create database pool: {}", e)))?;
        tracing::info!("Database connection pool created.");
        Ok(Self { pool })
    }

    /// Runs the `event_logs` bootstrap.
    pub async fn ensure_schema(&self) -> Result<(), SinkError> {
        let client = self.pool.get().await?;
        client.batch_execute(CREATE_EVENT_LOGS).await?;
        tracing::info!("Table 'event_logs' is ready.");
        Ok(())
    }
}

#[async_trait]
impl EventSink for PostgresSink {
    async fn append_batch(&self, batch: &[Event]) -> Result<(), SinkError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let stmt = tx.prepare_cached(INSERT_EVENT_LOG).await?;

        for event in batch {
            let row = EventLogRow::from(event);
            tx.execute(
                &stmt,
                &[
                    &row.created_at,
                    &row.cctv_log,
                    &row.robot_log,
                    &row.cam_id,
                    &row.snapshot_path,
                ],
            )
            .await?;
        }

        tx.commit().await?;
        tracing::debug!(rows = batch.len(), "event_logs batch committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_connection_strings_fail_fast() {
        assert!(matches!(
            PostgresSink::connect("not a url", 4),
            Err(SinkError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn pool_is_lazy() {
        // Nothing listens on port 1; building the pool must still succeed.
        let sink = PostgresSink::connect("postgres://gateway@127.0.0.1:1/lab_guardian", 2).unwrap();
        assert!(sink.append_batch(&[]).await.is_ok());
    }
}

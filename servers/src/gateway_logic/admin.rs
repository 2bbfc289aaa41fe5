//! Operator HTTP surface.
//!
//! - `GET  /admin/queues`            -> `{danger, event, dlq}`
//! - `GET  /admin/dlq?take=N`        -> `{count, items}`
//! - `POST /admin/dlq/replay?take=N` -> `{replayed, failed}`
//! - `GET  /health`                  -> `OK`
//!
//! Queue store failures answer 500 with a JSON error body.

use crate::gateway_logic::downstream::health_handler;
use crate::gateway_logic::state::AppState;
use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use lib_common::core::admin::clamp_take;
use lib_common::core::{DlqPage, QueueError, QueueLengths, ReplayOutcome};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;

/// Errors returned by admin handlers.
#[derive(Debug)]
pub enum AppError {
    /// The queue store could not be reached or refused the command.
    QueueStore(QueueError),
}

impl From<QueueError> for AppError {
    fn from(e: QueueError) -> Self {
        AppError::QueueStore(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_json) = match self {
            AppError::QueueStore(e) => {
                tracing::error!("Admin request failed on queue store: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({
                        "error_type": "QueueStoreError",
                        "message": "Redis error",
                        "detail": e.to_string()
                    }),
                )
            }
        };
        (status, Json(error_json)).into_response()
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::QueueStore(e) => write!(f, "Queue store error: {}", e),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::QueueStore(e) => Some(e),
        }
    }
}

/// `take` is kept as text so junk values fall back to the default instead
/// of being rejected.
#[derive(Debug, Default, Deserialize)]
pub struct TakeParams {
    pub take: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/admin/queues", get(queues_handler))
        .route("/admin/dlq", get(dlq_handler))
        .route("/admin/dlq/replay", post(replay_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Serves the admin surface on `port` until the shutdown token fires.
pub async fn run(port: u16, state: AppState) -> anyhow::Result<()> {
    let shutdown = state.shutdown.clone();
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Admin server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            tracing::info!("Admin server shutting down.");
        })
        .await?;
    Ok(())
}

async fn queues_handler(State(state): State<AppState>) -> Result<Json<QueueLengths>, AppError> {
    Ok(Json(state.admin.queue_lengths().await?))
}

async fn dlq_handler(
    State(state): State<AppState>,
    Query(params): Query<TakeParams>,
) -> Result<Json<DlqPage>, AppError> {
    let take = clamp_take(params.take.as_deref());
    Ok(Json(state.admin.peek_dlq(take).await?))
}

async fn replay_handler(
    State(state): State<AppState>,
    Query(params): Query<TakeParams>,
) -> Result<Json<ReplayOutcome>, AppError> {
    let take = clamp_take(params.take.as_deref());
    Ok(Json(state.admin.replay_dlq(take).await?))
}

//! Keeps a long-lived pipeline unit alive.
//!
//! Each attempt runs in its own task so a panic is contained as a
//! `JoinError`. Whether the unit returned an error or panicked, the failure
//! is logged and the unit is rebuilt after a fixed backoff. A unit that
//! returns `Ok` is treated as finished. Cancellation of the shared token is
//! forwarded to the running attempt and ends supervision once that attempt
//! has wound down.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::core::error::PipelineError;

/// Runs `factory(token)` until it returns `Ok(())` or `token` is cancelled,
/// restarting it after `backoff` whenever it fails or panics.
///
/// Returns the number of restarts performed.
pub async fn supervise<F, Fut>(
    name: &'static str,
    token: CancellationToken,
    backoff: Duration,
    factory: F,
) -> u32
where
    F: Fn(CancellationToken) -> Fut,
    Fut: Future<Output = Result<(), PipelineError>> + Send + 'static,
{
    let mut restarts = 0;

    loop {
        tracing::info!("[{}] starting", name);
        let attempt = tokio::spawn(factory(token.clone()));

        match attempt.await {
            Ok(Ok(())) => {
                tracing::info!("[{}] stopped", name);
                return restarts;
            }
            Ok(Err(e)) => {
                tracing::error!("[{}] failed: {}", name, e);
            }
            Err(join_err) if join_err.is_panic() => {
                tracing::error!("[{}] panicked: {}", name, join_err);
            }
            Err(join_err) => {
                tracing::error!("[{}] aborted: {}", name, join_err);
            }
        }

        if token.is_cancelled() {
            return restarts;
        }

        tracing::warn!("[{}] restarting in {:?}", name, backoff);
        tokio::select! {
            _ = token.cancelled() => return restarts,
            _ = tokio::time::sleep(backoff) => {}
        }
        restarts += 1;
    }
}

use lib_common::core::{AdminSurface, Broadcaster};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shared by the live and admin routers.
#[derive(Clone)]
pub struct AppState {
    pub broadcaster: Arc<Broadcaster>,
    pub admin: AdminSurface,
    // Cancelled on process shutdown; open WebSocket sessions end with it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(broadcaster: Arc<Broadcaster>, admin: AdminSurface, shutdown: CancellationToken) -> Self {
        Self {
            broadcaster,
            admin,
            shutdown,
        }
    }
}

use crate::gateway_logic::state::AppState;
use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};

static NEXT_CLIENT_ID: AtomicUsize = AtomicUsize::new(1);

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Serves live dashboards on `port` until the shutdown token fires.
pub async fn run(port: u16, state: AppState) -> anyhow::Result<()> {
    let shutdown = state.shutdown.clone();
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Live dashboard server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            tracing::info!("Live dashboard server shutting down.");
        })
        .await?;
    Ok(())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

pub(crate) async fn health_handler() -> impl IntoResponse {
    (axum::http::StatusCode::OK, "OK")
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let client_id = format!("ws-{}", NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed));
    let mut frames = state.broadcaster.add_client(&client_id);

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            incoming = socket.recv() => match incoming {
                // Dashboards only listen; anything they send is ignored.
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            frame = frames.recv() => match frame {
                Some(frame) => {
                    if socket.send(Message::Text(frame.to_string().into())).await.is_err() {
                        break; // client disconnected
                    }
                }
                None => break,
            },
        }
    }

    state.broadcaster.remove_client(&client_id);
}

//! # Live Broadcaster
//!
//! Fans every ingested event out to the connected dashboard subscribers.
//!
//! ## Delivery rules
//!
//! 1.  **Serialize once**: the live payload is encoded to JSON a single time
//!     and every subscriber receives an `Arc<str>` pointing at the same text.
//! 2.  **Never block the ingest path**: each subscriber owns a bounded
//!     channel. A full channel means the subscriber is slow; the frame is
//!     dropped for that subscriber only.
//! 3.  **Self-cleaning**: a closed channel means the subscriber is gone; it is
//!     unregistered during the same fan-out with `retain`.
//!
//! Delivery is best-effort and unordered across subscribers. Persistence
//! never depends on it.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::core::event::LivePayload;

/// Frames buffered per subscriber before new frames are dropped for it.
pub const SUBSCRIBER_BUFFER: usize = 256;

/// A registered subscriber and the sending half of its channel.
struct ClientHandle {
    id: String,
    sender: mpsc::Sender<Arc<str>>,
}

/// Registry of live subscribers.
pub struct Broadcaster {
    clients: Mutex<Vec<ClientHandle>>,
    buffer: usize,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    /// A broadcaster with the default per-subscriber buffer.
    pub fn new() -> Self {
        Self::with_buffer(SUBSCRIBER_BUFFER)
    }

    /// A broadcaster buffering up to `buffer` frames per subscriber.
    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            clients: Mutex::new(Vec::new()),
            buffer: buffer.max(1),
        }
    }

    /// Registers a subscriber and returns the receiving half of its channel.
    pub fn add_client(&self, id: &str) -> mpsc::Receiver<Arc<str>> {
        let (tx, rx) = mpsc::channel(self.buffer);
        let mut clients = self.clients.lock().expect("Broadcaster lock poisoned");
        clients.push(ClientHandle {
            id: id.to_string(),
            sender: tx,
        });
        tracing::info!("Live client '{}' registered ({} connected)", id, clients.len());
        rx
    }

    /// Removes a subscriber by id.
    pub fn remove_client(&self, id: &str) {
        let mut clients = self.clients.lock().expect("Broadcaster lock poisoned");
        clients.retain(|c| c.id != id);
        tracing::info!("Live client '{}' removed ({} connected)", id, clients.len());
    }

    /// Number of registered subscribers.
    pub fn client_count(&self) -> usize {
        self.clients.lock().expect("Broadcaster lock poisoned").len()
    }

    /// Sends `payload` to every subscriber. Returns how many accepted it.
    pub fn publish(&self, payload: &LivePayload) -> usize {
        let frame: Arc<str> = match serde_json::to_string(payload) {
            Ok(text) => Arc::from(text),
            Err(e) => {
                tracing::error!("Failed to encode live payload: {}", e);
                return 0;
            }
        };

        let mut delivered = 0;
        let mut clients = self.clients.lock().expect("Broadcaster lock poisoned");
        clients.retain(|client| match client.sender.try_send(Arc::clone(&frame)) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                tracing::trace!("Live client '{}' is lagging, frame dropped", client.id);
                true
            }
            Err(TrySendError::Closed(_)) => {
                tracing::info!("Live client '{}' disconnected. Removing from broadcaster.", client.id);
                false
            }
        });
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::Event;
    use chrono::Utc;

    fn payload() -> LivePayload {
        Event::parse_line("CCTV_Webcam_100:DANGER", Utc::now())
            .unwrap()
            .live_payload()
    }

    #[tokio::test]
    async fn every_subscriber_gets_the_same_frame() {
        let broadcaster = Broadcaster::new();
        let mut a = broadcaster.add_client("a");
        let mut b = broadcaster.add_client("b");

        assert_eq!(broadcaster.publish(&payload()), 2);

        let fa = a.recv().await.unwrap();
        let fb = b.recv().await.unwrap();
        assert!(Arc::ptr_eq(&fa, &fb));
        let json: serde_json::Value = serde_json::from_str(&fa).unwrap();
        assert_eq!(json["status"], "DANGER");
        assert_eq!(json["camId"], "CCTV_Webcam_100");
    }

    #[tokio::test]
    async fn slow_subscribers_lose_frames_but_stay_registered() {
        let broadcaster = Broadcaster::with_buffer(1);
        let mut slow = broadcaster.add_client("slow");

        assert_eq!(broadcaster.publish(&payload()), 1);
        assert_eq!(broadcaster.publish(&payload()), 0);
        assert_eq!(broadcaster.client_count(), 1);

        assert!(slow.recv().await.is_some());
        assert!(slow.try_recv().is_err());
        assert_eq!(broadcaster.publish(&payload()), 1);
    }

    #[test]
    fn closed_subscribers_are_unregistered() {
        let broadcaster = Broadcaster::new();
        let gone = broadcaster.add_client("gone");
        let _kept = broadcaster.add_client("kept");
        drop(gone);

        assert_eq!(broadcaster.publish(&payload()), 1);
        assert_eq!(broadcaster.client_count(), 1);
    }

    #[test]
    fn publishing_without_subscribers_is_a_no_op() {
        let broadcaster = Broadcaster::new();
        assert_eq!(broadcaster.publish(&payload()), 0);
        broadcaster.remove_client("nobody");
    }
}

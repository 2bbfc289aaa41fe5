//! # Device Socket Ingestor
//!
//! Raw TCP front door for cameras and robots. Devices open a connection and
//! write newline-terminated status lines (`deviceId:STATUS[:snapshotPath]`).
//! A line may span several reads, and the last one may end at EOF instead.
//!
//! For every parsed line the ingestor:
//! 1.  offers the event to the [`AdmissionFilter`] (queue it or shed it), and
//! 2.  broadcasts it to live dashboards, whatever the admission outcome.
//!
//! Storage trouble is logged here and goes no further: it never closes the
//! device connection and never suppresses the live broadcast.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::core::admission::{Admission, AdmissionFilter};
use crate::core::broadcaster::Broadcaster;
use crate::core::event::{is_ignored, Event};

/// Bytes read from a device socket per read call.
pub const READ_BUFFER: usize = 2048;
/// Longest message kept while waiting for its line break.
pub const MAX_MESSAGE: usize = 64 * 1024;

/// Accepts device connections and feeds their lines into the pipeline.
pub struct IngestListener {
    admission: Arc<AdmissionFilter>,
    broadcaster: Arc<Broadcaster>,
}

impl IngestListener {
    /// Creates a listener feeding `admission` and `broadcaster`.
    pub fn new(admission: Arc<AdmissionFilter>, broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            admission,
            broadcaster,
        }
    }

    /// Accepts connections until `token` is cancelled, one task per
    /// connection. Open connections are closed on cancellation and awaited
    /// before returning.
    pub async fn run(self: Arc<Self>, listener: TcpListener, token: CancellationToken) {
        let tracker = TaskTracker::new();
        match listener.local_addr() {
            Ok(addr) => tracing::info!("Device ingest listening on {}", addr),
            Err(e) => tracing::warn!("Device ingest listening (address unknown: {})", e),
        }

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!("Signal received: device ingest stops accepting");
                    break;
                }
                result = listener.accept() => {
                    match result {
                        Ok((socket, peer)) => {
                            let this = Arc::clone(&self);
                            let token = token.clone();
                            tracker.spawn(async move {
                                this.handle_device(socket, peer, token).await;
                            });
                        }
                        Err(e) => {
                            tracing::warn!("accept error: {:?}", e);
                        }
                    }
                }
            }
        }

        tracker.close();
        tracker.wait().await;
    }

    /// Reads one device connection until EOF, a read error or shutdown.
    ///
    /// Messages end at `\n`; bytes after the last newline are carried into
    /// the next read, and whatever remains at EOF is the final message. A
    /// connection whose traffic looks like HTTP is closed without producing
    /// events.
    async fn handle_device(&self, mut socket: TcpStream, peer: SocketAddr, token: CancellationToken) {
        tracing::debug!("Device connected: {}", peer);
        let mut buffer = [0u8; READ_BUFFER];
        let mut pending: Vec<u8> = Vec::with_capacity(READ_BUFFER);

        loop {
            let n = tokio::select! {
                _ = token.cancelled() => break,
                read = socket.read(&mut buffer) => match read {
                    Ok(0) => {
                        if !pending.is_empty() {
                            let last = std::mem::take(&mut pending);
                            self.ingest_message(&last, peer).await;
                        }
                        break;
                    }
                    Ok(n) => n,
                    Err(e) => {
                        tracing::warn!("Failed to read from device {}; err = {:?}", peer, e);
                        break;
                    }
                },
            };

            pending.extend_from_slice(&buffer[..n]);
            let mut http = false;
            while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                if !self.ingest_message(&line, peer).await {
                    http = true;
                    break;
                }
            }
            if http {
                tracing::debug!("HTTP traffic on device port from {}, closing", peer);
                break;
            }

            if pending.len() > MAX_MESSAGE {
                tracing::warn!(
                    "Discarding {} bytes from {} without a line break",
                    pending.len(),
                    peer
                );
                pending.clear();
            }
        }

        tracing::debug!("Device disconnected: {}", peer);
    }

    /// Parses and ingests one raw message. Returns `false` when the message
    /// is HTTP traffic.
    async fn ingest_message(&self, raw: &[u8], peer: SocketAddr) -> bool {
        let text = String::from_utf8_lossy(raw);
        let line = text.trim();
        if line.is_empty() {
            return true;
        }
        if is_ignored(line) {
            return false;
        }
        tracing::trace!("Raw data from {}: {}", peer, line);
        if let Some(event) = Event::parse_line(line, Utc::now()) {
            self.ingest(event).await;
        }
        true
    }

    /// Admission then broadcast for one event.
    pub async fn ingest(&self, event: Event) -> Option<Admission> {
        if event.is_danger() {
            tracing::warn!("[{}] {}", event.device_id, event.message);
        } else {
            tracing::info!("[{}] {}", event.device_id, event.message);
        }

        let admission = match self.admission.submit(&event).await {
            Ok(admission) => Some(admission),
            Err(e) => {
                tracing::error!("Failed to enqueue event from {}: {}", event.device_id, e);
                None
            }
        };

        self.broadcaster.publish(&event.live_payload());
        admission
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backlog::BacklogGauge;
    use crate::core::metrics::QueueMetrics;
    use crate::core::queue_store::{MemoryQueueStore, QueueName};
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    struct Fixture {
        store: Arc<MemoryQueueStore>,
        backlog: Arc<BacklogGauge>,
        broadcaster: Arc<Broadcaster>,
        listener: Arc<IngestListener>,
    }

    fn fixture(threshold: u64) -> Fixture {
        let store = Arc::new(MemoryQueueStore::new());
        let backlog = Arc::new(BacklogGauge::new());
        let admission = Arc::new(AdmissionFilter::new(
            store.clone(),
            backlog.clone(),
            Arc::new(QueueMetrics::new()),
            threshold,
        ));
        let broadcaster = Arc::new(Broadcaster::new());
        let listener = Arc::new(IngestListener::new(admission, broadcaster.clone()));
        Fixture {
            store,
            backlog,
            broadcaster,
            listener,
        }
    }

    #[tokio::test]
    async fn danger_line_over_loopback_is_queued_and_broadcast() {
        let fx = fixture(50_000);
        let mut live = fx.broadcaster.add_client("dashboard");

        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = tcp.local_addr().unwrap();
        let token = CancellationToken::new();
        let server = tokio::spawn(fx.listener.clone().run(tcp, token.clone()));

        let mut device = TcpStream::connect(addr).await.unwrap();
        device.write_all(b"CCTV_Webcam_100:DANGER\n").await.unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(5), live.recv())
            .await
            .unwrap()
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(json["status"], "DANGER");
        assert_eq!(json["camId"], "CCTV_Webcam_100");

        let queued = fx.store.snapshot(QueueName::Danger);
        assert_eq!(queued.len(), 1);
        let event: Event = serde_json::from_str(&queued[0]).unwrap();
        assert_eq!(event.device_id, "CCTV_Webcam_100");
        assert!(fx.store.snapshot(QueueName::Event).is_empty());

        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn http_requests_are_ignored() {
        let fx = fixture(50_000);
        let mut live = fx.broadcaster.add_client("dashboard");

        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = tcp.local_addr().unwrap();
        let token = CancellationToken::new();
        let server = tokio::spawn(fx.listener.clone().run(tcp, token.clone()));

        let mut browser = TcpStream::connect(addr).await.unwrap();
        browser.write_all(b"GET /health HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
        drop(browser);

        let mut device = TcpStream::connect(addr).await.unwrap();
        device.write_all(b"Robot_01:SAFE\n").await.unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(5), live.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(frame.contains("Robot_01"));
        assert_eq!(fx.store.snapshot(QueueName::Event).len(), 1);
        assert!(fx.store.snapshot(QueueName::Danger).is_empty());

        token.cancel();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn lines_spanning_reads_are_reassembled() {
        let fx = fixture(u64::MAX);

        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = tcp.local_addr().unwrap();
        let token = CancellationToken::new();
        let server = tokio::spawn(fx.listener.clone().run(tcp, token.clone()));

        let payload = "Robot_01:SAFE\n".repeat(200);
        assert!(payload.len() > READ_BUFFER);
        let mut device = TcpStream::connect(addr).await.unwrap();
        device.write_all(payload.as_bytes()).await.unwrap();
        device.write_all(b"Cam2:DANGER:snapshots/img1.jpg").await.unwrap();
        device.shutdown().await.unwrap();
        drop(device);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while fx.store.snapshot(QueueName::Event).len() < 200
            || fx.store.snapshot(QueueName::Danger).is_empty()
        {
            assert!(tokio::time::Instant::now() < deadline, "events not ingested in time");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let events: Vec<Event> = fx
            .store
            .snapshot(QueueName::Event)
            .iter()
            .map(|raw| serde_json::from_str(raw).unwrap())
            .collect();
        assert_eq!(events.len(), 200);
        assert!(events.iter().all(|e| e.device_id == "Robot_01"));

        let tail: Event = serde_json::from_str(&fx.store.snapshot(QueueName::Danger)[0]).unwrap();
        assert_eq!(tail.snapshot_path.as_deref(), Some("snapshots/img1.jpg"));

        token.cancel();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn shed_events_are_still_broadcast() {
        let fx = fixture(10);
        fx.backlog.set(10, 0);
        let mut live = fx.broadcaster.add_client("dashboard");

        let event = Event::parse_line("Robot_01:SAFE", Utc::now()).unwrap();
        assert_eq!(fx.listener.ingest(event).await, Some(Admission::Dropped));
        assert!(live.try_recv().is_ok());
        assert!(fx.store.snapshot(QueueName::Event).is_empty());
    }

    #[tokio::test]
    async fn store_outage_does_not_block_the_broadcast() {
        let fx = fixture(10);
        fx.store.set_offline(true);
        let mut live = fx.broadcaster.add_client("dashboard");

        let event = Event::parse_line("CCTV_1:DANGER", Utc::now()).unwrap();
        assert_eq!(fx.listener.ingest(event).await, None);
        assert!(live.try_recv().is_ok());
    }
}

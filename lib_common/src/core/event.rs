//! # Device Event Model
//!
//! An [`Event`] is created once per parsed device line and never mutated
//! afterwards. It travels through the queue store as JSON text and is
//! decoded unchanged on the consumer side.
//!
//! ## Line grammar
//!
//! `deviceId ':' status [ ':' snapshotPath ]`, split on `:` into at most
//! three parts. The split does no escaping, so a device id or status must
//! not contain `:`; anything after the second separator belongs to the
//! snapshot path.

use std::fmt;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

/// Device id used when a line carries none.
pub const UNKNOWN_DEVICE: &str = "unknown";

/// Case-insensitive tokens that mark a device as a camera.
const CCTV_TOKENS: [&str; 2] = ["CCTV", "WEBCAM"];

/// Status tag reported by a device.
///
/// Matching is exact: `danger` is not `DANGER` and passes through as
/// [`Status::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Status {
    /// Intrusion detected. The only high-priority status.
    Danger,
    /// Periodic all-clear report.
    Safe,
    /// Device came online.
    Connected,
    /// Device went offline.
    Disconnected,
    /// Operator switched the device into manual control.
    Control,
    /// Operator switched the device back to monitoring.
    Monitor,
    /// Anything else, kept verbatim.
    Other(String),
}

impl Status {
    /// The wire spelling of this status.
    pub fn as_str(&self) -> &str {
        match self {
            Status::Danger => "DANGER",
            Status::Safe => "SAFE",
            Status::Connected => "CONNECTED",
            Status::Disconnected => "DISCONNECTED",
            Status::Control => "CONTROL",
            Status::Monitor => "MONITOR",
            Status::Other(raw) => raw,
        }
    }

    /// Human-readable text shown on dashboards and stored in the log row.
    pub fn display_text(&self) -> &str {
        match self {
            Status::Danger => "Intruder detected!",
            Status::Safe => "All clear (periodic report)",
            Status::Connected => "Device connected",
            Status::Disconnected => "Device disconnected",
            Status::Control => "Control mode (fullscreen)",
            Status::Monitor => "Monitor mode (fullscreen off)",
            Status::Other(raw) => raw,
        }
    }

    /// DANGER events bypass backlog shedding and are drained first.
    pub fn is_danger(&self) -> bool {
        matches!(self, Status::Danger)
    }
}

impl From<&str> for Status {
    fn from(raw: &str) -> Self {
        match raw {
            "DANGER" => Status::Danger,
            "SAFE" => Status::Safe,
            "CONNECTED" => Status::Connected,
            "DISCONNECTED" => Status::Disconnected,
            "CONTROL" => Status::Control,
            "MONITOR" => Status::Monitor,
            other => Status::Other(other.to_string()),
        }
    }
}

impl From<String> for Status {
    fn from(raw: String) -> Self {
        match Status::from(raw.as_str()) {
            Status::Other(_) => Status::Other(raw),
            known => known,
        }
    }
}

impl From<Status> for String {
    fn from(status: Status) -> Self {
        match status {
            Status::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single status report from a camera or robot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Originating device.
    pub device_id: String,
    /// Reported status.
    pub status: Status,
    /// Rendered `[STATUS] text`, with a snapshot note when one was supplied.
    pub message: String,
    /// Path of an image captured alongside the report.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_path: Option<String>,
    /// Assigned by the ingestor at parse time.
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Builds an event and renders its message.
    pub fn new(
        device_id: impl Into<String>,
        status: Status,
        snapshot_path: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let mut message = format!("[{}] {}", status.as_str(), status.display_text());
        if let Some(path) = &snapshot_path {
            message.push_str(&format!(" (snapshot saved: {path})"));
        }

        Self {
            device_id: device_id.into(),
            status,
            message,
            snapshot_path,
            created_at,
        }
    }

    /// Parses one device line.
    ///
    /// Returns `None` for lines that must be ignored: empty ones and stray
    /// HTTP traffic hitting the raw port. A line without any `:` carries no
    /// usable fields and becomes a SAFE report from an unknown device.
    pub fn parse_line(line: &str, created_at: DateTime<Utc>) -> Option<Self> {
        let line = line.trim();
        if is_ignored(line) {
            return None;
        }
        if !line.contains(':') {
            return Some(Self::new(UNKNOWN_DEVICE, Status::Safe, None, created_at));
        }

        let mut parts = line.splitn(3, ':').map(str::trim);
        let device_id = parts
            .next()
            .filter(|part| !part.is_empty())
            .unwrap_or(UNKNOWN_DEVICE);
        let status = parts
            .next()
            .filter(|part| !part.is_empty())
            .map(Status::from)
            .unwrap_or(Status::Safe);
        let snapshot_path = parts
            .next()
            .filter(|part| !part.is_empty())
            .map(str::to_string);

        Some(Self::new(device_id, status, snapshot_path, created_at))
    }

    /// True when the device id names a camera rather than a robot.
    pub fn is_cctv(&self) -> bool {
        let upper = self.device_id.to_ascii_uppercase();
        CCTV_TOKENS.iter().any(|token| upper.contains(token))
    }

    /// DANGER events go to the high-priority queue.
    pub fn is_danger(&self) -> bool {
        self.status.is_danger()
    }

    /// The frame pushed to live dashboards for this event.
    pub fn live_payload(&self) -> LivePayload {
        LivePayload {
            status: self.status.as_str().to_string(),
            cam_id: self.device_id.clone(),
            message: self.message.clone(),
            time: self
                .created_at
                .with_timezone(&Local)
                .format("%H:%M:%S")
                .to_string(),
            snapshot: self.snapshot_path.clone(),
        }
    }
}

/// Empty chunks and anything that looks like an HTTP request are dropped
/// before parsing.
pub fn is_ignored(chunk: &str) -> bool {
    let chunk = chunk.trim();
    chunk.is_empty() || chunk.starts_with("GET") || chunk.contains("HTTP")
}

/// Structured frame sent to dashboard subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LivePayload {
    /// Raw status tag.
    pub status: String,
    /// Originating device.
    pub cam_id: String,
    /// Rendered event message.
    pub message: String,
    /// Local wall-clock time of the event, `HH:MM:SS`.
    pub time: String,
    /// Snapshot path, `null` when absent.
    pub snapshot: Option<String>,
}

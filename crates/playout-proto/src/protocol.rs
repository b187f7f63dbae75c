use crate::request::{MediaKind, MediaRequest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  Clients check this on connect and can refuse to talk to an
/// incompatible daemon.
pub const PROTOCOL_VERSION: u32 = 1;

/// Messages sent from clients (admin console, submit tools) to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    /// Append a new request to the store.
    Submit {
        kind: MediaKind,
        payload: String,
        requester_id: String,
    },
    /// Operator toggle.  Off keeps the current session but starts nothing new.
    SetAutoPlay { enabled: bool },
    /// Operator skip of whatever is playing.
    Skip,
    GetState,
}

/// Messages sent from the daemon to clients (broadcasts)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect: daemon version + full state snapshot.
    Hello {
        protocol_version: u32,
        daemon_rev: u64,
        state: PlayoutState,
    },
    State {
        data: PlayoutState,
    },
    Log {
        message: String,
    },
    Error {
        message: String,
    },
}

/// Health of the video engine process as observed by the daemon.
///
/// Transitions:
///   Absent -> Starting -> Running -> Dead -> Starting ...
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub enum EngineHealth {
    /// Engine process does not exist yet (before first song).
    #[default]
    Absent,
    /// Process is spawning / socket not yet available.
    Starting,
    /// Socket connected, IPC responding normally.
    Running,
    /// Process exited, socket closed, or spawn failed.
    Dead,
}

/// The request currently holding the speakers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NowPlaying {
    pub request: MediaRequest,
    pub started_at: DateTime<Utc>,
}

/// Shared "now playing" / "queue" view.  `rev` is a monotonically increasing
/// counter incremented every time the view changes.  Clients can use it to
/// detect missed updates and request a resync.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlayoutState {
    /// Monotonic revision counter, incremented on every state change.
    #[serde(default)]
    pub rev: u64,
    pub auto_play: bool,
    pub now_playing: Option<NowPlaying>,
    /// Pending requests in playback order.
    pub queue: Vec<MediaRequest>,
    #[serde(default)]
    pub video_health: EngineHealth,
    /// Most recent store or engine failure, for the operator console.
    #[serde(default)]
    pub last_error: Option<String>,
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        if data.len() < 4 {
            anyhow::bail!("Insufficient data for length header");
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}

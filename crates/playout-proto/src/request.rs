//! Media request data model shared by the daemon, its store and clients.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Store-assigned request identifier.  Strictly increasing per store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a request asks the venue speakers to do.
///
/// Variant order is the priority order: announcements always sort ahead of
/// songs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// Free text read out by the speech engine.
    Announcement,
    /// A video locator played by the video engine.
    Song,
}

impl MediaKind {
    pub fn label(&self) -> &'static str {
        match self {
            MediaKind::Announcement => "announcement",
            MediaKind::Song => "song",
        }
    }
}

/// Why a request ended without playing to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The song locator did not resolve to a video id.  Zero playback time.
    PayloadParse,
    /// A safety timeout fired before the engine became ready.
    EngineTimeout,
    /// The engine reported a playback error (or could not be started).
    EngineError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub detail: String,
}

/// How a request reached its terminal status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "how", rename_all = "snake_case")]
pub enum Completion {
    Played,
    Skipped,
    Failed(Failure),
}

/// Request lifecycle.
///
/// `Pending → Playing → Completed` is the only forward path.  The single
/// backwards edge, `Playing → Pending`, is reserved for a song preempted by
/// an announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Playing,
    Completed(Completion),
}

impl RequestStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, RequestStatus::Pending)
    }

    pub fn is_playing(&self) -> bool {
        matches!(self, RequestStatus::Playing)
    }

    /// Whether `self → next` is a legal lifecycle edge.
    pub fn can_transition_to(&self, next: &RequestStatus) -> bool {
        match (self, next) {
            (RequestStatus::Pending, RequestStatus::Playing) => true,
            // A song whose locator cannot be parsed is failed straight from the queue.
            (RequestStatus::Pending, RequestStatus::Completed(_)) => true,
            (RequestStatus::Playing, RequestStatus::Completed(_)) => true,
            (RequestStatus::Playing, RequestStatus::Pending) => true,
            _ => false,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Playing => "playing",
            RequestStatus::Completed(Completion::Played) => "played",
            RequestStatus::Completed(Completion::Skipped) => "skipped",
            RequestStatus::Completed(Completion::Failed(_)) => "failed",
        }
    }
}

/// A row of the request table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRequest {
    pub id: RequestId,
    pub kind: MediaKind,
    /// Announcement text, or a song locator.
    pub payload: String,
    pub status: RequestStatus,
    pub submitted_at: DateTime<Utc>,
    /// Submitting team.  Display only.
    pub requester_id: String,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Submission payload; the store assigns id, status and timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRequest {
    pub kind: MediaKind,
    pub payload: String,
    pub requester_id: String,
}

impl NewRequest {
    pub fn announcement(text: impl Into<String>, requester_id: impl Into<String>) -> Self {
        Self {
            kind: MediaKind::Announcement,
            payload: text.into(),
            requester_id: requester_id.into(),
        }
    }

    pub fn song(locator: impl Into<String>, requester_id: impl Into<String>) -> Self {
        Self {
            kind: MediaKind::Song,
            payload: locator.into(),
            requester_id: requester_id.into(),
        }
    }

    /// Reject submissions that could never be played.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.payload.trim().is_empty() {
            anyhow::bail!("{} payload must not be empty", self.kind.label());
        }
        Ok(())
    }
}

//! External playback engines.
//!
//! Engines only start, stop and report.  Deadlines and outcome mapping live
//! in [`crate::driver`]; engines are free to never signal at all.
pub mod mpv;
pub mod speech;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::PlaybackError;
use crate::locator::VideoId;

pub use mpv::MpvVideo;
pub use speech::CommandSpeech;

/// Raw signal from an engine about its current utterance / video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineSignal {
    /// Media loaded and playback is underway.
    Ready,
    /// Natural end of media.
    Ended,
    /// Engine-reported failure (video unavailable, synthesiser crashed, ...).
    Error(String),
}

pub type SignalRx = mpsc::Receiver<EngineSignal>;

#[async_trait]
pub trait SpeechEngine: Send + Sync {
    /// Start reading `text` aloud, replacing anything already being spoken.
    async fn speak(&self, text: &str) -> Result<SignalRx, PlaybackError>;

    /// Halt the current utterance.  Returns once the synthesiser is silent.
    async fn cancel(&self);
}

#[async_trait]
pub trait VideoEngine: Send + Sync {
    /// Load and start `video`, replacing whatever is loaded.
    async fn play(&self, video: &VideoId) -> Result<SignalRx, PlaybackError>;

    /// Stop playback and release the loaded media.  Returns once stopped.
    async fn stop(&self);
}

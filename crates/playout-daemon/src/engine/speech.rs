//! Speech synthesis through a child process (espeak-ng, say, spd-say).
//!
//! Completion is the process exiting.  Cancellation aborts the waiter task;
//! the child is spawned with `kill_on_drop` so dropping it silences the
//! speakers.
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use playout_proto::config::SpeechConfig;
use playout_proto::platform::{self, SpeechFlavor};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{EngineSignal, SignalRx, SpeechEngine};
use crate::error::PlaybackError;

const ENGINE: &str = "speech";

pub struct CommandSpeech {
    binary: Option<PathBuf>,
    args: Vec<String>,
    voice: String,
    /// Waiter task owning the running synthesiser child.
    current: Mutex<Option<JoinHandle<()>>>,
}

impl CommandSpeech {
    pub fn from_config(config: &SpeechConfig) -> Self {
        let binary = platform::find_speech_binary(&config.command);
        match &binary {
            Some(b) => info!("speech: using synthesiser {:?}", b),
            None => warn!("speech: no synthesiser found, announcements will fail"),
        }
        Self {
            binary,
            args: config.args.clone(),
            voice: config.voice.clone(),
            current: Mutex::new(None),
        }
    }

    fn command(&self, binary: &Path, text: &str) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(binary);
        match platform::speech_flavor(binary) {
            SpeechFlavor::Espeak => {
                cmd.arg("-v").arg(&self.voice);
            }
            SpeechFlavor::SpdSay => {
                cmd.arg("-w").arg("-l").arg(&self.voice);
            }
            SpeechFlavor::Say => {}
        }
        cmd.args(&self.args)
            .arg(text)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl SpeechEngine for CommandSpeech {
    async fn speak(&self, text: &str) -> Result<SignalRx, PlaybackError> {
        let binary = self.binary.clone().ok_or(PlaybackError::Unavailable {
            engine: ENGINE,
            detail: "no speech synthesiser found".into(),
        })?;

        self.cancel().await;

        let mut child = self
            .command(&binary, text)
            .spawn()
            .map_err(|e| PlaybackError::Unavailable {
                engine: ENGINE,
                detail: format!("failed to spawn {:?}: {}", binary, e),
            })?;
        debug!("speech: speaking {} chars", text.chars().count());

        let (tx, rx) = mpsc::channel(4);
        let waiter = tokio::spawn(async move {
            let signal = match child.wait().await {
                Ok(status) if status.success() => EngineSignal::Ended,
                Ok(status) => EngineSignal::Error(format!("synthesiser exited: {}", status)),
                Err(e) => EngineSignal::Error(format!("synthesiser wait failed: {}", e)),
            };
            let _ = tx.send(signal).await;
        });
        *self.current.lock().await = Some(waiter);
        Ok(rx)
    }

    async fn cancel(&self) {
        if let Some(waiter) = self.current.lock().await.take() {
            if !waiter.is_finished() {
                debug!("speech: cancelling utterance");
            }
            waiter.abort();
            let _ = waiter.await;
        }
    }
}

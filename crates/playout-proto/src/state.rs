use crate::protocol::{EngineHealth, NowPlaying, PlayoutState};
use crate::request::MediaRequest;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

/// Operator settings that survive a daemon restart.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PersistentState {
    pub auto_play: Option<bool>,
}

/// Owner of the shared now-playing / queue view.
///
/// Only the scheduler writes; socket and HTTP readers take snapshots.  Every
/// mutation bumps `rev`.
pub struct StateManager {
    state: Arc<RwLock<PlayoutState>>,
    state_file: Option<PathBuf>,
}

impl StateManager {
    /// `default_auto_play` applies only when the state file holds no toggle.
    pub fn new(state_file: PathBuf, default_auto_play: bool) -> Self {
        let persistent = Self::load_persistent(&state_file);
        Self::with_state(
            Some(state_file),
            persistent.auto_play.unwrap_or(default_auto_play),
        )
    }

    /// A view that is never written to disk.
    pub fn in_memory(auto_play: bool) -> Self {
        Self::with_state(None, auto_play)
    }

    fn with_state(state_file: Option<PathBuf>, auto_play: bool) -> Self {
        let state = PlayoutState {
            rev: 1,
            auto_play,
            ..PlayoutState::default()
        };
        Self {
            state: Arc::new(RwLock::new(state)),
            state_file,
        }
    }

    pub async fn get_state(&self) -> PlayoutState {
        self.state.read().await.clone()
    }

    pub async fn auto_play(&self) -> bool {
        self.state.read().await.auto_play
    }

    pub async fn set_auto_play(&self, enabled: bool) -> anyhow::Result<()> {
        {
            let mut state = self.state.write().await;
            state.auto_play = enabled;
            state.rev += 1;
        }
        self.save().await
    }

    /// Replace the projected view after a scheduling pass.
    pub async fn set_view(&self, now_playing: Option<NowPlaying>, queue: Vec<MediaRequest>) {
        let mut state = self.state.write().await;
        if state.now_playing == now_playing && state.queue == queue {
            return;
        }
        state.now_playing = now_playing;
        state.queue = queue;
        state.rev += 1;
    }

    pub async fn set_video_health(&self, health: EngineHealth) {
        let mut state = self.state.write().await;
        if state.video_health != health {
            state.video_health = health;
            state.rev += 1;
        }
    }

    pub async fn set_last_error(&self, message: Option<String>) {
        let mut state = self.state.write().await;
        state.last_error = message;
        state.rev += 1;
    }

    async fn save(&self) -> anyhow::Result<()> {
        let Some(state_file) = &self.state_file else {
            return Ok(());
        };
        let persistent = {
            let state = self.state.read().await;
            PersistentState {
                auto_play: Some(state.auto_play),
            }
        };

        if let Some(parent) = state_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(&persistent)?;
        tokio::fs::write(state_file, json).await?;
        Ok(())
    }

    fn load_persistent(state_file: &PathBuf) -> PersistentState {
        if let Ok(content) = std::fs::read_to_string(state_file) {
            match serde_json::from_str::<PersistentState>(&content) {
                Ok(persistent) => return persistent,
                Err(e) => warn!("Ignoring unreadable state file {:?}: {}", state_file, e),
            }
        }
        PersistentState::default()
    }
}

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub speech: SpeechConfig,
    #[serde(default)]
    pub video: VideoConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Persisted operator state (auto-play toggle).
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    /// JSON file backing the bundled request store.
    #[serde(default = "default_store_file")]
    pub store_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Initial auto-play state when no persisted toggle exists.
    #[serde(default)]
    pub auto_play: bool,
    /// Upper bound on a single announcement, even if speech never reports done.
    #[serde(default = "default_announcement_timeout")]
    pub announcement_timeout_secs: f64,
    /// Window for the video engine to report a loaded video.
    #[serde(default = "default_song_ready_timeout")]
    pub song_ready_timeout_secs: f64,
}

impl SchedulerConfig {
    pub fn announcement_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.announcement_timeout_secs.max(0.0))
    }

    pub fn song_ready_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.song_ready_timeout_secs.max(0.0))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    /// Speech synthesiser binary.  Empty means auto-detect.
    #[serde(default)]
    pub command: String,
    /// Extra arguments placed before the text.
    #[serde(default)]
    pub args: Vec<String>,
    /// Voice / language passed to espeak-style synthesisers.
    #[serde(default = "default_voice")]
    pub voice: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    #[serde(default = "default_volume")]
    pub default_volume: f32,
    /// Open a video window.  Off plays audio only.
    #[serde(default = "default_show_video")]
    pub show_video: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
            store_file: default_store_file(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            auto_play: false,
            announcement_timeout_secs: default_announcement_timeout(),
            song_ready_timeout_secs: default_song_ready_timeout(),
        }
    }
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            voice: default_voice(),
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
            show_video: default_show_video(),
        }
    }
}

fn default_state_file() -> PathBuf {
    platform::data_dir().join("state.json")
}

fn default_store_file() -> PathBuf {
    platform::data_dir().join("requests.json")
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8990
}

fn default_announcement_timeout() -> f64 {
    5.0
}

fn default_song_ready_timeout() -> f64 {
    10.0
}

fn default_voice() -> String {
    "ko".to_string()
}

fn default_volume() -> f32 {
    0.7
}

fn default_show_video() -> bool {
    true
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

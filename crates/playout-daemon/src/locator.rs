//! Song locator → external video id.
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::PlaybackError;

/// Identifier understood by the video engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VideoId(String);

impl VideoId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Canonical watch URL, resolved by mpv through yt-dlp.
    pub fn watch_url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.0)
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();

fn patterns() -> &'static [Regex] {
    PATTERNS.get_or_init(|| {
        [
            r"(?:youtube\.com/watch\?v=|youtu\.be/)([^&\n?#]+)",
            r"youtube\.com/embed/([^&\n?#]+)",
            r"youtube\.com/shorts/([^&\n?#/]+)",
            r"^([A-Za-z0-9_-]{11})$",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

/// Extract the video id from a song locator.
pub fn resolve(locator: &str) -> Result<VideoId, PlaybackError> {
    let trimmed = locator.trim();
    for re in patterns() {
        if let Some(id) = re.captures(trimmed).and_then(|c| c.get(1)) {
            let id = id.as_str().trim();
            if !id.is_empty() {
                return Ok(VideoId(id.to_string()));
            }
        }
    }
    Err(PlaybackError::PayloadParse(trimmed.to_string()))
}

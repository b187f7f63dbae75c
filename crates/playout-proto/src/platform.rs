use std::path::PathBuf;

pub const DAEMON_TCP_PORT: u16 = 9877;
const DAEMON_TCP_HOST: &str = "127.0.0.1";

pub fn daemon_address() -> String {
    format!("{}:{}", DAEMON_TCP_HOST, DAEMON_TCP_PORT)
}

#[cfg(unix)]
pub fn mpv_socket_name() -> String {
    format!("{}/playout-mpv.sock", std::env::temp_dir().display())
}

#[cfg(windows)]
pub fn mpv_socket_name() -> String {
    "playout-mpv".to_string()
}

#[cfg(unix)]
pub fn mpv_socket_arg() -> String {
    format!("--input-ipc-server={}", mpv_socket_name())
}

#[cfg(windows)]
pub fn mpv_socket_arg() -> String {
    format!("--input-ipc-server=\\\\.\\pipe\\{}", mpv_socket_name())
}

pub fn data_dir() -> PathBuf {
    // On macOS and Linux, use ~/.local/share/playout/ (XDG standard)
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join("playout")
    }
    #[cfg(windows)]
    {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("playout")
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("playout")
    }

    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("playout")
    }
}

#[cfg(unix)]
fn mpv_binary_names() -> &'static [&'static str] {
    &["mpv"]
}

#[cfg(windows)]
fn mpv_binary_names() -> &'static [&'static str] {
    &["mpv.exe", "mpv"]
}

/// Speech synthesisers in preference order.
#[cfg(target_os = "macos")]
fn speech_binary_names() -> &'static [&'static str] {
    &["say", "espeak-ng", "espeak"]
}

#[cfg(all(unix, not(target_os = "macos")))]
fn speech_binary_names() -> &'static [&'static str] {
    &["espeak-ng", "espeak", "spd-say"]
}

#[cfg(windows)]
fn speech_binary_names() -> &'static [&'static str] {
    &["espeak-ng.exe", "espeak.exe"]
}

fn find_beside_exe(names: &[&str]) -> Option<PathBuf> {
    let current_exe = std::env::current_exe().ok()?;
    let dir = current_exe.parent()?;
    for name in names {
        let p = dir.join(name);
        if p.exists() {
            return Some(p);
        }
        let p = dir.join("external").join(name);
        if p.exists() {
            return Some(p);
        }
    }
    None
}

fn find_on_path(names: &[&str]) -> Option<PathBuf> {
    let path = std::env::var("PATH").ok()?;
    #[cfg(unix)]
    let sep = ":";
    #[cfg(windows)]
    let sep = ";";
    // Preference order wins over PATH order.
    for name in names {
        for dir in path.split(sep) {
            let p = PathBuf::from(dir).join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }
    None
}

/// Find mpv binary for video playback.
/// Checks `MPV_PATH`, beside the current exe, then PATH.
pub fn find_mpv_binary() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("MPV_PATH") {
        let path = PathBuf::from(p);
        if path.exists() {
            return Some(path);
        }
    }
    find_beside_exe(mpv_binary_names()).or_else(|| find_on_path(mpv_binary_names()))
}

/// Find a speech synthesiser.  An explicit `configured` command wins; a bare
/// name is looked up on PATH.
pub fn find_speech_binary(configured: &str) -> Option<PathBuf> {
    let configured = configured.trim();
    if !configured.is_empty() {
        let path = PathBuf::from(configured);
        if path.components().count() > 1 {
            return path.exists().then_some(path);
        }
        return find_on_path(&[configured]);
    }
    find_beside_exe(speech_binary_names()).or_else(|| find_on_path(speech_binary_names()))
}

/// Which argument convention a speech binary follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechFlavor {
    /// `espeak-ng -v <voice> <text>`
    Espeak,
    /// macOS `say <text>`; voice selection is left to system settings.
    Say,
    /// speech-dispatcher `spd-say -w -l <lang> <text>`
    SpdSay,
}

pub fn speech_flavor(binary: &std::path::Path) -> SpeechFlavor {
    let stem = binary
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    match stem {
        "say" => SpeechFlavor::Say,
        "spd-say" => SpeechFlavor::SpdSay,
        _ => SpeechFlavor::Espeak,
    }
}

/// Video engine backed by an mpv child process over JSON IPC.
///
/// Architecture:
///
/// ```text
///   MpvVideo::play()
///         │  ensure_handle() ── MpvProcess::spawn_and_connect()
///         │                          ├── writer_task ← MpvRequest via mpsc → socket
///         │                          └── reader_task → replies (by request_id)
///         │                                          → events → signal_task
///         └── loadfile <watch url>            signal_task: file-loaded → Ready
///                                                          end-file eof → Ended
///                                                          end-file error → Error
/// ```
///
/// mpv resolves YouTube watch URLs itself through yt-dlp (`--ytdl=yes`).
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use playout_proto::config::VideoConfig;
use playout_proto::protocol::EngineHealth;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{debug, info, warn};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

use super::{EngineSignal, SignalRx, VideoEngine};
use crate::error::PlaybackError;
use crate::locator::VideoId;

const ENGINE: &str = "video";

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct MpvRequest {
    req_id: u64,
    line: String,
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// Unsolicited mpv message (no request_id).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    /// Returns the event name, e.g. "end-file", "start-file", "file-loaded".
    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }

    /// Translate into an engine signal.  `None` for events the scheduler
    /// does not care about, including the `end-file reason=stop` produced by
    /// our own `stop` command.
    pub fn to_signal(&self) -> Option<EngineSignal> {
        match self.event_name()? {
            "file-loaded" => Some(EngineSignal::Ready),
            "end-file" => match self.raw.get("reason").and_then(|v| v.as_str()) {
                Some("eof") => Some(EngineSignal::Ended),
                Some("error") => {
                    let detail = self
                        .raw
                        .get("file_error")
                        .and_then(|v| v.as_str())
                        .unwrap_or("playback error");
                    Some(EngineSignal::Error(detail.to_string()))
                }
                Some("quit") => Some(EngineSignal::Error("mpv quit".to_string())),
                _ => None,
            },
            _ => None,
        }
    }
}

// ── IPC handle ────────────────────────────────────────────────────────────────

/// Cloneable handle to the mpv writer task.
#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<MpvRequest>,
}

impl MpvHandle {
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let mut line = serde_json::to_string(&json!({ "command": command, "request_id": req_id }))?;
        line.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(MpvRequest {
                req_id,
                line,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(tokio::time::Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    pub async fn load(&self, url: &str, volume: f32) -> anyhow::Result<()> {
        self.send(json!(["loadfile", url, "replace"])).await?;
        let vol_pct = (volume * 100.0).clamp(0.0, 100.0);
        let _ = self.send(json!(["set_property", "volume", vol_pct])).await;
        Ok(())
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        self.send(json!(["stop"])).await?;
        Ok(())
    }
}

// ── process ───────────────────────────────────────────────────────────────────

/// Owns the mpv child process.
struct MpvProcess {
    socket_name: String,
    show_video: bool,
    volume: f32,
    process: Option<tokio::process::Child>,
}

impl MpvProcess {
    fn new(config: &VideoConfig) -> Self {
        Self {
            socket_name: playout_proto::platform::mpv_socket_name(),
            show_video: config.show_video,
            volume: config.default_volume,
            process: None,
        }
    }

    fn alive(&mut self) -> bool {
        match self.process.as_mut() {
            Some(child) => child.try_wait().ok().flatten().is_none(),
            None => false,
        }
    }

    fn spawn(&mut self) -> anyhow::Result<()> {
        let mpv_binary = playout_proto::platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;
        info!("mpv: spawning {:?}", mpv_binary);

        let mut cmd = tokio::process::Command::new(mpv_binary);
        cmd.arg("--idle=yes")
            .arg(playout_proto::platform::mpv_socket_arg())
            .arg("--quiet")
            .arg("--ytdl=yes")
            .arg(format!(
                "--volume={}",
                (self.volume * 100.0).clamp(0.0, 100.0).round() as i64
            ));
        if self.show_video {
            cmd.arg("--force-window=yes");
        } else {
            cmd.arg("--no-video");
        }
        let child = cmd
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        self.process = Some(child);
        Ok(())
    }

    async fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }
    }

    #[cfg(unix)]
    async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;
        let socket_path = std::path::PathBuf::from(&self.socket_name);
        let _ = tokio::fs::remove_file(&socket_path).await;

        self.spawn()?;

        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("mpv IPC socket did not appear");
        }

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv: connected to IPC socket");
        let (read_half, write_half) = stream.into_split();
        Ok(start_io_tasks(read_half, write_half, event_tx))
    }

    #[cfg(windows)]
    async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;
        self.spawn()?;

        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if let Ok(client) = ClientOptions::new().open(&pipe_path) {
                info!("mpv: connected to named pipe");
                let (read_half, write_half) = tokio::io::split(client);
                return Ok(start_io_tasks(read_half, write_half, event_tx));
            }
        }
        anyhow::bail!("mpv named pipe did not appear")
    }
}

fn start_io_tasks<R, W>(read_half: R, write_half: W, event_tx: mpsc::Sender<MpvEvent>) -> MpvHandle
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<MpvRequest>(64);
    tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(BufReader::new(read_half), pending, event_tx));
    MpvHandle { tx: cmd_tx }
}

async fn fail_pending(pending: &PendingMap, why: &str) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("{}", why)));
    }
}

async fn reader_task<R>(mut reader: BufReader<R>, pending: PendingMap, event_tx: mpsc::Sender<MpvEvent>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                fail_pending(&pending, "mpv IPC connection closed").await;
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                match val.get("request_id").and_then(|v| v.as_u64()) {
                    Some(req_id) => {
                        let Some(tx) = pending.lock().await.remove(&req_id) else {
                            debug!("mpv reader: response for unknown req={}", req_id);
                            continue;
                        };
                        let result = if val["error"].as_str() == Some("success") {
                            Ok(val)
                        } else {
                            let err = val["error"].as_str().unwrap_or("unknown error");
                            Err(anyhow::anyhow!("mpv error: {}", err))
                        };
                        let _ = tx.send(result);
                    }
                    None => {
                        debug!("mpv reader: event {}", trimmed);
                        if event_tx.send(MpvEvent { raw: val }).await.is_err() {
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                fail_pending(&pending, "mpv IPC read error").await;
                break;
            }
        }
    }
}

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<MpvRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register before writing so the reader can always match the reply.
        pending.lock().await.insert(req.req_id, req.reply);
        debug!("mpv writer: send req={} {}", req.req_id, req.line.trim());
        if let Err(e) = writer.write_all(req.line.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

// ── VideoEngine ───────────────────────────────────────────────────────────────

struct Connection {
    process: MpvProcess,
    handle: Option<MpvHandle>,
}

pub struct MpvVideo {
    conn: Mutex<Connection>,
    /// Signal sink of the video currently loaded.  Cleared on stop so late
    /// events from a torn-down video go nowhere.
    session: Arc<Mutex<Option<mpsc::Sender<EngineSignal>>>>,
    health: Arc<watch::Sender<EngineHealth>>,
    volume: f32,
}

impl MpvVideo {
    pub fn new(config: &VideoConfig) -> Self {
        let (health, _) = watch::channel(EngineHealth::Absent);
        Self {
            conn: Mutex::new(Connection {
                process: MpvProcess::new(config),
                handle: None,
            }),
            session: Arc::new(Mutex::new(None)),
            health: Arc::new(health),
            volume: config.default_volume,
        }
    }

    /// Engine health feed for the shared view.
    pub fn health(&self) -> watch::Receiver<EngineHealth> {
        self.health.subscribe()
    }

    async fn ensure_handle(&self) -> Result<MpvHandle, PlaybackError> {
        let mut conn = self.conn.lock().await;
        if conn.handle.is_some() && !conn.process.alive() {
            warn!("mpv: process died, dropping handle");
            conn.handle = None;
            self.health.send_replace(EngineHealth::Dead);
        }
        if let Some(handle) = &conn.handle {
            return Ok(handle.clone());
        }

        self.health.send_replace(EngineHealth::Starting);
        let (event_tx, event_rx) = mpsc::channel::<MpvEvent>(64);
        let handle = match conn.process.spawn_and_connect(event_tx).await {
            Ok(h) => h,
            Err(e) => {
                warn!("mpv: failed to start: {}", e);
                self.health.send_replace(EngineHealth::Dead);
                return Err(PlaybackError::Unavailable {
                    engine: ENGINE,
                    detail: e.to_string(),
                });
            }
        };
        tokio::spawn(signal_task(
            event_rx,
            self.session.clone(),
            self.health.clone(),
        ));
        self.health.send_replace(EngineHealth::Running);
        conn.handle = Some(handle.clone());
        Ok(handle)
    }
}

/// Route mpv events of the current connection to the active video session.
async fn signal_task(
    mut events: mpsc::Receiver<MpvEvent>,
    session: Arc<Mutex<Option<mpsc::Sender<EngineSignal>>>>,
    health: Arc<watch::Sender<EngineHealth>>,
) {
    while let Some(evt) = events.recv().await {
        let Some(signal) = evt.to_signal() else {
            continue;
        };
        debug!("mpv: {:?} → {:?}", evt.event_name(), signal);
        let sink = session.lock().await.clone();
        if let Some(sink) = sink {
            let _ = sink.send(signal).await;
        }
    }
    // Reader gone: the connection is dead and any video on it with it.
    info!("mpv: event stream closed");
    health.send_replace(EngineHealth::Dead);
    if let Some(sink) = session.lock().await.take() {
        let _ = sink
            .send(EngineSignal::Error("mpv connection lost".to_string()))
            .await;
    }
}

#[async_trait]
impl VideoEngine for MpvVideo {
    async fn play(&self, video: &VideoId) -> Result<SignalRx, PlaybackError> {
        let handle = self.ensure_handle().await?;
        let (tx, rx) = mpsc::channel(8);
        *self.session.lock().await = Some(tx);

        info!("mpv: loading {}", video);
        if let Err(e) = handle.load(&video.watch_url(), self.volume).await {
            self.session.lock().await.take();
            return Err(PlaybackError::Engine {
                engine: ENGINE,
                detail: e.to_string(),
            });
        }
        Ok(rx)
    }

    async fn stop(&self) {
        self.session.lock().await.take();
        let handle = self.conn.lock().await.handle.clone();
        if let Some(handle) = handle {
            if let Err(e) = handle.stop().await {
                warn!("mpv: stop failed: {}", e);
            }
        }
    }
}

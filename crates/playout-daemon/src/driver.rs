//! Playback driver: one session per request, exactly one outcome per session.
//!
//! Every session task races three things with `tokio::select!` (biased in
//! this order): the caller's cancellation token, the safety deadline, and the
//! engine's own signals.  The first to fire decides the outcome; the engine
//! is halted before the task returns whenever the engine did not end on its
//! own.
//!
//! Natural outcomes (`Finished`, `Failed`) are pushed to the scheduler as a
//! [`SessionReport`].  `StoppedByCaller` is only ever returned from
//! [`Session::stop`], never reported.
use std::sync::Arc;
use std::time::Duration;

use playout_proto::config::SchedulerConfig;
use playout_proto::request::{MediaKind, MediaRequest, RequestId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::{EngineSignal, SpeechEngine, VideoEngine};
use crate::error::PlaybackError;
use crate::locator::{self, VideoId};

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Finished,
    Failed(PlaybackError),
    StoppedByCaller,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// A request resolved into something an engine can play.
#[derive(Debug, Clone, PartialEq)]
pub enum Playable {
    Speech(String),
    Video(VideoId),
}

impl Playable {
    /// Fails with `PayloadParse` for unresolvable song locators, before any
    /// engine is touched.
    pub fn prepare(request: &MediaRequest) -> Result<Self, PlaybackError> {
        match request.kind {
            MediaKind::Announcement => Ok(Playable::Speech(request.payload.clone())),
            MediaKind::Song => locator::resolve(&request.payload).map(Playable::Video),
        }
    }
}

/// Natural end of a session, delivered to the scheduler loop.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session: SessionId,
    pub request: RequestId,
    pub outcome: Outcome,
}

/// Handle to a running session.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    cancel: CancellationToken,
    task: JoinHandle<Outcome>,
}

impl Session {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Cancel and wait until the engine has halted.  If the session already
    /// ended on its own, that natural outcome is returned instead.
    pub async fn stop(self) -> Outcome {
        self.cancel.cancel();
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => Outcome::Failed(PlaybackError::Engine {
                engine: "driver",
                detail: format!("session task failed: {}", e),
            }),
        }
    }
}

pub struct PlaybackDriver {
    speech: Arc<dyn SpeechEngine>,
    video: Arc<dyn VideoEngine>,
    announcement_timeout: Duration,
    song_ready_timeout: Duration,
    reports: mpsc::Sender<SessionReport>,
    next_session: u64,
}

impl PlaybackDriver {
    pub fn new(
        speech: Arc<dyn SpeechEngine>,
        video: Arc<dyn VideoEngine>,
        config: &SchedulerConfig,
        reports: mpsc::Sender<SessionReport>,
    ) -> Self {
        Self {
            speech,
            video,
            announcement_timeout: config.announcement_timeout(),
            song_ready_timeout: config.song_ready_timeout(),
            reports,
            next_session: 1,
        }
    }

    pub fn start(&mut self, request: RequestId, playable: Playable) -> Session {
        let id = SessionId(self.next_session);
        self.next_session += 1;
        let cancel = CancellationToken::new();

        info!("driver: {} starting {} for {}", id, playable.label(), request);
        let run = match playable {
            Playable::Speech(text) => tokio::spawn(run_announcement(
                self.speech.clone(),
                text,
                self.announcement_timeout,
                cancel.clone(),
            )),
            Playable::Video(video) => tokio::spawn(run_song(
                self.video.clone(),
                video,
                self.song_ready_timeout,
                cancel.clone(),
            )),
        };

        let reports = self.reports.clone();
        let task = tokio::spawn(async move {
            let outcome = match run.await {
                Ok(outcome) => outcome,
                Err(e) => Outcome::Failed(PlaybackError::Engine {
                    engine: "driver",
                    detail: format!("session task failed: {}", e),
                }),
            };
            if outcome != Outcome::StoppedByCaller {
                debug!("driver: {} ended {:?}", id, outcome);
                let report = SessionReport {
                    session: id,
                    request,
                    outcome: outcome.clone(),
                };
                let _ = reports.send(report).await;
            }
            outcome
        });

        Session {
            id,
            cancel,
            task,
        }
    }
}

impl Playable {
    fn label(&self) -> &'static str {
        match self {
            Playable::Speech(_) => "speech",
            Playable::Video(_) => "video",
        }
    }
}

fn channel_closed(engine: &'static str) -> Outcome {
    Outcome::Failed(PlaybackError::Engine {
        engine,
        detail: "engine signal channel closed".to_string(),
    })
}

async fn run_announcement(
    speech: Arc<dyn SpeechEngine>,
    text: String,
    limit: Duration,
    cancel: CancellationToken,
) -> Outcome {
    let deadline = tokio::time::sleep(limit);
    tokio::pin!(deadline);

    let mut signals = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            speech.cancel().await;
            return Outcome::StoppedByCaller;
        }
        _ = &mut deadline => {
            warn!("driver: speech engine did not start within {:?}", limit);
            speech.cancel().await;
            return Outcome::Finished;
        }
        started = speech.speak(&text) => match started {
            Ok(signals) => signals,
            Err(e) => return Outcome::Failed(e),
        },
    };

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                speech.cancel().await;
                return Outcome::StoppedByCaller;
            }
            _ = &mut deadline => {
                warn!("driver: announcement hit {:?} safety timeout", limit);
                speech.cancel().await;
                return Outcome::Finished;
            }
            signal = signals.recv() => match signal {
                Some(EngineSignal::Ended) => return Outcome::Finished,
                Some(EngineSignal::Ready) => continue,
                Some(EngineSignal::Error(detail)) => {
                    return Outcome::Failed(PlaybackError::Engine { engine: "speech", detail });
                }
                None => return channel_closed("speech"),
            },
        }
    }
}

async fn run_song(
    video: Arc<dyn VideoEngine>,
    id: VideoId,
    ready_limit: Duration,
    cancel: CancellationToken,
) -> Outcome {
    let timed_out = || {
        Outcome::Failed(PlaybackError::EngineTimeout {
            engine: "video",
            secs: ready_limit.as_secs_f64(),
        })
    };
    let deadline = tokio::time::sleep(ready_limit);
    tokio::pin!(deadline);

    let mut signals = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            video.stop().await;
            return Outcome::StoppedByCaller;
        }
        _ = &mut deadline => {
            warn!("driver: video engine did not start {} within {:?}", id, ready_limit);
            video.stop().await;
            return timed_out();
        }
        started = video.play(&id) => match started {
            Ok(signals) => signals,
            Err(e) => return Outcome::Failed(e),
        },
    };

    // Start-up window: the deadline only guards readiness.
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                video.stop().await;
                return Outcome::StoppedByCaller;
            }
            _ = &mut deadline => {
                warn!("driver: {} not ready within {:?}, tearing down", id, ready_limit);
                video.stop().await;
                return timed_out();
            }
            signal = signals.recv() => match signal {
                Some(EngineSignal::Ready) => break,
                Some(EngineSignal::Ended) => return Outcome::Finished,
                Some(EngineSignal::Error(detail)) => {
                    return Outcome::Failed(PlaybackError::Engine { engine: "video", detail });
                }
                None => return channel_closed("video"),
            },
        }
    }

    info!("driver: {} ready", id);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                video.stop().await;
                return Outcome::StoppedByCaller;
            }
            signal = signals.recv() => match signal {
                Some(EngineSignal::Ended) => return Outcome::Finished,
                Some(EngineSignal::Ready) => continue,
                Some(EngineSignal::Error(detail)) => {
                    return Outcome::Failed(PlaybackError::Engine { engine: "video", detail });
                }
                None => return channel_closed("video"),
            },
        }
    }
}

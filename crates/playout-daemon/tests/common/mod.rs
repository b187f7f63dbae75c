#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use playout_daemon::core::{SchedulerCore, SchedulerEvent};
use playout_daemon::driver::PlaybackDriver;
use playout_daemon::engine::{EngineSignal, SignalRx, SpeechEngine, VideoEngine};
use playout_daemon::error::{PlaybackError, StoreError, StoreResult};
use playout_daemon::locator::VideoId;
use playout_daemon::store::{LocalStore, RequestStore, StoreChange};
use playout_daemon::BroadcastMessage;
use playout_proto::config::SchedulerConfig;
use playout_proto::protocol::Command;
use playout_proto::request::{MediaRequest, NewRequest, RequestId, RequestStatus};
use playout_proto::state::StateManager;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Everything the fake engines were asked to do, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Speak(String),
    CancelSpeech,
    Play(String),
    StopVideo,
}

pub type CallLog = Arc<Mutex<Vec<EngineCall>>>;

fn record(log: &CallLog, call: EngineCall) {
    log.lock().unwrap().push(call);
}

/// Speech engine that never finishes on its own.
pub struct FakeSpeech {
    log: CallLog,
    current: Mutex<Option<mpsc::Sender<EngineSignal>>>,
}

impl FakeSpeech {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            current: Mutex::new(None),
        }
    }

    pub fn signal(&self, signal: EngineSignal) {
        if let Some(tx) = self.current.lock().unwrap().as_ref() {
            let _ = tx.try_send(signal);
        }
    }

    pub fn finish(&self) {
        self.signal(EngineSignal::Ended);
    }

    pub fn is_speaking(&self) -> bool {
        self.current.lock().unwrap().is_some()
    }
}

#[async_trait]
impl SpeechEngine for FakeSpeech {
    async fn speak(&self, text: &str) -> Result<SignalRx, PlaybackError> {
        record(&self.log, EngineCall::Speak(text.to_string()));
        let (tx, rx) = mpsc::channel(8);
        *self.current.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn cancel(&self) {
        record(&self.log, EngineCall::CancelSpeech);
        self.current.lock().unwrap().take();
    }
}

/// Video engine driven entirely by the test.
pub struct FakeVideo {
    log: CallLog,
    current: Mutex<Option<mpsc::Sender<EngineSignal>>>,
}

impl FakeVideo {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            current: Mutex::new(None),
        }
    }

    pub fn signal(&self, signal: EngineSignal) {
        if let Some(tx) = self.current.lock().unwrap().as_ref() {
            let _ = tx.try_send(signal);
        }
    }

    pub fn ready(&self) {
        self.signal(EngineSignal::Ready);
    }

    pub fn end(&self) {
        self.signal(EngineSignal::Ended);
    }

    pub fn error(&self, detail: &str) {
        self.signal(EngineSignal::Error(detail.to_string()));
    }
}

#[async_trait]
impl VideoEngine for FakeVideo {
    async fn play(&self, video: &VideoId) -> Result<SignalRx, PlaybackError> {
        record(&self.log, EngineCall::Play(video.as_str().to_string()));
        let (tx, rx) = mpsc::channel(8);
        *self.current.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn stop(&self) {
        record(&self.log, EngineCall::StopVideo);
        self.current.lock().unwrap().take();
    }
}

/// `LocalStore` whose status writes can be made to fail on demand.
pub struct FlakyStore {
    inner: LocalStore,
    failing_updates: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: LocalStore::in_memory(),
            failing_updates: AtomicUsize::new(0),
        }
    }

    /// The next `n` calls to `update_status` fail without writing.
    pub fn fail_next_updates(&self, n: usize) {
        self.failing_updates.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl RequestStore for FlakyStore {
    async fn insert(&self, request: NewRequest) -> StoreResult<MediaRequest> {
        self.inner.insert(request).await
    }

    async fn update_status(
        &self,
        id: RequestId,
        status: RequestStatus,
    ) -> StoreResult<MediaRequest> {
        let failing = self
            .failing_updates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Write("disk full".into()));
        }
        self.inner.update_status(id, status).await
    }

    async fn list_pending(&self) -> StoreResult<Vec<MediaRequest>> {
        self.inner.list_pending().await
    }

    async fn get(&self, id: RequestId) -> StoreResult<MediaRequest> {
        self.inner.get(id).await
    }

    async fn list_all(&self) -> StoreResult<Vec<MediaRequest>> {
        self.inner.list_all().await
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.inner.subscribe()
    }
}

/// A running scheduler wired to fake engines.
pub struct Harness {
    pub store: Arc<dyn RequestStore>,
    pub state: Arc<StateManager>,
    pub speech: Arc<FakeSpeech>,
    pub video: Arc<FakeVideo>,
    pub calls: CallLog,
    pub events: mpsc::Sender<SchedulerEvent>,
    pub broadcasts: broadcast::Sender<BroadcastMessage>,
    core: JoinHandle<anyhow::Result<()>>,
}

impl Harness {
    pub async fn start(auto_play: bool) -> Self {
        Self::with_store(Arc::new(LocalStore::in_memory()), auto_play).await
    }

    pub async fn with_store(store: Arc<dyn RequestStore>, auto_play: bool) -> Self {
        let calls: CallLog = Arc::new(Mutex::new(Vec::new()));
        let speech = Arc::new(FakeSpeech::new(calls.clone()));
        let video = Arc::new(FakeVideo::new(calls.clone()));
        let state = Arc::new(StateManager::in_memory(auto_play));
        let (broadcasts, _) = broadcast::channel(256);
        let (events, event_rx) = mpsc::channel(256);
        let (report_tx, report_rx) = mpsc::channel(16);

        let driver = PlaybackDriver::new(
            speech.clone(),
            video.clone(),
            &SchedulerConfig::default(),
            report_tx,
        );
        let core = SchedulerCore::new(
            store.clone(),
            state.clone(),
            driver,
            report_rx,
            events.clone(),
            broadcasts.clone(),
        );
        let core = tokio::spawn(core.run(event_rx));

        let harness = Self {
            store,
            state,
            speech,
            video,
            calls,
            events,
            broadcasts,
            core,
        };
        harness.settle().await;
        harness
    }

    /// Let every runnable task run to quiescence without moving the clock.
    pub async fn settle(&self) {
        for _ in 0..200 {
            tokio::task::yield_now().await;
        }
    }

    /// Move the paused clock forward by exactly `by`, then settle.
    pub async fn advance(&self, by: Duration) {
        tokio::time::advance(by).await;
        self.settle().await;
    }

    pub async fn submit(&self, request: NewRequest) -> RequestId {
        let row = self.store.insert(request).await.unwrap();
        self.settle().await;
        row.id
    }

    pub async fn song(&self, locator: &str) -> RequestId {
        self.submit(NewRequest::song(locator, "team-a")).await
    }

    pub async fn announce(&self, text: &str) -> RequestId {
        self.submit(NewRequest::announcement(text, "team-b")).await
    }

    pub async fn command(&self, cmd: Command) {
        self.events
            .send(SchedulerEvent::Command(cmd))
            .await
            .unwrap();
        self.settle().await;
    }

    pub async fn status(&self, id: RequestId) -> RequestStatus {
        self.store.get(id).await.unwrap().status
    }

    pub async fn playing(&self) -> Vec<RequestId> {
        self.store
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.status.is_playing())
            .map(|r| r.id)
            .collect()
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn plays(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, EngineCall::Play(_)))
            .count()
    }

    pub async fn shutdown(self) {
        let _ = self.events.send(SchedulerEvent::Shutdown).await;
        let _ = self.core.await;
    }
}

/// A valid short link for the given 11-character id.
pub fn link(id: &str) -> String {
    format!("https://youtu.be/{}", id)
}

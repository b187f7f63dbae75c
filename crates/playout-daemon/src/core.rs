/// SchedulerCore: single-owner event loop for all playback state.
///
/// Store notifications, driver outcomes and client commands are funnelled
/// into one `mpsc` channel of `SchedulerEvent`s by small forwarder tasks.
/// SchedulerCore owns the `PlaybackDriver` and the active session
/// exclusively; no other task starts or stops playback.
///
/// Every event triggers a full re-evaluation: the pending queue is re-read
/// from the store and re-projected, so duplicate or out-of-order
/// notifications are harmless.  After each pass the projected view is
/// written to the `StateManager` and a `BroadcastMessage::StateUpdated` goes
/// out to all listeners.
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use playout_proto::protocol::{Command, NowPlaying};
use playout_proto::request::{
    Completion, MediaKind, MediaRequest, NewRequest, RequestId, RequestStatus,
};
use playout_proto::state::StateManager;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::driver::{Outcome, Playable, PlaybackDriver, Session, SessionReport};
use crate::error::StoreError;
use crate::projector;
use crate::store::RequestStore;
use crate::BroadcastMessage;

// ── SchedulerEvent ────────────────────────────────────────────────────────────

/// All inputs into the SchedulerCore loop.
#[derive(Debug)]
pub enum SchedulerEvent {
    /// The request table changed somehow.  Payload deliberately absent.
    StoreChanged,
    /// A driver session reached its natural end.
    SessionEnded(SessionReport),
    /// A command from a socket client or the HTTP API.
    Command(Command),
    Shutdown,
}

// ── SchedulerCore ─────────────────────────────────────────────────────────────

struct Active {
    session: Session,
    request: MediaRequest,
    started_at: DateTime<Utc>,
}

pub struct SchedulerCore {
    store: Arc<dyn RequestStore>,
    state_manager: Arc<StateManager>,
    driver: PlaybackDriver,
    reports: Option<mpsc::Receiver<SessionReport>>,
    event_tx: mpsc::Sender<SchedulerEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    /// `None` is the Idle state.
    active: Option<Active>,
    /// Statuses the store refused, re-applied at the start of every pass
    /// until it accepts them.
    unsynced: HashMap<RequestId, RequestStatus>,
    /// `last_error` in the shared view was set by a store failure.
    error_shown: bool,
}

impl SchedulerCore {
    pub fn new(
        store: Arc<dyn RequestStore>,
        state_manager: Arc<StateManager>,
        driver: PlaybackDriver,
        reports: mpsc::Receiver<SessionReport>,
        event_tx: mpsc::Sender<SchedulerEvent>,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
    ) -> Self {
        Self {
            store,
            state_manager,
            driver,
            reports: Some(reports),
            event_tx,
            broadcast_tx,
            active: None,
            unsynced: HashMap::new(),
            error_shown: false,
        }
    }

    /// Run the event loop.  Returns on `Shutdown` or when every sender is
    /// gone.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<SchedulerEvent>) -> anyhow::Result<()> {
        info!("SchedulerCore: starting event loop");

        forward_store_changes(self.store.subscribe(), self.event_tx.clone());
        if let Some(reports) = self.reports.take() {
            forward_reports(reports, self.event_tx.clone());
        }

        self.reconcile().await;
        self.reevaluate().await;

        loop {
            match event_rx.recv().await {
                None => {
                    info!("SchedulerCore: event channel closed, shutting down");
                    break;
                }

                Some(SchedulerEvent::Shutdown) => {
                    info!("SchedulerCore: shutdown requested");
                    break;
                }

                Some(SchedulerEvent::StoreChanged) => {
                    self.reevaluate().await;
                }

                Some(SchedulerEvent::SessionEnded(report)) => {
                    self.handle_report(report).await;
                    self.reevaluate().await;
                }

                Some(SchedulerEvent::Command(cmd)) => {
                    info!("SchedulerCore: command {:?}", cmd);
                    self.handle_command(cmd).await;
                    self.reevaluate().await;
                }
            }
        }

        self.cleanup().await;
        Ok(())
    }

    /// Rows left `Playing` by a previous run go back to the queue.
    async fn reconcile(&mut self) {
        let rows = match self.store.list_all().await {
            Ok(rows) => rows,
            Err(e) => {
                self.report_store_error("startup reconcile", &e).await;
                return;
            }
        };
        for row in rows.into_iter().filter(|r| r.status.is_playing()) {
            info!("SchedulerCore: {} was playing at shutdown, re-queueing", row.id);
            self.write_status(row.id, RequestStatus::Pending).await;
        }
    }

    // ── transitions ───────────────────────────────────────────────────────────

    async fn handle_report(&mut self, report: SessionReport) {
        let current = self.active.as_ref().map(|a| a.session.id());
        if current != Some(report.session) {
            debug!(
                "SchedulerCore: ignoring outcome of superseded session {}",
                report.session
            );
            return;
        }
        if let Some(active) = self.active.take() {
            info!(
                "SchedulerCore: {} ended after {}s",
                active.request.id,
                (Utc::now() - active.started_at).num_seconds()
            );
        }
        self.complete(report.request, report.outcome).await;
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Submit {
                kind,
                payload,
                requester_id,
            } => {
                let request = NewRequest {
                    kind,
                    payload,
                    requester_id,
                };
                // The store notifier triggers the follow-up pass.
                match self.store.insert(request).await {
                    Ok(row) => info!("SchedulerCore: queued {} ({})", row.id, row.kind.label()),
                    Err(StoreError::Invalid(reason)) => {
                        warn!("SchedulerCore: rejected submission: {}", reason);
                    }
                    Err(e) => self.report_store_error("insert", &e).await,
                }
            }
            Command::SetAutoPlay { enabled } => {
                info!("SchedulerCore: auto-play {}", if enabled { "on" } else { "off" });
                if let Err(e) = self.state_manager.set_auto_play(enabled).await {
                    error!("SchedulerCore: failed to persist auto-play: {}", e);
                }
            }
            Command::Skip => self.skip().await,
            Command::GetState => {}
        }
    }

    async fn skip(&mut self) {
        let Some(active) = self.active.take() else {
            debug!("SchedulerCore: skip with nothing playing");
            return;
        };
        let id = active.request.id;
        info!("SchedulerCore: skipping {}", id);
        match active.session.stop().await {
            Outcome::StoppedByCaller => {
                self.write_status(id, RequestStatus::Completed(Completion::Skipped))
                    .await;
            }
            natural => self.complete(id, natural).await,
        }
    }

    /// One scheduling pass.  Loops until no further transition applies.
    async fn reevaluate(&mut self) {
        self.resync().await;
        let auto_play = self.state_manager.auto_play().await;

        let queue = loop {
            let queue = match self.pending_queue().await {
                Some(q) => q,
                None => return,
            };
            if !auto_play {
                break queue;
            }

            let playing_song = self
                .active
                .as_ref()
                .is_some_and(|a| a.request.kind == MediaKind::Song);
            if playing_song && projector::has_announcement(&queue) {
                self.preempt().await;
                continue;
            }
            if self.active.is_some() {
                break queue;
            }

            let Some(head) = queue.into_iter().next() else {
                break Vec::new();
            };
            self.start(head).await;
        };

        self.publish(queue).await;
    }

    async fn preempt(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        let id = active.request.id;
        info!("SchedulerCore: announcement queued, preempting song {}", id);
        match active.session.stop().await {
            Outcome::StoppedByCaller => {
                self.write_status(id, RequestStatus::Pending).await;
            }
            natural => self.complete(id, natural).await,
        }
    }

    /// Start `head`, or settle it without playing when it cannot be played.
    async fn start(&mut self, head: MediaRequest) {
        let playable = match Playable::prepare(&head) {
            Ok(p) => p,
            Err(e) => {
                warn!("SchedulerCore: {} cannot play: {}", head.id, e);
                self.write_status(
                    head.id,
                    RequestStatus::Completed(Completion::Failed(e.to_failure())),
                )
                .await;
                return;
            }
        };

        if !self.write_status(head.id, RequestStatus::Playing).await {
            return;
        }

        let session = self.driver.start(head.id, playable);
        info!(
            "SchedulerCore: {} now playing {} from {}",
            session.id(),
            head.id,
            head.requester_id
        );
        self.active = Some(Active {
            session,
            request: head,
            started_at: Utc::now(),
        });
    }

    async fn complete(&mut self, id: RequestId, outcome: Outcome) {
        let completion = match outcome {
            Outcome::Finished => Completion::Played,
            Outcome::Failed(e) => {
                warn!("SchedulerCore: {} failed: {}", id, e);
                Completion::Failed(e.to_failure())
            }
            // Only ever reached through `stop()`, which the callers handle.
            Outcome::StoppedByCaller => Completion::Skipped,
        };
        self.write_status(id, RequestStatus::Completed(completion))
            .await;
    }

    // ── store writes ──────────────────────────────────────────────────────────

    /// Move `id` to `status`.  A transport failure is reported and the status
    /// is kept in `unsynced`; the state machine carries on either way.
    /// Returns false only when the row itself refuses the edge (gone, or
    /// already moved on), in which case nothing is retried.
    async fn write_status(&mut self, id: RequestId, status: RequestStatus) -> bool {
        match self.apply(id, &status).await {
            Ok(()) => {
                self.unsynced.remove(&id);
                self.clear_error().await;
                true
            }
            Err(e @ StoreError::InvalidTransition { .. }) | Err(e @ StoreError::NotFound(_)) => {
                warn!("SchedulerCore: {}", e);
                self.unsynced.remove(&id);
                false
            }
            Err(e) => {
                self.report_store_error("update status", &e).await;
                self.unsynced.insert(id, status);
                true
            }
        }
    }

    /// A refused edge to the status the row already has counts as applied.
    async fn apply(&self, id: RequestId, status: &RequestStatus) -> Result<(), StoreError> {
        match self.store.update_status(id, status.clone()).await {
            Ok(row) => {
                debug!("SchedulerCore: {} is now {}", id, row.status.label());
                Ok(())
            }
            Err(e @ StoreError::InvalidTransition { .. }) => match self.store.get(id).await {
                Ok(row) if row.status == *status => Ok(()),
                _ => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    /// Re-apply every status the store refused earlier.
    async fn resync(&mut self) {
        if self.unsynced.is_empty() {
            return;
        }
        let deferred: Vec<(RequestId, RequestStatus)> = self
            .unsynced
            .iter()
            .map(|(id, status)| (*id, status.clone()))
            .collect();
        for (id, status) in deferred {
            match self.apply(id, &status).await {
                Ok(()) => {
                    info!("SchedulerCore: {} caught up to {}", id, status.label());
                    self.unsynced.remove(&id);
                }
                Err(e @ StoreError::InvalidTransition { .. }) | Err(e @ StoreError::NotFound(_)) => {
                    warn!("SchedulerCore: dropping deferred write: {}", e);
                    self.unsynced.remove(&id);
                }
                Err(e) => debug!("SchedulerCore: {} still out of sync: {}", id, e),
            }
        }
        self.clear_error().await;
    }

    async fn report_store_error(&mut self, op: &str, e: &StoreError) {
        let message = format!("store {} failed: {}", op, e);
        error!("SchedulerCore: {}", message);
        self.state_manager.set_last_error(Some(message.clone())).await;
        self.error_shown = true;
        let _ = self.broadcast_tx.send(BroadcastMessage::Error(message));
    }

    /// Once the store has caught up, the operator console stops showing the
    /// failure.
    async fn clear_error(&mut self) {
        if self.error_shown && self.unsynced.is_empty() {
            self.state_manager.set_last_error(None).await;
            self.error_shown = false;
        }
    }

    // ── view ──────────────────────────────────────────────────────────────────

    /// Pending rows in playback order, minus the active request and rows
    /// whose move off the queue is still waiting to reach the store.
    async fn pending_queue(&mut self) -> Option<Vec<MediaRequest>> {
        let pending = match self.store.list_pending().await {
            Ok(rows) => rows,
            Err(e) => {
                self.report_store_error("list pending", &e).await;
                return None;
            }
        };
        self.clear_error().await;
        let active_id = self.active.as_ref().map(|a| a.request.id);
        let unsynced = &self.unsynced;
        Some(projector::project(pending.into_iter().filter(|r| {
            Some(r.id) != active_id && unsynced.get(&r.id).map_or(true, |s| s.is_pending())
        })))
    }

    async fn publish(&self, queue: Vec<MediaRequest>) {
        let now_playing = self.active.as_ref().map(|a| {
            let mut request = a.request.clone();
            request.status = RequestStatus::Playing;
            NowPlaying {
                request,
                started_at: a.started_at,
            }
        });
        self.state_manager.set_view(now_playing, queue).await;
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }

    async fn cleanup(&mut self) {
        if let Some(active) = self.active.take() {
            let id = active.request.id;
            info!("SchedulerCore: stopping {} for shutdown", id);
            match active.session.stop().await {
                Outcome::StoppedByCaller => {
                    self.write_status(id, RequestStatus::Pending).await;
                }
                natural => self.complete(id, natural).await,
            }
        }
    }
}

// ── forwarders ────────────────────────────────────────────────────────────────

/// Turns store notifications into `StoreChanged`.  A lagged receiver still
/// means something changed.
fn forward_store_changes(
    mut changes: broadcast::Receiver<crate::store::StoreChange>,
    event_tx: mpsc::Sender<SchedulerEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(change) => debug!("store change: {:?}", change),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("store notifier lagged by {} changes", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
            if event_tx.send(SchedulerEvent::StoreChanged).await.is_err() {
                break;
            }
        }
    })
}

fn forward_reports(
    mut reports: mpsc::Receiver<SessionReport>,
    event_tx: mpsc::Sender<SchedulerEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(report) = reports.recv().await {
            if event_tx
                .send(SchedulerEvent::SessionEnded(report))
                .await
                .is_err()
            {
                break;
            }
        }
    })
}

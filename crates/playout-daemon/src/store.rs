//! Request store seam and the bundled JSON-file implementation.
//!
//! The scheduler never trusts change payloads: every `StoreChange` only means
//! "something changed, re-read `list_pending()`".
use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use playout_proto::request::{MediaRequest, NewRequest, RequestId, RequestStatus};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};

/// Change notification emitted after every committed write.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreChange {
    Inserted(RequestId),
    StatusChanged { id: RequestId, status: RequestStatus },
}

#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Append a `Pending` request.  The store assigns id and `submitted_at`.
    async fn insert(&self, request: NewRequest) -> StoreResult<MediaRequest>;

    /// Move a request along its lifecycle; illegal edges are rejected.
    async fn update_status(&self, id: RequestId, status: RequestStatus)
        -> StoreResult<MediaRequest>;

    /// Every `Pending` request, in no particular order.
    async fn list_pending(&self) -> StoreResult<Vec<MediaRequest>>;

    async fn get(&self, id: RequestId) -> StoreResult<MediaRequest>;

    /// Every request ever submitted, newest first.
    async fn list_all(&self) -> StoreResult<Vec<MediaRequest>>;

    /// Change notifier.  Delivery is at-least-once from the reader's view:
    /// a lagged receiver should treat the lag itself as a change.
    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;
}

#[derive(Debug, Default)]
struct Table {
    rows: BTreeMap<RequestId, MediaRequest>,
    next_id: u64,
    last_submitted: Option<DateTime<Utc>>,
}

impl Table {
    fn from_rows(rows: Vec<MediaRequest>) -> Self {
        let next_id = rows.iter().map(|r| r.id.0).max().unwrap_or(0) + 1;
        let last_submitted = rows.iter().map(|r| r.submitted_at).max();
        Self {
            rows: rows.into_iter().map(|r| (r.id, r)).collect(),
            next_id,
            last_submitted,
        }
    }

    /// Wall-clock time, bumped so no two requests share a timestamp.
    fn next_submitted_at(&mut self) -> DateTime<Utc> {
        let mut at = Utc::now();
        if let Some(last) = self.last_submitted {
            if at <= last {
                at = last + chrono::Duration::microseconds(1);
            }
        }
        self.last_submitted = Some(at);
        at
    }
}

/// In-process request table, optionally mirrored to a JSON file after every
/// write.
pub struct LocalStore {
    table: RwLock<Table>,
    file: Option<PathBuf>,
    changes: broadcast::Sender<StoreChange>,
}

impl LocalStore {
    pub fn in_memory() -> Self {
        Self::with_table(Table {
            next_id: 1,
            ..Table::default()
        }, None)
    }

    /// Load `path` if it exists; later writes are persisted there.
    pub fn open(path: PathBuf) -> StoreResult<Self> {
        let rows: Vec<MediaRequest> = match std::fs::read_to_string(&path) {
            Ok(content) if !content.trim().is_empty() => serde_json::from_str(&content)?,
            Ok(_) => Vec::new(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        info!("store: loaded {} requests from {:?}", rows.len(), path);
        Ok(Self::with_table(Table::from_rows(rows), Some(path)))
    }

    fn with_table(table: Table, file: Option<PathBuf>) -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            table: RwLock::new(table),
            file,
            changes,
        }
    }

    async fn persist(&self, table: &Table) -> StoreResult<()> {
        let Some(path) = &self.file else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let rows: Vec<&MediaRequest> = table.rows.values().collect();
        let json = serde_json::to_string_pretty(&rows)?;
        // Write-then-rename.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    fn notify(&self, change: StoreChange) {
        // No subscribers is fine.
        let _ = self.changes.send(change);
    }
}

#[async_trait]
impl RequestStore for LocalStore {
    async fn insert(&self, request: NewRequest) -> StoreResult<MediaRequest> {
        request
            .validate()
            .map_err(|e| StoreError::Invalid(e.to_string()))?;

        let row = {
            let mut table = self.table.write().await;
            let id = RequestId(table.next_id);
            table.next_id += 1;
            let row = MediaRequest {
                id,
                kind: request.kind,
                payload: request.payload,
                status: RequestStatus::Pending,
                submitted_at: table.next_submitted_at(),
                requester_id: request.requester_id,
                started_at: None,
                finished_at: None,
            };
            table.rows.insert(id, row.clone());
            self.persist(&table).await?;
            row
        };

        debug!("store: inserted {} {} from {}", row.id, row.kind.label(), row.requester_id);
        self.notify(StoreChange::Inserted(row.id));
        Ok(row)
    }

    async fn update_status(
        &self,
        id: RequestId,
        status: RequestStatus,
    ) -> StoreResult<MediaRequest> {
        let row = {
            let mut table = self.table.write().await;
            let row = table.rows.get_mut(&id).ok_or(StoreError::NotFound(id))?;
            if !row.status.can_transition_to(&status) {
                return Err(StoreError::invalid_transition(id, &row.status, &status));
            }
            let now = Utc::now();
            match &status {
                RequestStatus::Playing => {
                    row.started_at = Some(now);
                    row.finished_at = None;
                }
                RequestStatus::Pending => row.started_at = None,
                RequestStatus::Completed(_) => row.finished_at = Some(now),
            }
            row.status = status.clone();
            let row = row.clone();
            self.persist(&table).await?;
            row
        };

        debug!("store: {} → {}", id, status.label());
        self.notify(StoreChange::StatusChanged { id, status });
        Ok(row)
    }

    async fn list_pending(&self) -> StoreResult<Vec<MediaRequest>> {
        let table = self.table.read().await;
        Ok(table
            .rows
            .values()
            .filter(|r| r.status.is_pending())
            .cloned()
            .collect())
    }

    async fn get(&self, id: RequestId) -> StoreResult<MediaRequest> {
        let table = self.table.read().await;
        table.rows.get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    async fn list_all(&self) -> StoreResult<Vec<MediaRequest>> {
        let table = self.table.read().await;
        Ok(table.rows.values().rev().cloned().collect())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}

//! Persistence service — whole-state JSON snapshots written off the hot path.
//!
//! DESIGN
//! ======
//! Every room lives in one aggregate JSON object keyed by room id. Handlers
//! never touch the disk: they publish a fresh snapshot to a `watch` channel
//! and move on. A dedicated worker wakes on each new snapshot and writes the
//! newest one it sees, so a burst of saves collapses into a single write and
//! the latest state is never dropped.
//!
//! Storage is behind the `RoomStorage` trait. `JsonFileStorage` writes to a
//! temporary sibling and renames it into place, so a crash mid-write leaves
//! the previous file intact.
//!
//! ERROR HANDLING
//! ==============
//! Persistence is best-effort. Write failures are logged and the in-memory
//! state stays authoritative. A file that cannot be parsed at startup is
//! moved aside to `<file>.corrupted` and the server starts with fresh state.
//! A single bad room record only costs that room.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::services::rooms::{PersistedRooms, RoomStore};
use crate::state::RoomState;

const FLUSH_QUEUE_CAPACITY: usize = 8;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("state serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// STORAGE
// =============================================================================

/// Durable medium for the aggregate room snapshot.
#[async_trait]
pub trait RoomStorage: Send + Sync {
    /// Raw saved bytes, or `None` when nothing has been saved yet.
    async fn read(&self) -> Result<Option<Vec<u8>>, PersistenceError>;

    /// Replace the saved bytes.
    async fn write(&self, bytes: &[u8]) -> Result<(), PersistenceError>;

    /// Move unreadable saved data out of the way.
    async fn quarantine(&self) -> Result<(), PersistenceError>;
}

/// Single JSON file on local disk.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn backup_path(&self) -> PathBuf {
        with_suffix(&self.path, ".corrupted")
    }

    fn tmp_path(&self) -> PathBuf {
        with_suffix(&self.path, ".tmp")
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw = path.as_os_str().to_owned();
    raw.push(suffix);
    PathBuf::from(raw)
}

#[async_trait]
impl RoomStorage for JsonFileStorage {
    async fn read(&self) -> Result<Option<Vec<u8>>, PersistenceError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, bytes: &[u8]) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn quarantine(&self) -> Result<(), PersistenceError> {
        let backup = self.backup_path();
        match tokio::fs::remove_file(&backup).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tokio::fs::rename(&self.path, &backup).await?;
        warn!(path = %self.path.display(), backup = %backup.display(), "saved state moved aside");
        Ok(())
    }
}

// =============================================================================
// LOAD / SAVE
// =============================================================================

/// Rebuild the room store from storage. Never fails: a missing, unreadable
/// or unparseable file yields a fresh store holding only the default room.
/// A room record that does not fit the schema is skipped on its own; the
/// original file is moved aside and the surviving rooms are written back.
pub async fn load_rooms(storage: &dyn RoomStorage) -> RoomStore {
    let bytes = match storage.read().await {
        Ok(Some(bytes)) => bytes,
        Ok(None) => {
            info!("no saved room state; starting fresh");
            return RoomStore::new();
        }
        Err(e) => {
            error!(error = %e, "failed to read saved room state; starting fresh");
            return RoomStore::new();
        }
    };

    if bytes.iter().all(u8::is_ascii_whitespace) {
        info!("saved room state is empty; starting fresh");
        return RoomStore::new();
    }

    let raw = match serde_json::from_slice::<BTreeMap<String, Value>>(&bytes) {
        Ok(raw) => raw,
        Err(e) => {
            error!(error = %e, "saved room state is corrupt; starting fresh");
            if let Err(e) = storage.quarantine().await {
                error!(error = %e, "failed to move corrupt room state aside");
            }
            return RoomStore::new();
        }
    };

    let mut rooms = PersistedRooms::new();
    let mut skipped = 0_usize;
    for (room_id, value) in raw {
        match serde_json::from_value::<RoomState>(value) {
            Ok(room) => {
                rooms.insert(room_id, room);
            }
            Err(e) => {
                warn!(room = %room_id, error = %e, "skipping unreadable saved room");
                skipped += 1;
            }
        }
    }

    // Keep the original for inspection, then write back what survived.
    if skipped > 0 {
        match storage.quarantine().await {
            Ok(()) => {
                if let Err(e) = save_rooms(storage, &rooms).await {
                    error!(error = %e, "failed to rewrite recovered room state");
                }
            }
            Err(e) => error!(error = %e, "failed to move partially corrupt room state aside"),
        }
    }

    info!(rooms = rooms.len(), skipped, "loaded saved room state");
    RoomStore::from_rooms(rooms)
}

/// Serialize and write one snapshot.
///
/// # Errors
///
/// Returns a `PersistenceError` if serialization or the storage write fails.
pub async fn save_rooms(storage: &dyn RoomStorage, rooms: &PersistedRooms) -> Result<(), PersistenceError> {
    let bytes = serde_json::to_vec_pretty(rooms)?;
    storage.write(&bytes).await
}

// =============================================================================
// WORKER
// =============================================================================

type Snapshot = Option<Arc<PersistedRooms>>;

/// Handle to the background writer. Cheap to clone.
#[derive(Clone)]
pub struct Persister {
    snapshots: Arc<watch::Sender<Snapshot>>,
    flushes: mpsc::Sender<oneshot::Sender<()>>,
}

impl Persister {
    /// Publish a snapshot for writing. Never blocks; replaces any snapshot
    /// the worker has not picked up yet.
    pub fn save(&self, rooms: PersistedRooms) {
        self.snapshots.send_replace(Some(Arc::new(rooms)));
    }

    /// Wait until every snapshot published so far has been written.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.flushes.send(ack_tx).await.is_err() {
            warn!("persistence worker stopped; flush skipped");
            return;
        }
        let _ = ack_rx.await;
    }
}

/// Spawn the background writer for `storage`.
#[must_use]
pub fn spawn_persistence_worker(storage: Arc<dyn RoomStorage>) -> (Persister, JoinHandle<()>) {
    let (snapshot_tx, snapshot_rx) = watch::channel::<Snapshot>(None);
    let (flush_tx, flush_rx) = mpsc::channel(FLUSH_QUEUE_CAPACITY);

    let handle = tokio::spawn(run_worker(storage, snapshot_rx, flush_rx));
    info!("persistence worker started");

    (Persister { snapshots: Arc::new(snapshot_tx), flushes: flush_tx }, handle)
}

async fn run_worker(
    storage: Arc<dyn RoomStorage>,
    mut snapshots: watch::Receiver<Snapshot>,
    mut flushes: mpsc::Receiver<oneshot::Sender<()>>,
) {
    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                write_latest(storage.as_ref(), &mut snapshots).await;
            }
            Some(ack) = flushes.recv() => {
                // EDGE: a save may have landed after the last wake-up.
                if snapshots.has_changed().unwrap_or(false) {
                    write_latest(storage.as_ref(), &mut snapshots).await;
                }
                let _ = ack.send(());
            }
        }
    }
    info!("persistence worker stopped");
}

async fn write_latest(storage: &dyn RoomStorage, snapshots: &mut watch::Receiver<Snapshot>) {
    let latest = snapshots.borrow_and_update().clone();
    let Some(rooms) = latest else {
        return;
    };
    match save_rooms(storage, &rooms).await {
        Ok(()) => debug!(rooms = rooms.len(), "room state persisted"),
        Err(e) => error!(error = %e, rooms = rooms.len(), "failed to persist room state"),
    }
}

#[cfg(test)]
#[path = "persistence_test.rs"]
mod tests;

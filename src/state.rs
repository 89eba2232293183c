//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor and
//! cloned into the timer task. It holds a single `RoomRegistry` behind a
//! tokio `RwLock`: the room store, the deleted-room set and the live
//! connections live together so that a handler can mutate a room, snapshot
//! it for persistence and enqueue every resulting delivery under one write
//! guard, without an `.await` in between.
//!
//! Room data is stored in the same camelCase shape the browser client sends,
//! so persisted files and `full_update` payloads need no translation layer.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::Config;
use crate::services::connections::ConnectionRegistry;
use crate::services::persistence::Persister;
use crate::services::rooms::RoomStore;
use crate::services::rps::RpsGame;

/// Room that always exists and can never be deleted.
pub const DEFAULT_ROOM: &str = "default";

/// Countdown length used when none (or a non-positive one) is supplied.
pub const DEFAULT_TOTAL_TIME: f64 = 25.0 * 60.0;

// =============================================================================
// BOARD
// =============================================================================

/// One kanban card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub details: String,
    /// Client-side fields the server stores but does not interpret.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Kanban columns plus the client's id counter and focus pointer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardState {
    #[serde(default)]
    pub todo: Vec<Task>,
    #[serde(default)]
    pub in_progress: Vec<Task>,
    #[serde(default)]
    pub done: Vec<Task>,
    #[serde(default)]
    pub task_id_counter: u64,
    #[serde(default)]
    pub current_task: Option<serde_json::Value>,
}

// =============================================================================
// TIMER
// =============================================================================

/// Server-authoritative countdown. Times are seconds; `end_time` is seconds
/// since the Unix epoch.
///
/// Invariant: a stopped timer has `end_time == None` and `elapsed_time == 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "StoredTimer")]
pub struct TimerState {
    pub is_running: bool,
    pub end_time: Option<f64>,
    pub elapsed_time: f64,
    pub total_time: f64,
}

impl TimerState {
    /// Force the stopped invariant.
    pub fn stop(&mut self) {
        self.is_running = false;
        self.end_time = None;
        self.elapsed_time = 0.0;
    }
}

impl Default for TimerState {
    fn default() -> Self {
        Self { is_running: false, end_time: None, elapsed_time: 0.0, total_time: DEFAULT_TOTAL_TIME }
    }
}

/// On-disk timer, including the `timeLeft`/`lastUpdate` pair written by
/// older servers before `endTime` existed.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredTimer {
    #[serde(default)]
    is_running: bool,
    #[serde(default)]
    end_time: Option<f64>,
    #[serde(default)]
    elapsed_time: Option<f64>,
    #[serde(default)]
    total_time: Option<f64>,
    #[serde(default)]
    time_left: Option<f64>,
    #[serde(default)]
    last_update: Option<f64>,
}

impl From<StoredTimer> for TimerState {
    fn from(stored: StoredTimer) -> Self {
        let total_time = stored
            .total_time
            .filter(|t| t.is_finite() && *t > 0.0)
            .unwrap_or(DEFAULT_TOTAL_TIME);
        let mut timer = Self {
            is_running: stored.is_running,
            end_time: stored.end_time,
            elapsed_time: stored.elapsed_time.filter(|e| e.is_finite() && *e >= 0.0).unwrap_or(0.0),
            total_time,
        };

        if !timer.is_running {
            timer.stop();
        } else if timer.end_time.is_none() {
            if let (Some(left), Some(last)) = (stored.time_left, stored.last_update) {
                timer.end_time = Some(last + left);
            }
        }
        timer
    }
}

// =============================================================================
// WORKFLOW
// =============================================================================

/// A node of the workflow diagram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: String,
    pub name: String,
    pub color: String,
}

/// A directed edge between two workflow nodes, referenced by id. Dangling
/// references are allowed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    #[serde(default)]
    pub states: Vec<WorkflowNode>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
    #[serde(default)]
    pub state_id_counter: u64,
}

impl Default for Workflow {
    fn default() -> Self {
        let node = |id: &str, name: &str, color: &str| WorkflowNode {
            id: id.to_owned(),
            name: name.to_owned(),
            color: color.to_owned(),
        };
        let edge = |from: &str, to: &str| Transition { from: from.to_owned(), to: to.to_owned() };

        Self {
            states: vec![
                node("open", "Open", "#3498db"),
                node("implementing", "Implementing", "#f39c12"),
                node("testing", "Testing", "#9b59b6"),
                node("done", "Done", "#2ecc71"),
            ],
            transitions: vec![
                edge("open", "implementing"),
                edge("implementing", "testing"),
                edge("testing", "done"),
                edge("testing", "implementing"),
                edge("implementing", "open"),
            ],
            state_id_counter: 4,
        }
    }
}

// =============================================================================
// ROOM STATE
// =============================================================================

/// Everything a room shares. Board fields sit at the top level of the
/// persisted record, next to the other sections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomState {
    #[serde(flatten)]
    pub board: BoardState,
    #[serde(default)]
    pub timer: TimerState,
    #[serde(default)]
    pub workflow: Workflow,
    /// Opaque work-item records; replaced wholesale on update.
    #[serde(default)]
    pub work_items: Vec<serde_json::Value>,
    #[serde(default, rename = "rps_game")]
    pub rps: RpsGame,
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Process-wide mutable state: room data plus live connections.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    pub store: RoomStore,
    pub connections: ConnectionRegistry,
}

impl RoomRegistry {
    #[must_use]
    pub fn new(store: RoomStore) -> Self {
        Self { store, connections: ConnectionRegistry::default() }
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum; all inner fields are Arc-wrapped or Clone.
#[derive(Clone)]
pub struct AppState {
    pub rooms: Arc<RwLock<RoomRegistry>>,
    /// Background writer. `None` disables persistence (tests).
    pub persistence: Option<Persister>,
    pub config: Arc<Config>,
}

impl AppState {
    #[must_use]
    pub fn new(store: RoomStore, persistence: Option<Persister>, config: Config) -> Self {
        Self { rooms: Arc::new(RwLock::new(RoomRegistry::new(store))), persistence, config: Arc::new(config) }
    }

    /// Hand a snapshot of every room to the background writer. Never blocks
    /// and never fails; write errors surface in the worker's logs.
    pub fn persist(&self, registry: &RoomRegistry) {
        if let Some(persister) = &self.persistence {
            persister.save(registry.store.snapshot());
        }
    }
}

#[cfg(test)]
#[path = "state_helpers_test.rs"]
pub mod test_helpers;

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;

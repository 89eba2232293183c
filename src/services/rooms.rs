//! Room store — in-memory room state keyed by room id.
//!
//! DESIGN
//! ======
//! Rooms are created lazily on first reference and live until explicitly
//! deleted. Deleted ids are remembered in an exclusion set so the room list
//! stays consistent even if a stale reference lingers elsewhere; referencing
//! a deleted id again revives it with fresh default state.
//!
//! The `default` room is always materialized and can never be deleted.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use tracing::info;

use crate::message::ErrorCode;
use crate::state::{DEFAULT_ROOM, RoomState};

/// Serializable view of every room, ordered by id for stable output.
pub type PersistedRooms = BTreeMap<String, RoomState>;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RoomError {
    #[error("Cannot delete the {0} room")]
    Protected(String),
    #[error("No room specified for deletion")]
    MissingRoom,
}

impl ErrorCode for RoomError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Protected(_) => "E_PROTECTED_ROOM",
            Self::MissingRoom => "E_ROOM_REQUIRED",
        }
    }
}

#[derive(Debug)]
pub struct RoomStore {
    rooms: HashMap<String, RoomState>,
    deleted: HashSet<String>,
}

impl Default for RoomStore {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// CONSTRUCTION
// =============================================================================

impl RoomStore {
    /// Empty store holding only the default room.
    #[must_use]
    pub fn new() -> Self {
        let mut rooms = HashMap::new();
        rooms.insert(DEFAULT_ROOM.to_owned(), RoomState::default());
        Self { rooms, deleted: HashSet::new() }
    }

    /// Rebuild a store from persisted rooms, materializing the default room
    /// if the saved data lacks it.
    #[must_use]
    pub fn from_rooms(saved: PersistedRooms) -> Self {
        let mut store = Self { rooms: saved.into_iter().collect(), deleted: HashSet::new() };
        // Seats named connections of the previous process.
        for room in store.rooms.values_mut() {
            room.rps.reset();
        }
        store.rooms.entry(DEFAULT_ROOM.to_owned()).or_default();
        store
    }
}

// =============================================================================
// ACCESS
// =============================================================================

impl RoomStore {
    /// Existing state for `room_id`, or freshly initialized defaults.
    pub fn get_or_create(&mut self, room_id: &str) -> &mut RoomState {
        if self.deleted.remove(room_id) {
            info!(room = %room_id, "reviving previously deleted room");
        }
        self.rooms.entry(room_id.to_owned()).or_insert_with(|| {
            info!(room = %room_id, "creating new room state");
            RoomState::default()
        })
    }

    #[must_use]
    pub fn get(&self, room_id: &str) -> Option<&RoomState> {
        self.rooms.get(room_id)
    }

    pub fn get_mut(&mut self, room_id: &str) -> Option<&mut RoomState> {
        self.rooms.get_mut(room_id)
    }

    #[must_use]
    pub fn contains(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// Materialized rooms, including the default room.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    #[must_use]
    pub fn is_deleted(&self, room_id: &str) -> bool {
        self.deleted.contains(room_id)
    }

    /// Mutable iteration over live rooms, used by the timer engine.
    pub fn rooms_mut(&mut self) -> impl Iterator<Item = (&String, &mut RoomState)> {
        let deleted = &self.deleted;
        self.rooms
            .iter_mut()
            .filter(move |(id, _)| !deleted.contains(id.as_str()))
    }

    /// Ids of every live room, unordered.
    #[must_use]
    pub fn list_ids(&self) -> Vec<String> {
        self.rooms
            .keys()
            .filter(|id| !self.deleted.contains(id.as_str()))
            .cloned()
            .collect()
    }

    /// Externally visible room list: live ids plus `default`, sorted.
    #[must_use]
    pub fn room_list(&self) -> Vec<String> {
        let mut ids: BTreeSet<String> = self.list_ids().into_iter().collect();
        ids.insert(DEFAULT_ROOM.to_owned());
        ids.into_iter().collect()
    }

    /// Clone every live room for the persistence worker.
    #[must_use]
    pub fn snapshot(&self) -> PersistedRooms {
        self.rooms
            .iter()
            .filter(|(id, _)| !self.deleted.contains(id.as_str()))
            .map(|(id, room)| (id.clone(), room.clone()))
            .collect()
    }
}

// =============================================================================
// DELETION
// =============================================================================

impl RoomStore {
    /// Remove a room's state and hide its id from the room list. The target
    /// is cleaned like a connection's room id; the cleaned id is returned.
    /// Only ids that held state are remembered as deleted.
    ///
    /// # Errors
    ///
    /// Returns `RoomError::Protected` for the default room and
    /// `RoomError::MissingRoom` when nothing of the id survives cleaning.
    pub fn delete(&mut self, room_id: &str) -> Result<String, RoomError> {
        let room_id = clean_room_id(room_id);
        if room_id.is_empty() {
            return Err(RoomError::MissingRoom);
        }
        if room_id == DEFAULT_ROOM {
            return Err(RoomError::Protected(DEFAULT_ROOM.to_owned()));
        }
        if self.rooms.remove(&room_id).is_some() {
            self.deleted.insert(room_id.clone());
            info!(room = %room_id, "room deleted");
        } else {
            info!(room = %room_id, "delete requested for unknown room");
        }
        Ok(room_id)
    }
}

// =============================================================================
// ROOM IDS
// =============================================================================

/// Reduce a client-supplied room id to `[A-Za-z0-9_-]`, falling back to the
/// default room when nothing survives.
#[must_use]
pub fn sanitize_room_id(raw: Option<&str>) -> String {
    let cleaned = clean_room_id(raw.unwrap_or_default());
    if cleaned.is_empty() { DEFAULT_ROOM.to_owned() } else { cleaned }
}

fn clean_room_id(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

#[cfg(test)]
#[path = "rooms_test.rs"]
mod tests;

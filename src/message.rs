//! Message — the JSON envelope exchanged with browser clients.
//!
//! ARCHITECTURE
//! ============
//! Every WebSocket text frame is one JSON object with a `type` tag. Board,
//! timer and workflow messages carry their payload under `data`; the RPS
//! choice and room deletion carry theirs as top-level fields. Outbound
//! messages follow the same convention so the client switches on `type`.
//!
//! DESIGN
//! ======
//! - Parsing is two-step: the tag is read first, so an unknown type is told
//!   apart from a malformed payload of a known one.
//! - Partial updates are typed structs with all-optional fields. A present
//!   key means "replace this field wholesale"; an absent key means "keep".

use serde::{Deserialize, Serialize};

use crate::services::board::{BoardPatch, WorkflowPatch};
use crate::services::rps::RpsEvent;
use crate::services::timer::TimerPatch;
use crate::state::{BoardState, RoomState, TimerState, Workflow};

/// Inbound `type` tags the dispatcher understands.
pub const INBOUND_TYPES: &[&str] = &[
    "update",
    "timer",
    "workflow_update",
    "get_workflow_data",
    "get_rooms",
    "delete_room_request",
    "rps_join",
    "rps_choice",
    "rps_reset",
];

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code attached to client-facing error messages.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;
}

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("invalid json: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("message has no type")]
    MissingType,
    #[error("unknown message type: {0}")]
    UnknownType(String),
    #[error("invalid {kind} payload: {source}")]
    InvalidPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

// =============================================================================
// INBOUND
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    Update {
        #[serde(default)]
        data: BoardPatch,
    },
    Timer {
        #[serde(default)]
        data: TimerPatch,
    },
    WorkflowUpdate {
        #[serde(default)]
        data: WorkflowPatch,
    },
    GetWorkflowData,
    GetRooms,
    DeleteRoomRequest {
        #[serde(default)]
        room: Option<String>,
    },
    RpsJoin,
    RpsChoice {
        #[serde(default)]
        choice: Option<String>,
    },
    RpsReset,
}

impl Inbound {
    /// Parse one text frame.
    ///
    /// # Errors
    ///
    /// Returns a `MessageError` describing why the frame was unusable.
    pub fn parse(text: &str) -> Result<Self, MessageError> {
        let value: serde_json::Value = serde_json::from_str(text).map_err(MessageError::InvalidJson)?;
        let Some(kind) = value.get("type").and_then(serde_json::Value::as_str) else {
            return Err(MessageError::MissingType);
        };
        if !INBOUND_TYPES.contains(&kind) {
            return Err(MessageError::UnknownType(kind.to_owned()));
        }
        let kind = kind.to_owned();
        serde_json::from_value(value).map_err(|source| MessageError::InvalidPayload { kind, source })
    }

    /// The wire tag, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Update { .. } => "update",
            Self::Timer { .. } => "timer",
            Self::WorkflowUpdate { .. } => "workflow_update",
            Self::GetWorkflowData => "get_workflow_data",
            Self::GetRooms => "get_rooms",
            Self::DeleteRoomRequest { .. } => "delete_room_request",
            Self::RpsJoin => "rps_join",
            Self::RpsChoice { .. } => "rps_choice",
            Self::RpsReset => "rps_reset",
        }
    }
}

// =============================================================================
// OUTBOUND
// =============================================================================

/// Snapshot sent once to every new connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FullState {
    pub board: BoardState,
    pub timer: TimerState,
    pub current_task: Option<serde_json::Value>,
    pub workflow: Workflow,
    pub work_items: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowData {
    pub workflow: Workflow,
    pub work_items: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    FullUpdate { data: FullState },
    Update { data: BoardState },
    Timer { data: TimerState },
    WorkflowUpdate { data: WorkflowData },
    Rooms { rooms: Vec<String> },
    RoomDeleted { room: String },
    RoomDeletionFailed { room: String, message: String, code: String },
    Error { message: String, code: String },
    RpsUpdate { data: RpsEvent },
}

impl Outbound {
    #[must_use]
    pub fn full_update(room: &RoomState) -> Self {
        Self::FullUpdate {
            data: FullState {
                board: room.board.clone(),
                timer: room.timer.clone(),
                current_task: room.board.current_task.clone(),
                workflow: room.workflow.clone(),
                work_items: room.work_items.clone(),
            },
        }
    }

    #[must_use]
    pub fn board(board: &BoardState) -> Self {
        Self::Update { data: board.clone() }
    }

    #[must_use]
    pub fn timer(timer: &TimerState) -> Self {
        Self::Timer { data: timer.clone() }
    }

    #[must_use]
    pub fn workflow(room: &RoomState) -> Self {
        Self::WorkflowUpdate {
            data: WorkflowData { workflow: room.workflow.clone(), work_items: room.work_items.clone() },
        }
    }

    #[must_use]
    pub fn rps(event: RpsEvent) -> Self {
        Self::RpsUpdate { data: event }
    }

    /// Generic error reply from a typed error.
    #[must_use]
    pub fn error_from(err: &(impl ErrorCode + ?Sized)) -> Self {
        Self::Error { message: err.to_string(), code: err.error_code().to_owned() }
    }

    #[must_use]
    pub fn room_deletion_failed(room: &str, err: &(impl ErrorCode + ?Sized)) -> Self {
        Self::RoomDeletionFailed {
            room: room.to_owned(),
            message: err.to_string(),
            code: err.error_code().to_owned(),
        }
    }

    /// The wire tag, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FullUpdate { .. } => "full_update",
            Self::Update { .. } => "update",
            Self::Timer { .. } => "timer",
            Self::WorkflowUpdate { .. } => "workflow_update",
            Self::Rooms { .. } => "rooms",
            Self::RoomDeleted { .. } => "room_deleted",
            Self::RoomDeletionFailed { .. } => "room_deletion_failed",
            Self::Error { .. } => "error",
            Self::RpsUpdate { .. } => "rps_update",
        }
    }
}

#[cfg(test)]
#[path = "message_test.rs"]
mod tests;

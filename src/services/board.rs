//! Board and workflow updates — typed partial updates with wholesale merge.
//!
//! DESIGN
//! ======
//! The client always sends the complete value of whatever it touched: a
//! whole column, the whole workflow graph, the whole work-item list. Each
//! present field therefore overwrites the stored field outright; there is
//! no per-task merge. Overlapping updates from different clients resolve
//! last-write-wins in arrival order.

use serde::{Deserialize, Deserializer};

use crate::state::{BoardState, RoomState, Task, Workflow};

// =============================================================================
// PATCHES
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardPatch {
    pub todo: Option<Vec<Task>>,
    pub in_progress: Option<Vec<Task>>,
    pub done: Option<Vec<Task>>,
    pub task_id_counter: Option<u64>,
    /// `Some(None)` clears the pointer; `None` leaves it untouched.
    #[serde(default, deserialize_with = "present")]
    pub current_task: Option<Option<serde_json::Value>>,
}

impl BoardPatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.todo.is_none()
            && self.in_progress.is_none()
            && self.done.is_none()
            && self.task_id_counter.is_none()
            && self.current_task.is_none()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowPatch {
    pub workflow: Option<Workflow>,
    pub work_items: Option<Vec<serde_json::Value>>,
}

impl WorkflowPatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workflow.is_none() && self.work_items.is_none()
    }
}

/// Distinguish an explicit `null` from an absent key.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

// =============================================================================
// MERGE
// =============================================================================

/// Overwrite every board field present in the patch.
pub fn apply_board(board: &mut BoardState, patch: BoardPatch) {
    if let Some(todo) = patch.todo {
        board.todo = todo;
    }
    if let Some(in_progress) = patch.in_progress {
        board.in_progress = in_progress;
    }
    if let Some(done) = patch.done {
        board.done = done;
    }
    if let Some(counter) = patch.task_id_counter {
        board.task_id_counter = counter;
    }
    if let Some(current_task) = patch.current_task {
        board.current_task = current_task;
    }
}

/// Overwrite the workflow graph and/or the work-item list.
pub fn apply_workflow(room: &mut RoomState, patch: WorkflowPatch) {
    if let Some(workflow) = patch.workflow {
        room.workflow = workflow;
    }
    if let Some(work_items) = patch.work_items {
        room.work_items = work_items;
    }
}

#[cfg(test)]
#[path = "board_test.rs"]
mod tests;

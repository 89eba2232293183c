//! Domain services used by the websocket route and the timer engine.
//!
//! ARCHITECTURE
//! ============
//! Service modules own room state transitions, delivery and persistence so
//! the websocket handler can stay focused on protocol translation.

pub mod board;
pub mod connections;
pub mod persistence;
pub mod rooms;
pub mod rps;
pub mod timer;

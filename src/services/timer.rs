//! Timer engine — server-driven countdown per room.
//!
//! DESIGN
//! ======
//! Transitions are pure functions over `TimerState` and an explicit `now`,
//! so they test without a clock. A single perpetual task ticks every room
//! that has live connections, broadcasts running timers, and persists once
//! per tick if any room changed state.
//!
//! ```text
//! Stopped --start(totalTime)--> Running --tick(left > 0)--> Running
//! Running --tick(left <= 0)--> Stopped        Stopped --stop--> Stopped
//! ```
//!
//! ERROR HANDLING
//! ==============
//! Invalid override values are rejected and reported back to the caller for
//! logging; the prior value is kept. A panic inside a tick is caught and
//! logged, and the loop carries on: it is the only thing keeping timers alive.

use std::panic::AssertUnwindSafe;
use std::time::{SystemTime, UNIX_EPOCH};

use futures::FutureExt;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::message::Outbound;
use crate::state::{AppState, DEFAULT_TOTAL_TIME, TimerState};

// =============================================================================
// TYPES
// =============================================================================

/// Inbound `timer` payload. Every field is optional.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerPatch {
    pub is_running: Option<bool>,
    pub total_time: Option<f64>,
    pub end_time: Option<f64>,
    pub elapsed_time: Option<f64>,
}

impl TimerPatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.is_running.is_none()
            && self.total_time.is_none()
            && self.end_time.is_none()
            && self.elapsed_time.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TimerError {
    #[error("invalid endTime {0}: must be positive")]
    InvalidEndTime(f64),
    #[error("invalid elapsedTime {0}: must be non-negative")]
    InvalidElapsedTime(f64),
    #[error("{0} ignored while the timer is stopped")]
    Stopped(&'static str),
}

/// Result of applying a client update.
#[derive(Debug, Default, PartialEq)]
pub struct TimerUpdate {
    /// Whether stored state was touched and should be persisted.
    pub changed: bool,
    /// Fields that were refused, oldest first.
    pub rejected: Vec<TimerError>,
}

/// What one tick did to one timer.
#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    /// Not running; nothing to do.
    Idle,
    /// Still counting down; `elapsed_time` refreshed.
    Running,
    /// Running without a usable `end_time`; restarted from `total_time`.
    Recovered,
    /// Reached zero and stopped. `final_state` is the last running view.
    Completed { final_state: TimerState },
}

// =============================================================================
// TRANSITIONS
// =============================================================================

/// Current wall-clock time in seconds since the Unix epoch.
#[must_use]
pub fn now_secs() -> f64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0.0;
    };
    dur.as_secs_f64()
}

fn valid_total(total: Option<f64>) -> f64 {
    total
        .filter(|t| t.is_finite() && *t > 0.0)
        .unwrap_or(DEFAULT_TOTAL_TIME)
}

/// Apply a client update. `isRunning` is handled first (start or stop), then
/// the `endTime` and `elapsedTime` overrides.
pub fn apply_update(timer: &mut TimerState, patch: &TimerPatch, now: f64) -> TimerUpdate {
    let mut update = TimerUpdate::default();

    if let Some(running) = patch.is_running {
        if running {
            timer.total_time = valid_total(patch.total_time);
            timer.is_running = true;
            timer.end_time = Some(now + timer.total_time);
            timer.elapsed_time = 0.0;
        } else {
            timer.stop();
        }
        update.changed = true;
    }

    if let Some(end_time) = patch.end_time {
        if !timer.is_running {
            update.rejected.push(TimerError::Stopped("endTime"));
        } else if end_time.is_finite() && end_time > 0.0 {
            timer.end_time = Some(end_time);
            update.changed = true;
        } else {
            update.rejected.push(TimerError::InvalidEndTime(end_time));
        }
    }

    if let Some(elapsed) = patch.elapsed_time {
        if !(elapsed.is_finite() && elapsed >= 0.0) {
            update.rejected.push(TimerError::InvalidElapsedTime(elapsed));
        } else if !timer.is_running {
            // EDGE: stop messages routinely carry elapsedTime 0; only a
            // non-zero value would break the stopped invariant.
            if elapsed > 0.0 {
                update.rejected.push(TimerError::Stopped("elapsedTime"));
            }
        } else {
            timer.elapsed_time = elapsed;
            update.changed = true;
        }
    }

    update
}

/// Advance one timer to `now`.
pub fn tick(timer: &mut TimerState, now: f64) -> Tick {
    if !timer.is_running {
        return Tick::Idle;
    }

    timer.total_time = valid_total(Some(timer.total_time));

    let end_time = match timer.end_time {
        Some(end) if end.is_finite() && end > 0.0 => end,
        _ => {
            timer.end_time = Some(now + timer.total_time);
            timer.elapsed_time = 0.0;
            return Tick::Recovered;
        }
    };

    let time_left = (end_time - now).max(0.0);
    timer.elapsed_time = timer.total_time - time_left;

    if time_left <= 0.0 {
        let final_state = timer.clone();
        timer.stop();
        return Tick::Completed { final_state };
    }
    Tick::Running
}

// =============================================================================
// ENGINE
// =============================================================================

/// Spawn the perpetual timer loop. Returns a handle for shutdown.
pub fn spawn_timer_task(state: AppState) -> JoinHandle<()> {
    spawn_timer_task_with_clock(state, now_secs)
}

/// Timer loop reading `now` from `clock` on every tick. A panic anywhere in
/// the tick, the clock included, is logged and the next tick runs normally.
pub fn spawn_timer_task_with_clock<C>(state: AppState, clock: C) -> JoinHandle<()>
where
    C: Fn() -> f64 + Send + Sync + 'static,
{
    let period = state.config.tick_interval;
    info!(tick_ms = period.as_millis(), "timer engine started");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let result = AssertUnwindSafe(async { tick_rooms(&state, clock()).await })
                .catch_unwind()
                .await;
            if result.is_err() {
                error!("timer tick panicked; continuing with next tick");
            }
        }
    })
}

/// Run one tick over every connected, non-deleted room. Returns the number
/// of rooms whose state changed (recovered or completed).
pub async fn tick_rooms(state: &AppState, now: f64) -> usize {
    let mut guard = state.rooms.write().await;
    let registry = &mut *guard;
    let mut changed = 0;

    for (room_id, room) in registry.store.rooms_mut() {
        if !registry.connections.has_connections(room_id) {
            continue;
        }

        match tick(&mut room.timer, now) {
            Tick::Idle => {}
            Tick::Running => {
                registry
                    .connections
                    .broadcast(room_id, &Outbound::timer(&room.timer), None);
            }
            Tick::Recovered => {
                warn!(room = %room_id, total_time = room.timer.total_time, "running timer had no end time; restarted");
                registry
                    .connections
                    .broadcast(room_id, &Outbound::timer(&room.timer), None);
                changed += 1;
            }
            Tick::Completed { final_state } => {
                info!(room = %room_id, "timer completed");
                // Time's up, then stopped: clients see both transitions.
                registry
                    .connections
                    .broadcast(room_id, &Outbound::timer(&final_state), None);
                registry
                    .connections
                    .broadcast(room_id, &Outbound::timer(&room.timer), None);
                changed += 1;
            }
        }
    }

    if changed > 0 {
        state.persist(registry);
    }
    changed
}

#[cfg(test)]
#[path = "timer_test.rs"]
mod tests;

use super::*;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::config::Config;
use crate::services::connections::Delivery;
use crate::services::rooms::RoomStore;
use crate::state::test_helpers;
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};

const T0: f64 = 1_700_000_000.0;

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

fn start(total: f64) -> TimerPatch {
    TimerPatch { is_running: Some(true), total_time: Some(total), ..TimerPatch::default() }
}

fn stop() -> TimerPatch {
    TimerPatch { is_running: Some(false), ..TimerPatch::default() }
}

fn drain_timers(rx: &mut mpsc::Receiver<Delivery>) -> Vec<TimerState> {
    let mut timers = Vec::new();
    while let Ok(delivery) = rx.try_recv() {
        if let Delivery::Message(Outbound::Timer { data }) = delivery {
            timers.push(data);
        }
    }
    timers
}

// =============================================================================
// apply_update
// =============================================================================

#[test]
fn start_sets_end_time_from_total() {
    let mut timer = TimerState::default();
    let update = apply_update(&mut timer, &start(300.0), T0);

    assert!(update.changed);
    assert!(update.rejected.is_empty());
    assert!(timer.is_running);
    assert_eq!(timer.end_time, Some(T0 + 300.0));
    assert!(approx(timer.elapsed_time, 0.0));
    assert!(approx(timer.total_time, 300.0));
}

#[test]
fn start_without_or_with_bad_total_uses_default() {
    let mut timer = TimerState { total_time: 60.0, ..TimerState::default() };
    apply_update(&mut timer, &TimerPatch { is_running: Some(true), ..TimerPatch::default() }, T0);
    assert!(approx(timer.total_time, DEFAULT_TOTAL_TIME));

    let mut timer = TimerState::default();
    apply_update(&mut timer, &start(-5.0), T0);
    assert!(approx(timer.total_time, DEFAULT_TOTAL_TIME));
    assert_eq!(timer.end_time, Some(T0 + DEFAULT_TOTAL_TIME));
}

#[test]
fn stop_resets_to_stopped_invariant() {
    let mut timer = TimerState::default();
    apply_update(&mut timer, &start(300.0), T0);
    timer.elapsed_time = 42.0;

    let update = apply_update(&mut timer, &stop(), T0 + 42.0);

    assert!(update.changed);
    assert!(!timer.is_running);
    assert_eq!(timer.end_time, None);
    assert!(approx(timer.elapsed_time, 0.0));
}

#[test]
fn stop_on_stopped_timer_is_noop_state() {
    let mut timer = TimerState::default();
    apply_update(&mut timer, &stop(), T0);
    assert_eq!(timer, TimerState::default());
}

#[test]
fn valid_overrides_apply_while_running() {
    let mut timer = TimerState::default();
    let patch = TimerPatch {
        is_running: Some(true),
        total_time: Some(600.0),
        end_time: Some(T0 + 590.0),
        elapsed_time: Some(10.0),
    };

    let update = apply_update(&mut timer, &patch, T0);

    assert!(update.rejected.is_empty());
    assert_eq!(timer.end_time, Some(T0 + 590.0));
    assert!(approx(timer.elapsed_time, 10.0));
}

#[test]
fn invalid_overrides_are_rejected_and_prior_values_kept() {
    let mut timer = TimerState::default();
    apply_update(&mut timer, &start(300.0), T0);
    let before = timer.clone();

    let patch = TimerPatch { end_time: Some(0.0), elapsed_time: Some(-1.0), ..TimerPatch::default() };
    let update = apply_update(&mut timer, &patch, T0 + 1.0);

    assert!(!update.changed);
    assert_eq!(
        update.rejected,
        vec![TimerError::InvalidEndTime(0.0), TimerError::InvalidElapsedTime(-1.0)]
    );
    assert_eq!(timer, before);
}

#[test]
fn overrides_on_stopped_timer_are_rejected() {
    let mut timer = TimerState::default();
    let patch = TimerPatch { end_time: Some(T0 + 5.0), elapsed_time: Some(3.0), ..TimerPatch::default() };

    let update = apply_update(&mut timer, &patch, T0);

    assert_eq!(
        update.rejected,
        vec![TimerError::Stopped("endTime"), TimerError::Stopped("elapsedTime")]
    );
    assert_eq!(timer, TimerState::default());
}

#[test]
fn stop_message_with_zero_elapsed_is_clean() {
    let mut timer = TimerState::default();
    apply_update(&mut timer, &start(300.0), T0);
    let patch = TimerPatch { is_running: Some(false), elapsed_time: Some(0.0), ..TimerPatch::default() };

    let update = apply_update(&mut timer, &patch, T0 + 1.0);

    assert!(update.rejected.is_empty());
    assert!(!timer.is_running);
}

// =============================================================================
// tick
// =============================================================================

#[test]
fn tick_on_stopped_timer_is_idle() {
    let mut timer = TimerState::default();
    assert_eq!(tick(&mut timer, T0), Tick::Idle);
}

#[test]
fn tick_derives_elapsed_from_end_time() {
    let mut timer = TimerState::default();
    apply_update(&mut timer, &start(10.0), T0);

    assert_eq!(tick(&mut timer, T0 + 4.0), Tick::Running);
    assert!(approx(timer.elapsed_time, 4.0));
}

#[test]
fn tick_recovers_missing_end_time() {
    let mut timer = TimerState { is_running: true, end_time: None, elapsed_time: 77.0, total_time: 120.0 };

    assert_eq!(tick(&mut timer, T0), Tick::Recovered);
    assert_eq!(timer.end_time, Some(T0 + 120.0));
    assert!(approx(timer.elapsed_time, 0.0));

    let mut timer = TimerState { is_running: true, end_time: Some(-3.0), elapsed_time: 0.0, total_time: 120.0 };
    assert_eq!(tick(&mut timer, T0), Tick::Recovered);
}

#[test]
fn completion_happens_exactly_once() {
    let mut timer = TimerState::default();
    apply_update(&mut timer, &start(5.0), T0);

    let mut completions = 0;
    for second in 1..=8 {
        if let Tick::Completed { final_state } = tick(&mut timer, T0 + f64::from(second)) {
            completions += 1;
            assert!(final_state.is_running);
            assert!(approx(final_state.elapsed_time, 5.0));
        }
    }

    assert_eq!(completions, 1);
    assert!(!timer.is_running);
    assert_eq!(timer.end_time, None);
    assert!(approx(timer.elapsed_time, 0.0));
}

// =============================================================================
// tick_rooms
// =============================================================================

#[tokio::test]
async fn tick_rooms_completes_after_total_and_broadcasts_stop() {
    let state = test_helpers::test_app_state();
    let (_a, mut rx_a) = test_helpers::register_client(&state, "focus").await;
    let (_b, mut rx_b) = test_helpers::register_client(&state, "focus").await;
    {
        let mut guard = state.rooms.write().await;
        let room = guard.store.get_or_create("focus");
        apply_update(&mut room.timer, &start(5.0), T0);
    }

    for second in 1..=5 {
        tick_rooms(&state, T0 + f64::from(second)).await;
    }

    for rx in [&mut rx_a, &mut rx_b] {
        let timers = drain_timers(rx);
        // Four running ticks, then time's up and stopped.
        assert_eq!(timers.len(), 6);
        let last = timers.last().unwrap();
        assert!(!last.is_running);
        assert_eq!(last.end_time, None);
        assert!(timers[4].is_running);
    }

    // Further ticks broadcast nothing.
    assert_eq!(tick_rooms(&state, T0 + 6.0).await, 0);
    assert!(drain_timers(&mut rx_a).is_empty());
}

#[tokio::test]
async fn tick_rooms_skips_rooms_without_connections() {
    let state = test_helpers::test_app_state();
    {
        let mut guard = state.rooms.write().await;
        let room = guard.store.get_or_create("empty");
        apply_update(&mut room.timer, &start(5.0), T0);
    }

    assert_eq!(tick_rooms(&state, T0 + 10.0).await, 0);

    let guard = state.rooms.read().await;
    assert!(guard.store.get("empty").unwrap().timer.is_running);
}

#[tokio::test]
async fn tick_rooms_persists_once_when_state_changes() {
    let (state, storage, persister) = test_helpers::test_app_state_with_storage();
    let (_a, _rx_a) = test_helpers::register_client(&state, "one").await;
    let (_b, _rx_b) = test_helpers::register_client(&state, "two").await;
    {
        let mut guard = state.rooms.write().await;
        for id in ["one", "two"] {
            let room = guard.store.get_or_create(id);
            apply_update(&mut room.timer, &start(1.0), T0);
        }
    }
    persister.flush().await;
    let writes_before = storage.writes();

    assert_eq!(tick_rooms(&state, T0 + 1.0).await, 2);
    persister.flush().await;

    assert_eq!(storage.writes(), writes_before + 1);
    let saved = storage.last_rooms().expect("snapshot written");
    assert!(!saved["one"].timer.is_running);
    assert!(!saved["two"].timer.is_running);
}

// =============================================================================
// spawn_timer_task
// =============================================================================

fn fast_ticking_state() -> AppState {
    let config = Config { tick_interval: Duration::from_millis(10), ..Config::default() };
    AppState::new(RoomStore::new(), None, config)
}

/// Clock that advances one second per reading, panicking on the first
/// `panics` readings.
fn stepping_clock(panics: u32) -> impl Fn() -> f64 + Send + Sync + 'static {
    let readings = AtomicU32::new(0);
    move || {
        let n = readings.fetch_add(1, Ordering::SeqCst);
        assert!(n >= panics, "clock unavailable");
        T0 + f64::from(n - panics + 1)
    }
}

async fn wait_for_stopped_timer(rx: &mut mpsc::Receiver<Delivery>) -> Vec<TimerState> {
    let mut seen = Vec::new();
    loop {
        let Outbound::Timer { data } = test_helpers::recv_message(rx).await else {
            continue;
        };
        let stopped = !data.is_running;
        seen.push(data);
        if stopped {
            return seen;
        }
    }
}

async fn start_room_timer(state: &AppState, room: &str, total: f64) {
    let mut guard = state.rooms.write().await;
    apply_update(&mut guard.store.get_or_create(room).timer, &start(total), T0);
}

#[tokio::test]
async fn timer_task_runs_countdown_without_client_messages() {
    let state = fast_ticking_state();
    let (_a, mut rx) = test_helpers::register_client(&state, "focus").await;
    start_room_timer(&state, "focus", 5.0).await;

    let handle = spawn_timer_task_with_clock(state.clone(), stepping_clock(0));
    let timers = timeout(Duration::from_secs(2), wait_for_stopped_timer(&mut rx))
        .await
        .expect("timer should stop on its own");
    handle.abort();

    assert!(timers.len() >= 2);
    assert!(timers[timers.len() - 2].is_running);
    assert_eq!(timers.last().unwrap().end_time, None);
    let guard = state.rooms.read().await;
    assert!(!guard.store.get("focus").unwrap().timer.is_running);
}

#[tokio::test]
async fn timer_task_survives_panicking_ticks() {
    let state = fast_ticking_state();
    let (_a, mut rx) = test_helpers::register_client(&state, "focus").await;
    start_room_timer(&state, "focus", 3.0).await;

    let handle = spawn_timer_task_with_clock(state.clone(), stepping_clock(3));
    let timers = timeout(Duration::from_secs(2), wait_for_stopped_timer(&mut rx))
        .await
        .expect("timer loop should recover from panics");

    assert!(!handle.is_finished());
    handle.abort();
    assert!(!timers.last().unwrap().is_running);
}

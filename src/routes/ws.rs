//! WebSocket handler — room membership, message dispatch and fan-out.
//!
//! DESIGN
//! ======
//! On upgrade, generates a client ID, joins the requested room and enters a
//! `select!` loop:
//! - Incoming client text frames → parse + dispatch by `type`
//! - Deliveries queued by peers, the timer engine or room deletion → forward
//!
//! Handlers mutate one room and describe the fan-out as an `Outcome`; they
//! never touch a socket. Dispatch persists dirty state first, then returns
//! sender replies and enqueues peer deliveries. All of it happens under one
//! registry write guard, so no other handler or timer tick can observe a
//! half-applied update.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → `full_update` to the new client, `rooms` to everyone
//! 2. Client sends messages → dispatch → handler returns Outcome
//! 3. Dispatch persists if dirty, then applies Outcome
//! 4. Close → release any RPS seat → `rooms` to everyone

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::message::{Inbound, MessageError, Outbound};
use crate::services::board::{self, BoardPatch, WorkflowPatch};
use crate::services::connections::{ClientTx, Delivery, close_with_notice, deliver};
use crate::services::rooms::{RoomError, RoomStore, sanitize_room_id};
use crate::services::rps::{RpsError, RpsEvent};
use crate::services::timer::{self, TimerPatch};
use crate::state::{AppState, DEFAULT_ROOM, RoomRegistry, RoomState};

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions. The dispatch layer uses this to
/// decide who receives what; handlers never send messages directly.
#[derive(Debug)]
enum Outcome {
    /// Send to every connection in the room, sender included.
    Broadcast(Outbound),
    /// Send to room peers EXCLUDING sender. No reply to sender.
    BroadcastExcludeSender(Outbound),
    /// Send to sender only.
    Reply(Outbound),
    /// Route each message to one named connection of the room.
    Deliver(Vec<(Uuid, Outbound)>),
    /// A room was deleted: notify and close its members, tell everyone else.
    RoomDeleted(String),
    /// Nothing to send.
    Done,
}

#[derive(Debug)]
struct Handled {
    outcome: Outcome,
    /// Room state changed and must be persisted before anything is sent.
    dirty: bool,
}

impl Handled {
    fn changed(outcome: Outcome) -> Self {
        Self { outcome, dirty: true }
    }

    fn unchanged(outcome: Outcome) -> Self {
        Self { outcome, dirty: false }
    }
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let room = sanitize_room_id(params.get("room").map(String::as_str));
    ws.on_upgrade(move |socket| run_ws(socket, state, room))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, room: String) {
    let client_id = Uuid::new_v4();

    // Per-connection queue for everything not sent as a direct reply.
    let (client_tx, mut client_rx) = mpsc::channel::<Delivery>(state.config.client_queue_capacity);
    connect_client(&state, &room, client_id, client_tx).await;

    'conn: loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let replies = process_inbound_text(&state, &room, client_id, text.as_str()).await;
                        for reply in &replies {
                            if send_message(&mut socket, reply).await.is_err() {
                                break 'conn;
                            }
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            delivery = client_rx.recv() => {
                match delivery {
                    Some(Delivery::Message(message)) => {
                        if send_message(&mut socket, &message).await.is_err() {
                            break;
                        }
                    }
                    Some(Delivery::Close) => {
                        let _ = socket.send(Message::Close(None)).await;
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    disconnect_client(&state, &room, client_id).await;
}

/// Join `room`: queue its snapshot for the client, register the connection
/// and announce the new room list to everyone.
async fn connect_client(state: &AppState, room: &str, client_id: Uuid, client_tx: ClientTx) {
    let mut guard = state.rooms.write().await;
    let registry = &mut *guard;

    let revived = registry.store.is_deleted(room);
    let created = revived || !registry.store.contains(room);
    let snapshot = Outbound::full_update(registry.store.get_or_create(room));
    deliver(&client_tx, Delivery::Message(snapshot));
    registry.connections.register(room, client_id, client_tx);

    if created {
        state.persist(registry);
    }
    registry.connections.broadcast_all(&rooms_message(&registry.store));

    info!(%room, %client_id, revived, connections = registry.connections.count(room), "ws: client connected");
}

/// Leave `room`. A departing RPS player resets the game for the room.
async fn disconnect_client(state: &AppState, room: &str, client_id: Uuid) {
    let mut guard = state.rooms.write().await;
    let registry = &mut *guard;

    if !registry.connections.unregister(room, client_id) {
        // Already removed by a room deletion, which announced the list.
        info!(%room, %client_id, "ws: client disconnected after room deletion");
        return;
    }

    let released = registry
        .store
        .get_mut(room)
        .is_some_and(|r| r.rps.release(client_id));
    if released {
        info!(%room, %client_id, "rps: seated player left; game reset");
        state.persist(registry);
        registry
            .connections
            .broadcast(room, &Outbound::rps(RpsEvent::Reset {}), None);
    }
    registry.connections.broadcast_all(&rooms_message(&registry.store));

    info!(%room, %client_id, connections = registry.connections.count(room), "ws: client disconnected");
}

fn rooms_message(store: &RoomStore) -> Outbound {
    Outbound::Rooms { rooms: store.room_list() }
}

// =============================================================================
// MESSAGE DISPATCH
// =============================================================================

/// Parse and process one inbound text frame and return messages for the
/// sender.
///
/// This keeps the websocket transport concerns separate from message
/// handling, so tests can drive dispatch with plain channels.
async fn process_inbound_text(state: &AppState, room: &str, client_id: Uuid, text: &str) -> Vec<Outbound> {
    let inbound = match Inbound::parse(text) {
        Ok(inbound) => inbound,
        Err(MessageError::UnknownType(kind)) => {
            warn!(%room, %client_id, %kind, "ws: unknown message type ignored");
            return Vec::new();
        }
        Err(e) => {
            warn!(%room, %client_id, error = %e, "ws: malformed message dropped");
            return Vec::new();
        }
    };
    debug!(%room, %client_id, kind = inbound.kind(), "ws: recv message");

    let mut guard = state.rooms.write().await;
    let registry = &mut *guard;

    // EDGE: the room may have been deleted while this message was in flight.
    if !registry.connections.contains(room, client_id) {
        debug!(%room, %client_id, "ws: message from unregistered connection dropped");
        return Vec::new();
    }

    let result = match inbound {
        Inbound::Update { data } => Ok(handle_update(registry.store.get_or_create(room), data)),
        Inbound::Timer { data } => Ok(handle_timer(registry.store.get_or_create(room), room, &data)),
        Inbound::WorkflowUpdate { data } => Ok(handle_workflow_update(registry.store.get_or_create(room), data)),
        Inbound::GetWorkflowData => Ok(Handled::unchanged(
            registry
                .store
                .get(room)
                .map_or(Outcome::Done, |r| Outcome::Reply(Outbound::workflow(r))),
        )),
        Inbound::GetRooms => Ok(Handled::unchanged(Outcome::Reply(rooms_message(&registry.store)))),
        Inbound::DeleteRoomRequest { room: target } => handle_delete_room(&mut registry.store, target),
        Inbound::RpsJoin => handle_rps_join(registry.store.get_or_create(room), room, client_id),
        Inbound::RpsChoice { choice } => handle_rps_choice(registry.store.get_or_create(room), room, client_id, choice),
        Inbound::RpsReset => {
            registry.store.get_or_create(room).rps.reset();
            info!(%room, %client_id, "rps: game reset");
            Ok(Handled::changed(Outcome::Broadcast(Outbound::rps(RpsEvent::Reset {}))))
        }
    };

    match result {
        Ok(Handled { outcome, dirty }) => {
            if dirty {
                state.persist(registry);
            }
            apply_outcome(registry, room, client_id, outcome)
        }
        Err(reply) => vec![reply],
    }
}

fn apply_outcome(registry: &mut RoomRegistry, room: &str, client_id: Uuid, outcome: Outcome) -> Vec<Outbound> {
    match outcome {
        Outcome::Broadcast(message) => {
            registry.connections.broadcast(room, &message, Some(client_id));
            vec![message]
        }
        Outcome::BroadcastExcludeSender(message) => {
            registry.connections.broadcast(room, &message, Some(client_id));
            Vec::new()
        }
        Outcome::Reply(message) => vec![message],
        Outcome::Deliver(messages) => {
            let mut replies = Vec::new();
            for (target, message) in messages {
                if target == client_id {
                    replies.push(message);
                } else {
                    registry.connections.send_to(room, target, message);
                }
            }
            replies
        }
        Outcome::RoomDeleted(deleted) => {
            let notice = Outbound::RoomDeleted { room: deleted.clone() };
            for tx in registry.connections.remove_room(&deleted) {
                close_with_notice(tx, notice.clone());
            }
            registry.connections.broadcast_all(&notice);
            registry.connections.broadcast_all(&rooms_message(&registry.store));
            Vec::new()
        }
        Outcome::Done => Vec::new(),
    }
}

// =============================================================================
// ROOM STATE HANDLERS
// =============================================================================

fn handle_update(room: &mut RoomState, patch: BoardPatch) -> Handled {
    if patch.is_empty() {
        return Handled::unchanged(Outcome::Done);
    }
    board::apply_board(&mut room.board, patch);
    Handled::changed(Outcome::BroadcastExcludeSender(Outbound::board(&room.board)))
}

fn handle_workflow_update(room: &mut RoomState, patch: WorkflowPatch) -> Handled {
    if patch.is_empty() {
        return Handled::unchanged(Outcome::Done);
    }
    board::apply_workflow(room, patch);
    Handled::changed(Outcome::BroadcastExcludeSender(Outbound::workflow(room)))
}

fn handle_timer(room: &mut RoomState, room_id: &str, patch: &TimerPatch) -> Handled {
    if patch.is_empty() {
        return Handled::unchanged(Outcome::Done);
    }

    let update = timer::apply_update(&mut room.timer, patch, timer::now_secs());
    for rejected in &update.rejected {
        warn!(room = %room_id, error = %rejected, "timer: field rejected");
    }
    match patch.is_running {
        Some(true) => info!(room = %room_id, total_time = room.timer.total_time, "timer: started"),
        Some(false) => info!(room = %room_id, "timer: stopped"),
        None => {}
    }

    // The sender sees the server's view too, including any clamped values.
    let outcome = Outcome::Broadcast(Outbound::timer(&room.timer));
    if update.changed { Handled::changed(outcome) } else { Handled::unchanged(outcome) }
}

fn handle_delete_room(store: &mut RoomStore, target: Option<String>) -> Result<Handled, Outbound> {
    match store.delete(target.as_deref().unwrap_or_default()) {
        Ok(deleted) => Ok(Handled::changed(Outcome::RoomDeleted(deleted))),
        Err(e @ RoomError::MissingRoom) => {
            warn!(error = %e, "rooms: delete rejected");
            Err(Outbound::error_from(&e))
        }
        Err(e @ RoomError::Protected(_)) => {
            warn!(room = DEFAULT_ROOM, error = %e, "rooms: delete rejected");
            Err(Outbound::room_deletion_failed(DEFAULT_ROOM, &e))
        }
    }
}

// =============================================================================
// RPS HANDLERS
// =============================================================================

fn rps_deliveries(events: Vec<(Uuid, RpsEvent)>) -> Handled {
    if events.is_empty() {
        return Handled::unchanged(Outcome::Done);
    }
    let messages = events
        .into_iter()
        .map(|(target, event)| (target, Outbound::rps(event)))
        .collect();
    Handled::changed(Outcome::Deliver(messages))
}

fn handle_rps_join(room: &mut RoomState, room_id: &str, client_id: Uuid) -> Result<Handled, Outbound> {
    match room.rps.join(client_id) {
        Ok(events) => {
            info!(
                room = %room_id,
                %client_id,
                slot = ?room.rps.slot_of(client_id),
                active = room.rps.is_active(),
                "rps: player joined"
            );
            Ok(rps_deliveries(events))
        }
        Err(e) => {
            warn!(room = %room_id, %client_id, error = %e, "rps: join rejected");
            Err(Outbound::rps(RpsEvent::error(&e)))
        }
    }
}

fn handle_rps_choice(
    room: &mut RoomState,
    room_id: &str,
    client_id: Uuid,
    choice: Option<String>,
) -> Result<Handled, Outbound> {
    let Some(choice) = choice else {
        warn!(room = %room_id, %client_id, "rps: choice message without a choice dropped");
        return Ok(Handled::unchanged(Outcome::Done));
    };

    match room.rps.choose(client_id, &choice) {
        Ok(events) => Ok(rps_deliveries(events)),
        Err(RpsError::NotSeated) => {
            debug!(room = %room_id, %client_id, "rps: choice from unseated connection dropped");
            Ok(Handled::unchanged(Outcome::Done))
        }
        Err(e @ RpsError::NotActive) => {
            warn!(room = %room_id, %client_id, error = %e, "rps: choice dropped");
            Ok(Handled::unchanged(Outcome::Done))
        }
        Err(e) => {
            warn!(room = %room_id, %client_id, error = %e, "rps: choice rejected");
            Err(Outbound::rps(RpsEvent::error(&e)))
        }
    }
}

// =============================================================================
// SEND
// =============================================================================

async fn send_message(socket: &mut WebSocket, message: &Outbound) -> Result<(), ()> {
    let json = match serde_json::to_string(message) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, kind = message.kind(), "ws: failed to serialize message");
            return Err(());
        }
    };
    debug!(kind = message.kind(), "ws: send message");
    socket.send(Message::Text(json.into())).await.map_err(|e| {
        debug!(error = %e, "ws: send failed");
    })
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;

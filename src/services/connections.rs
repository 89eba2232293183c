//! Connection registry and broadcast router.
//!
//! DESIGN
//! ======
//! Each live WebSocket is identified by a `client_id` assigned at accept time
//! and owns a bounded mpsc queue drained by its connection task. The
//! registry maps room id -> client id -> queue sender.
//!
//! Delivery is best-effort: `try_send` never waits, so a slow or dead peer
//! cannot stall a broadcast to the rest of the room. A failed delivery is
//! logged and skipped; it does not unregister the peer. Only the connection
//! lifecycle (disconnect, room deletion) removes entries.
//!
//! The exception is the final notice sent to a member of a deleted room,
//! which waits (briefly, off the caller's task) for queue space.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::message::Outbound;

const FINAL_DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Item placed on a connection's outbound queue.
#[derive(Debug, Clone)]
pub enum Delivery {
    /// Serialize and send as a text frame.
    Message(Outbound),
    /// Close the socket from the server side.
    Close,
}

pub type ClientTx = mpsc::Sender<Delivery>;

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    rooms: HashMap<String, HashMap<Uuid, ClientTx>>,
}

// =============================================================================
// MEMBERSHIP
// =============================================================================

impl ConnectionRegistry {
    /// Add a connection to a room. Re-registering replaces the sender.
    pub fn register(&mut self, room_id: &str, client_id: Uuid, tx: ClientTx) {
        self.rooms
            .entry(room_id.to_owned())
            .or_default()
            .insert(client_id, tx);
    }

    /// Remove a connection. Returns whether it was registered.
    pub fn unregister(&mut self, room_id: &str, client_id: Uuid) -> bool {
        let Some(members) = self.rooms.get_mut(room_id) else {
            return false;
        };
        let removed = members.remove(&client_id).is_some();
        if members.is_empty() {
            self.rooms.remove(room_id);
        }
        removed
    }

    /// Drop every connection of a room, returning their senders so the caller
    /// can notify and close them.
    pub fn remove_room(&mut self, room_id: &str) -> Vec<ClientTx> {
        self.rooms
            .remove(room_id)
            .map(|members| members.into_values().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn contains(&self, room_id: &str, client_id: Uuid) -> bool {
        self.rooms
            .get(room_id)
            .is_some_and(|members| members.contains_key(&client_id))
    }

    #[must_use]
    pub fn count(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map_or(0, HashMap::len)
    }

    #[must_use]
    pub fn has_connections(&self, room_id: &str) -> bool {
        self.count(room_id) > 0
    }
}

// =============================================================================
// BROADCAST
// =============================================================================

impl ConnectionRegistry {
    /// Send to every connection in a room, optionally excluding one.
    /// Returns the number of successful deliveries.
    pub fn broadcast(&self, room_id: &str, message: &Outbound, exclude: Option<Uuid>) -> usize {
        let Some(members) = self.rooms.get(room_id) else {
            return 0;
        };

        let mut delivered = 0;
        for (client_id, tx) in members {
            if exclude == Some(*client_id) {
                continue;
            }
            if deliver(tx, Delivery::Message(message.clone())) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Send to every connection in every room.
    pub fn broadcast_all(&self, message: &Outbound) -> usize {
        self.rooms
            .keys()
            .map(|room_id| self.broadcast(room_id, message, None))
            .sum()
    }

    /// Send to one connection of a room.
    pub fn send_to(&self, room_id: &str, client_id: Uuid, message: Outbound) -> bool {
        let Some(tx) = self.rooms.get(room_id).and_then(|m| m.get(&client_id)) else {
            debug!(room = %room_id, %client_id, "send_to: connection not registered");
            return false;
        };
        deliver(tx, Delivery::Message(message))
    }
}

/// Non-blocking enqueue. Full or closed queues are logged and swallowed.
pub fn deliver(tx: &ClientTx, delivery: Delivery) -> bool {
    match tx.try_send(delivery) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            debug!("client queue full; dropping delivery");
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!("client queue closed; dropping delivery");
            false
        }
    }
}

/// Queue a last message followed by `Close`. When the queue is full the
/// remainder is handed to a task that waits for room, bounded by
/// `FINAL_DELIVERY_TIMEOUT`, so the peer still learns why it was closed.
pub fn close_with_notice(tx: ClientTx, notice: Outbound) {
    match tx.try_send(Delivery::Message(notice)) {
        Ok(()) => {}
        Err(TrySendError::Full(pending)) => {
            tokio::spawn(finish_close(tx, Some(pending)));
            return;
        }
        Err(TrySendError::Closed(_)) => return,
    }
    if let Err(TrySendError::Full(_)) = tx.try_send(Delivery::Close) {
        tokio::spawn(finish_close(tx, None));
    }
}

async fn finish_close(tx: ClientTx, pending: Option<Delivery>) {
    for delivery in pending.into_iter().chain(std::iter::once(Delivery::Close)) {
        match tokio::time::timeout(FINAL_DELIVERY_TIMEOUT, tx.send(delivery)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return,
            Err(_) => {
                warn!("client queue stayed full; closing without notice");
                return;
            }
        }
    }
}

#[cfg(test)]
#[path = "connections_test.rs"]
mod tests;

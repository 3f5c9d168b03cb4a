//! Per-recipient room registry for WebSocket fan-out.
//!
//! A room groups the live connections of one recipient. Each WebSocket
//! connection runs its own task and hands the registry an unbounded sender
//! for its outbound frames; the registry is the only shared structure.
//!
//! Delivery is best-effort and at-most-once: a push to an empty room is
//! dropped, and a send into a closed connection is ignored (the connection's
//! own task removes it on disconnect). The client's polling fallback is the
//! durability backstop.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use relay_core::{Notification, ServerMessage};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Identifier of a live WebSocket connection.
pub type ConnId = Uuid;

/// Outbound frame sender owned by a connection task.
pub type PushSender = mpsc::UnboundedSender<ServerMessage>;

#[derive(Default)]
struct Registry {
    /// room key (recipient) → member connections
    rooms: HashMap<String, HashMap<ConnId, PushSender>>,
    /// reverse index: connection → room it joined
    membership: HashMap<ConnId, String>,
}

/// Shared, concurrency-safe room registry.
///
/// Cheap to clone; all clones share the same rooms. Mutations happen only in
/// response to join/disconnect events and each takes the write lock for the
/// duration of one map update.
#[derive(Clone, Default)]
pub struct RoomRegistry {
    inner: Arc<RwLock<Registry>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `conn` to the recipient's room. A connection is a member of at
    /// most one room; joining again moves it.
    pub fn join(&self, conn: ConnId, recipient: &str, sender: PushSender) {
        let mut registry = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = registry.membership.insert(conn, recipient.to_string()) {
            if previous != recipient {
                if let Some(members) = registry.rooms.get_mut(&previous) {
                    members.remove(&conn);
                    if members.is_empty() {
                        registry.rooms.remove(&previous);
                    }
                }
            }
        }
        registry
            .rooms
            .entry(recipient.to_string())
            .or_default()
            .insert(conn, sender);
    }

    /// Remove `conn` from its room, if any. No further delivery to it.
    pub fn remove(&self, conn: ConnId) {
        let mut registry = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(room) = registry.membership.remove(&conn) {
            if let Some(members) = registry.rooms.get_mut(&room) {
                members.remove(&conn);
                if members.is_empty() {
                    registry.rooms.remove(&room);
                }
            }
        }
    }

    /// Deliver `notification` to every live member of the recipient's room.
    ///
    /// Returns the number of connections the frame was handed to. Zero
    /// members means the event is dropped — no queuing, no retry.
    pub fn push_to_room(&self, recipient: &str, notification: &Notification) -> usize {
        let registry = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let Some(members) = registry.rooms.get(recipient) else {
            tracing::debug!(recipient = %recipient, "push to empty room dropped");
            return 0;
        };
        let mut delivered = 0;
        for (conn, sender) in members {
            let frame = ServerMessage::Notification {
                payload: notification.clone(),
            };
            if sender.send(frame).is_ok() {
                delivered += 1;
            } else {
                // Closed connection; its task cleans up on disconnect.
                tracing::debug!(conn_id = %conn, "push to closed connection ignored");
            }
        }
        delivered
    }

    /// Number of live connections across all rooms.
    pub fn connection_count(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .membership
            .len()
    }

    /// Number of non-empty rooms.
    pub fn room_count(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .rooms
            .len()
    }

    /// Number of members currently in the recipient's room.
    pub fn room_size(&self, recipient: &str) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .rooms
            .get(recipient)
            .map(|members| members.len())
            .unwrap_or(0)
    }
}

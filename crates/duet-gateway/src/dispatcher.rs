use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

use duet_types::ConversationId;
use duet_types::events::GatewayEvent;

/// Routes gateway events to the connections joined to a conversation room.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<RwLock<DispatcherState>>,
}

#[derive(Default)]
struct DispatcherState {
    /// conn_id -> connection
    connections: HashMap<Uuid, ConnectionEntry>,

    /// room -> joined conn_ids
    rooms: HashMap<ConversationId, HashSet<Uuid>>,
}

struct ConnectionEntry {
    tx: mpsc::UnboundedSender<GatewayEvent>,
    room: Option<ConversationId>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Returns (conn_id, receiver of its events).
    pub async fn register(&self) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .write()
            .await
            .connections
            .insert(conn_id, ConnectionEntry { tx, room: None });
        (conn_id, rx)
    }

    /// Drop a connection and take it out of its room.
    pub async fn unregister(&self, conn_id: Uuid) {
        let mut state = self.inner.write().await;
        if let Some(entry) = state.connections.remove(&conn_id) {
            if let Some(room) = entry.room {
                state.remove_member(&room, conn_id);
            }
        }
    }

    /// Put a connection in `room`, leaving whatever room it was in.
    /// Returns the room it left, if any.
    pub async fn join_room(&self, conn_id: Uuid, room: ConversationId) -> Option<ConversationId> {
        let mut state = self.inner.write().await;
        let Some(entry) = state.connections.get_mut(&conn_id) else {
            return None;
        };
        let previous = entry.room.replace(room.clone());

        if let Some(prev) = &previous {
            if *prev != room {
                state.remove_member(prev, conn_id);
            }
        }
        state.rooms.entry(room).or_default().insert(conn_id);
        previous
    }

    /// Take a connection out of its room. Returns the room it left.
    pub async fn leave_room(&self, conn_id: Uuid) -> Option<ConversationId> {
        let mut state = self.inner.write().await;
        let room = state.connections.get_mut(&conn_id)?.room.take()?;
        state.remove_member(&room, conn_id);
        Some(room)
    }

    /// Deliver `event` to every member of `room` except `except`.
    /// Returns how many connections it was handed to.
    pub async fn publish(
        &self,
        room: &ConversationId,
        event: GatewayEvent,
        except: Option<Uuid>,
    ) -> usize {
        let state = self.inner.read().await;
        let Some(members) = state.rooms.get(room) else {
            debug!("No one joined to {}, event not relayed", room);
            return 0;
        };

        let mut delivered = 0;
        for conn_id in members.iter().filter(|id| Some(**id) != except) {
            if let Some(entry) = state.connections.get(conn_id) {
                if entry.tx.send(event.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Send an event to one connection only.
    pub async fn send_to(&self, conn_id: Uuid, event: GatewayEvent) {
        if let Some(entry) = self.inner.read().await.connections.get(&conn_id) {
            let _ = entry.tx.send(event);
        }
    }

    /// Number of connections currently joined to `room`.
    pub async fn room_size(&self, room: &ConversationId) -> usize {
        self.inner
            .read()
            .await
            .rooms
            .get(room)
            .map_or(0, HashSet::len)
    }
}

impl DispatcherState {
    fn remove_member(&mut self, room: &ConversationId, conn_id: Uuid) {
        if let Some(members) = self.rooms.get_mut(room) {
            members.remove(&conn_id);
            if members.is_empty() {
                self.rooms.remove(room);
            }
        }
    }
}

use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::dto::sse::ServerEvent;

/// Per-session broadcast groups shared by WebSocket and SSE subscribers.
pub struct RoomHub {
    rooms: DashMap<Uuid, Room>,
    capacity: usize,
}

/// Simple broadcast room wrapper.
pub struct Room {
    sender: broadcast::Sender<ServerEvent>,
}

impl Room {
    /// Construct a new room backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a new subscriber that will receive subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }

    /// Send an event to all current subscribers, ignoring delivery errors.
    pub fn broadcast(&self, event: ServerEvent) {
        let _ = self.sender.send(event);
    }
}

impl RoomHub {
    /// Build an empty hub; every room gets `capacity` buffered events.
    pub fn new(capacity: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Join the room of a session, creating it on first use.
    pub fn subscribe(&self, session_id: Uuid) -> broadcast::Receiver<ServerEvent> {
        self.rooms
            .entry(session_id)
            .or_insert_with(|| Room::new(self.capacity))
            .subscribe()
    }

    /// Fan an event out to the members of a session's room.
    ///
    /// Does nothing when nobody ever joined the room.
    pub fn broadcast(&self, session_id: Uuid, event: ServerEvent) {
        if let Some(room) = self.rooms.get(&session_id) {
            room.broadcast(event);
        }
    }

    /// Number of live subscribers in a session's room.
    pub fn member_count(&self, session_id: Uuid) -> usize {
        self.rooms
            .get(&session_id)
            .map(|room| room.sender.receiver_count())
            .unwrap_or(0)
    }

    /// Drop the room; subscribers drain buffered events then see the channel close.
    pub fn close(&self, session_id: Uuid) {
        self.rooms.remove(&session_id);
    }

    /// Drop the room once its last subscriber left.
    pub fn prune_idle(&self, session_id: Uuid) {
        self.rooms
            .remove_if(&session_id, |_, room| room.sender.receiver_count() == 0);
    }

    /// Number of open rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

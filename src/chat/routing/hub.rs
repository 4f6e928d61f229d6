//! Room membership and fan-out for live connections.

use std::collections::HashSet;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use crate::chat::core::ids::ConnectionId;
use crate::chat::routing::events::ServerEvent;
use crate::chat::routing::rooms::Room;

/// Outbound queue of one connection.
pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

/// Room-scoped outbound notifications.
///
/// Delivery is fire-and-forget: nothing waits for recipients.
pub trait Broadcaster: Send + Sync {
    /// Send `event` to every current member of `room`.
    fn broadcast(&self, room: &Room, event: &ServerEvent);
}

/// In-process room registry backed by per-connection channels.
#[derive(Default)]
pub struct RoomHub {
    connections: DashMap<ConnectionId, EventSender>,
    rooms: DashMap<Room, HashSet<ConnectionId>>,
    memberships: DashMap<ConnectionId, HashSet<Room>>,
}

impl RoomHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection's outbound queue.
    pub fn register(&self, connection_id: ConnectionId, sender: EventSender) {
        self.connections.insert(connection_id, sender);
        self.memberships.entry(connection_id).or_default();
    }

    /// Drop a connection and all of its memberships.
    pub fn unregister(&self, connection_id: ConnectionId) {
        self.connections.remove(&connection_id);
        let Some((_, rooms)) = self.memberships.remove(&connection_id) else {
            return;
        };
        for room in rooms {
            if let Some(mut members) = self.rooms.get_mut(&room) {
                members.remove(&connection_id);
            }
            self.rooms.remove_if(&room, |_, members| members.is_empty());
        }
    }

    /// Add a registered connection to a room. Unknown connections are ignored.
    ///
    /// The membership entry stays locked until the room set is updated, so a
    /// concurrent [`RoomHub::unregister`] sees both or neither.
    pub fn join(&self, connection_id: ConnectionId, room: Room) {
        let Some(mut rooms) = self.memberships.get_mut(&connection_id) else {
            debug!(connection = %connection_id, %room, "Join for unregistered connection ignored");
            return;
        };
        self.rooms.entry(room.clone()).or_default().insert(connection_id);
        rooms.insert(room);
    }

    /// Whether a connection is in a room.
    #[must_use]
    pub fn is_member(&self, connection_id: ConnectionId, room: &Room) -> bool {
        self.rooms
            .get(room)
            .is_some_and(|members| members.contains(&connection_id))
    }

    /// Number of connections in a room.
    #[must_use]
    pub fn member_count(&self, room: &Room) -> usize {
        self.rooms.get(room).map_or(0, |members| members.len())
    }

    /// Send an event to a single connection.
    pub fn send_to(&self, connection_id: ConnectionId, event: ServerEvent) {
        if let Some(sender) = self.connections.get(&connection_id)
            && sender.send(event).is_err()
        {
            debug!(connection = %connection_id, "Outbound queue closed");
        }
    }

    /// Broadcast to a room, skipping the originating connection.
    pub fn broadcast_from(&self, origin: ConnectionId, room: &Room, event: &ServerEvent) {
        self.fan_out(room, event, Some(origin));
    }

    fn fan_out(&self, room: &Room, event: &ServerEvent, skip: Option<ConnectionId>) {
        let members: Vec<ConnectionId> = self
            .rooms
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default();

        let mut delivered = 0usize;
        for member in members {
            if Some(member) == skip {
                continue;
            }
            if let Some(sender) = self.connections.get(&member)
                && sender.send(event.clone()).is_ok()
            {
                delivered += 1;
            }
        }
        debug!(%room, event = event.name(), delivered, "Broadcast");
    }
}

impl Broadcaster for RoomHub {
    fn broadcast(&self, room: &Room, event: &ServerEvent) {
        self.fan_out(room, event, None);
    }
}

// Room Bus - broadcast fan-out with ephemeral membership.
//
// One tokio broadcast channel per room, created on first join and dropped
// with the last member. Membership is tied to a client connection: the
// transport layer calls `join`/`leave` per subscription and `disconnect`
// when the connection dies. Publishing to a room nobody joined is a no-op.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use tokio::sync::broadcast;
use tracing::{debug, trace};

use lineup_core::port::{Event, EventPublisher, Room};

/// Identifier of one client connection (socket id, session id, ...)
pub type SubscriberId = String;

const DEFAULT_ROOM_CAPACITY: usize = 256;

struct RoomChannel {
    sender: broadcast::Sender<Event>,
    members: HashSet<SubscriberId>,
}

/// Publish/subscribe hub for queue, token, and organisation rooms
pub struct RoomBus {
    rooms: RwLock<HashMap<Room, RoomChannel>>,
    capacity: usize,
}

impl Default for RoomBus {
    fn default() -> Self {
        Self::new(DEFAULT_ROOM_CAPACITY)
    }
}

impl RoomBus {
    /// `capacity` bounds the per-room backlog; slow subscribers that fall
    /// further behind see a Lagged error and refetch (at-least-once).
    pub fn new(capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Join a room, creating it on first use. The returned receiver only
    /// sees events published after the join.
    pub fn join(&self, room: &Room, subscriber_id: &str) -> broadcast::Receiver<Event> {
        let mut rooms = self.rooms.write().unwrap();
        let channel = rooms.entry(room.clone()).or_insert_with(|| RoomChannel {
            sender: broadcast::channel(self.capacity).0,
            members: HashSet::new(),
        });
        channel.members.insert(subscriber_id.to_string());
        debug!(room = %room, subscriber_id, "Subscriber joined room");
        channel.sender.subscribe()
    }

    /// Leave a room; the room itself is dropped with its last member.
    /// Receivers held by the subscriber lapse once the sender goes.
    pub fn leave(&self, room: &Room, subscriber_id: &str) {
        let mut rooms = self.rooms.write().unwrap();
        if let Some(channel) = rooms.get_mut(room) {
            channel.members.remove(subscriber_id);
            debug!(room = %room, subscriber_id, "Subscriber left room");
            if channel.members.is_empty() {
                rooms.remove(room);
            }
        }
    }

    /// Drop every membership of a connection; called on disconnect
    pub fn disconnect(&self, subscriber_id: &str) {
        let mut rooms = self.rooms.write().unwrap();
        rooms.retain(|room, channel| {
            if channel.members.remove(subscriber_id) {
                trace!(room = %room, subscriber_id, "Membership cleaned up on disconnect");
            }
            !channel.members.is_empty()
        });
    }

    /// Current member count of a room
    pub fn member_count(&self, room: &Room) -> usize {
        self.rooms
            .read()
            .unwrap()
            .get(room)
            .map(|c| c.members.len())
            .unwrap_or(0)
    }

    /// Number of live rooms
    pub fn room_count(&self) -> usize {
        self.rooms.read().unwrap().len()
    }
}

impl EventPublisher for RoomBus {
    fn publish(&self, event: Event) {
        let rooms = self.rooms.read().unwrap();
        if let Some(channel) = rooms.get(&event.room) {
            // A send error just means every receiver is gone; the
            // transition that produced the event must never notice.
            let _ = channel.sender.send(event);
        }
    }
}

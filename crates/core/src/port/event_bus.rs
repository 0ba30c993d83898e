// Event Sink Port (Interface)
// Real-time fan-out to queue/token/organisation rooms. Delivery is
// best-effort and at-least-once; subscribers treat events as hints to
// refetch, never as the sole source of truth.

use serde::Serialize;

use crate::domain::{OrganisationId, QueueId, TokenId};

/// Logical subscription channel. Canonical string forms:
/// `queue:<id>`, `token:<id>`, `org:<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    Queue(QueueId),
    Token(TokenId),
    Organisation(OrganisationId),
}

impl std::fmt::Display for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Room::Queue(id) => write!(f, "queue:{}", id),
            Room::Token(id) => write!(f, "token:{}", id),
            Room::Organisation(id) => write!(f, "org:{}", id),
        }
    }
}

impl Serialize for Room {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Lifecycle and queue-state event categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    TokenAdded,
    TokenCalled,
    TokenUpdate,
    QueueUpdate,
    OrgUpdate,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::TokenAdded => "token-added",
            EventKind::TokenCalled => "token-called",
            EventKind::TokenUpdate => "token-update",
            EventKind::QueueUpdate => "queue-update",
            EventKind::OrgUpdate => "org-update",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One published event
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub room: Room,
    pub kind: EventKind,
    pub payload: serde_json::Value,
    pub emitted_at: i64,
}

/// Publisher side of the event bus. Infallible by contract: a disconnected
/// subscriber must never fail the state transition that emitted the event.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: Event);
}

/// Publisher that drops every event (tests, headless deployments)
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
    fn publish(&self, _event: Event) {}
}

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    /// Test double collecting every published event
    #[derive(Default)]
    pub struct RecordingPublisher {
        pub events: Mutex<Vec<Event>>,
    }

    impl RecordingPublisher {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn count_of(&self, kind: EventKind) -> usize {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.kind == kind)
                .count()
        }

        pub fn for_room(&self, room: &Room) -> Vec<Event> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| &e.room == room)
                .cloned()
                .collect()
        }
    }

    impl EventPublisher for RecordingPublisher {
        fn publish(&self, event: Event) {
            self.events.lock().unwrap().push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_canonical_form() {
        assert_eq!(Room::Queue("q1".into()).to_string(), "queue:q1");
        assert_eq!(Room::Token("t1".into()).to_string(), "token:t1");
        assert_eq!(Room::Organisation("o1".into()).to_string(), "org:o1");
    }

    #[test]
    fn test_event_kind_wire_names() {
        assert_eq!(EventKind::TokenAdded.as_str(), "token-added");
        assert_eq!(EventKind::QueueUpdate.as_str(), "queue-update");
    }
}

// Lineup Infrastructure - Realtime Adapter
// Implements: EventPublisher (room-scoped broadcast fan-out)

mod room_bus;

pub use room_bus::{RoomBus, SubscriberId};

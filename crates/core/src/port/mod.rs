// Port Layer - Interfaces for external dependencies

pub mod event_bus;
pub mod id_provider; // For deterministic testing
pub mod notifier;
pub mod queue_repository;
pub mod time_provider;
pub mod token_repository;

// Re-exports
pub use event_bus::{Event, EventKind, EventPublisher, NoopPublisher, Room};
pub use id_provider::IdProvider;
pub use notifier::{Notification, NotificationKind, Notifier};
pub use queue_repository::QueueRepository;
pub use time_provider::TimeProvider;
pub use token_repository::{TokenRepository, TokenTransaction, TransactionalTokenRepository};

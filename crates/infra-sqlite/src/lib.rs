// Lineup Infrastructure - SQLite Adapter
// Implements: TokenRepository, TransactionalTokenRepository,
// QueueRepository, Notifier

mod connection;
mod migration;
mod notifier;
mod queue_repository;
mod token_repository;
mod transaction;

pub use connection::create_pool;
pub use migration::run_migrations;
pub use notifier::SqliteNotifier;
pub use queue_repository::SqliteQueueRepository;
pub use token_repository::SqliteTokenRepository;
pub use transaction::SqliteTokenTransaction;

// Note: sqlx::Error conversion is wrapped in helper functions because
// Rust's orphan rules prevent implementing From<sqlx::Error> for AppError
// here.

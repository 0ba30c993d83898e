// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid token transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Token not found: {0}")]
    TokenNotFound(String),

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Queue is not accepting tokens: {0}")]
    QueueInactive(String),

    #[error("Queue {queue_id} reached its daily cap of {max_tokens} tokens")]
    QueueFull { queue_id: String, max_tokens: i64 },

    #[error("No pending token in queue: {0}")]
    QueueEmpty(String),

    #[error("Token {0} was concurrently modified by another actor")]
    Conflict(String),

    #[error("Actor is not allowed to act on token: {0}")]
    Forbidden(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;

// Domain Layer - entities and domain errors

pub mod error;
pub mod queue;
pub mod token;

pub use error::DomainError;
pub use queue::{OrganisationId, Queue};
pub use token::{Actor, IssuerRef, Priority, QueueId, Token, TokenId, TokenStatus, UserId};

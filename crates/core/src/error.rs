// Central Error Type for the Application

use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// True when the error is a lost conditional update: another actor got
    /// to the token first and the operation is already handled.
    pub fn is_conflict(&self) -> bool {
        matches!(self, AppError::Domain(crate::domain::DomainError::Conflict(_)))
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

// From implementation for infra crates (sqlx::Error conversion happens in
// infra-sqlite, which cannot implement From on a foreign type here)
impl From<String> for AppError {
    fn from(err: String) -> Self {
        AppError::Database(err)
    }
}

use thiserror::Error;

use crate::validation::ValidationError;

#[derive(Error, Debug)]
pub enum PropdeskError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Integration error: {0}")]
    Integration(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl From<ValidationError> for PropdeskError {
    fn from(err: ValidationError) -> Self {
        PropdeskError::Validation(err.to_string())
    }
}

impl PropdeskError {
    pub fn not_found(what: &str, id: impl std::fmt::Display) -> Self {
        PropdeskError::NotFound(format!("{} {} not found", what, id))
    }
}

pub type Result<T> = std::result::Result<T, PropdeskError>;

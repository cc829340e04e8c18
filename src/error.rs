//! Error types for the slot swap service

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SwapError>;

#[derive(Error, Debug)]
pub enum SwapError {
    #[error("Authentication required: {0}")]
    Unauthenticated(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid swap: {0}")]
    InvalidSwap(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("User already exists: {0}")]
    UserExists(String),

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Password hashing error: {0}")]
    Password(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SwapError {
    /// Whether the error is caused by the caller rather than the server.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            SwapError::TransactionFailed(_)
                | SwapError::Database(_)
                | SwapError::Password(_)
                | SwapError::Other(_)
        )
    }
}

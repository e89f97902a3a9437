//! Jot error types

use thiserror::Error;

/// Jot error type
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credential invalid or unrefreshable
    #[error("Auth error: {0}")]
    Auth(String),

    /// A remote collaborator (mail, model, destination) call failed
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    /// Enrichment response did not carry the expected payload
    #[error("Payload parse error: {0}")]
    PayloadParse(String),

    /// Local state file unreadable, corrupt or unwritable
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Run was cancelled
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Error for a non-success HTTP status from a collaborator.
    ///
    /// A rejected credential (401/403) is an auth failure; anything else is
    /// a transient collaborator failure.
    pub fn from_status(request: &str, status: reqwest::StatusCode, body: &str) -> Self {
        let message = format!("{} returned {}: {}", request, status, body);
        match status {
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                Error::Auth(message)
            }
            _ => Error::Collaborator(message),
        }
    }

    /// Whether this error must abort the run instead of skipping one record.
    ///
    /// Transient collaborator failures and malformed payloads are absorbed
    /// at the stage boundary; credential, state-store and wiring failures
    /// are not.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Auth(_) | Error::Persistence(_) | Error::Config(_) | Error::Internal(_)
        )
    }
}

/// Result type alias for Jot operations
pub type Result<T> = std::result::Result<T, Error>;

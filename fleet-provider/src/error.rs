//! Error types for provider operations.

use thiserror::Error;

/// Errors surfaced by provisioning, registry and probe backends.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Instance not found: {0}")]
    NotFound(String),

    #[error("Instance already exists: {0}")]
    AlreadyExists(String),

    #[error("Instance {name} cannot {action} while {state}")]
    InvalidState {
        name: String,
        action: &'static str,
        state: String,
    },

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// True for failures that are worth retrying on the next poll.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Http(_))
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;

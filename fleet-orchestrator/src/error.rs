use fleet_provider::ProviderError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Instance not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Claim of {name} failed while trying to {stage}: {source}")]
    ClaimFailed {
        name: String,
        stage: &'static str,
        #[source]
        source: ProviderError,
    },

    #[error("Policy document error: {0}")]
    Policy(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Watcher {0} is no longer running")]
    WatcherStopped(&'static str),
}

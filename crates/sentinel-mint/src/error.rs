//! Error types for sentinel-mint.

use crate::orchestrator::MintState;
use crate::service::ServiceError;
use sentinel_catalog::{AchievementKey, AssetId, CatalogError};
use thiserror::Error;

/// Result type for sentinel-mint operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers of the engine.
///
/// Transient fetch failures inside a poll loop and convergence timeouts are
/// not errors; they are absorbed into [`crate::MintOutcome`].
#[derive(Debug, Error)]
pub enum Error {
    /// The signer declined or failed before the transaction was accepted.
    #[error("signer rejected mint of asset {asset_id}: {reason}")]
    SignerRejected { asset_id: AssetId, reason: String },

    /// A progress service read or write failed. Local state is unchanged.
    #[error("progress persistence failed: {0}")]
    PersistenceFailure(String),

    /// A mint for this key is already in flight.
    #[error("mint for {key} already in progress ({state})")]
    MintInProgress { key: AchievementKey, state: MintState },

    /// The achievement has not been completed yet.
    #[error("{0} is not completed")]
    NotCompleted(AchievementKey),

    /// The achievement's asset is already minted.
    #[error("{0} is already minted")]
    AlreadyMinted(AchievementKey),

    /// A backend read model could not be read.
    #[error("service error: {0}")]
    Service(#[from] ServiceError),

    /// The session was closed; no new mint can start.
    #[error("session closed")]
    SessionClosed,

    /// Catalog validation failed
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Invalid configuration value
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A background task panicked or was aborted.
    #[error("task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Task(e.to_string())
    }
}

impl Error {
    /// Whether the user can simply retry the action that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::SignerRejected { .. }
                | Error::PersistenceFailure(_)
                | Error::MintInProgress { .. }
                | Error::Service(_)
        )
    }
}

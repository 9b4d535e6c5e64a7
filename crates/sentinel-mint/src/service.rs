//! External collaborators: the two backend read models and the signer.
//!
//! The engine only ever talks to these traits. Each is object-safe and
//! `Send + Sync` so a session can hold them as `Arc<dyn …>` and hand them to
//! background poll tasks.
//!
//! ```text
//!   ProgressService ──── read / write ────┐
//!                                         ├── AchievementStore, poller
//!   MembershipService ── read ────────────┘
//!
//!   ExternalSigner ───── submit(asset, price) ── MintOrchestrator
//! ```

use async_trait::async_trait;
use sentinel_catalog::{Amount, AssetId, MembershipSnapshot, ProgressSnapshot};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Wallet address of the user a session belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque handle for a transaction the signer accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionHandle(pub [u8; 32]);

impl fmt::Display for TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Failure talking to a backend read model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// Transport-level failure
    #[error("network error: {0}")]
    Network(String),

    /// The service answered with an error status
    #[error("service returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The response could not be decoded
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Why the signer did not produce a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignerError {
    /// The user declined to sign
    #[error("user rejected the request")]
    UserRejected,

    /// The wallet or node refused the transaction
    #[error("submission failed: {0}")]
    Failed(String),
}

/// Durable store of record for completion, score, profile and minted flags.
#[async_trait]
pub trait ProgressService: Send + Sync {
    /// Read the user's full progress map.
    async fn read(&self, user: &UserId) -> Result<ProgressSnapshot, ServiceError>;

    /// Replace the user's progress map.
    async fn write(&self, user: &UserId, progress: &ProgressSnapshot) -> Result<(), ServiceError>;
}

/// Indexed view of badge ownership.
#[async_trait]
pub trait MembershipService: Send + Sync {
    /// Read the user's owned and minted badges.
    async fn read(&self, user: &UserId) -> Result<MembershipSnapshot, ServiceError>;
}

/// Signs and broadcasts a mint transaction.
///
/// `submit` may wait indefinitely on user interaction; the engine never
/// cancels it.
#[async_trait]
pub trait ExternalSigner: Send + Sync {
    async fn submit(&self, asset_id: AssetId, price: Amount) -> Result<TransactionHandle, SignerError>;
}

/// The backends one session talks to.
#[derive(Clone)]
pub struct Services {
    pub progress: Arc<dyn ProgressService>,
    pub membership: Arc<dyn MembershipService>,
    pub signer: Arc<dyn ExternalSigner>,
}

impl Services {
    pub fn new(
        progress: Arc<dyn ProgressService>,
        membership: Arc<dyn MembershipService>,
        signer: Arc<dyn ExternalSigner>,
    ) -> Self {
        Self {
            progress,
            membership,
            signer,
        }
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}

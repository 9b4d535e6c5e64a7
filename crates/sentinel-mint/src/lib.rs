//! Sentinel Mint - Achievement Reconciliation Engine
//!
//! Keeps a user's achievement progress consistent across two independently
//! updated backends (a progress service and a membership service) and drives
//! the mint lifecycle of each achievement's asset.
//!
//! # Architecture
//!
//! - **Store**: single-writer owner of the progress map with monotonic merges
//! - **Poller**: bounded, cancellable polling over several read models
//! - **Orchestrator**: per-key mint state machine (sign, confirm, reconcile)
//! - **Notifications**: de-duplicated queue of minted and newly owned badges
//! - **Session**: the context object tying the above to one user
//!
//! # Example
//!
//! ```no_run
//! use sentinel_catalog::{AchievementKey, CatalogConfig};
//! use sentinel_mint::memory::{InMemoryMembership, InMemoryProgress, InMemorySigner};
//! use sentinel_mint::{EngineConfig, Services, Session, UserId};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let services = Services::new(
//!         Arc::new(InMemoryProgress::new()),
//!         Arc::new(InMemoryMembership::new()),
//!         Arc::new(InMemorySigner::new()),
//!     );
//!     let session = Session::open(
//!         UserId::new("0xa11ce"),
//!         EngineConfig::from_env()?,
//!         CatalogConfig::reference(),
//!         services,
//!     )
//!     .await?;
//!
//!     session.complete_quiz(AchievementKey::Tier1, 13).await?;
//!     let outcome = session.mint(AchievementKey::Tier1).await?;
//!     println!("{:?}", outcome);
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod error;
pub mod memory;
pub mod notify;
pub mod orchestrator;
pub mod poller;
pub mod service;
pub mod session;
pub mod store;

pub use cancel::{CancelHandle, CancelToken};
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use notify::{NotificationEvent, NotificationQueue, NotificationReason};
pub use orchestrator::{MintOrchestrator, MintOutcome, MintState, MintTransition, Observation};
pub use poller::{ConvergencePoller, PollConfig, PollOutcome, PollSource};
pub use service::{
    ExternalSigner, MembershipService, ProgressService, ServiceError, Services, SignerError,
    TransactionHandle, UserId,
};
pub use session::{QuizOutcome, RefreshReport, Session};
pub use store::{AchievementStore, StoreEvent};

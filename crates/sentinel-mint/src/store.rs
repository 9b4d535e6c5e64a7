//! Achievement Store - the single writer over a user's progress.
//!
//! Every mutation goes through one async mutex, held across the progress
//! service write, so a completion and a mint reconciliation can never
//! interleave and lose each other's update. Only two kinds of change exist:
//!
//! - **Completion** is persistence-first: the current remote map is merged
//!   in, the candidate is written back whole, and it is adopted locally only
//!   once the write is accepted. The write replaces the stored map, so the
//!   merge is what keeps flags the indexer set since the last load.
//! - **Mint truth** is a monotonic merge: `minted` only ever goes
//!   `false → true`, and `false` observations are ignored.
//!
//! Reloading from the progress service uses the same merge rules, so the
//! order in which sources are observed does not matter.

use crate::error::{Error, Result};
use crate::service::{ProgressService, UserId};
use sentinel_catalog::{
    AchievementKey, AchievementRecord, CatalogConfig, MembershipSnapshot, ProgressSnapshot,
    ProgressStats,
};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 64;

/// Change notifications published by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A completion was persisted and adopted.
    Completed { record: AchievementRecord },
    /// A key's `minted` flag transitioned to true.
    MintConfirmed { key: AchievementKey },
}

/// Session-scoped owner of one user's progress.
pub struct AchievementStore {
    user: UserId,
    progress: Arc<dyn ProgressService>,
    state: Mutex<ProgressSnapshot>,
    events: broadcast::Sender<StoreEvent>,
}

impl AchievementStore {
    /// Empty store. Call [`load`](Self::load) to pull the persisted state.
    pub fn new(user: UserId, progress: Arc<dyn ProgressService>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            user,
            progress,
            state: Mutex::new(ProgressSnapshot::with_defaults()),
            events,
        }
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    /// Copy of the current progress.
    pub async fn snapshot(&self) -> ProgressSnapshot {
        self.state.lock().await.clone()
    }

    /// Current record for `key`.
    pub async fn record(&self, key: AchievementKey) -> AchievementRecord {
        self.state.lock().await.get(key)
    }

    pub async fn stats(&self) -> ProgressStats {
        self.state.lock().await.stats()
    }

    /// Subscribe to store events.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Record a completion of `key` with `score`.
    ///
    /// The persisted map is read and merged first, then the updated map is
    /// written back. If either call fails the local state is left exactly
    /// as it was and [`Error::PersistenceFailure`] is returned.
    pub async fn record_completion(
        &self,
        key: AchievementKey,
        score: u32,
        profile_label: Option<String>,
    ) -> Result<AchievementRecord> {
        let mut state = self.state.lock().await;

        let remote = self.progress.read(&self.user).await.map_err(|e| {
            warn!(
                user = %self.user,
                key = %key,
                error = %e,
                "Progress read before write failed"
            );
            Error::PersistenceFailure(e.to_string())
        })?;
        let mut candidate = state.clone();
        let newly_minted = candidate.merge_remote(&remote);
        let record = candidate.get(key).completed_with(score, profile_label);
        candidate.upsert(record.clone());

        if let Err(e) = self.progress.write(&self.user, &candidate).await {
            warn!(user = %self.user, key = %key, error = %e, "Progress write rejected");
            return Err(Error::PersistenceFailure(e.to_string()));
        }

        *state = candidate;
        drop(state);

        for minted in &newly_minted {
            self.announce_minted(*minted);
        }

        info!(
            user = %self.user,
            key = %key,
            score,
            best_score = ?record.best_score,
            "Completion recorded"
        );
        let _ = self.events.send(StoreEvent::Completed {
            record: record.clone(),
        });
        Ok(record)
    }

    /// Merge an externally observed mint flag for `key`.
    ///
    /// Returns `true` if `minted` transitioned to true.
    pub async fn apply_external_mint_truth(&self, key: AchievementKey, minted: bool) -> bool {
        let mut state = self.state.lock().await;
        let changed = state.record_mut(key).merge_minted(minted);
        drop(state);

        if changed {
            self.announce_minted(key);
        }
        changed
    }

    /// Pull the persisted progress and merge it in.
    ///
    /// Returns the keys whose `minted` flag became true.
    pub async fn load(&self) -> Result<Vec<AchievementKey>> {
        let mut state = self.state.lock().await;
        let remote = self
            .progress
            .read(&self.user)
            .await
            .map_err(|e| Error::PersistenceFailure(e.to_string()))?;
        let newly_minted = state.merge_remote(&remote);
        drop(state);

        debug!(user = %self.user, records = remote.len(), "Progress loaded");
        for key in &newly_minted {
            self.announce_minted(*key);
        }
        Ok(newly_minted)
    }

    /// Apply the membership service's minted flags for every catalog asset.
    ///
    /// Returns the keys whose `minted` flag became true.
    pub async fn reconcile_membership(
        &self,
        membership: &MembershipSnapshot,
        catalog: &CatalogConfig,
    ) -> Vec<AchievementKey> {
        let mut state = self.state.lock().await;
        let newly_minted: Vec<AchievementKey> = catalog
            .entries()
            .filter(|entry| {
                state
                    .record_mut(entry.key)
                    .merge_minted(membership.is_minted(entry.asset_id))
            })
            .map(|entry| entry.key)
            .collect();
        drop(state);

        for key in &newly_minted {
            self.announce_minted(*key);
        }
        newly_minted
    }

    fn announce_minted(&self, key: AchievementKey) {
        info!(user = %self.user, key = %key, "Mint confirmed");
        let _ = self.events.send(StoreEvent::MintConfirmed { key });
    }
}

impl std::fmt::Debug for AchievementStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AchievementStore")
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

//! Mint Orchestrator - per-key mint lifecycle.
//!
//! ```text
//!            initiate(key)
//!   Idle ─────────────────▶ AwaitingSignature ──signer error──▶ Failed ──▶ Idle
//!    ▲                             │
//!    │                             │ transaction accepted
//!    │                             ▼
//!    └──timed out / cancelled── AwaitingConfirmation ──converged──▶ Confirmed
//! ```
//!
//! The `Idle → AwaitingSignature` claim is atomic, so two concurrent
//! initiations of the same key can never both reach the signer. The claim is
//! held by a guard that returns the key to `Idle` when dropped, unless the
//! mint was confirmed. An aborted task therefore never leaves a key stuck.
//!
//! A timeout never writes `minted = false`. The mint may still land later and
//! is picked up by the next refresh.

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::notify::{NotificationQueue, NotificationReason};
use crate::poller::{ConvergencePoller, PollConfig, PollOutcome, PollSource};
use crate::service::{
    MembershipService, ProgressService, ServiceError, Services, TransactionHandle, UserId,
};
use crate::store::AchievementStore;
use async_trait::async_trait;
use sentinel_catalog::{
    AchievementKey, AssetCatalogEntry, AssetId, CatalogConfig, MembershipSnapshot, ProgressSnapshot,
};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const TRANSITION_CAPACITY: usize = 64;

/// Lifecycle state of one key's mint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MintState {
    #[default]
    Idle,
    AwaitingSignature,
    AwaitingConfirmation,
    Confirmed,
    Failed,
}

impl MintState {
    /// Whether a mint is in flight.
    pub fn is_active(self) -> bool {
        matches!(self, Self::AwaitingSignature | Self::AwaitingConfirmation)
    }
}

impl fmt::Display for MintState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::AwaitingSignature => "awaiting signature",
            Self::AwaitingConfirmation => "awaiting confirmation",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A state change for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MintTransition {
    pub key: AchievementKey,
    pub state: MintState,
}

/// A snapshot from either read model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    Membership(MembershipSnapshot),
    Progress(ProgressSnapshot),
}

impl Observation {
    /// Whether this snapshot shows `entry` as minted.
    pub fn confirms(&self, entry: &AssetCatalogEntry) -> bool {
        match self {
            Self::Membership(snapshot) => snapshot.is_minted(entry.asset_id),
            Self::Progress(snapshot) => snapshot.is_minted(entry.key),
        }
    }
}

/// Polls the membership service for one user.
pub struct MembershipSource {
    service: Arc<dyn MembershipService>,
    user: UserId,
}

impl MembershipSource {
    pub fn new(service: Arc<dyn MembershipService>, user: UserId) -> Self {
        Self { service, user }
    }
}

#[async_trait]
impl PollSource<Observation> for MembershipSource {
    fn name(&self) -> &'static str {
        "membership"
    }

    async fn fetch(&self) -> std::result::Result<Observation, ServiceError> {
        self.service.read(&self.user).await.map(Observation::Membership)
    }
}

/// Polls the progress service for one user.
pub struct ProgressSource {
    service: Arc<dyn ProgressService>,
    user: UserId,
}

impl ProgressSource {
    pub fn new(service: Arc<dyn ProgressService>, user: UserId) -> Self {
        Self { service, user }
    }
}

#[async_trait]
impl PollSource<Observation> for ProgressSource {
    fn name(&self) -> &'static str {
        "progress"
    }

    async fn fetch(&self) -> std::result::Result<Observation, ServiceError> {
        self.service.read(&self.user).await.map(Observation::Progress)
    }
}

/// How a mint attempt that reached the signer ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MintOutcome {
    /// A read model reported the asset as minted.
    Confirmed {
        asset_id: AssetId,
        transaction: TransactionHandle,
        /// 1-based poll attempt that confirmed.
        attempt: u32,
        /// Name of the confirming read model.
        source: &'static str,
    },
    /// Nothing confirmed within the poll budget. The mint may still land.
    TimedOut {
        asset_id: AssetId,
        transaction: TransactionHandle,
        attempts: u32,
    },
    /// The session was torn down while waiting.
    Cancelled {
        asset_id: AssetId,
        transaction: TransactionHandle,
    },
}

impl MintOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed { .. })
    }

    pub fn asset_id(&self) -> AssetId {
        match self {
            Self::Confirmed { asset_id, .. }
            | Self::TimedOut { asset_id, .. }
            | Self::Cancelled { asset_id, .. } => *asset_id,
        }
    }
}

/// Drives mints for one user.
pub struct MintOrchestrator {
    user: UserId,
    catalog: Arc<CatalogConfig>,
    store: Arc<AchievementStore>,
    services: Services,
    notifications: Arc<NotificationQueue>,
    poll: PollConfig,
    states: Mutex<[MintState; AchievementKey::COUNT]>,
    cancel: CancelToken,
    transitions: broadcast::Sender<MintTransition>,
}

impl MintOrchestrator {
    pub fn new(
        user: UserId,
        catalog: Arc<CatalogConfig>,
        store: Arc<AchievementStore>,
        services: Services,
        notifications: Arc<NotificationQueue>,
        poll: PollConfig,
    ) -> Self {
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);
        Self {
            user,
            catalog,
            store,
            services,
            notifications,
            poll,
            states: Mutex::new([MintState::Idle; AchievementKey::COUNT]),
            cancel: CancelToken::never(),
            transitions,
        }
    }

    /// Stop pollers and refuse new mints once `token` is cancelled.
    #[must_use]
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Current state of `key`.
    pub fn state(&self, key: AchievementKey) -> MintState {
        self.lock_states()[key.index()]
    }

    /// Subscribe to state transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<MintTransition> {
        self.transitions.subscribe()
    }

    /// Mint the asset for `key` and wait for a read model to confirm it.
    ///
    /// Errors cover everything that stops the mint before the signer accepts
    /// the transaction. Once accepted, the result is always a [`MintOutcome`].
    pub async fn initiate(&self, key: AchievementKey) -> Result<MintOutcome> {
        if self.cancel.is_cancelled() {
            return Err(Error::SessionClosed);
        }
        // Preconditions are checked before claiming so a refused request
        // never shows up as a transition, and again once the claim is held.
        self.check_mintable(key).await?;
        let slot = self.claim(key)?;
        self.check_mintable(key).await?;

        let entry = *self.catalog.entry(key);
        info!(
            user = %self.user,
            key = %key,
            asset_id = entry.asset_id,
            price = %entry.price,
            "Requesting mint signature"
        );
        let transaction = match self.services.signer.submit(entry.asset_id, entry.price).await {
            Ok(transaction) => transaction,
            Err(e) => {
                warn!(user = %self.user, key = %key, error = %e, "Mint not signed");
                slot.set(MintState::Failed);
                return Err(Error::SignerRejected {
                    asset_id: entry.asset_id,
                    reason: e.to_string(),
                });
            }
        };

        slot.set(MintState::AwaitingConfirmation);
        info!(
            key = %key,
            tx = %transaction,
            interval_ms = self.poll.interval.as_millis() as u64,
            max_attempts = self.poll.max_attempts,
            "Mint submitted, waiting for confirmation"
        );

        let poller = ConvergencePoller::<Observation>::new(self.poll)
            .with_source(Arc::new(MembershipSource::new(
                self.services.membership.clone(),
                self.user.clone(),
            )))
            .with_source(Arc::new(ProgressSource::new(
                self.services.progress.clone(),
                self.user.clone(),
            )))
            .with_cancel(self.cancel.clone());

        let outcome = match poller.run(|observation| observation.confirms(&entry)).await {
            PollOutcome::Converged { source, attempt, .. } => {
                self.store.apply_external_mint_truth(key, true).await;
                slot.set(MintState::Confirmed);
                self.notifications
                    .enqueue(NotificationReason::MintConfirmed, [entry.asset_id]);
                MintOutcome::Confirmed {
                    asset_id: entry.asset_id,
                    transaction,
                    attempt,
                    source,
                }
            }
            PollOutcome::TimedOut { attempts, .. } => {
                warn!(key = %key, tx = %transaction, attempts, "Mint not confirmed in time");
                MintOutcome::TimedOut {
                    asset_id: entry.asset_id,
                    transaction,
                    attempts,
                }
            }
            PollOutcome::Cancelled { attempts } => {
                debug!(key = %key, attempts, "Mint confirmation cancelled");
                MintOutcome::Cancelled {
                    asset_id: entry.asset_id,
                    transaction,
                }
            }
        };
        Ok(outcome)
    }

    /// Run [`initiate`](Self::initiate) on a background task.
    pub fn spawn(self: &Arc<Self>, key: AchievementKey) -> JoinHandle<Result<MintOutcome>> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.initiate(key).await })
    }

    async fn check_mintable(&self, key: AchievementKey) -> Result<()> {
        let record = self.store.record(key).await;
        if !record.completed {
            return Err(Error::NotCompleted(key));
        }
        if record.minted {
            return Err(Error::AlreadyMinted(key));
        }
        Ok(())
    }

    fn lock_states(&self) -> MutexGuard<'_, [MintState; AchievementKey::COUNT]> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn claim(&self, key: AchievementKey) -> Result<MintSlot<'_>> {
        {
            let mut states = self.lock_states();
            match states[key.index()] {
                MintState::Idle => states[key.index()] = MintState::AwaitingSignature,
                MintState::Confirmed => return Err(Error::AlreadyMinted(key)),
                state => {
                    debug!(key = %key, state = %state, "Mint already in progress");
                    return Err(Error::MintInProgress { key, state });
                }
            }
        }
        self.publish(key, MintState::AwaitingSignature);
        Ok(MintSlot {
            orchestrator: self,
            key,
        })
    }

    fn transition(&self, key: AchievementKey, state: MintState) {
        self.lock_states()[key.index()] = state;
        self.publish(key, state);
    }

    fn release(&self, key: AchievementKey) {
        let released = {
            let mut states = self.lock_states();
            let current = &mut states[key.index()];
            if matches!(current, MintState::Idle | MintState::Confirmed) {
                false
            } else {
                *current = MintState::Idle;
                true
            }
        };
        if released {
            self.publish(key, MintState::Idle);
        }
    }

    fn publish(&self, key: AchievementKey, state: MintState) {
        debug!(user = %self.user, key = %key, state = %state, "Mint state");
        let _ = self.transitions.send(MintTransition { key, state });
    }
}

impl fmt::Debug for MintOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MintOrchestrator")
            .field("user", &self.user)
            .field("poll", &self.poll)
            .field("states", &*self.lock_states())
            .finish_non_exhaustive()
    }
}

/// Exclusive claim on one key's lifecycle.
struct MintSlot<'a> {
    orchestrator: &'a MintOrchestrator,
    key: AchievementKey,
}

impl MintSlot<'_> {
    fn set(&self, state: MintState) {
        self.orchestrator.transition(self.key, state);
    }
}

impl Drop for MintSlot<'_> {
    fn drop(&mut self) {
        self.orchestrator.release(self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelHandle;
    use crate::memory::{InMemoryMembership, InMemoryProgress, InMemorySigner};
    use std::time::Duration;

    const INTERVAL: Duration = Duration::from_secs(3);

    struct Fixture {
        user: UserId,
        progress: Arc<InMemoryProgress>,
        membership: Arc<InMemoryMembership>,
        signer: Arc<InMemorySigner>,
        store: Arc<AchievementStore>,
        notifications: Arc<NotificationQueue>,
        orchestrator: Arc<MintOrchestrator>,
    }

    fn fixture_with(
        signer: impl FnOnce(Arc<InMemoryMembership>, UserId) -> InMemorySigner,
        cancel: CancelToken,
    ) -> Fixture {
        let user = UserId::new("0xa11ce");
        let progress = Arc::new(InMemoryProgress::new());
        let membership = Arc::new(InMemoryMembership::new());
        let signer = Arc::new(signer(membership.clone(), user.clone()));
        let store = Arc::new(AchievementStore::new(user.clone(), progress.clone()));
        let notifications = Arc::new(NotificationQueue::new());
        let services = Services::new(progress.clone(), membership.clone(), signer.clone());
        let orchestrator = Arc::new(
            MintOrchestrator::new(
                user.clone(),
                Arc::new(CatalogConfig::reference()),
                store.clone(),
                services,
                notifications.clone(),
                PollConfig::new(INTERVAL, 20),
            )
            .with_cancel(cancel),
        );
        Fixture {
            user,
            progress,
            membership,
            signer,
            store,
            notifications,
            orchestrator,
        }
    }

    fn fixture(lag_reads: u32) -> Fixture {
        fixture_with(
            |membership, user| InMemorySigner::new().with_indexer(membership, user, lag_reads),
            CancelToken::never(),
        )
    }

    async fn complete(f: &Fixture, key: AchievementKey) {
        f.store.record_completion(key, 13, None).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmed_by_membership() {
        let f = fixture(3);
        complete(&f, AchievementKey::Tier1).await;

        let outcome = f.orchestrator.initiate(AchievementKey::Tier1).await.unwrap();
        match outcome {
            MintOutcome::Confirmed {
                asset_id,
                attempt,
                source,
                ..
            } => {
                assert_eq!(asset_id, 2001);
                assert_eq!(attempt, 3);
                assert_eq!(source, "membership");
            }
            other => panic!("expected confirmation, got {:?}", other),
        }
        assert!(f.store.record(AchievementKey::Tier1).await.minted);
        assert_eq!(f.orchestrator.state(AchievementKey::Tier1), MintState::Confirmed);

        let events = f.notifications.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].asset_ids, vec![2001]);
        assert_eq!(events[0].reason, NotificationReason::MintConfirmed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmed_by_progress() {
        let f = fixture_with(|_, _| InMemorySigner::new(), CancelToken::never());
        complete(&f, AchievementKey::Tier2).await;
        f.progress.schedule_mint(&f.user, AchievementKey::Tier2, 2);

        let outcome = f.orchestrator.initiate(AchievementKey::Tier2).await.unwrap();
        assert!(matches!(
            outcome,
            MintOutcome::Confirmed {
                source: "progress",
                attempt: 2,
                ..
            }
        ));
        assert!(f.store.record(AchievementKey::Tier2).await.minted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_returns_to_idle_without_clearing() {
        let f = fixture_with(|_, _| InMemorySigner::new(), CancelToken::never());
        complete(&f, AchievementKey::Tier1).await;

        let outcome = f.orchestrator.initiate(AchievementKey::Tier1).await.unwrap();
        assert!(matches!(outcome, MintOutcome::TimedOut { attempts: 20, .. }));
        assert_eq!(f.orchestrator.state(AchievementKey::Tier1), MintState::Idle);
        assert!(!f.store.record(AchievementKey::Tier1).await.minted);
        assert!(f.notifications.is_empty());

        // A later attempt is accepted.
        f.membership.grant(&f.user, 2001, true);
        let again = f.orchestrator.initiate(AchievementKey::Tier1).await.unwrap();
        assert!(again.is_confirmed());
        assert_eq!(f.signer.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signer_rejection_is_retryable() {
        let f = fixture(1);
        complete(&f, AchievementKey::Tier3).await;
        let mut transitions = f.orchestrator.subscribe();

        f.signer.set_reject(true);
        let err = f.orchestrator.initiate(AchievementKey::Tier3).await.unwrap_err();
        assert!(matches!(err, Error::SignerRejected { asset_id: 2003, .. }));
        assert!(err.is_retryable());
        assert_eq!(f.orchestrator.state(AchievementKey::Tier3), MintState::Idle);

        let seen: Vec<MintState> = std::iter::from_fn(|| transitions.try_recv().ok())
            .map(|t| t.state)
            .collect();
        assert_eq!(
            seen,
            vec![MintState::AwaitingSignature, MintState::Failed, MintState::Idle]
        );

        f.signer.set_reject(false);
        assert!(f
            .orchestrator
            .initiate(AchievementKey::Tier3)
            .await
            .unwrap()
            .is_confirmed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_double_submission() {
        let f = fixture_with(
            |membership, user| {
                InMemorySigner::new()
                    .with_delay(Duration::from_secs(1))
                    .with_indexer(membership, user, 2)
            },
            CancelToken::never(),
        );
        complete(&f, AchievementKey::Tier1).await;

        let first = f.orchestrator.spawn(AchievementKey::Tier1);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            f.orchestrator.state(AchievementKey::Tier1),
            MintState::AwaitingSignature
        );

        let err = f.orchestrator.initiate(AchievementKey::Tier1).await.unwrap_err();
        assert!(matches!(
            err,
            Error::MintInProgress {
                key: AchievementKey::Tier1,
                state: MintState::AwaitingSignature
            }
        ));

        assert!(first.await.unwrap().unwrap().is_confirmed());
        assert_eq!(f.signer.calls(), 1);
        assert!(matches!(
            f.orchestrator.initiate(AchievementKey::Tier1).await,
            Err(Error::AlreadyMinted(AchievementKey::Tier1))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let f = fixture(2);
        complete(&f, AchievementKey::Tier1).await;
        complete(&f, AchievementKey::Tier2).await;

        let a = f.orchestrator.spawn(AchievementKey::Tier1);
        let b = f.orchestrator.spawn(AchievementKey::Tier2);
        assert!(a.await.unwrap().unwrap().is_confirmed());
        assert!(b.await.unwrap().unwrap().is_confirmed());
        assert_eq!(f.signer.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_preconditions() {
        let f = fixture(1);
        let mut transitions = f.orchestrator.subscribe();
        assert!(matches!(
            f.orchestrator.initiate(AchievementKey::Tier1).await,
            Err(Error::NotCompleted(AchievementKey::Tier1))
        ));
        assert_eq!(f.orchestrator.state(AchievementKey::Tier1), MintState::Idle);

        complete(&f, AchievementKey::Tier1).await;
        f.store.apply_external_mint_truth(AchievementKey::Tier1, true).await;
        assert!(matches!(
            f.orchestrator.initiate(AchievementKey::Tier1).await,
            Err(Error::AlreadyMinted(AchievementKey::Tier1))
        ));
        assert_eq!(f.signer.calls(), 0);
        // Refused requests never claim the key.
        assert!(transitions.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_returns_to_idle() {
        let handle = CancelHandle::new();
        let f = fixture_with(|_, _| InMemorySigner::new(), handle.token());
        complete(&f, AchievementKey::Tier1).await;

        let task = f.orchestrator.spawn(AchievementKey::Tier1);
        tokio::time::sleep(INTERVAL * 2 + Duration::from_millis(500)).await;
        assert_eq!(
            f.orchestrator.state(AchievementKey::Tier1),
            MintState::AwaitingConfirmation
        );
        handle.cancel();

        assert!(matches!(
            task.await.unwrap().unwrap(),
            MintOutcome::Cancelled { asset_id: 2001, .. }
        ));
        assert_eq!(f.orchestrator.state(AchievementKey::Tier1), MintState::Idle);
        assert!(!f.store.record(AchievementKey::Tier1).await.minted);
        assert!(matches!(
            f.orchestrator.initiate(AchievementKey::Tier1).await,
            Err(Error::SessionClosed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborted_task_releases_key() {
        let f = fixture_with(
            |_, _| InMemorySigner::new().with_delay(Duration::from_secs(60)),
            CancelToken::never(),
        );
        complete(&f, AchievementKey::Assessment).await;

        let task = f.orchestrator.spawn(AchievementKey::Assessment);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(f.orchestrator.state(AchievementKey::Assessment).is_active());

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert_eq!(f.orchestrator.state(AchievementKey::Assessment), MintState::Idle);
    }

    #[test]
    fn test_observation_confirms() {
        let catalog = CatalogConfig::reference();
        let entry = catalog.entry(AchievementKey::Tier2);

        let mut membership = MembershipSnapshot::new();
        membership.grant(2002, false);
        assert!(!Observation::Membership(membership.clone()).confirms(entry));
        membership.grant(2002, true);
        assert!(Observation::Membership(membership).confirms(entry));

        let mut progress = ProgressSnapshot::new();
        progress.record_mut(AchievementKey::Tier2).minted = true;
        assert!(Observation::Progress(progress).confirms(entry));
    }
}

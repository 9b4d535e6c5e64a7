//! One user's session: store, orchestrator, badge diff and notifications.
//!
//! The session is the explicit context object the UI talks to. It owns the
//! cancel handle for every poller it starts, so closing or dropping it stops
//! all confirmation polling. Completion writes run on detached tasks and
//! finish even if the session goes away mid-write.

use crate::cancel::CancelHandle;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::notify::{NotificationQueue, NotificationReason};
use crate::orchestrator::{MintOrchestrator, MintOutcome, MintState, MintTransition};
use crate::poller::PollConfig;
use crate::service::{Services, UserId};
use crate::store::{AchievementStore, StoreEvent};
use sentinel_catalog::{
    AchievementKey, AchievementRecord, AssetId, BadgeDiffDetector, CatalogConfig, DiffBaseline,
    ProgressSnapshot, ProgressStats, RiskProfile,
};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Result of submitting a quiz score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuizOutcome {
    /// The score met the threshold and the completion was persisted.
    Passed { record: AchievementRecord },
    /// The score was below the threshold. Nothing was written.
    Failed { score: u32, threshold: u32 },
}

impl QuizOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, Self::Passed { .. })
    }
}

/// What a refresh changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Keys whose `minted` flag became true.
    pub newly_minted: Vec<AchievementKey>,
    /// Assets owned now that were not owned at the previous observation.
    pub newly_owned: BTreeSet<AssetId>,
}

pub struct Session {
    user: UserId,
    config: EngineConfig,
    catalog: Arc<CatalogConfig>,
    services: Services,
    store: Arc<AchievementStore>,
    orchestrator: Arc<MintOrchestrator>,
    detector: Mutex<BadgeDiffDetector>,
    notifications: Arc<NotificationQueue>,
    cancel: CancelHandle,
}

impl Session {
    /// Open a session for `user`.
    ///
    /// Loads persisted progress and takes the first membership observation.
    /// That observation only captures the diff baseline, unless a baseline
    /// was restored from `config.baseline_path`, in which case assets gained
    /// since it was saved are reported.
    pub async fn open(
        user: UserId,
        config: EngineConfig,
        catalog: CatalogConfig,
        services: Services,
    ) -> Result<Self> {
        config.validate()?;

        let catalog = Arc::new(catalog);
        let store = Arc::new(AchievementStore::new(user.clone(), services.progress.clone()));
        store.load().await?;

        let mut detector =
            BadgeDiffDetector::with_exclusions(catalog.excluded_assets().iter().copied());
        if let Some(path) = &config.baseline_path {
            if let Some(baseline) = load_baseline(path).await? {
                debug!(
                    path = %path.display(),
                    assets = baseline.previous_owned_asset_ids.len(),
                    "Restored badge baseline"
                );
                detector = detector.with_baseline(baseline);
            }
        }

        let notifications = Arc::new(NotificationQueue::new());
        let cancel = CancelHandle::new();
        let orchestrator = Arc::new(
            MintOrchestrator::new(
                user.clone(),
                catalog.clone(),
                store.clone(),
                services.clone(),
                notifications.clone(),
                PollConfig::from(&config),
            )
            .with_cancel(cancel.token()),
        );

        let session = Self {
            user,
            config,
            catalog,
            services,
            store,
            orchestrator,
            detector: Mutex::new(detector),
            notifications,
            cancel,
        };

        match session.observe_membership().await {
            Ok(report) => debug!(
                user = %session.user,
                newly_owned = ?report.newly_owned,
                "Initial membership observed"
            ),
            // The baseline is captured by the next successful refresh.
            Err(e) => warn!(user = %session.user, error = %e, "Initial membership read failed"),
        }

        let stats = session.store.stats().await;
        info!(
            user = %session.user,
            completed = stats.completed,
            level = %stats.knowledge_level,
            "Session opened"
        );
        Ok(session)
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &CatalogConfig {
        &self.catalog
    }

    /// Copy of the current progress.
    pub async fn read(&self) -> ProgressSnapshot {
        self.store.snapshot().await
    }

    pub async fn record(&self, key: AchievementKey) -> AchievementRecord {
        self.store.record(key).await
    }

    pub async fn stats(&self) -> ProgressStats {
        self.store.stats().await
    }

    /// Subscribe to progress changes.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.store.subscribe()
    }

    /// Subscribe to mint state transitions.
    pub fn subscribe_mints(&self) -> broadcast::Receiver<MintTransition> {
        self.orchestrator.subscribe()
    }

    pub fn notifications(&self) -> &Arc<NotificationQueue> {
        &self.notifications
    }

    pub fn mint_state(&self, key: AchievementKey) -> MintState {
        self.orchestrator.state(key)
    }

    /// Submit a quiz score. Scores below the tier threshold are not recorded.
    ///
    /// The assessment has no threshold; submitting it here records it with
    /// its risk profile like [`complete_assessment`](Self::complete_assessment).
    pub async fn complete_quiz(&self, key: AchievementKey, score: u32) -> Result<QuizOutcome> {
        if !key.is_quiz() {
            let (_, record) = self.complete_assessment(score).await?;
            return Ok(QuizOutcome::Passed { record });
        }

        let threshold = self.config.quiz_rules.threshold(key);
        if !self.config.quiz_rules.passes(key, score) {
            debug!(user = %self.user, key = %key, score, threshold, "Quiz not passed");
            return Ok(QuizOutcome::Failed { score, threshold });
        }

        let record = self.record_detached(key, score, None).await?;
        Ok(QuizOutcome::Passed { record })
    }

    /// Record the risk assessment with the profile its score falls in.
    pub async fn complete_assessment(
        &self,
        score: u32,
    ) -> Result<(RiskProfile, AchievementRecord)> {
        let profile = RiskProfile::classify(score);
        let record = self
            .record_detached(AchievementKey::Assessment, score, Some(profile.label().to_string()))
            .await?;
        Ok((profile, record))
    }

    /// Mint `key` and wait for the outcome.
    pub async fn mint(&self, key: AchievementKey) -> Result<MintOutcome> {
        self.orchestrator.initiate(key).await
    }

    /// Mint `key` on a background task.
    pub fn spawn_mint(&self, key: AchievementKey) -> JoinHandle<Result<MintOutcome>> {
        self.orchestrator.spawn(key)
    }

    /// Reload progress and membership, reconcile minted flags and report
    /// newly owned assets.
    pub async fn refresh(&self) -> Result<RefreshReport> {
        let mut newly_minted = self.store.load().await?;
        let report = self.observe_membership().await?;
        newly_minted.extend(report.newly_minted);
        newly_minted.sort();
        newly_minted.dedup();
        Ok(RefreshReport {
            newly_minted,
            newly_owned: report.newly_owned,
        })
    }

    /// Write the diff baseline to `config.baseline_path`.
    ///
    /// Returns `false` if no path is configured or no baseline was captured.
    pub async fn save_baseline(&self) -> Result<bool> {
        let Some(path) = &self.config.baseline_path else {
            return Ok(false);
        };
        let Some(baseline) = self.lock_detector().baseline() else {
            return Ok(false);
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(&baseline)?;
        tokio::fs::write(path, json).await?;
        debug!(path = %path.display(), "Badge baseline saved");
        Ok(true)
    }

    /// Cancel every active poller. In-flight mints end as cancelled and new
    /// ones are refused.
    pub fn close(&self) {
        if !self.cancel.is_cancelled() {
            info!(user = %self.user, "Session closed");
        }
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    async fn record_detached(
        &self,
        key: AchievementKey,
        score: u32,
        profile_label: Option<String>,
    ) -> Result<AchievementRecord> {
        let store = Arc::clone(&self.store);
        let write =
            tokio::spawn(async move { store.record_completion(key, score, profile_label).await });
        write.await?
    }

    async fn observe_membership(&self) -> Result<RefreshReport> {
        let membership = self.services.membership.read(&self.user).await?;
        let newly_minted = self
            .store
            .reconcile_membership(&membership, &self.catalog)
            .await;

        let newly_owned = {
            let mut detector = self.lock_detector();
            let first = !detector.is_initialized();
            let newly_owned = detector.diff(&membership.owned_asset_ids);
            if first {
                debug!(
                    user = %self.user,
                    owned = membership.owned_asset_ids.len(),
                    "Badge baseline captured"
                );
            }
            newly_owned
        };

        if !newly_owned.is_empty() {
            info!(user = %self.user, assets = ?newly_owned, "Newly owned badges");
            self.notifications
                .enqueue(NotificationReason::NewlyOwned, newly_owned.iter().copied());
        }

        Ok(RefreshReport {
            newly_minted,
            newly_owned,
        })
    }

    fn lock_detector(&self) -> MutexGuard<'_, BadgeDiffDetector> {
        self.detector.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user", &self.user)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

async fn load_baseline(path: &Path) -> Result<Option<DiffBaseline>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

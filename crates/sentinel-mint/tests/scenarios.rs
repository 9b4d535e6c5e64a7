//! End-to-end scenarios against the in-memory backends.

use sentinel_catalog::{
    AchievementKey, Amount, AssetCatalogEntry, BadgeDiffDetector, CatalogConfig, DiffBaseline,
};
use sentinel_mint::memory::{InMemoryMembership, InMemoryProgress, InMemorySigner};
use sentinel_mint::{
    EngineConfig, Error, MintOutcome, MintState, NotificationReason, QuizOutcome, Services,
    Session, StoreEvent, UserId,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const INTERVAL: Duration = Duration::from_secs(3);

/// Catalog with Tier1 priced at one base unit.
fn scenario_catalog() -> CatalogConfig {
    CatalogConfig::new(
        [
            AssetCatalogEntry::new(AchievementKey::Tier1, 2001, Amount(1)),
            AssetCatalogEntry::new(AchievementKey::Tier2, 2002, Amount::MILLI_ETHER),
            AssetCatalogEntry::new(AchievementKey::Tier3, 2003, Amount::MILLI_ETHER),
            AssetCatalogEntry::new(AchievementKey::Assessment, 2004, Amount::MILLI_ETHER),
        ],
        [1001, 3001, 3002],
    )
    .unwrap()
}

struct World {
    user: UserId,
    progress: Arc<InMemoryProgress>,
    membership: Arc<InMemoryMembership>,
    signer: Arc<InMemorySigner>,
}

impl World {
    /// Mints become visible in membership `lag_reads` reads after signing.
    fn new(lag_reads: u32) -> Self {
        let user = UserId::new("0x5e471e1");
        let membership = Arc::new(InMemoryMembership::new());
        let signer = Arc::new(InMemorySigner::new().with_indexer(
            membership.clone(),
            user.clone(),
            lag_reads,
        ));
        Self {
            user,
            progress: Arc::new(InMemoryProgress::new()),
            membership,
            signer,
        }
    }

    async fn open(&self) -> Session {
        Session::open(
            self.user.clone(),
            EngineConfig::default().with_poll_interval(INTERVAL),
            scenario_catalog(),
            Services::new(
                self.progress.clone(),
                self.membership.clone(),
                self.signer.clone(),
            ),
        )
        .await
        .unwrap()
    }
}

#[tokio::test(start_paused = true)]
async fn scenario_a_mint_confirmed_on_third_poll() {
    let world = World::new(3);
    let session = world.open().await;
    let mut events = session.subscribe();

    let outcome = session.complete_quiz(AchievementKey::Tier1, 13).await.unwrap();
    let QuizOutcome::Passed { record } = outcome else {
        panic!("13 should pass a threshold of 12");
    };
    assert!(record.completed);
    assert_eq!(record.score, 13);
    assert_eq!(record.best_score, Some(13));
    assert!(!record.minted);

    let start = Instant::now();
    let outcome = session.mint(AchievementKey::Tier1).await.unwrap();
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
    assert_eq!(start.elapsed(), INTERVAL * 3);

    assert!(session.record(AchievementKey::Tier1).await.minted);
    let notifications = session.notifications().drain();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].asset_ids, vec![2001]);
    assert_eq!(notifications[0].reason, NotificationReason::MintConfirmed);

    assert!(matches!(events.recv().await.unwrap(), StoreEvent::Completed { .. }));
    assert_eq!(
        events.recv().await.unwrap(),
        StoreEvent::MintConfirmed {
            key: AchievementKey::Tier1
        }
    );
}

#[tokio::test(start_paused = true)]
async fn scenario_b_timeout_leaves_minted_false() {
    let world = World::new(u32::MAX);
    let session = world.open().await;
    session.complete_quiz(AchievementKey::Tier1, 13).await.unwrap();

    let start = Instant::now();
    let outcome = session.mint(AchievementKey::Tier1).await.unwrap();
    let elapsed = start.elapsed();

    assert!(matches!(
        outcome,
        MintOutcome::TimedOut {
            asset_id: 2001,
            attempts: 20,
            ..
        }
    ));
    assert!(elapsed >= INTERVAL * 19 && elapsed <= INTERVAL * 20);
    assert!(!session.record(AchievementKey::Tier1).await.minted);
    assert_eq!(session.mint_state(AchievementKey::Tier1), MintState::Idle);
    assert!(session.notifications().is_empty());

    // A subsequent initiate is accepted and reaches the signer again.
    world.membership.grant(&world.user, 2001, true);
    assert!(session.mint(AchievementKey::Tier1).await.unwrap().is_confirmed());
    assert_eq!(world.signer.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn scenario_b_late_confirmation_seen_by_refresh() {
    let world = World::new(u32::MAX);
    let session = world.open().await;
    session.complete_quiz(AchievementKey::Tier1, 13).await.unwrap();

    let outcome = session.mint(AchievementKey::Tier1).await.unwrap();
    assert!(matches!(outcome, MintOutcome::TimedOut { .. }));

    world
        .progress
        .schedule_mint(&world.user, AchievementKey::Tier1, 0);
    let report = session.refresh().await.unwrap();
    assert_eq!(report.newly_minted, vec![AchievementKey::Tier1]);
    assert!(session.record(AchievementKey::Tier1).await.minted);
}

#[test]
fn scenario_c_excluded_badges_not_reported() {
    let mut detector = BadgeDiffDetector::with_exclusions([1001, 3001, 3002]).with_baseline(
        DiffBaseline {
            previous_owned_asset_ids: BTreeSet::from([1001, 3001]),
        },
    );
    let newly_owned = detector.diff(&BTreeSet::from([1001, 3001, 2001]));
    assert_eq!(newly_owned, BTreeSet::from([2001]));
}

#[tokio::test]
async fn scenario_c_through_session() {
    let world = World::new(1);
    world.membership.grant(&world.user, 1001, false);
    world.membership.grant(&world.user, 3001, false);
    let session = world.open().await;
    assert!(session.notifications().is_empty());

    world.membership.grant(&world.user, 2001, false);
    world.membership.grant(&world.user, 3002, false);
    let report = session.refresh().await.unwrap();
    assert_eq!(report.newly_owned, BTreeSet::from([2001]));

    let notifications = session.notifications().drain();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].asset_ids, vec![2001]);
    assert_eq!(notifications[0].reason, NotificationReason::NewlyOwned);

    assert!(session.notifications().acknowledge(notifications[0].seq));
    world.membership.grant(&world.user, 2002, false);
    let report = session.refresh().await.unwrap();
    assert_eq!(report.newly_owned, BTreeSet::from([2002]));
    let pending = session.notifications().drain();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].asset_ids, vec![2002]);
}

#[tokio::test(start_paused = true)]
async fn no_double_submission_while_confirming() {
    let world = World::new(5);
    let session = world.open().await;
    session.complete_quiz(AchievementKey::Tier2, 15).await.unwrap();

    let first = session.spawn_mint(AchievementKey::Tier2);
    tokio::time::sleep(INTERVAL + Duration::from_millis(500)).await;
    assert_eq!(
        session.mint_state(AchievementKey::Tier2),
        MintState::AwaitingConfirmation
    );

    let second = session.mint(AchievementKey::Tier2).await;
    assert!(matches!(
        second,
        Err(Error::MintInProgress {
            key: AchievementKey::Tier2,
            state: MintState::AwaitingConfirmation
        })
    ));

    assert!(first.await.unwrap().unwrap().is_confirmed());
    assert_eq!(world.signer.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn teardown_cancels_without_applying_false() {
    let world = World::new(u32::MAX);
    let session = world.open().await;
    session.complete_quiz(AchievementKey::Tier1, 14).await.unwrap();

    let task = session.spawn_mint(AchievementKey::Tier1);
    tokio::time::sleep(INTERVAL * 5).await;
    session.close();

    let outcome = task.await.unwrap().unwrap();
    assert!(matches!(outcome, MintOutcome::Cancelled { .. }));
    assert_eq!(session.mint_state(AchievementKey::Tier1), MintState::Idle);
    assert!(!session.record(AchievementKey::Tier1).await.minted);
    assert!(matches!(
        session.mint(AchievementKey::Tier1).await,
        Err(Error::SessionClosed)
    ));
}

#[tokio::test]
async fn persistence_failure_leaves_state_unchanged() {
    let world = World::new(1);
    let session = world.open().await;
    session.complete_quiz(AchievementKey::Tier3, 13).await.unwrap();
    let before = session.read().await;

    world.progress.set_fail_writes(true);
    let err = session
        .complete_quiz(AchievementKey::Tier3, 15)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PersistenceFailure(_)));
    assert_eq!(session.read().await, before);
    assert_eq!(session.record(AchievementKey::Tier3).await.best_score, Some(13));

    world.progress.set_fail_writes(false);
    session.complete_quiz(AchievementKey::Tier3, 15).await.unwrap();
    assert_eq!(session.record(AchievementKey::Tier3).await.best_score, Some(15));
}

#[tokio::test]
async fn best_score_survives_reload() {
    let world = World::new(1);
    {
        let session = world.open().await;
        session.complete_quiz(AchievementKey::Tier1, 15).await.unwrap();
        session.complete_quiz(AchievementKey::Tier1, 12).await.unwrap();
    }

    let session = world.open().await;
    let record = session.record(AchievementKey::Tier1).await;
    assert!(record.completed);
    assert_eq!(record.score, 12);
    assert_eq!(record.best_score, Some(15));
}

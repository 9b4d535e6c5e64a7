//! In-memory backends for the service traits.
//!
//! Used by the simulator and the test suites. Each backend can be told to
//! fail, and changes can be scheduled to become visible only after a number
//! of reads, which is how an indexer that lags behind the chain looks from
//! the engine's side.

use crate::service::{
    ExternalSigner, MembershipService, ProgressService, ServiceError, SignerError,
    TransactionHandle, UserId,
};
use async_trait::async_trait;
use sentinel_catalog::{AchievementKey, Amount, AssetId, MembershipSnapshot, ProgressSnapshot};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::trace;

/// A change that lands on the `remaining`-th read of `user`.
#[derive(Debug)]
struct Scheduled<T> {
    user: UserId,
    change: T,
    remaining: u32,
}

/// Count one read of `user` down and return the changes that are now due.
fn take_due<T>(scheduled: &mut Vec<Scheduled<T>>, user: &UserId) -> Vec<T> {
    let mut due = Vec::new();
    let mut i = 0;
    while i < scheduled.len() {
        if &scheduled[i].user == user {
            scheduled[i].remaining = scheduled[i].remaining.saturating_sub(1);
            if scheduled[i].remaining == 0 {
                due.push(scheduled.swap_remove(i).change);
                continue;
            }
        }
        i += 1;
    }
    due
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct ProgressInner {
    users: HashMap<UserId, ProgressSnapshot>,
    scheduled: Vec<Scheduled<AchievementKey>>,
}

/// Progress service backed by a map.
#[derive(Debug, Default)]
pub struct InMemoryProgress {
    inner: Mutex<ProgressInner>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    reads: AtomicU32,
    writes: AtomicU32,
}

impl InMemoryProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored progress for `user`.
    pub fn put(&self, user: &UserId, progress: ProgressSnapshot) {
        lock(&self.inner).users.insert(user.clone(), progress);
    }

    /// Stored progress for `user`, if any was written.
    pub fn stored(&self, user: &UserId) -> Option<ProgressSnapshot> {
        lock(&self.inner).users.get(user).cloned()
    }

    /// Mark `key` minted on the `after_reads`-th subsequent read of `user`.
    /// Zero applies immediately.
    pub fn schedule_mint(&self, user: &UserId, key: AchievementKey, after_reads: u32) {
        let mut inner = lock(&self.inner);
        if after_reads == 0 {
            let progress = inner.users.entry(user.clone()).or_default();
            progress.record_mut(key).merge_minted(true);
            return;
        }
        inner.scheduled.push(Scheduled {
            user: user.clone(),
            change: key,
            remaining: after_reads,
        });
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of reads served or refused.
    pub fn reads(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of writes accepted or refused.
    pub fn writes(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProgressService for InMemoryProgress {
    async fn read(&self, user: &UserId) -> Result<ProgressSnapshot, ServiceError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(ServiceError::Network("progress service unreachable".into()));
        }

        let mut inner = lock(&self.inner);
        let due = take_due(&mut inner.scheduled, user);
        let progress = inner.users.entry(user.clone()).or_default();
        for key in due {
            trace!(user = %user, key = %key, "Scheduled mint visible in progress");
            progress.record_mut(key).merge_minted(true);
        }
        Ok(progress.clone())
    }

    async fn write(&self, user: &UserId, progress: &ProgressSnapshot) -> Result<(), ServiceError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ServiceError::Status {
                status: 500,
                message: "write rejected".into(),
            });
        }

        // The whole map is replaced, including mint flags set by the indexer.
        lock(&self.inner).users.insert(user.clone(), progress.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MembershipInner {
    users: HashMap<UserId, MembershipSnapshot>,
    scheduled: Vec<Scheduled<AssetId>>,
}

/// Membership service backed by a map.
#[derive(Debug, Default)]
pub struct InMemoryMembership {
    inner: Mutex<MembershipInner>,
    fail_reads: AtomicBool,
    reads: AtomicU32,
}

impl InMemoryMembership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant `asset_id` to `user` now.
    pub fn grant(&self, user: &UserId, asset_id: AssetId, minted: bool) {
        lock(&self.inner)
            .users
            .entry(user.clone())
            .or_default()
            .grant(asset_id, minted);
    }

    /// Grant `asset_id` (owned and minted) on the `after_reads`-th subsequent
    /// read of `user`. Zero applies immediately.
    pub fn schedule_grant(&self, user: &UserId, asset_id: AssetId, after_reads: u32) {
        if after_reads == 0 {
            self.grant(user, asset_id, true);
            return;
        }
        lock(&self.inner).scheduled.push(Scheduled {
            user: user.clone(),
            change: asset_id,
            remaining: after_reads,
        });
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn reads(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MembershipService for InMemoryMembership {
    async fn read(&self, user: &UserId) -> Result<MembershipSnapshot, ServiceError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(ServiceError::Status {
                status: 503,
                message: "indexer unavailable".into(),
            });
        }

        let mut inner = lock(&self.inner);
        let due = take_due(&mut inner.scheduled, user);
        let snapshot = inner.users.entry(user.clone()).or_default();
        for asset_id in due {
            trace!(user = %user, asset_id, "Scheduled grant visible in membership");
            snapshot.grant(asset_id, true);
        }
        Ok(snapshot.clone())
    }
}

/// Where an accepted mint eventually shows up.
#[derive(Debug)]
struct Indexer {
    membership: Arc<InMemoryMembership>,
    user: UserId,
    lag_reads: u32,
}

/// Signer that accepts or rejects on command.
#[derive(Debug, Default)]
pub struct InMemorySigner {
    calls: AtomicU32,
    nonce: AtomicU64,
    reject: AtomicBool,
    delay: Duration,
    indexer: Option<Indexer>,
}

impl InMemorySigner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait `delay` before answering, like a user reviewing the request.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Make accepted mints visible in `membership` for `user` after
    /// `lag_reads` reads.
    #[must_use]
    pub fn with_indexer(
        mut self,
        membership: Arc<InMemoryMembership>,
        user: UserId,
        lag_reads: u32,
    ) -> Self {
        self.indexer = Some(Indexer {
            membership,
            user,
            lag_reads,
        });
        self
    }

    /// Reject every subsequent request.
    pub fn set_reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    /// Number of submissions received.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExternalSigner for InMemorySigner {
    async fn submit(&self, asset_id: AssetId, price: Amount) -> Result<TransactionHandle, SignerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.reject.load(Ordering::SeqCst) {
            return Err(SignerError::UserRejected);
        }

        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst);
        let mut hasher = blake3::Hasher::new();
        hasher.update(&asset_id.to_le_bytes());
        hasher.update(&price.0.to_le_bytes());
        hasher.update(&nonce.to_le_bytes());
        let handle = TransactionHandle(*hasher.finalize().as_bytes());

        if let Some(indexer) = &self.indexer {
            indexer
                .membership
                .schedule_grant(&indexer.user, asset_id, indexer.lag_reads);
        }
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_catalog::AchievementRecord;

    fn alice() -> UserId {
        UserId::new("0xa11ce")
    }

    #[tokio::test]
    async fn test_scheduled_grant_lands_on_nth_read() {
        let membership = InMemoryMembership::new();
        membership.schedule_grant(&alice(), 2001, 3);

        assert!(!membership.read(&alice()).await.unwrap().owns(2001));
        assert!(!membership.read(&alice()).await.unwrap().owns(2001));
        let third = membership.read(&alice()).await.unwrap();
        assert!(third.owns(2001));
        assert!(third.is_minted(2001));
        assert_eq!(membership.reads(), 3);
    }

    #[tokio::test]
    async fn test_schedules_are_per_user() {
        let membership = InMemoryMembership::new();
        let bob = UserId::new("0xb0b");
        membership.schedule_grant(&alice(), 2002, 1);

        assert!(!membership.read(&bob).await.unwrap().owns(2002));
        assert!(membership.read(&alice()).await.unwrap().owns(2002));
    }

    #[tokio::test]
    async fn test_progress_write_replaces_map() {
        let progress = InMemoryProgress::new();
        progress.schedule_mint(&alice(), AchievementKey::Tier1, 0);

        let mut local = ProgressSnapshot::new();
        local.upsert(AchievementRecord::new(AchievementKey::Tier1).completed_with(13, None));
        progress.write(&alice(), &local).await.unwrap();

        let stored = progress.stored(&alice()).unwrap();
        assert!(stored.is_completed(AchievementKey::Tier1));
        assert!(!stored.is_minted(AchievementKey::Tier1));
    }

    #[tokio::test]
    async fn test_failure_flags() {
        let progress = InMemoryProgress::new();
        progress.set_fail_reads(true);
        progress.set_fail_writes(true);
        assert!(progress.read(&alice()).await.is_err());
        assert!(progress.write(&alice(), &ProgressSnapshot::new()).await.is_err());
        assert_eq!(progress.reads(), 1);
        assert_eq!(progress.writes(), 1);
        assert!(progress.stored(&alice()).is_none());
    }

    #[tokio::test]
    async fn test_signer_handles_are_distinct() {
        let signer = InMemorySigner::new();
        let a = signer.submit(2001, Amount::MILLI_ETHER).await.unwrap();
        let b = signer.submit(2001, Amount::MILLI_ETHER).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(signer.calls(), 2);

        signer.set_reject(true);
        assert_eq!(
            signer.submit(2001, Amount::MILLI_ETHER).await,
            Err(SignerError::UserRejected)
        );
    }

    #[tokio::test]
    async fn test_signer_feeds_indexer() {
        let membership = Arc::new(InMemoryMembership::new());
        let signer = InMemorySigner::new().with_indexer(membership.clone(), alice(), 1);
        signer.submit(2004, Amount::MILLI_ETHER).await.unwrap();
        assert!(membership.read(&alice()).await.unwrap().is_minted(2004));
    }
}

//! De-duplicated notification queue for minted and newly owned badges.
//!
//! Two producers feed the queue: the mint orchestrator (`MintConfirmed`) and
//! the badge diff (`NewlyOwned`). Both can observe the same asset, so the
//! queue drops any id that is already pending or was already acknowledged.
//! An acknowledged id can never come back.

use sentinel_catalog::AssetId;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::debug;

/// Why an event was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationReason {
    /// A mint this session initiated was confirmed.
    MintConfirmed,
    /// The membership service reports a badge that was not owned before.
    NewlyOwned,
}

/// One queued notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    /// Sequence number used to acknowledge the event.
    pub seq: u64,
    pub asset_ids: Vec<AssetId>,
    pub reason: NotificationReason,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<NotificationEvent>,
    /// Ids held by some pending event.
    queued: HashSet<AssetId>,
    acknowledged: HashSet<AssetId>,
    next_seq: u64,
}

/// Render-agnostic sink drained by the UI.
#[derive(Debug, Default)]
pub struct NotificationQueue {
    state: Mutex<QueueState>,
    ready: Notify,
}

impl NotificationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue an event for the ids that are neither pending nor acknowledged.
    ///
    /// Returns the event's sequence number, or `None` if every id was
    /// filtered out and nothing was queued.
    pub fn enqueue(
        &self,
        reason: NotificationReason,
        asset_ids: impl IntoIterator<Item = AssetId>,
    ) -> Option<u64> {
        let mut state = self.lock();
        let fresh: BTreeSet<AssetId> = asset_ids
            .into_iter()
            .filter(|id| !state.queued.contains(id) && !state.acknowledged.contains(id))
            .collect();
        if fresh.is_empty() {
            return None;
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.queued.extend(fresh.iter().copied());
        let event = NotificationEvent {
            seq,
            asset_ids: fresh.into_iter().collect(),
            reason,
        };
        debug!(seq, reason = ?reason, assets = ?event.asset_ids, "Notification queued");
        state.pending.push_back(event);
        drop(state);

        self.ready.notify_one();
        Some(seq)
    }

    /// Every unacknowledged event, oldest first.
    ///
    /// Events stay queued until acknowledged, so a consumer that crashes
    /// between draining and acknowledging sees them again.
    pub fn drain(&self) -> Vec<NotificationEvent> {
        self.lock().pending.iter().cloned().collect()
    }

    /// Remove an event for good. Returns `false` if `seq` is not pending.
    pub fn acknowledge(&self, seq: u64) -> bool {
        let mut state = self.lock();
        let Some(pos) = state.pending.iter().position(|e| e.seq == seq) else {
            return false;
        };
        if let Some(event) = state.pending.remove(pos) {
            for id in event.asset_ids {
                state.queued.remove(&id);
                state.acknowledged.insert(id);
            }
        }
        true
    }

    /// Acknowledge everything currently pending. Returns how many events.
    pub fn acknowledge_all(&self) -> usize {
        let mut state = self.lock();
        let events: Vec<NotificationEvent> = state.pending.drain(..).collect();
        for event in &events {
            for id in &event.asset_ids {
                state.queued.remove(id);
                state.acknowledged.insert(*id);
            }
        }
        events.len()
    }

    /// Whether `asset_id` has been acknowledged.
    pub fn is_acknowledged(&self, asset_id: AssetId) -> bool {
        self.lock().acknowledged.contains(&asset_id)
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_empty()
    }

    /// Wait until at least one event is pending.
    pub async fn wait(&self) {
        loop {
            if !self.is_empty() {
                return;
            }
            self.ready.notified().await;
        }
    }
}

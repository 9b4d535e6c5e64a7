//! Membership read model: which badges a user owns and which are minted.

use crate::catalog::AssetId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One badge row as reported by the membership API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BadgeStatus {
    pub badge_id: AssetId,
    pub earned: bool,
    pub nft_minted: bool,
}

/// Point-in-time view of the membership service for one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipSnapshot {
    pub owned_asset_ids: BTreeSet<AssetId>,
    pub per_asset_minted: BTreeMap<AssetId, bool>,
}

impl MembershipSnapshot {
    /// Empty snapshot (a user the service has never seen).
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the API's badge list. Earned badges count as owned.
    pub fn from_badges(badges: impl IntoIterator<Item = BadgeStatus>) -> Self {
        let mut snapshot = Self::new();
        for badge in badges {
            if badge.earned {
                snapshot.owned_asset_ids.insert(badge.badge_id);
            }
            snapshot.per_asset_minted.insert(badge.badge_id, badge.nft_minted);
        }
        snapshot
    }

    /// Whether the service reports `asset_id` as minted.
    pub fn is_minted(&self, asset_id: AssetId) -> bool {
        self.per_asset_minted.get(&asset_id).copied().unwrap_or(false)
    }

    /// Whether the user owns `asset_id`.
    pub fn owns(&self, asset_id: AssetId) -> bool {
        self.owned_asset_ids.contains(&asset_id)
    }

    /// Record an asset as owned and minted.
    pub fn grant(&mut self, asset_id: AssetId, minted: bool) {
        self.owned_asset_ids.insert(asset_id);
        let flag = self.per_asset_minted.entry(asset_id).or_insert(false);
        *flag |= minted;
    }
}

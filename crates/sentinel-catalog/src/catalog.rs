//! Static asset catalog: which on-chain badge each achievement mints.

use crate::key::AchievementKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// On-chain badge identifier.
pub type AssetId = u64;

/// Price in the chain's base unit (wei).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(pub u128);

impl Amount {
    /// Zero price.
    pub const ZERO: Amount = Amount(0);

    /// 0.001 of a whole token with 18 decimals.
    pub const MILLI_ETHER: Amount = Amount(1_000_000_000_000_000);
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} wei", self.0)
    }
}

/// Catalog entry for one achievement key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetCatalogEntry {
    pub asset_id: AssetId,
    pub price: Amount,
    pub key: AchievementKey,
    /// Another flow already announces this asset; the badge diff must not.
    #[serde(default)]
    pub announced_elsewhere: bool,
}

impl AssetCatalogEntry {
    /// Entry that is announced by the badge diff as usual.
    #[must_use]
    pub const fn new(key: AchievementKey, asset_id: AssetId, price: Amount) -> Self {
        Self {
            asset_id,
            price,
            key,
            announced_elsewhere: false,
        }
    }
}

/// Catalog validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    /// No entry was given for this key
    #[error("catalog has no entry for {0}")]
    MissingKey(AchievementKey),

    /// More than one entry was given for this key
    #[error("catalog has more than one entry for {0}")]
    DuplicateKey(AchievementKey),

    /// Two keys map to the same asset
    #[error("asset {0} is assigned to more than one key")]
    DuplicateAsset(AssetId),
}

/// The full achievement → asset table plus the notification exclusion set.
///
/// Construction validates that every key has exactly one entry and that no
/// asset is shared, so [`CatalogConfig::entry`] is total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogConfig {
    entries: [AssetCatalogEntry; AchievementKey::COUNT],
    excluded: BTreeSet<AssetId>,
}

impl CatalogConfig {
    /// Build a catalog from one entry per key and the ids of assets that are
    /// announced by other flows (membership perks and the like).
    pub fn new(
        entries: impl IntoIterator<Item = AssetCatalogEntry>,
        excluded: impl IntoIterator<Item = AssetId>,
    ) -> Result<Self, CatalogError> {
        let mut slots: [Option<AssetCatalogEntry>; AchievementKey::COUNT] =
            [None; AchievementKey::COUNT];
        let mut assets = BTreeSet::new();

        for entry in entries {
            let slot = &mut slots[entry.key.index()];
            if slot.is_some() {
                return Err(CatalogError::DuplicateKey(entry.key));
            }
            if !assets.insert(entry.asset_id) {
                return Err(CatalogError::DuplicateAsset(entry.asset_id));
            }
            *slot = Some(entry);
        }

        let placeholder = AssetCatalogEntry::new(AchievementKey::Tier1, 0, Amount::ZERO);
        let mut filled = [placeholder; AchievementKey::COUNT];
        for key in AchievementKey::ALL {
            filled[key.index()] = slots[key.index()].ok_or(CatalogError::MissingKey(key))?;
        }

        let mut excluded: BTreeSet<AssetId> = excluded.into_iter().collect();
        excluded.extend(
            filled
                .iter()
                .filter(|e| e.announced_elsewhere)
                .map(|e| e.asset_id),
        );

        Ok(Self {
            entries: filled,
            excluded,
        })
    }

    /// The production table: four quiz/assessment badges at 0.001 ETH each,
    /// with the early-adopter and membership badges announced elsewhere.
    pub fn reference() -> Self {
        Self {
            entries: [
                AssetCatalogEntry::new(AchievementKey::Tier1, 2001, Amount::MILLI_ETHER),
                AssetCatalogEntry::new(AchievementKey::Tier2, 2002, Amount::MILLI_ETHER),
                AssetCatalogEntry::new(AchievementKey::Tier3, 2003, Amount::MILLI_ETHER),
                AssetCatalogEntry::new(AchievementKey::Assessment, 2004, Amount::MILLI_ETHER),
            ],
            excluded: [1001, 3001, 3002].into_iter().collect(),
        }
    }

    /// The entry for `key`.
    pub fn entry(&self, key: AchievementKey) -> &AssetCatalogEntry {
        &self.entries[key.index()]
    }

    /// Reverse lookup from a badge id to the achievement that mints it.
    pub fn key_for_asset(&self, asset_id: AssetId) -> Option<AchievementKey> {
        self.entries
            .iter()
            .find(|e| e.asset_id == asset_id)
            .map(|e| e.key)
    }

    /// All entries in key order.
    pub fn entries(&self) -> impl Iterator<Item = &AssetCatalogEntry> {
        self.entries.iter()
    }

    /// Assets the badge diff must never announce.
    pub fn excluded_assets(&self) -> &BTreeSet<AssetId> {
        &self.excluded
    }

    /// Whether `asset_id` is in the exclusion set.
    pub fn is_excluded(&self, asset_id: AssetId) -> bool {
        self.excluded.contains(&asset_id)
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self::reference()
    }
}

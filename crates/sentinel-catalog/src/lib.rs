//! Sentinel Catalog - Achievement Domain Types
//!
//! Everything the mint engine reasons about that does not need a runtime:
//! the closed set of achievement keys, the per-key progress records, the
//! static asset catalog, membership snapshots and the badge diff detector.
//!
//! # Monotonic Records
//!
//! Two fields of an [`AchievementRecord`] only ever move in one direction:
//!
//! - `best_score` is the maximum of every score recorded for the key
//! - `minted` goes `false → true` and never back
//!
//! Merges between the local copy and a backend read model therefore commute:
//! applying the same set of observations in any order yields the same record.
//!
//! # Catalog Lookup
//!
//! Every [`AchievementKey`] has exactly one [`AssetCatalogEntry`]. The lookup
//! is a total function over the enum, so call sites never handle a missing
//! entry:
//!
//! ```
//! use sentinel_catalog::{AchievementKey, CatalogConfig};
//!
//! let catalog = CatalogConfig::reference();
//! assert_eq!(catalog.entry(AchievementKey::Tier1).asset_id, 2001);
//! assert_eq!(catalog.key_for_asset(2004), Some(AchievementKey::Assessment));
//! ```

mod catalog;
mod diff;
mod key;
mod membership;
mod quiz;
mod record;

pub use catalog::{Amount, AssetCatalogEntry, AssetId, CatalogConfig, CatalogError};
pub use diff::{BadgeDiffDetector, DiffBaseline};
pub use key::{AchievementKey, ParseKeyError};
pub use membership::{BadgeStatus, MembershipSnapshot};
pub use quiz::{KnowledgeLevel, ProgressStats, QuizRules, RiskProfile};
pub use record::{AchievementRecord, ProgressSnapshot};

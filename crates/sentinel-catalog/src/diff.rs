//! Badge diffing: which owned assets are new since the last observation.
//!
//! The detector holds the previously observed owned set. The first
//! observation only captures a baseline, because everything a returning user
//! already owns would otherwise be reported as new. Every later observation
//! replaces the previous set, even when nothing new was found, so an id is
//! reported at most once per `absent → present` transition.

use crate::catalog::AssetId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Persisted form of a detector's baseline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffBaseline {
    pub previous_owned_asset_ids: BTreeSet<AssetId>,
}

/// Computes newly owned assets between consecutive membership observations.
#[derive(Debug, Clone, Default)]
pub struct BadgeDiffDetector {
    /// `None` until the first observation.
    previous: Option<BTreeSet<AssetId>>,
    /// Ids announced by another flow.
    excluded: BTreeSet<AssetId>,
}

impl BadgeDiffDetector {
    /// Detector with no exclusions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Detector that never reports any id in `excluded`.
    pub fn with_exclusions(excluded: impl IntoIterator<Item = AssetId>) -> Self {
        Self {
            previous: None,
            excluded: excluded.into_iter().collect(),
        }
    }

    /// Restore a saved baseline. The detector counts as initialized.
    #[must_use]
    pub fn with_baseline(mut self, baseline: DiffBaseline) -> Self {
        self.previous = Some(baseline.previous_owned_asset_ids);
        self
    }

    /// Whether a baseline has been captured.
    pub fn is_initialized(&self) -> bool {
        self.previous.is_some()
    }

    /// Current baseline, if initialized.
    pub fn baseline(&self) -> Option<DiffBaseline> {
        self.previous.as_ref().map(|set| DiffBaseline {
            previous_owned_asset_ids: set.clone(),
        })
    }

    /// Feed the next owned set and return the ids that are new since the
    /// previous one, minus exclusions. Empty on the first call.
    pub fn diff(&mut self, current: &BTreeSet<AssetId>) -> BTreeSet<AssetId> {
        let newly_owned = match &self.previous {
            None => BTreeSet::new(),
            Some(previous) => current
                .difference(previous)
                .filter(|id| !self.excluded.contains(id))
                .copied()
                .collect(),
        };
        self.previous = Some(current.clone());
        newly_owned
    }

    /// Forget the baseline; the next observation captures a new one.
    pub fn reset(&mut self) {
        self.previous = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn set(ids: &[AssetId]) -> BTreeSet<AssetId> {
        ids.iter().copied().collect()
    }

    #[test]
    fn test_first_observation_is_baseline() {
        let mut detector = BadgeDiffDetector::new();
        assert!(detector.diff(&set(&[1001, 2001, 2002])).is_empty());
        assert!(detector.is_initialized());
    }

    #[test]
    fn test_unchanged_then_added() {
        let mut detector = BadgeDiffDetector::new();
        let base = set(&[2001]);
        assert!(detector.diff(&base).is_empty());
        assert!(detector.diff(&base).is_empty());
        assert_eq!(detector.diff(&set(&[2001, 2002])), set(&[2002]));
    }

    #[test]
    fn test_exclusions_are_filtered() {
        let mut detector = BadgeDiffDetector::with_exclusions([1001, 3001, 3002]);
        detector.diff(&set(&[1001, 3001]));
        assert_eq!(detector.diff(&set(&[1001, 3001, 2001])), set(&[2001]));
    }

    #[test]
    fn test_excluded_only_change_still_advances_baseline() {
        let mut detector = BadgeDiffDetector::with_exclusions([3002]);
        detector.diff(&set(&[]));
        assert!(detector.diff(&set(&[3002])).is_empty());
        assert_eq!(detector.baseline().unwrap().previous_owned_asset_ids, set(&[3002]));
    }

    #[test]
    fn test_removed_then_readded_reports_again() {
        let mut detector = BadgeDiffDetector::new();
        detector.diff(&set(&[2001]));
        assert!(detector.diff(&set(&[])).is_empty());
        assert_eq!(detector.diff(&set(&[2001])), set(&[2001]));
    }

    #[test]
    fn test_restored_baseline_suppresses_reload_burst() {
        let baseline = DiffBaseline {
            previous_owned_asset_ids: set(&[2001, 2002]),
        };
        let mut detector = BadgeDiffDetector::new().with_baseline(baseline);
        assert_eq!(detector.diff(&set(&[2001, 2002, 2003])), set(&[2003]));
    }

    #[test]
    fn test_reset_recaptures() {
        let mut detector = BadgeDiffDetector::new();
        detector.diff(&set(&[2001]));
        detector.reset();
        assert!(detector.diff(&set(&[2001, 2002])).is_empty());
    }

    proptest! {
        #[test]
        fn prop_first_diff_always_empty(ids in prop::collection::btree_set(0u64..5000, 0..30)) {
            let mut detector = BadgeDiffDetector::new();
            prop_assert!(detector.diff(&ids).is_empty());
            prop_assert!(detector.diff(&ids).is_empty());
        }

        #[test]
        fn prop_each_id_reported_once(
            base in prop::collection::btree_set(0u64..100, 0..10),
            extra in prop::collection::btree_set(100u64..200, 1..10),
        ) {
            let mut detector = BadgeDiffDetector::new();
            detector.diff(&base);
            let grown: BTreeSet<AssetId> = base.union(&extra).copied().collect();
            prop_assert_eq!(detector.diff(&grown), extra);
            prop_assert!(detector.diff(&grown).is_empty());
        }
    }
}

//! Per-key progress records and the progress snapshot they live in.

use crate::key::AchievementKey;
use crate::quiz::{KnowledgeLevel, ProgressStats};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// Completion, score and mint state for one achievement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementRecord {
    pub key: AchievementKey,
    pub completed: bool,
    pub score: u32,
    /// Highest score ever recorded. Absent until the first completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_score: Option<u32>,
    /// Risk profile label, only set for the assessment.
    #[serde(default, rename = "profile", skip_serializing_if = "Option::is_none")]
    pub profile_label: Option<String>,
    pub minted: bool,
}

impl AchievementRecord {
    /// A record that has seen no activity yet.
    #[must_use]
    pub fn new(key: AchievementKey) -> Self {
        Self {
            key,
            completed: false,
            score: 0,
            best_score: None,
            profile_label: None,
            minted: false,
        }
    }

    /// The record as it would look after completing with `score`.
    ///
    /// Returns a new value; the receiver is untouched so callers can persist
    /// the candidate before adopting it.
    #[must_use]
    pub fn completed_with(&self, score: u32, profile_label: Option<String>) -> Self {
        let best = self.best_score.map_or(score, |best| best.max(score));
        Self {
            key: self.key,
            completed: true,
            score,
            best_score: Some(best),
            profile_label: profile_label.or_else(|| self.profile_label.clone()),
            minted: self.minted,
        }
    }

    /// OR an externally observed mint flag into this record.
    ///
    /// Returns `true` only on the `false → true` transition.
    pub fn merge_minted(&mut self, minted: bool) -> bool {
        if minted && !self.minted {
            self.minted = true;
            true
        } else {
            false
        }
    }

    /// Merge a record read back from the progress service.
    ///
    /// Monotonic fields are combined (`completed` and `minted` by OR,
    /// `best_score` by max). The remote score and profile are adopted when
    /// the remote has a completion, since it is the store of record.
    /// Returns `true` if `minted` transitioned to true.
    pub fn merge_remote(&mut self, remote: &AchievementRecord) -> bool {
        if remote.completed {
            self.score = remote.score;
            if remote.profile_label.is_some() {
                self.profile_label = remote.profile_label.clone();
            }
        }
        self.completed |= remote.completed;
        self.best_score = match (self.best_score, remote.best_score) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        self.merge_minted(remote.minted)
    }
}

/// Wire shape of a record inside the progress map, where the key is implied.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRecord {
    completed: bool,
    score: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    best_score: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    profile: Option<String>,
    minted: bool,
}

/// One user's progress, keyed by achievement.
///
/// A key with no record reads as [`AchievementRecord::new`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    records: BTreeMap<AchievementKey, AchievementRecord>,
}

impl ProgressSnapshot {
    /// Empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot holding a default record for every key.
    pub fn with_defaults() -> Self {
        let records = AchievementKey::ALL
            .into_iter()
            .map(|key| (key, AchievementRecord::new(key)))
            .collect();
        Self { records }
    }

    /// The record for `key`, or the default record if none exists.
    #[must_use]
    pub fn get(&self, key: AchievementKey) -> AchievementRecord {
        self.records
            .get(&key)
            .cloned()
            .unwrap_or_else(|| AchievementRecord::new(key))
    }

    /// Borrow the stored record, if any.
    pub fn record(&self, key: AchievementKey) -> Option<&AchievementRecord> {
        self.records.get(&key)
    }

    /// Mutable access, creating a default record on first use.
    pub fn record_mut(&mut self, key: AchievementKey) -> &mut AchievementRecord {
        self.records
            .entry(key)
            .or_insert_with(|| AchievementRecord::new(key))
    }

    /// Insert or replace a record.
    pub fn upsert(&mut self, record: AchievementRecord) {
        self.records.insert(record.key, record);
    }

    /// Whether `key` is recorded as minted.
    pub fn is_minted(&self, key: AchievementKey) -> bool {
        self.records.get(&key).is_some_and(|r| r.minted)
    }

    /// Whether `key` is recorded as completed.
    pub fn is_completed(&self, key: AchievementKey) -> bool {
        self.records.get(&key).is_some_and(|r| r.completed)
    }

    /// Iterate stored records in key order.
    pub fn iter(&self) -> impl Iterator<Item = &AchievementRecord> {
        self.records.values()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Merge a snapshot read from the progress service into this one.
    /// Returns the keys whose `minted` flag transitioned to true.
    pub fn merge_remote(&mut self, remote: &ProgressSnapshot) -> Vec<AchievementKey> {
        let mut newly_minted = Vec::new();
        for record in remote.iter() {
            if self.record_mut(record.key).merge_remote(record) {
                newly_minted.push(record.key);
            }
        }
        newly_minted
    }

    /// Completed count and knowledge level.
    pub fn stats(&self) -> ProgressStats {
        let completed = AchievementKey::ALL
            .into_iter()
            .filter(|key| self.is_completed(*key))
            .count();
        ProgressStats {
            completed,
            knowledge_level: KnowledgeLevel::from_progress(self),
        }
    }
}

impl WireRecord {
    fn from_record(r: &AchievementRecord) -> Self {
        Self {
            completed: r.completed,
            score: r.score,
            best_score: r.best_score,
            profile: r.profile_label.clone(),
            minted: r.minted,
        }
    }

    fn into_record(self, key: AchievementKey) -> AchievementRecord {
        AchievementRecord {
            key,
            completed: self.completed,
            score: self.score,
            best_score: self.best_score,
            profile_label: self.profile,
            minted: self.minted,
        }
    }
}

impl Serialize for ProgressSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(
            self.records
                .iter()
                .map(|(key, record)| (key, WireRecord::from_record(record))),
        )
    }
}

impl<'de> Deserialize<'de> for ProgressSnapshot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = BTreeMap::<AchievementKey, WireRecord>::deserialize(deserializer)?;
        let records = wire
            .into_iter()
            .map(|(key, w)| (key, w.into_record(key)))
            .collect();
        Ok(Self { records })
    }
}

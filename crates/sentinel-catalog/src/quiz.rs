//! Quiz pass thresholds, risk profiles and derived progress stats.

use crate::key::AchievementKey;
use crate::record::ProgressSnapshot;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pass thresholds for the scored quizzes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizRules {
    /// Minimum correct answers per tier, indexed like [`AchievementKey::index`].
    /// The assessment slot is unused.
    pub pass_threshold: [u32; AchievementKey::COUNT],
}

impl Default for QuizRules {
    fn default() -> Self {
        // 12 of 15 questions for every tier.
        Self {
            pass_threshold: [12, 12, 12, 0],
        }
    }
}

impl QuizRules {
    /// Threshold for `key`. Always 0 for the assessment.
    pub fn threshold(&self, key: AchievementKey) -> u32 {
        if key.is_quiz() {
            self.pass_threshold[key.index()]
        } else {
            0
        }
    }

    /// Whether `score` completes `key`. The assessment always completes.
    pub fn passes(&self, key: AchievementKey, score: u32) -> bool {
        score >= self.threshold(key)
    }
}

/// Risk appetite derived from the assessment's total score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskProfile {
    Conservative,
    Moderate,
    Aggressive,
    HighRisk,
}

impl RiskProfile {
    /// Classify a total assessment score.
    ///
    /// Bands: 0-12, 13-25, 26-37, 38-45. Scores outside every band fall back
    /// to `Moderate`.
    pub fn classify(score: u32) -> Self {
        match score {
            0..=12 => Self::Conservative,
            13..=25 => Self::Moderate,
            26..=37 => Self::Aggressive,
            38..=45 => Self::HighRisk,
            _ => Self::Moderate,
        }
    }

    /// Label stored in the progress record.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Conservative => "Conservative",
            Self::Moderate => "Moderate",
            Self::Aggressive => "Aggressive",
            Self::HighRisk => "High Risk",
        }
    }
}

impl fmt::Display for RiskProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Knowledge level shown on the dashboard, from the highest completed tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KnowledgeLevel {
    Novice,
    Beginner,
    Explorer,
    Master,
}

impl KnowledgeLevel {
    pub fn from_progress(progress: &ProgressSnapshot) -> Self {
        if progress.is_completed(AchievementKey::Tier3) {
            Self::Master
        } else if progress.is_completed(AchievementKey::Tier2) {
            Self::Explorer
        } else if progress.is_completed(AchievementKey::Tier1) {
            Self::Beginner
        } else {
            Self::Novice
        }
    }
}

impl fmt::Display for KnowledgeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Novice => write!(f, "Novice"),
            Self::Beginner => write!(f, "Beginner"),
            Self::Explorer => write!(f, "Explorer"),
            Self::Master => write!(f, "Master"),
        }
    }
}

/// Derived dashboard statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressStats {
    /// Number of completed achievements.
    pub completed: usize,
    pub knowledge_level: KnowledgeLevel,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::AchievementRecord;

    #[test]
    fn test_default_thresholds() {
        let rules = QuizRules::default();
        assert!(rules.passes(AchievementKey::Tier1, 12));
        assert!(!rules.passes(AchievementKey::Tier1, 11));
        assert!(rules.passes(AchievementKey::Tier3, 15));
        assert!(rules.passes(AchievementKey::Assessment, 0));
    }

    #[test]
    fn test_risk_profile_bands() {
        assert_eq!(RiskProfile::classify(0), RiskProfile::Conservative);
        assert_eq!(RiskProfile::classify(12), RiskProfile::Conservative);
        assert_eq!(RiskProfile::classify(13), RiskProfile::Moderate);
        assert_eq!(RiskProfile::classify(37), RiskProfile::Aggressive);
        assert_eq!(RiskProfile::classify(45), RiskProfile::HighRisk);
        assert_eq!(RiskProfile::classify(99), RiskProfile::Moderate);
        assert_eq!(RiskProfile::HighRisk.to_string(), "High Risk");
    }

    #[test]
    fn test_knowledge_level_uses_highest_tier() {
        let mut progress = ProgressSnapshot::with_defaults();
        assert_eq!(progress.stats().knowledge_level, KnowledgeLevel::Novice);

        progress.upsert(AchievementRecord::new(AchievementKey::Tier2).completed_with(12, None));
        let stats = progress.stats();
        assert_eq!(stats.knowledge_level, KnowledgeLevel::Explorer);
        assert_eq!(stats.completed, 1);

        progress.upsert(AchievementRecord::new(AchievementKey::Assessment).completed_with(20, None));
        assert_eq!(progress.stats().completed, 2);
        assert_eq!(progress.stats().knowledge_level, KnowledgeLevel::Explorer);
    }
}

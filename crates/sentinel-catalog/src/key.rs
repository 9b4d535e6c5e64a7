//! The closed set of achievement keys.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A completable milestone.
///
/// The serialized names match the progress API (`easy`, `medium`, `hard`,
/// `risk`), so a [`crate::ProgressSnapshot`] round-trips through the backend
/// without a translation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AchievementKey {
    /// Beginner quiz
    #[serde(rename = "easy")]
    Tier1,
    /// Intermediate quiz
    #[serde(rename = "medium")]
    Tier2,
    /// Master quiz
    #[serde(rename = "hard")]
    Tier3,
    /// Risk profile assessment
    #[serde(rename = "risk")]
    Assessment,
}

impl AchievementKey {
    /// Every key, in catalog order.
    pub const ALL: [AchievementKey; 4] = [
        AchievementKey::Tier1,
        AchievementKey::Tier2,
        AchievementKey::Tier3,
        AchievementKey::Assessment,
    ];

    /// Number of keys.
    pub const COUNT: usize = Self::ALL.len();

    /// Dense index in `0..COUNT`, used for per-key tables.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Tier1 => 0,
            Self::Tier2 => 1,
            Self::Tier3 => 2,
            Self::Assessment => 3,
        }
    }

    /// The wire name used by the progress API.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tier1 => "easy",
            Self::Tier2 => "medium",
            Self::Tier3 => "hard",
            Self::Assessment => "risk",
        }
    }

    /// Whether this key is a scored quiz (as opposed to the assessment).
    #[must_use]
    pub const fn is_quiz(self) -> bool {
        !matches!(self, Self::Assessment)
    }
}

impl fmt::Display for AchievementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string names no achievement key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown achievement key: {0}")]
pub struct ParseKeyError(pub String);

impl FromStr for AchievementKey {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "easy" | "tier1" => Ok(Self::Tier1),
            "medium" | "tier2" => Ok(Self::Tier2),
            "hard" | "tier3" => Ok(Self::Tier3),
            "risk" | "assessment" => Ok(Self::Assessment),
            _ => Err(ParseKeyError(s.to_string())),
        }
    }
}

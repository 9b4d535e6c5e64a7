//! Engine configuration.

use crate::error::{Error, Result};
use sentinel_catalog::QuizRules;
use std::path::PathBuf;
use std::time::Duration;

/// Default delay between confirmation polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Default number of polls before giving up (60s total at the default interval).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;

/// Configuration for a mint session.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Delay before each confirmation poll.
    pub poll_interval: Duration,

    /// Number of polls before a mint is left unconfirmed.
    pub max_attempts: u32,

    /// Where to keep the badge diff baseline between runs.
    /// `None` keeps it in memory only.
    pub baseline_path: Option<PathBuf>,

    /// Quiz pass thresholds.
    pub quiz_rules: QuizRules,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            baseline_path: None,
            quiz_rules: QuizRules::default(),
        }
    }
}

impl EngineConfig {
    /// Create config from environment variables, falling back to defaults.
    ///
    /// - `SENTINEL_POLL_INTERVAL_MS`
    /// - `SENTINEL_POLL_MAX_ATTEMPTS`
    /// - `SENTINEL_BASELINE_PATH`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(raw) = lookup("SENTINEL_POLL_INTERVAL_MS") {
            let ms: u64 = raw
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("invalid SENTINEL_POLL_INTERVAL_MS: {raw}")))?;
            config.poll_interval = Duration::from_millis(ms);
        }

        if let Some(raw) = lookup("SENTINEL_POLL_MAX_ATTEMPTS") {
            config.max_attempts = raw
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("invalid SENTINEL_POLL_MAX_ATTEMPTS: {raw}")))?;
        }

        config.baseline_path = lookup("SENTINEL_BASELINE_PATH")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make a confirming state unbounded or empty.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::Config("poll_interval must be non-zero".into()));
        }
        Ok(())
    }

    /// Set the poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the poll attempt budget.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Persist the badge diff baseline at `path`.
    #[must_use]
    pub fn with_baseline_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.baseline_path = Some(path.into());
        self
    }

    /// Set the quiz rules.
    #[must_use]
    pub fn with_quiz_rules(mut self, rules: QuizRules) -> Self {
        self.quiz_rules = rules;
        self
    }

    /// Upper bound on how long a mint stays unconfirmed.
    #[must_use]
    pub fn deadline(&self) -> Duration {
        self.poll_interval * self.max_attempts
    }
}

//! Convergence Poller - bounded polling over independent read models.
//!
//! Backend read models are fed by an off-band indexer at unpredictable,
//! independent rates. The poller asks all of them on every attempt and stops
//! at the first one that confirms:
//!
//! ```text
//! attempt 1..=max_attempts:
//!     wait interval
//!     fetch every source concurrently, for at most one interval
//!     first answer satisfying predicate → Converged
//! exhausted                 → TimedOut(last good snapshot per source)
//! ```
//!
//! A failed or unfinished fetch is just a non-confirming answer for that
//! attempt. Only the attempt budget or the cancel token ends the loop, so the
//! total wait never exceeds `2 × interval × max_attempts`.

use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::service::ServiceError;
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// One independently updated read model.
#[async_trait]
pub trait PollSource<T>: Send + Sync {
    /// Short name for logs and outcomes.
    fn name(&self) -> &'static str;

    async fn fetch(&self) -> Result<T, ServiceError>;
}

/// Timing for a poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay before each attempt.
    pub interval: Duration,
    /// Number of attempts before giving up.
    pub max_attempts: u32,
}

impl PollConfig {
    #[must_use]
    pub const fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// `interval × max_attempts`.
    #[must_use]
    pub fn deadline(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

impl From<&EngineConfig> for PollConfig {
    fn from(config: &EngineConfig) -> Self {
        Self::new(config.poll_interval, config.max_attempts)
    }
}

/// How a poll loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// A source satisfied the predicate.
    Converged {
        /// Name of the confirming source.
        source: &'static str,
        /// 1-based attempt number.
        attempt: u32,
        snapshot: T,
    },
    /// No source confirmed within the attempt budget.
    TimedOut {
        attempts: u32,
        /// Latest successful snapshot per source, in source order.
        last: Vec<Option<T>>,
    },
    /// The cancel token fired.
    Cancelled {
        /// Attempts fully completed before cancellation.
        attempts: u32,
    },
}

impl<T> PollOutcome<T> {
    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged { .. })
    }
}

/// Repeatedly fetches a fixed set of sources until one satisfies a predicate.
///
/// Each poller is consumed by [`run`](Self::run), so one instance serves
/// exactly one mint attempt.
pub struct ConvergencePoller<T> {
    config: PollConfig,
    sources: Vec<Arc<dyn PollSource<T>>>,
    cancel: CancelToken,
}

impl<T: Send + 'static> ConvergencePoller<T> {
    pub fn new(config: PollConfig) -> Self {
        Self {
            config,
            sources: Vec::new(),
            cancel: CancelToken::never(),
        }
    }

    /// Add a source. Answers that are ready together are taken in insertion order.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn PollSource<T>>) -> Self {
        self.sources.push(source);
        self
    }

    /// Stop early when `token` is cancelled.
    #[must_use]
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> PollConfig {
        self.config
    }

    /// Run the loop to completion.
    pub async fn run<F>(self, predicate: F) -> PollOutcome<T>
    where
        F: Fn(&T) -> bool + Send + Sync,
    {
        let mut last: Vec<Option<T>> = self.sources.iter().map(|_| None).collect();

        for attempt in 1..=self.config.max_attempts {
            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                _ = self.cancel.cancelled() => {
                    debug!(attempt, "Poll cancelled during delay");
                    return PollOutcome::Cancelled { attempts: attempt - 1 };
                }
            }

            // Sources answer in whatever order they finish. The first
            // confirming answer ends the loop without waiting for the rest.
            let mut pending: FuturesUnordered<_> = self
                .sources
                .iter()
                .enumerate()
                .map(|(idx, source)| async move { (idx, source.fetch().await) })
                .collect();
            let sources = &self.sources;
            let predicate = &predicate;
            let latest = &mut last;
            let fetch_phase = async move {
                while let Some((idx, result)) = pending.next().await {
                    let source = sources[idx].name();
                    match result {
                        Ok(snapshot) if predicate(&snapshot) => return Some((idx, snapshot)),
                        Ok(snapshot) => latest[idx] = Some(snapshot),
                        Err(e) => {
                            debug!(source, attempt, error = %e, "Poll fetch failed, continuing");
                        }
                    }
                }
                None
            };

            let phase = tokio::select! {
                phase = tokio::time::timeout(self.config.interval, fetch_phase) => phase,
                _ = self.cancel.cancelled() => {
                    debug!(attempt, "Poll cancelled during fetch");
                    return PollOutcome::Cancelled { attempts: attempt - 1 };
                }
            };

            match phase {
                Ok(Some((idx, snapshot))) => {
                    let source = self.sources[idx].name();
                    debug!(source, attempt, "Poll converged");
                    return PollOutcome::Converged {
                        source,
                        attempt,
                        snapshot,
                    };
                }
                Ok(None) => {}
                Err(_) => debug!(attempt, "Poll fetch phase timed out"),
            }

            trace!(
                attempt,
                max_attempts = self.config.max_attempts,
                "Poll attempt did not converge"
            );
        }

        debug!(attempts = self.config.max_attempts, "Poll timed out");
        PollOutcome::TimedOut {
            attempts: self.config.max_attempts,
            last,
        }
    }
}

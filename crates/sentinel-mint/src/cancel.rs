//! Cancellation for background poll tasks.
//!
//! A [`CancelHandle`] is owned by whoever controls the lifetime of the work
//! (the session). Tokens handed to pollers resolve `cancelled()` when the
//! handle cancels or is dropped, so tearing down the owner always stops its
//! timers.

use tokio::sync::watch;

/// Owner side. Cancels every token derived from it.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// A token observing this handle.
    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: Some(self.tx.subscribe()),
        }
    }

    /// Cancel all tokens. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side, cheap to clone.
#[derive(Debug, Clone)]
pub struct CancelToken {
    /// `None` for a token that is never cancelled.
    rx: Option<watch::Receiver<bool>>,
}

impl CancelToken {
    /// A token with no owner; `cancelled()` never resolves.
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_cancelled(&self) -> bool {
        match &self.rx {
            Some(rx) => *rx.borrow() || rx.has_changed().is_err(),
            None => false,
        }
    }

    /// Resolves once the handle cancels or is dropped.
    pub async fn cancelled(&self) {
        let Some(rx) = &self.rx else {
            return std::future::pending().await;
        };
        let mut rx = rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::never()
    }
}

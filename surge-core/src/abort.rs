use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// Why a run ended in `Aborted`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AbortCause {
    #[error("setup failed: {0}")]
    Setup(String),

    #[error("threshold `{expression}` on `{metric}` failed")]
    Threshold { metric: String, expression: String },

    #[error("vu {vu_id} requested abort: {reason}")]
    Signal { vu_id: u64, reason: String },

    #[error("interrupted")]
    Interrupted,
}

/// Run-wide abort flag. The first cause wins.
#[derive(Debug, Default)]
pub(crate) struct AbortSignal {
    aborted: AtomicBool,
    cause: Mutex<Option<AbortCause>>,
    notify: Notify,
}

impl AbortSignal {
    pub fn trigger(&self, cause: AbortCause) {
        {
            let mut slot = self.cause.lock();
            if slot.is_some() {
                return;
            }
            tracing::warn!(%cause, "aborting run");
            *slot = Some(cause);
        }
        self.aborted.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    pub fn cause(&self) -> Option<AbortCause> {
        self.cause.lock().clone()
    }

    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_aborted() {
                return;
            }
            notified.await;
        }
    }
}

/// Cloneable handle for aborting a run from outside the engine.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    signal: Arc<AbortSignal>,
}

impl AbortHandle {
    pub(crate) fn new(signal: Arc<AbortSignal>) -> Self {
        Self { signal }
    }

    pub fn abort(&self) {
        self.signal.trigger(AbortCause::Interrupted);
    }

    pub fn is_aborted(&self) -> bool {
        self.signal.is_aborted()
    }
}

// vaultchat Engine — Request State
// Cancellation signal and the per-request completion state machine.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

// ── Abort signal ───────────────────────────────────────────────────────────

/// Shared cancellation flag. Clones observe the same signal.
#[derive(Clone, Default)]
pub struct AbortSignal {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; wakes every task waiting in `cancelled()`.
    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once `abort()` has been called.
    pub async fn cancelled(&self) {
        loop {
            // Register before checking the flag so an abort in between is not lost.
            let notified = self.notify.notified();
            if self.is_aborted() {
                return;
            }
            notified.await;
        }
    }

    /// Clear the flag before reusing the signal for a new request.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortSignal").field("aborted", &self.is_aborted()).finish()
    }
}

// ── Completion state ───────────────────────────────────────────────────────

/// `Idle → Sent → Streaming → {Completed | Failed | Cancelled}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionState {
    Idle,
    Sent,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl CompletionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CompletionState::Completed | CompletionState::Failed | CompletionState::Cancelled)
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_advance_to(&self, next: CompletionState) -> bool {
        use CompletionState::*;
        matches!(
            (self, next),
            (Idle, Sent)
                | (Idle, Cancelled)
                | (Sent, Streaming)
                | (Sent, Failed)
                | (Sent, Cancelled)
                | (Streaming, Completed)
                | (Streaming, Failed)
                | (Streaming, Cancelled)
        )
    }
}

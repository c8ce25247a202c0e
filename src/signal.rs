// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cooperative cancellation.
//!
//! Catching OS signals (Ctrl-C, SIGTERM) is a command-line-surface concern
//! and out of scope for this crate (see the design document §1); instead the
//! scheduler accepts a single [`CancellationToken`] that an embedder wires up
//! to whatever source of "the operator asked to stop" it has: a plain
//! cooperative flag threaded through every task, per the design document §5.

use tokio::sync::watch;

/// A cooperative cancellation signal shared by every task in a run.
///
/// Cloning a [`CancellationToken`] shares the same underlying flag; calling
/// [`CancellationToken::cancel`] on any clone is observed by all of them.
#[derive(Clone, Debug)]
pub struct CancellationToken {
    tx: watch::Sender<bool>,
}

impl CancellationToken {
    /// Creates a new, not-yet-cancelled token.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        // Ignore the error: it only means every receiver has been dropped,
        // which is harmless here.
        let _ = self.tx.send(true);
    }

    /// Returns whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once cancellation has been requested. Resolves immediately
    /// if it already has been.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        if *rx.borrow() {
            return;
        }
        // The sender is always held by `self`, so this can't fail.
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

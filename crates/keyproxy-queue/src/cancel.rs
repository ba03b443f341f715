use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// A lightweight, clonable cancellation signal — not `tokio_util`'s
/// `CancellationToken`, just the one operation the Dispatch Queue needs
/// (spec.md §9 design note: the teacher's own queue-like code doesn't pull
/// in `tokio-util` either).
///
/// `Notify::notify_waiters` alone only wakes tasks already polling
/// `notified()`; a `cancel()` landing before a later `cancelled().await` call
/// (e.g. across an await point between enqueue and the dispatch `select!`)
/// would otherwise be lost. The `AtomicBool` makes cancellation sticky: set
/// it before notifying, and check it before waiting.
#[derive(Clone)]
pub struct CancelToken(Arc<Inner>);

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(Inner {
            cancelled: AtomicBool::new(false),
            notify: Notify::new(),
        }))
    }

    /// Signal cancellation to every waiter on this token, past and future.
    pub fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::SeqCst);
        self.0.notify.notify_waiters();
    }

    /// Resolves once [`CancelToken::cancel`] is called, including if it was
    /// already called before this call started.
    pub async fn cancelled(&self) {
        if self.0.cancelled.load(Ordering::SeqCst) {
            return;
        }
        self.0.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancelled_resolves_after_cancel() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });
        tokio::task::yield_now().await;
        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn cancel_before_cancelled_is_not_lost() {
        let token = CancelToken::new();
        token.cancel();
        // No waiter was ever registered with `Notify` before this call — a
        // plain `notify_waiters()`-only implementation would hang here.
        tokio::time::timeout(std::time::Duration::from_millis(50), token.cancelled())
            .await
            .expect("cancelled() must resolve immediately for an already-cancelled token");
    }
}

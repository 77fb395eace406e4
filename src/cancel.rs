//! Cooperative cancellation token.
//!
//! A token can be cloned and shared across tasks. `cancel()` on any clone is
//! observed by every clone and by every child token; cancelling a child does
//! not affect its parent. Tasks either poll [`CancellationToken::is_cancelled`]
//! at phase boundaries or await [`CancellationToken::cancelled`] alongside an
//! I/O future in `tokio::select!`.
//!
//! # Example
//!
//! ```
//! use pipe_rpc::CancellationToken;
//!
//! let server_token = CancellationToken::new();
//! let session_token = server_token.child_token();
//!
//! server_token.cancel();
//! assert!(session_token.is_cancelled());
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::Notify;

use crate::error::PipeRpcError;

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
    children: Mutex<Vec<Weak<Inner>>>,
}

impl Inner {
    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.notify.notify_waiters();

        let children = std::mem::take(
            &mut *self
                .children
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel();
        }
    }
}

/// A cancellation token for cooperative cancellation of async operations.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    /// Create a new cancellation token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    ///
    /// All clones and all child tokens observe the cancellation.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Create a token that is cancelled together with this one but can also
    /// be cancelled on its own.
    pub fn child_token(&self) -> Self {
        let child = Self::new();
        let mut children = self
            .inner
            .children
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if self.is_cancelled() {
            child.inner.cancelled.store(true, Ordering::SeqCst);
        } else {
            children.retain(|weak| weak.strong_count() > 0);
            children.push(Arc::downgrade(&child.inner));
        }
        child
    }

    /// Wait until cancellation is requested.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Return `Err(Cancelled)` if cancellation has been requested.
    pub fn check(&self) -> Result<(), PipeRpcError> {
        if self.is_cancelled() {
            Err(PipeRpcError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_new_token_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.check().is_ok());
    }

    #[test]
    fn test_clone_shares_state() {
        let token1 = CancellationToken::new();
        let token2 = token1.clone();

        token1.cancel();

        assert!(token2.is_cancelled());
        assert!(matches!(token2.check(), Err(PipeRpcError::Cancelled)));
    }

    #[test]
    fn test_parent_cancels_child() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        let grandchild = child.child_token();

        parent.cancel();

        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
    }

    #[test]
    fn test_child_does_not_cancel_parent() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        let sibling = parent.child_token();

        child.cancel();

        assert!(!parent.is_cancelled());
        assert!(!sibling.is_cancelled());
    }

    #[test]
    fn test_child_of_cancelled_parent() {
        let parent = CancellationToken::new();
        parent.cancel();
        assert!(parent.child_token().is_cancelled());
    }

    #[test]
    fn test_dropped_children_are_pruned() {
        let parent = CancellationToken::new();
        for _ in 0..100 {
            drop(parent.child_token());
        }
        let _kept = parent.child_token();
        assert_eq!(parent.inner.children.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let parent = CancellationToken::new();
        let child = parent.child_token();

        let waiter = tokio::spawn(async move { child.cancelled().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        parent.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_returns_immediately_when_already_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        tokio::time::timeout(Duration::from_millis(100), token.cancelled())
            .await
            .unwrap();
    }
}

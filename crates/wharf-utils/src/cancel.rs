//! Request cancellation.
//!
//! Every externally observable engine operation accepts a [`CancelToken`].
//! The owner of a request (typically the HTTP layer noticing a client
//! disconnect) keeps the [`CancelHandle`] and fires it once; clones of the
//! token observe the cancellation from any task.

use tokio::sync::watch;

/// Fires cancellation for all tokens cloned from the pair.
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Observer side of a cancellation pair. The default token never cancels.
#[derive(Clone, Default)]
pub struct CancelToken {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelToken {
    /// Creates a connected handle/token pair.
    pub fn new() -> (CancelHandle, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, CancelToken { rx: Some(rx) })
    }

    /// A token that can never be cancelled, for callers without a request
    /// scope (tests, maintenance tasks).
    pub fn never() -> CancelToken {
        CancelToken::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves when the handle fires. Pends forever on a never-token or
    /// when the handle is dropped without cancelling.
    pub async fn cancelled(&self) {
        let Some(rx) = &self.rx else {
            return futures::future::pending().await;
        };
        let mut rx = rx.clone();
        if *rx.borrow() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
        futures::future::pending().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_observed_by_clones() {
        let (handle, token) = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());

        handle.cancel();
        assert!(token.is_cancelled());
        clone.cancelled().await;
    }

    #[tokio::test]
    async fn test_never_token_pends() {
        let token = CancelToken::never();
        assert!(!token.is_cancelled());
        let waited = tokio::time::timeout(Duration::from_millis(10), token.cancelled()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_dropped_handle_does_not_cancel() {
        let (handle, token) = CancelToken::new();
        drop(handle);
        assert!(!token.is_cancelled());
        let waited = tokio::time::timeout(Duration::from_millis(10), token.cancelled()).await;
        assert!(waited.is_err());
    }
}

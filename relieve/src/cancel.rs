//! Cooperative cancellation for pipeline queries.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use crate::error::{Result, TerrainError};

/// A cloneable token that abandons in-flight work when cancelled.
///
/// Every async stage of a query (index load, fetch, decode, sampling loop) is
/// raced against the token, so a superseded profile request stops at the next
/// await point and returns [`TerrainError::Cancelled`]. Work already handed to
/// a shared cache load keeps running for the other waiters.
///
/// # Example
///
/// ```
/// use relieve::CancelToken;
///
/// let token = CancelToken::new();
/// let handle = token.clone();
/// assert!(!handle.is_cancelled());
/// token.cancel();
/// assert!(handle.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancelToken {
    state: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// Create a token that is not cancelled.
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self {
            state: Arc::new(state),
        }
    }

    /// Cancel the token and every clone of it.
    pub fn cancel(&self) {
        self.state.send_replace(true);
    }

    /// Whether the token has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        *self.state.borrow()
    }

    /// Resolve once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Fail fast if the token is already cancelled.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(TerrainError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Run `fut` to completion unless the token is cancelled first.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(TerrainError::Cancelled),
            result = fut => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_completes_when_not_cancelled() {
        let token = CancelToken::new();
        let value = token.run(async { Ok(42) }).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_run_fails_fast_when_already_cancelled() {
        let token = CancelToken::new();
        token.cancel();
        let result = token.run(async { Ok(1) }).await;
        assert!(matches!(result, Err(TerrainError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_pending_work() {
        let token = CancelToken::new();
        let canceller = token.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = token
            .run(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(TerrainError::Cancelled)));
    }
}

//! Fixed-window rate limiter.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::error::{LockstepError, Result};
use crate::keys;
use crate::store::Store;

/// Admits up to `permits` requests per window of wall-clock time.
///
/// The counter resets only when the window's expiry elapses, so a client
/// can observe up to 2x `permits` across a window boundary; that is the
/// accepted property of the fixed-window policy, not a defect. Rejected
/// requests still count: the counter keeps incrementing past the ceiling
/// and a rejection never gives a slot back.
pub struct FixedWindow {
    store: Arc<dyn Store>,
    key: String,
    window: Duration,
    permits: u64,
}

impl FixedWindow {
    /// Create a limiter. `window` and `permits` must be positive; `name`
    /// must be non-empty after trimming.
    pub fn new(store: Arc<dyn Store>, name: &str, window: Duration, permits: u64) -> Result<Self> {
        let name = keys::validate_name(name)?;
        if window.is_zero() {
            return Err(LockstepError::InvalidArgument(
                "window must be greater than 0".to_string(),
            ));
        }
        if permits == 0 {
            return Err(LockstepError::InvalidArgument(
                "permits must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            store,
            key: keys::namespaced(keys::WINDOW, name),
            window,
            permits,
        })
    }

    /// Admit or reject one request, in a single atomic round trip.
    pub async fn acquire(&self) -> Result<bool> {
        let count = self.store.incr_window(&self.key, self.window).await?;
        let admitted = count <= self.permits;
        if admitted {
            trace!(key = %self.key, count, "request admitted");
        } else {
            debug!(key = %self.key, count, limit = self.permits, "fixed window exhausted");
        }
        Ok(admitted)
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn permits(&self) -> u64 {
        self.permits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn limiter(window: Duration, permits: u64) -> FixedWindow {
        FixedWindow::new(Arc::new(MemoryStore::new()), "api", window, permits).unwrap()
    }

    #[tokio::test]
    async fn test_admits_up_to_permits_then_rejects() {
        let limiter = limiter(Duration::from_secs(1), 3);
        assert!(limiter.acquire().await.unwrap());
        assert!(limiter.acquire().await.unwrap());
        assert!(limiter.acquire().await.unwrap());
        assert!(!limiter.acquire().await.unwrap());
    }

    #[tokio::test]
    async fn test_window_reset_restores_permits() {
        let limiter = limiter(Duration::from_millis(150), 2);
        assert!(limiter.acquire().await.unwrap());
        assert!(limiter.acquire().await.unwrap());
        assert!(!limiter.acquire().await.unwrap());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(limiter.acquire().await.unwrap());
    }

    #[tokio::test]
    async fn test_rejections_do_not_give_back_slots() {
        let limiter = limiter(Duration::from_secs(5), 2);
        assert!(limiter.acquire().await.unwrap());
        assert!(limiter.acquire().await.unwrap());
        // every further call in the window is rejected, however many
        for _ in 0..5 {
            assert!(!limiter.acquire().await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_constructor_validation() {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        assert!(FixedWindow::new(store.clone(), "api", Duration::ZERO, 3).is_err());
        assert!(FixedWindow::new(store.clone(), "api", Duration::from_secs(1), 0).is_err());
        assert!(FixedWindow::new(store, "  ", Duration::from_secs(1), 3).is_err());
    }
}

//! Continuous-refill token bucket.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::trace;

use crate::error::{LockstepError, Result};
use crate::keys;
use crate::store::Store;

/// Grants up to `capacity` permits from a bucket that refills at
/// `refill_per_sec` tokens per second.
///
/// Refill is lazy: no background process adds tokens. Every acquire sends
/// the current wall clock to the store, which reconstructs the token count
/// as of now from the last persisted state, grants, and persists — all in
/// one atomic round trip. A bucket starts empty on first touch and fills
/// from there.
pub struct TokenBucket {
    store: Arc<dyn Store>,
    key: String,
    capacity: u64,
    refill_per_sec: f64,
}

impl TokenBucket {
    /// Create a bucket. `capacity` and `refill_per_sec` must be positive;
    /// `name` must be non-empty after trimming.
    pub fn new(
        store: Arc<dyn Store>,
        name: &str,
        capacity: u64,
        refill_per_sec: f64,
    ) -> Result<Self> {
        let name = keys::validate_name(name)?;
        if capacity == 0 {
            return Err(LockstepError::InvalidArgument(
                "capacity must be greater than 0".to_string(),
            ));
        }
        if !(refill_per_sec > 0.0) || !refill_per_sec.is_finite() {
            return Err(LockstepError::InvalidArgument(
                "refill_per_sec must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            store,
            key: keys::namespaced(keys::BUCKET, name),
            capacity,
            refill_per_sec,
        })
    }

    /// Take up to `requested` permits. Returns the number actually
    /// granted, in `0..=min(requested, capacity)`; requests above capacity
    /// are clamped before evaluation. `requested` must be positive.
    pub async fn acquire(&self, requested: u64) -> Result<u64> {
        if requested == 0 {
            return Err(LockstepError::InvalidArgument(
                "permits must be greater than 0".to_string(),
            ));
        }
        let requested = requested.min(self.capacity);
        let now_ms = Utc::now().timestamp_millis();
        let granted = self
            .store
            .take_tokens(&self.key, self.capacity, self.refill_per_sec, now_ms, requested)
            .await?;
        trace!(key = %self.key, requested, granted, "token bucket acquire");
        Ok(granted)
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn refill_per_sec(&self) -> f64 {
        self.refill_per_sec
    }

    /// Interval after which a whole token has accrued. Useful as a retry
    /// hint when a request gets a partial or zero grant.
    pub fn refill_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.refill_per_sec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn bucket(capacity: u64, rate: f64) -> TokenBucket {
        TokenBucket::new(Arc::new(MemoryStore::new()), "throttle", capacity, rate).unwrap()
    }

    #[tokio::test]
    async fn test_starts_empty_then_fills() {
        let bucket = bucket(10, 20.0);
        // first touch creates an empty bucket
        assert_eq!(bucket.acquire(5).await.unwrap(), 0);

        // at 20 tokens/s, half a second fills the bucket
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(bucket.acquire(10).await.unwrap(), 10);

        // drained again
        assert_eq!(bucket.acquire(1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_request_above_capacity_is_clamped() {
        let bucket = bucket(5, 50.0);
        bucket.acquire(1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        // 0.4s * 50/s = 20 accrued, but capacity and the clamp cap at 5
        assert_eq!(bucket.acquire(100).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_partial_grant() {
        let bucket = bucket(10, 10.0);
        bucket.acquire(1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(320)).await;
        // ~3 tokens accrued; ask for 8, get what's there
        let granted = bucket.acquire(8).await.unwrap();
        assert!(granted >= 2 && granted <= 4, "granted {}", granted);
    }

    #[tokio::test]
    async fn test_constructor_and_argument_validation() {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        assert!(TokenBucket::new(store.clone(), "b", 0, 1.0).is_err());
        assert!(TokenBucket::new(store.clone(), "b", 10, 0.0).is_err());
        assert!(TokenBucket::new(store.clone(), "b", 10, f64::NAN).is_err());
        assert!(TokenBucket::new(store.clone(), "  ", 10, 1.0).is_err());

        let bucket = TokenBucket::new(store, "b", 10, 1.0).unwrap();
        assert!(matches!(
            bucket.acquire(0).await,
            Err(LockstepError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_refill_interval() {
        let bucket = bucket(10, 4.0);
        assert_eq!(bucket.refill_interval(), Duration::from_millis(250));
    }
}

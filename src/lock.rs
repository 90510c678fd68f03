//! Distributed mutual-exclusion lock with lease renewal.
//!
//! The lock record lives in the shared store: key = namespaced lock name,
//! value = the holder's token, expiry = the lease. Acquire is a
//! conditional create; renew and release compare the stored token to the
//! caller's inside the same atomic store operation as the mutation, so a
//! holder can never be displaced by anyone else's renew or release.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::error::{LockstepError, Result};
use crate::keys;
use crate::store::Store;
use crate::timer::WheelTimer;

/// Separator between the owner identity and its disambiguator.
const TOKEN_SEPARATOR: &str = "-";

/// Owner token stored as the lock record's value.
///
/// Composed as `<owner>-<worker-id>` so two logical owners sharing one
/// process-level identity (different worker tasks of the same client, for
/// instance) cannot release or renew each other's lock. Renew and release
/// compare the full composed token byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
    /// Compose a token from a stable owner identity and a worker id.
    pub fn new(owner: &str, worker_id: u64) -> Result<Self> {
        let owner = owner.trim();
        if owner.is_empty() {
            return Err(LockstepError::InvalidArgument(
                "token can't be empty".to_string(),
            ));
        }
        Ok(Self(format!("{}{}{}", owner, TOKEN_SEPARATOR, worker_id)))
    }

    /// Generate a token with a random (uuid v4) owner identity.
    pub fn generate(worker_id: u64) -> Self {
        Self(format!("{}{}{}", Uuid::new_v4(), TOKEN_SEPARATOR, worker_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle to a running auto-renewal chain.
///
/// The chain stops on its own when renewal fails; `stop` ends it early.
/// Dropping the handle does not stop the chain.
pub struct RenewalHandle {
    task: JoinHandle<()>,
}

impl RenewalHandle {
    /// Stop the renewal chain. The lease keeps whatever expiry the last
    /// successful renewal gave it.
    pub fn stop(&self) {
        self.task.abort();
    }

    /// Whether the chain has terminated, by failure or by `stop`.
    pub fn is_stopped(&self) -> bool {
        self.task.is_finished()
    }
}

/// A distributed lock bound to a logical name and a holder token.
///
/// Every operation is one atomic round trip to the shared store. A `false`
/// result means the lock was unavailable or not held by this token; store
/// connectivity problems surface as
/// [`Transport`](crate::error::LockstepError::Transport) errors instead.
pub struct Lock {
    store: Arc<dyn Store>,
    timer: Arc<WheelTimer>,
    key: String,
    token: LockToken,
}

impl Lock {
    /// Create a lock instance. `name` must be non-empty after trimming.
    pub fn new(
        store: Arc<dyn Store>,
        timer: Arc<WheelTimer>,
        name: &str,
        token: LockToken,
    ) -> Result<Self> {
        let name = keys::validate_name(name)?;
        Ok(Self {
            store,
            timer,
            key: keys::namespaced(keys::LOCK, name),
            token,
        })
    }

    /// The namespaced store key of the lock record.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &LockToken {
        &self.token
    }

    /// Try to take the lock with the given lease duration. Returns whether
    /// this token now holds it.
    pub async fn acquire(&self, ttl: Duration) -> Result<bool> {
        ensure_positive(ttl, "ttl")?;
        let acquired = self
            .store
            .acquire_lock(&self.key, self.token.as_str(), ttl)
            .await?;
        trace!(key = %self.key, acquired, "lock acquire");
        Ok(acquired)
    }

    /// Extend the lease to expire `ttl` from now, if this token still
    /// holds the lock.
    pub async fn renew(&self, ttl: Duration) -> Result<bool> {
        ensure_positive(ttl, "ttl")?;
        self.store
            .renew_lock(&self.key, self.token.as_str(), ttl)
            .await
    }

    /// Release the lock, if this token holds it.
    pub async fn release(&self) -> Result<bool> {
        let released = self
            .store
            .release_lock(&self.key, self.token.as_str())
            .await?;
        trace!(key = %self.key, released, "lock release");
        Ok(released)
    }

    /// Start watchdog renewal: every `period`, renew the lease for `ttl`.
    ///
    /// Requires `0 < period < ttl` so renewal lands before expiry under
    /// normal conditions; pick the margin to cover store latency. The
    /// chain stops silently on the first failed renewal (ownership lost or
    /// released), on a transport error, or when the timer shuts down —
    /// failures are logged, never surfaced, because no caller waits on a
    /// renewal tick.
    pub fn schedule_auto_renewal(&self, period: Duration, ttl: Duration) -> Result<RenewalHandle> {
        ensure_positive(period, "period")?;
        ensure_positive(ttl, "ttl")?;
        if period >= ttl {
            return Err(LockstepError::InvalidArgument(
                "period must be strictly less than ttl".to_string(),
            ));
        }

        let store = Arc::clone(&self.store);
        let timer = Arc::clone(&self.timer);
        let key = self.key.clone();
        let token = self.token.as_str().to_string();

        // A loop, not a self-rescheduling callback: each pass parks on the
        // wheel for one period and then issues a single renewal round trip.
        let task = tokio::spawn(async move {
            loop {
                if timer.sleep(period).await.is_err() {
                    debug!(key = %key, "renewal stopped: timer shut down");
                    break;
                }
                match store.renew_lock(&key, &token, ttl).await {
                    Ok(true) => {
                        trace!(key = %key, "lease renewed");
                    }
                    Ok(false) => {
                        debug!(key = %key, "renewal stopped: ownership lost");
                        break;
                    }
                    Err(e) => {
                        warn!(key = %key, error = %e, "renewal stopped: store error");
                        break;
                    }
                }
            }
        });
        Ok(RenewalHandle { task })
    }
}

fn ensure_positive(value: Duration, what: &str) -> Result<()> {
    if value.is_zero() {
        return Err(LockstepError::InvalidArgument(format!(
            "{} must be greater than 0",
            what
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    const TTL: Duration = Duration::from_millis(120);

    struct Fixture {
        store: Arc<MemoryStore>,
        timer: Arc<WheelTimer>,
    }

    impl Fixture {
        fn new() -> Self {
            let _ = tracing_subscriber::fmt().with_test_writer().try_init();
            Self {
                store: Arc::new(MemoryStore::new()),
                timer: Arc::new(WheelTimer::new(Duration::from_millis(10), 8).unwrap()),
            }
        }

        fn lock(&self, name: &str, owner: &str, worker: u64) -> Lock {
            Lock::new(
                self.store.clone(),
                self.timer.clone(),
                name,
                LockToken::new(owner, worker).unwrap(),
            )
            .unwrap()
        }
    }

    #[test]
    fn test_token_composition() {
        let token = LockToken::new("client-7", 42).unwrap();
        assert_eq!(token.as_str(), "client-7-42");
        assert!(LockToken::new("   ", 1).is_err());

        let generated = LockToken::generate(3);
        assert!(generated.as_str().ends_with("-3"));
    }

    #[tokio::test]
    async fn test_second_holder_is_rejected_before_expiry() {
        let fx = Fixture::new();
        let first = fx.lock("jobs", "a", 1);
        let second = fx.lock("jobs", "b", 1);

        assert!(first.acquire(TTL).await.unwrap());
        assert!(!second.acquire(TTL).await.unwrap());
        assert_eq!(fx.store.lock_holder("lock:jobs"), Some("a-1".to_string()));
    }

    #[tokio::test]
    async fn test_release_by_stranger_leaves_holder_intact() {
        let fx = Fixture::new();
        let holder = fx.lock("jobs", "a", 1);
        let stranger = fx.lock("jobs", "b", 9);

        assert!(holder.acquire(TTL).await.unwrap());
        assert!(!stranger.release().await.unwrap());
        assert_eq!(fx.store.lock_holder("lock:jobs"), Some("a-1".to_string()));

        assert!(holder.release().await.unwrap());
        assert!(!holder.release().await.unwrap(), "already released");
    }

    #[tokio::test]
    async fn test_worker_id_disambiguates_same_owner() {
        let fx = Fixture::new();
        let worker_one = fx.lock("jobs", "client", 1);
        let worker_two = fx.lock("jobs", "client", 2);

        assert!(worker_one.acquire(TTL).await.unwrap());
        assert!(!worker_two.renew(TTL).await.unwrap());
        assert!(!worker_two.release().await.unwrap());
        assert!(worker_one.renew(TTL).await.unwrap());
    }

    #[tokio::test]
    async fn test_renew_only_by_holder() {
        let fx = Fixture::new();
        let holder = fx.lock("jobs", "a", 1);
        let other = fx.lock("jobs", "b", 1);

        assert!(holder.acquire(TTL).await.unwrap());
        assert!(holder.renew(TTL).await.unwrap());
        assert!(!other.renew(TTL).await.unwrap());
    }

    #[tokio::test]
    async fn test_usage_errors_fail_fast() {
        let fx = Fixture::new();
        let lock = fx.lock("jobs", "a", 1);

        assert!(matches!(
            lock.acquire(Duration::ZERO).await,
            Err(LockstepError::InvalidArgument(_))
        ));
        assert!(matches!(
            lock.renew(Duration::ZERO).await,
            Err(LockstepError::InvalidArgument(_))
        ));
        assert!(Lock::new(
            fx.store.clone(),
            fx.timer.clone(),
            "   ",
            LockToken::new("a", 1).unwrap()
        )
        .is_err());
    }

    #[tokio::test]
    async fn test_auto_renewal_keeps_lease_alive() {
        let fx = Fixture::new();
        let holder = fx.lock("jobs", "a", 1);
        let contender = fx.lock("jobs", "b", 1);

        assert!(holder.acquire(TTL).await.unwrap());
        let watchdog = holder
            .schedule_auto_renewal(Duration::from_millis(40), TTL)
            .unwrap();

        // well past the original lease; the watchdog kept it alive
        tokio::time::sleep(TTL * 3).await;
        assert!(!contender.acquire(TTL).await.unwrap());
        assert!(!watchdog.is_stopped());

        assert!(holder.release().await.unwrap());
        watchdog.stop();
    }

    #[tokio::test]
    async fn test_auto_renewal_stops_after_release() {
        let fx = Fixture::new();
        let holder = fx.lock("jobs", "a", 1);

        assert!(holder.acquire(TTL).await.unwrap());
        let watchdog = holder
            .schedule_auto_renewal(Duration::from_millis(30), TTL)
            .unwrap();

        assert!(holder.release().await.unwrap());

        // the next renewal tick observes the deleted record and stops
        let mut stopped = false;
        for _ in 0..50 {
            if watchdog.is_stopped() {
                stopped = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(stopped, "renewal chain kept running after release");

        // a released lock is never revived by a stale renewal
        assert!(fx.store.lock_holder("lock:jobs").is_none());
    }

    #[tokio::test]
    async fn test_auto_renewal_requires_period_below_ttl() {
        let fx = Fixture::new();
        let lock = fx.lock("jobs", "a", 1);
        assert!(lock.schedule_auto_renewal(TTL, TTL).is_err());
        assert!(lock
            .schedule_auto_renewal(TTL + Duration::from_millis(1), TTL)
            .is_err());
    }

    #[tokio::test]
    async fn test_auto_renewal_stops_on_timer_shutdown() {
        let fx = Fixture::new();
        let holder = fx.lock("jobs", "a", 1);

        assert!(holder.acquire(TTL).await.unwrap());
        let watchdog = holder
            .schedule_auto_renewal(Duration::from_millis(30), TTL)
            .unwrap();

        fx.timer.shutdown().await;

        let mut stopped = false;
        for _ in 0..50 {
            if watchdog.is_stopped() {
                stopped = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(stopped, "renewal chain survived timer shutdown");
    }
}

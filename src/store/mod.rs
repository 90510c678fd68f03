//! Shared store abstraction.
//!
//! Every coordination primitive performs exactly one round trip per call,
//! and every compound check-then-act (compare a lock token, then delete or
//! extend; read a bucket, then refill and drain) executes as a single
//! atomic unit *inside* the store. Splitting these into a client-side read
//! followed by a write would reintroduce the races this crate exists to
//! avoid, so the trait only exposes the already-compounded operations.

mod memory;
mod redis;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub use memory::MemoryStore;
pub use redis::RedisStore;

/// The atomic operations a shared store must provide.
///
/// Implementations guarantee per-key linearizable execution of each
/// method; callers rely on nothing else. All methods return
/// [`LockstepError::Transport`](crate::error::LockstepError::Transport)
/// when the store cannot be reached, which is distinct from the logical
/// `false`/`0` outcomes.
#[async_trait]
pub trait Store: Send + Sync {
    /// Create the lock record with `token` and lease `ttl`, only if the
    /// key is absent. Returns whether the record was created.
    async fn acquire_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool>;

    /// If the stored value equals `token`, extend the lease so it expires
    /// `ttl` from now. Returns whether the extension occurred.
    async fn renew_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool>;

    /// If the stored value equals `token`, delete the record. Returns
    /// whether the deletion occurred.
    async fn release_lock(&self, key: &str, token: &str) -> Result<bool>;

    /// Increment the fixed-window counter, setting its expiry to `window`
    /// on the first write of the window. Returns the new count.
    async fn incr_window(&self, key: &str, window: Duration) -> Result<u64>;

    /// Lazy token bucket refill and drain: compute the tokens available at
    /// `now_ms` from the stored count and timestamp, grant
    /// `min(requested, floor(available))`, persist the remainder and
    /// `now_ms`, and return the grant. An absent record is treated as an
    /// empty bucket with a fresh timestamp.
    async fn take_tokens(
        &self,
        key: &str,
        capacity: u64,
        refill_per_sec: f64,
        now_ms: i64,
        requested: u64,
    ) -> Result<u64>;
}

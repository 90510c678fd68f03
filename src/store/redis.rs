//! Redis-backed store implementation.
//!
//! The conditional create is a plain `SET key value NX PX ms`; everything
//! compound runs as a server-side Lua script, which Redis executes
//! atomically. Scripts are sent by hash (`EVALSHA`) after first use.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Script;
use tracing::debug;

use crate::error::Result;

use super::Store;

/// Compare the stored token, then delete.
const RELEASE_SCRIPT: &str = r"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end";

/// Compare the stored token, then extend the expiry (milliseconds).
const RENEW_SCRIPT: &str = r"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('pexpire', KEYS[1], ARGV[2])
else
    return 0
end";

/// Increment the window counter, arming the expiry on the first write.
/// Returns the new count; the admit decision happens in the limiter.
const WINDOW_SCRIPT: &str = r"
local count = redis.call('incr', KEYS[1])
if count == 1 then
    redis.call('pexpire', KEYS[1], ARGV[1])
end
return count";

/// Lazy token bucket refill and drain.
///
/// ARGV: capacity, refill per second, caller clock in ms, requested
/// permits. An absent record starts as an empty bucket stamped now. The
/// grant is whole tokens; the fractional remainder stays in the record so
/// accrual is never lost to rounding.
const BUCKET_SCRIPT: &str = r"
local capacity = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local requested = tonumber(ARGV[4])
local state = redis.call('hmget', KEYS[1], 'tokens', 'stamp')
local tokens = tonumber(state[1])
local stamp = tonumber(state[2])
if tokens == nil or stamp == nil then
    tokens = 0
    stamp = now
end
local elapsed = now - stamp
if elapsed < 0 then
    elapsed = 0
end
local available = tokens + elapsed / 1000.0 * rate
if available > capacity then
    available = capacity
end
local granted = math.floor(available)
if granted > requested then
    granted = requested
end
redis.call('hset', KEYS[1], 'tokens', available - granted, 'stamp', now)
return granted";

/// [`Store`] implementation over a multiplexed Redis connection.
///
/// The connection is cheap to clone; each operation clones it and issues
/// a single command or script invocation.
#[derive(Debug)]
pub struct RedisStore {
    conn: MultiplexedConnection,
    release: Script,
    renew: Script,
    window: Script,
    bucket: Script,
}

impl RedisStore {
    /// Connect to the store at the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        debug!(url = %url, "connected to redis store");
        Ok(Self::with_connection(conn))
    }

    /// Connect using the settings in a [`StoreConfig`](crate::config::StoreConfig).
    pub async fn from_config(config: &crate::config::StoreConfig) -> Result<Self> {
        Self::connect(&config.url).await
    }

    /// Wrap an existing multiplexed connection.
    pub fn with_connection(conn: MultiplexedConnection) -> Self {
        Self {
            conn,
            release: Script::new(RELEASE_SCRIPT),
            renew: Script::new(RENEW_SCRIPT),
            window: Script::new(WINDOW_SCRIPT),
            bucket: Script::new(BUCKET_SCRIPT),
        }
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn acquire_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn renew_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let extended: i64 = self
            .renew
            .key(key)
            .arg(token)
            .arg(ttl.as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;
        Ok(extended == 1)
    }

    async fn release_lock(&self, key: &str, token: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .release
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }

    async fn incr_window(&self, key: &str, window: Duration) -> Result<u64> {
        let mut conn = self.conn.clone();
        let count: u64 = self
            .window
            .key(key)
            .arg(window.as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn take_tokens(
        &self,
        key: &str,
        capacity: u64,
        refill_per_sec: f64,
        now_ms: i64,
        requested: u64,
    ) -> Result<u64> {
        let mut conn = self.conn.clone();
        let granted: u64 = self
            .bucket
            .key(key)
            .arg(capacity)
            .arg(refill_per_sec)
            .arg(now_ms)
            .arg(requested)
            .invoke_async(&mut conn)
            .await?;
        Ok(granted)
    }
}

//! In-process store implementation.
//!
//! Mirrors the Redis semantics for single-process use and for tests.
//! Per-key atomicity comes from the map's entry locking: every operation
//! holds the key's shard entry for the whole read-modify-write. Expiry is
//! lazy; an expired record is indistinguishable from an absent one.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::Result;

use super::Store;

#[derive(Debug, Clone)]
enum Record {
    Lock { token: String, expires_at: Instant },
    Window { count: u64, expires_at: Instant },
    Bucket { tokens: f64, stamp_ms: i64 },
}

/// [`Store`] implementation backed by an in-process concurrent map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<String, Record>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current holder token of a live lock record, if any.
    pub(crate) fn lock_holder(&self, key: &str) -> Option<String> {
        match self.records.get(key).map(|r| r.value().clone()) {
            Some(Record::Lock { token, expires_at }) if expires_at > Instant::now() => Some(token),
            _ => None,
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn acquire_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let fresh = Record::Lock {
            token: token.to_string(),
            expires_at: now + ttl,
        };
        match self.records.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => match occupied.get() {
                Record::Lock { expires_at, .. } if *expires_at > now => Ok(false),
                _ => {
                    // expired lease counts as absent
                    occupied.insert(fresh);
                    Ok(true)
                }
            },
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                Ok(true)
            }
        }
    }

    async fn renew_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        match self.records.get_mut(key).as_deref_mut() {
            Some(Record::Lock {
                token: held,
                expires_at,
            }) if *expires_at > now && held.as_str() == token => {
                *expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_lock(&self, key: &str, token: &str) -> Result<bool> {
        let now = Instant::now();
        let removed = self.records.remove_if(key, |_, record| {
            matches!(
                record,
                Record::Lock { token: held, expires_at } if *expires_at > now && held.as_str() == token
            )
        });
        Ok(removed.is_some())
    }

    async fn incr_window(&self, key: &str, window: Duration) -> Result<u64> {
        let now = Instant::now();
        let mut entry = self
            .records
            .entry(key.to_string())
            .or_insert_with(|| Record::Window {
                count: 0,
                expires_at: now + window,
            });
        match entry.value_mut() {
            Record::Window { count, expires_at } => {
                if *expires_at <= now {
                    // previous window elapsed; start the next one
                    *count = 0;
                    *expires_at = now + window;
                }
                *count += 1;
                Ok(*count)
            }
            other => {
                *other = Record::Window {
                    count: 1,
                    expires_at: now + window,
                };
                Ok(1)
            }
        }
    }

    async fn take_tokens(
        &self,
        key: &str,
        capacity: u64,
        refill_per_sec: f64,
        now_ms: i64,
        requested: u64,
    ) -> Result<u64> {
        let mut entry = self
            .records
            .entry(key.to_string())
            .or_insert_with(|| Record::Bucket {
                tokens: 0.0,
                stamp_ms: now_ms,
            });
        match entry.value_mut() {
            Record::Bucket { tokens, stamp_ms } => {
                let elapsed_ms = (now_ms - *stamp_ms).max(0) as f64;
                let available =
                    (*tokens + elapsed_ms / 1000.0 * refill_per_sec).min(capacity as f64);
                let granted = (available.floor() as u64).min(requested);
                *tokens = available - granted as f64;
                *stamp_ms = now_ms;
                Ok(granted)
            }
            other => {
                *other = Record::Bucket {
                    tokens: 0.0,
                    stamp_ms: now_ms,
                };
                Ok(0)
            }
        }
    }
}

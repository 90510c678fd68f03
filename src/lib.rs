//! Lockstep - Distributed Coordination Primitives
//!
//! This crate implements process-external coordination on top of a shared,
//! atomic key-value store: a mutual-exclusion lock with watchdog lease
//! renewal, a fixed-window rate limiter, and a continuous-refill token
//! bucket, plus the hashed-wheel timer that drives renewal. Correctness is
//! derived from atomic operations executed *by the store* (single commands
//! or server-side scripts), never from in-process synchronization.

pub mod config;
pub mod error;
pub mod keys;
pub mod limit;
pub mod lock;
pub mod store;
pub mod timer;

pub use config::{LockstepConfig, StoreConfig, TimerConfig};
pub use error::{LockstepError, Result};
pub use limit::{FixedWindow, TokenBucket};
pub use lock::{Lock, LockToken, RenewalHandle};
pub use store::{MemoryStore, RedisStore, Store};
pub use timer::{TimerHandle, WheelTimer};

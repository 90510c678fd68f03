//! Error types for the Lockstep library.

use thiserror::Error;

/// Main error type for Lockstep operations.
///
/// Logical non-acquisition (lock already held, window exhausted, bucket
/// empty) is never an error; operations report it through their normal
/// `bool`/count results. Errors cover misuse and transport failure only.
#[derive(Error, Debug)]
pub enum LockstepError {
    /// Invalid constructor or call arguments, rejected before any store
    /// round trip.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The shared store could not be reached or a command failed in
    /// transit. Distinct from a logical "not acquired" result; callers
    /// retry these with backoff.
    #[error("store transport error: {0}")]
    Transport(#[from] redis::RedisError),

    /// The wheel timer has been shut down and rejects new tasks.
    #[error("timer is shut down")]
    TimerShutdown,

    /// Configuration-related errors
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Lockstep operations.
pub type Result<T> = std::result::Result<T, LockstepError>;

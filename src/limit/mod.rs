//! Rate limiting over the shared store.

mod bucket;
mod window;

pub use bucket::TokenBucket;
pub use window::FixedWindow;

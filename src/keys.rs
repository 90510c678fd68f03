//! Key naming conventions for store records.
//!
//! Each primitive namespaces its records so a lock named `jobs` and a
//! limiter named `jobs` never collide. The separator follows the usual
//! `kind:name` store convention.

use crate::error::{LockstepError, Result};

/// Separator between the record kind and the logical name.
pub const SEPARATOR: &str = ":";

/// Namespace for lock records.
pub const LOCK: &str = "lock";

/// Namespace for fixed-window counter records.
pub const WINDOW: &str = "window";

/// Namespace for token bucket records.
pub const BUCKET: &str = "bucket";

/// Validate a logical name: trimmed and non-empty.
pub fn validate_name(name: &str) -> Result<&str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(LockstepError::InvalidArgument(
            "name can't be empty".to_string(),
        ));
    }
    Ok(trimmed)
}

/// Build the namespaced store key for a record kind and logical name.
pub fn namespaced(kind: &str, name: &str) -> String {
    format!("{}{}{}", kind, SEPARATOR, name)
}

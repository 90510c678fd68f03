//! Configuration management for Lockstep.

use serde::{Deserialize, Serialize};

/// Main configuration for Lockstep primitives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockstepConfig {
    /// Shared store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Wheel timer configuration
    #[serde(default)]
    pub timer: TimerConfig,
}

impl Default for LockstepConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            timer: TimerConfig::default(),
        }
    }
}

/// Shared store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store connection URL
    #[serde(default = "default_store_url")]
    pub url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
        }
    }
}

fn default_store_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

/// Wheel timer configuration.
///
/// The defaults (100ms tick, 512 slots) give one wheel revolution every
/// ~51.2 seconds, which comfortably covers typical renewal periods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerConfig {
    /// Tick duration in milliseconds
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// Number of slots in the wheel
    #[serde(default = "default_ticks_per_wheel")]
    pub ticks_per_wheel: usize,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            ticks_per_wheel: default_ticks_per_wheel(),
        }
    }
}

fn default_tick_ms() -> u64 {
    100
}

fn default_ticks_per_wheel() -> usize {
    512
}

impl LockstepConfig {
    /// Load configuration from a file path.
    pub fn from_file(path: &str) -> crate::error::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: LockstepConfig = serde_yaml::from_str(&contents)
            .map_err(|e| crate::error::LockstepError::Config(e.to_string()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LockstepConfig::default();
        assert_eq!(config.store.url, "redis://127.0.0.1:6379");
        assert_eq!(config.timer.tick_ms, 100);
        assert_eq!(config.timer.ticks_per_wheel, 512);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
store:
  url: redis://10.0.0.5:6380
"#;
        let config: LockstepConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.store.url, "redis://10.0.0.5:6380");
        assert_eq!(config.timer.tick_ms, 100);
    }
}

use std::path::Path;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Per-book synchronization settings, shared by every session of a registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Maximum number of levels kept per side
    pub depth: usize,
    /// Minimum price increment; bucket width is `granularity * tick_size`
    pub tick_size: Decimal,
    /// Publisher heartbeat period
    pub heartbeat_interval_ms: u64,
    /// Liveness timeout is `heartbeat_interval_ms * timeout_multiplier`
    pub timeout_multiplier: u32,
    pub snapshot_timeout_ms: u64,
    /// Frames held while a snapshot is in flight before the buffer is dropped
    pub max_buffered_frames: usize,
    /// Decompressed frame size limit
    pub max_frame_bytes: usize,
    pub send_acks: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            depth: 20,
            tick_size: Decimal::new(1, 4),
            heartbeat_interval_ms: 30_000,
            timeout_multiplier: 3,
            snapshot_timeout_ms: 5_000,
            max_buffered_frames: 10_000,
            max_frame_bytes: 1024 * 1024,
            send_acks: true,
        }
    }
}

impl SyncConfig {
    /// Load config from a YAML file and validate it.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.depth == 0 {
            return Err(ConfigError::Invalid("depth must be at least 1".to_string()));
        }
        if self.tick_size <= Decimal::ZERO {
            return Err(ConfigError::Invalid(format!(
                "tick_size must be positive, got {}",
                self.tick_size
            )));
        }
        if self.heartbeat_interval_ms == 0 || self.timeout_multiplier == 0 {
            return Err(ConfigError::Invalid(
                "heartbeat_interval_ms and timeout_multiplier must be non-zero".to_string(),
            ));
        }
        if self.snapshot_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "snapshot_timeout_ms must be non-zero".to_string(),
            ));
        }
        if self.max_frame_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_frame_bytes must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Silence longer than this marks the book stale.
    pub fn liveness_timeout(&self) -> Duration {
        self.heartbeat_interval() * self.timeout_multiplier
    }

    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_millis(self.snapshot_timeout_ms)
    }
}

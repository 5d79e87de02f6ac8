use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{ConfigError, Result};

// HPM sensor UART parameters (8N1 is fixed by the sensor)
pub const DEFAULT_BAUD_RATE: u32 = 9600;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10;
pub const DEFAULT_INTER_BYTE_INTERVAL_MS: u64 = 15; // sensor output cadence
pub const DEFAULT_MAX_DRAIN_BYTES: usize = 1024;

/// Serial link and reader pacing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    pub baud_rate: u32,
    /// Pause at the top of every reader iteration.
    pub poll_interval_ms: u64,
    /// Pause before each single byte read within a drain.
    pub inter_byte_interval_ms: u64,
    /// Upper bound on the bytes collected by a single drain.
    pub max_drain_bytes: usize,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            inter_byte_interval_ms: DEFAULT_INTER_BYTE_INTERVAL_MS,
            max_drain_bytes: DEFAULT_MAX_DRAIN_BYTES,
        }
    }
}

impl LinkSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn inter_byte_interval(&self) -> Duration {
        Duration::from_millis(self.inter_byte_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.baud_rate == 0 {
            return Err(ConfigError::InvalidValue {
                field: "baud_rate",
                reason: "must be non-zero".to_string(),
            });
        }
        // A zero poll interval turns the reader into a busy loop
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "poll_interval_ms",
                reason: "must be at least 1ms".to_string(),
            });
        }
        if self.max_drain_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_drain_bytes",
                reason: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Load settings from a JSON file. Missing fields take their defaults.
pub fn load_settings(path: impl AsRef<Path>) -> Result<LinkSettings> {
    let raw = std::fs::read_to_string(path.as_ref())?;
    let settings: LinkSettings = serde_json::from_str(&raw)?;
    settings.validate()?;
    log::debug!("Loaded link settings from {}: {:?}", path.as_ref().display(), settings);
    Ok(settings)
}

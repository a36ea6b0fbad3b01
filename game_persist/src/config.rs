use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("save_delay ({save_delay:?}) must be less than max_save_delay ({max_save_delay:?})")]
    InvalidSaveDelay {
        save_delay: Duration,
        max_save_delay: Duration,
    },
    #[error("{0} must not be zero")]
    Zero(&'static str),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Updates per second of the tick loop.
    pub timestep: u32,
    /// Quiet period after the last change before an entity is saved, in milliseconds.
    pub save_delay: u64,
    /// Upper bound on the time an entity stays dirty while it keeps changing, in milliseconds.
    pub max_save_delay: u64,
    /// Interval of the full resync of all owned entities, in milliseconds.
    pub resync_interval: u64,
    /// Skip entities with a pending debounced save during resync.
    pub resync_skips_pending: bool,
}

impl Config {
    pub fn from_file<P>(path: P) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
    {
        let mut file = File::open(path)?;

        let mut buf = String::new();
        file.read_to_string(&mut buf)?;

        Self::from_str(&buf)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timestep == 0 {
            return Err(ConfigError::Zero("timestep"));
        }

        if self.resync_interval == 0 {
            return Err(ConfigError::Zero("resync_interval"));
        }

        if self.save_delay >= self.max_save_delay {
            return Err(ConfigError::InvalidSaveDelay {
                save_delay: self.save_delay(),
                max_save_delay: self.max_save_delay(),
            });
        }

        Ok(())
    }

    #[inline]
    pub fn save_delay(&self) -> Duration {
        Duration::from_millis(self.save_delay)
    }

    #[inline]
    pub fn max_save_delay(&self) -> Duration {
        Duration::from_millis(self.max_save_delay)
    }

    #[inline]
    pub fn resync_interval(&self) -> Duration {
        Duration::from_millis(self.resync_interval)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timestep: 60,
            save_delay: 500,
            max_save_delay: 3000,
            resync_interval: 5000,
            resync_skips_pending: true,
        }
    }
}

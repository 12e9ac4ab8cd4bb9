//! Resync loop configuration.

use std::time::Duration;

use crate::error::{Error, Result};

/// When a cycle's status is handed to the publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub enum PublishPoint {
    /// Publish once the peripheral has disconnected (or the cycle timed out),
    /// so every cycle reports its own results.
    #[default]
    AfterCycle,
    /// Publish as soon as the session has been started. The snapshot then
    /// holds the seed status plus whatever has landed so far.
    OnStart,
}

/// What each cycle's status starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub enum StatusSeed {
    /// The status passed to `configure`.
    #[default]
    Initial,
    /// The status published by the previous cycle.
    Previous,
    /// Nothing.
    Empty,
}

/// Configuration of the resync loop.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct SyncConfig {
    /// Time between cycle starts.
    #[cfg_attr(feature = "serde", serde(with = "duration_secs"))]
    pub sync_interval: Duration,
    /// Upper bound on one cycle waiting for the peripheral to disconnect.
    #[cfg_attr(feature = "serde", serde(with = "duration_secs"))]
    pub timeout: Duration,
    /// MTU requested after connecting.
    pub mtu: u16,
    /// How long a connection is held open for notifications.
    #[cfg_attr(feature = "serde", serde(with = "duration_secs"))]
    pub observation_window: Duration,
    /// When status is published.
    pub publish_point: PublishPoint,
    /// What each cycle's status starts from.
    pub status_seed: StatusSeed,
}

impl SyncConfig {
    /// Default time between cycles.
    pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(15);
    /// Default cycle timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
    /// Default MTU request.
    pub const DEFAULT_MTU: u16 = 500;
    /// Default notification observation window.
    pub const DEFAULT_OBSERVATION_WINDOW: Duration = Duration::from_secs(5);

    /// Check the configuration for values the loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.sync_interval.is_zero() {
            return Err(Error::Config("sync interval must be non-zero".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(Error::Config("timeout must be non-zero".to_string()));
        }
        if self.timeout <= self.observation_window {
            return Err(Error::Config(format!(
                "timeout {:?} must exceed observation window {:?}",
                self.timeout, self.observation_window
            )));
        }
        Ok(())
    }

    /// Decode and validate a configuration from JSON.
    ///
    /// Missing fields take their defaults; durations are whole seconds.
    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval: Self::DEFAULT_SYNC_INTERVAL,
            timeout: Self::DEFAULT_TIMEOUT,
            mtu: Self::DEFAULT_MTU,
            observation_window: Self::DEFAULT_OBSERVATION_WINDOW,
            publish_point: PublishPoint::default(),
            status_seed: StatusSeed::default(),
        }
    }
}

#[cfg(feature = "serde")]
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

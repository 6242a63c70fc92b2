//! Connection manager configuration.
//!
//! [`BoshConfig`] carries the limits every session is negotiated against.
//! Construct it through [`BoshConfig::builder`] so the bounds are validated,
//! or deserialize it with `serde` and call [`BoshConfig::validate`].

use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

const DEFAULT_MAX_HELD_BYTES: usize = 100_000;
const DEFAULT_MAX_CONNECTIONS: usize = 2;
const DEFAULT_WINDOW: u64 = 2;
const DEFAULT_INACTIVITY_SECS: u64 = 70;
const DEFAULT_MAX_INACTIVITY_SECS: u64 = 160;
const DEFAULT_KEEPALIVE_SECS: u64 = 60;
const DEFAULT_MAX_STREAMS: usize = 8;

/// Limits applied to every session.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BoshConfig {
    /// Largest request payload, in bytes, that is accepted.
    pub max_held_bytes: usize,
    /// Held response slots allowed per session; also caps `hold`.
    pub max_connections: usize,
    /// RIDs accepted either side of the current RID.
    pub window: u64,
    /// Inactivity, in seconds, used when the client omits or under-asks.
    pub default_inactivity: u64,
    /// Upper bound, in seconds, on client-requested inactivity.
    pub max_inactivity: u64,
    /// Keepalive, in seconds, applied to held sockets.
    pub socket_keepalive: u64,
    /// Streams allowed per session.
    pub max_streams_per_session: usize,
}

impl Default for BoshConfig {
    fn default() -> Self {
        Self {
            max_held_bytes: DEFAULT_MAX_HELD_BYTES,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            window: DEFAULT_WINDOW,
            default_inactivity: DEFAULT_INACTIVITY_SECS,
            max_inactivity: DEFAULT_MAX_INACTIVITY_SECS,
            socket_keepalive: DEFAULT_KEEPALIVE_SECS,
            max_streams_per_session: DEFAULT_MAX_STREAMS,
        }
    }
}

impl BoshConfig {
    /// Start building a configuration from the defaults.
    #[must_use]
    pub fn builder() -> BoshConfigBuilder { BoshConfigBuilder::default() }

    /// Check the configuration bounds.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] naming the first bound that does not hold.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if self.max_connections == 0 {
            return Err(ConfigError::ZeroConnections);
        }
        if self.max_streams_per_session == 0 {
            return Err(ConfigError::ZeroStreams);
        }
        if self.max_held_bytes == 0 {
            return Err(ConfigError::ZeroHeldBytes);
        }
        if self.default_inactivity > self.max_inactivity {
            return Err(ConfigError::InactivityRange {
                default: self.default_inactivity,
                max: self.max_inactivity,
            });
        }
        Ok(())
    }

    /// Keepalive applied to held sockets.
    #[must_use]
    pub fn keepalive(&self) -> Duration { Duration::from_secs(self.socket_keepalive) }

    /// Clamp a client-requested inactivity into the configured bounds.
    ///
    /// `max_inactivity` wins if the bounds are inverted, as they can be in
    /// a configuration that skipped [`BoshConfig::validate`].
    #[must_use]
    pub fn negotiate_inactivity(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.default_inactivity)
            .max(self.default_inactivity)
            .min(self.max_inactivity)
    }

    /// Sanitise a client-requested `hold` into `1..=max_connections`.
    #[must_use]
    pub fn negotiate_hold(&self, requested: Option<i64>) -> usize {
        let hold = requested
            .filter(|value| *value > 0)
            .and_then(|value| usize::try_from(value).ok())
            .unwrap_or(1);
        hold.min(self.max_connections)
    }

    /// Sanitise a client-requested `wait` against the negotiated inactivity.
    ///
    /// Non-positive or oversized waits fall back to 80% of the inactivity.
    #[must_use]
    pub fn negotiate_wait(requested: Option<i64>, inactivity: u64) -> u64 {
        match requested.and_then(|value| u64::try_from(value).ok()) {
            Some(wait) if wait > 0 && wait <= inactivity => wait,
            _ => inactivity * 4 / 5,
        }
    }
}

/// Builder for [`BoshConfig`].
///
/// # Examples
///
/// ```
/// use bosh_engine::config::BoshConfig;
///
/// let config = BoshConfig::builder()
///     .window(5)
///     .max_connections(3)
///     .build()
///     .expect("valid configuration");
/// assert_eq!(config.window, 5);
/// ```
#[derive(Clone, Debug, Default)]
pub struct BoshConfigBuilder {
    config: BoshConfig,
}

impl BoshConfigBuilder {
    /// Set the largest accepted request payload in bytes.
    #[must_use]
    pub fn max_held_bytes(mut self, bytes: usize) -> Self {
        self.config.max_held_bytes = bytes;
        self
    }

    /// Set the number of held slots allowed per session.
    #[must_use]
    pub fn max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = count;
        self
    }

    /// Set the RID tolerance window.
    #[must_use]
    pub fn window(mut self, window: u64) -> Self {
        self.config.window = window;
        self
    }

    /// Set the default inactivity in seconds.
    #[must_use]
    pub fn default_inactivity(mut self, secs: u64) -> Self {
        self.config.default_inactivity = secs;
        self
    }

    /// Set the maximum inactivity in seconds.
    #[must_use]
    pub fn max_inactivity(mut self, secs: u64) -> Self {
        self.config.max_inactivity = secs;
        self
    }

    /// Set the socket keepalive in seconds.
    #[must_use]
    pub fn socket_keepalive(mut self, secs: u64) -> Self {
        self.config.socket_keepalive = secs;
        self
    }

    /// Set the number of streams allowed per session.
    #[must_use]
    pub fn max_streams_per_session(mut self, count: usize) -> Self {
        self.config.max_streams_per_session = count;
        self
    }

    /// Validate and return the configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if any bound is violated.
    pub fn build(self) -> Result<BoshConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

//! Defines configuration structures for the router.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The top-level configuration for a [`crate::router::Router`].
///
/// Typically deserialized from a TOML file via [`load_config`] and passed to
/// the router on construction; [`Default`] gives sensible in-process values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RouterConfig {
    #[serde(default)]
    pub channels: ChannelConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

/// Capacities for the channels used inside the router and its transports.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChannelConfig {
    /// Buffer capacity for the router's event broadcast channel.
    pub event_buffer: usize,
    /// Buffer capacity for per-transport notification broadcast channels.
    pub notification_buffer: usize,
}

/// Timeouts applied to call-shaped operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TimeoutConfig {
    /// Default timeout, in seconds, for a single proxied wallet call when the
    /// caller does not supply one. On expiry the pending call is abandoned; a
    /// late response is ignored.
    pub call_timeout_secs: u64,
}

impl TimeoutConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            channels: ChannelConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            event_buffer: 256,
            notification_buffer: 128,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: 30,
        }
    }
}

/// Loads a router configuration from a TOML file, with `WALLETMESH__`
/// environment variables taking precedence over file values.
pub fn load_config(path: &str) -> Result<RouterConfig> {
    let builder = config::Config::builder()
        .add_source(config::File::with_name(path))
        .add_source(config::Environment::with_prefix("WALLETMESH").separator("__"));

    let settings: RouterConfig = builder
        .build()
        .context(format!("Failed to build configuration from '{}'", path))?
        .try_deserialize()
        .context("Failed to deserialize configuration")?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_nonzero() {
        let config = RouterConfig::default();
        assert!(config.channels.event_buffer > 0);
        assert!(config.channels.notification_buffer > 0);
        assert!(config.timeouts.call_timeout() > Duration::ZERO);
    }
}

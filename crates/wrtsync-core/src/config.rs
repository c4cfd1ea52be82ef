//! Configuration types for the wrtsync system
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default SSH port on the router
pub const DEFAULT_PORT: u16 = 22;

/// Main wrtsync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Identifies this configuration instance; scopes persisted state keys
    pub instance_id: String,

    /// Router connection settings
    pub router: RouterConfig,

    /// Optional engine settings
    #[serde(default)]
    pub engine: EngineConfig,
}

impl SyncConfig {
    /// Create a configuration with default engine settings
    pub fn new(instance_id: impl Into<String>, router: RouterConfig) -> Self {
        Self {
            instance_id: instance_id.into(),
            router,
            engine: EngineConfig::default(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.instance_id.trim().is_empty() {
            return Err(crate::Error::config("Instance id cannot be empty"));
        }

        self.router.validate()?;
        self.engine.validate()?;

        Ok(())
    }

    /// Persistence key for the presence map
    pub fn presence_key(&self) -> String {
        format!("{}_last_seen", self.instance_id)
    }

    /// Persistence key for the period accumulators
    pub fn counters_key(&self) -> String {
        format!("{}_wan_counters", self.instance_id)
    }
}

/// Router connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Router hostname or IP address
    pub host: String,

    /// SSH port
    #[serde(default = "default_port")]
    pub port: u16,

    /// SSH username
    pub username: String,

    /// Authentication method
    pub auth: RouterAuth,
}

impl RouterConfig {
    /// Create router settings using password authentication
    pub fn with_password(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            username: username.into(),
            auth: RouterAuth::Password {
                password: password.into(),
            },
        }
    }

    /// Create router settings using a private key file
    pub fn with_key_file(
        host: impl Into<String>,
        username: impl Into<String>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            username: username.into(),
            auth: RouterAuth::KeyFile {
                path: key_path.into(),
            },
        }
    }

    /// Set the SSH port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Validate the router settings
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.host.trim().is_empty() {
            return Err(crate::Error::config("Router host cannot be empty"));
        }
        if self.username.trim().is_empty() {
            return Err(crate::Error::config("Router username cannot be empty"));
        }
        if self.port == 0 {
            return Err(crate::Error::config("Router port must be > 0"));
        }

        match &self.auth {
            RouterAuth::Password { password } if password.is_empty() => {
                Err(crate::Error::config("Router password cannot be empty"))
            }
            RouterAuth::KeyFile { path } if path.as_os_str().is_empty() => {
                Err(crate::Error::config("Router key path cannot be empty"))
            }
            _ => Ok(()),
        }
    }
}

/// Exactly one credential per router
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RouterAuth {
    /// Password authentication
    Password { password: String },

    /// Private key file authentication
    KeyFile { path: PathBuf },
}

impl std::fmt::Debug for RouterAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouterAuth::Password { .. } => f.write_str("Password { .. }"),
            RouterAuth::KeyFile { path } => {
                f.debug_struct("KeyFile").field("path", path).finish()
            }
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// How a disconnected device's freshness is reported
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreshnessPolicy {
    /// Disconnected devices carry their last remembered timestamp
    #[default]
    CarryForward,

    /// Disconnected devices report no timestamp at all
    ClearWhenDisconnected,
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Interval between poll cycles (in seconds)
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Seconds a device may go unseen before it is considered away
    #[serde(default = "default_seconds_until_away")]
    pub seconds_until_away: u64,

    /// Days after which an unseen device is forgotten
    #[serde(default = "default_prune_after_days")]
    pub prune_after_days: u64,

    /// Minimum interval between reachability probes (in seconds)
    ///
    /// Set to 0 to disable probing.
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,

    /// SSH connect timeout (in seconds)
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// WAN interface override; when unset it is read from the router once
    #[serde(default)]
    pub wan_interface: Option<String>,

    /// Whether newly discovered devices are registered enabled
    #[serde(default)]
    pub new_devices_enabled: bool,

    /// Freshness reporting for disconnected devices
    #[serde(default)]
    pub freshness: FreshnessPolicy,

    /// Capacity of the internal event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl EngineConfig {
    /// Validate the engine settings
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.poll_interval_secs == 0 {
            return Err(crate::Error::config("Poll interval must be > 0"));
        }
        if self.prune_after_days == 0 {
            return Err(crate::Error::config("Prune threshold must be > 0 days"));
        }
        if self.connect_timeout_secs == 0 {
            return Err(crate::Error::config("Connect timeout must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        if let Some(iface) = &self.wan_interface
            && iface.trim().is_empty()
        {
            return Err(crate::Error::config("WAN interface override cannot be blank"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn grace_period(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.seconds_until_away as i64)
    }

    pub fn prune_threshold(&self) -> chrono::Duration {
        chrono::Duration::days(self.prune_after_days as i64)
    }

    /// `None` when probing is disabled
    pub fn probe_interval(&self) -> Option<chrono::Duration> {
        (self.probe_interval_secs > 0)
            .then(|| chrono::Duration::seconds(self.probe_interval_secs as i64))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            seconds_until_away: default_seconds_until_away(),
            prune_after_days: default_prune_after_days(),
            probe_interval_secs: default_probe_interval_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            wan_interface: None,
            new_devices_enabled: false,
            freshness: FreshnessPolicy::default(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_seconds_until_away() -> u64 {
    180
}

fn default_prune_after_days() -> u64 {
    30
}

fn default_probe_interval_secs() -> u64 {
    300
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_event_channel_capacity() -> usize {
    1000
}

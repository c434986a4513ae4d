//! Configuration types for the referral ledger
//!
//! This module defines all configuration structures used throughout the crate.
//! Values only: loading them (environment, files) is up to the embedding
//! application.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Store configuration consumed by the store factory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Main store holding referral codes and redemptions
    #[serde(default)]
    pub main: DatabaseParams,

    /// Identity directory store, queried for eligibility only
    #[serde(default)]
    pub directory: DatabaseParams,

    /// Connection pool bounds, applied to both stores
    #[serde(default)]
    pub pool: PoolConfig,
}

impl StoreConfig {
    /// Create a configuration for the given main and directory stores
    pub fn new(main: DatabaseParams, directory: DatabaseParams) -> Self {
        Self {
            main,
            directory,
            pool: PoolConfig::default(),
        }
    }

    /// Override the pool bounds
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Both stores carry an address and port
    pub fn is_persistent_configured(&self) -> bool {
        self.main.is_configured() && self.directory.is_configured()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.pool.validate()?;

        for (name, params) in [("main", &self.main), ("directory", &self.directory)] {
            if params.is_configured() && params.port.parse::<u16>().is_err() {
                return Err(crate::Error::config(format!(
                    "{} store port '{}' is not a valid port number",
                    name, params.port
                )));
            }
        }

        Ok(())
    }
}

/// Relational connection parameters
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseParams {
    #[serde(default)]
    pub username: String,

    /// Empty means no password is sent
    #[serde(default)]
    pub password: String,

    #[serde(default)]
    pub db_name: String,

    #[serde(default)]
    pub address: String,

    #[serde(default)]
    pub port: String,
}

impl DatabaseParams {
    /// Create parameters for a database at `address:port`
    pub fn new(address: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port: port.into(),
            ..Self::default()
        }
    }

    /// Set the login credentials
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Set the database name
    pub fn with_db_name(mut self, db_name: impl Into<String>) -> Self {
        self.db_name = db_name.into();
        self
    }

    /// Address and port are both present
    pub fn is_configured(&self) -> bool {
        !self.address.is_empty() && !self.port.is_empty()
    }
}

// Custom Debug implementation that hides the password
impl fmt::Debug for DatabaseParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseParams")
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .field("db_name", &self.db_name)
            .field("address", &self.address)
            .field("port", &self.port)
            .finish()
    }
}

/// Split a `host:port` address into its parts
///
/// Bracketed IPv6 hosts (`[::1]:5432`) are unwrapped.
pub fn split_host_port(raw: &str) -> Result<(String, String), crate::Error> {
    let (host, port) = raw
        .rsplit_once(':')
        .ok_or_else(|| crate::Error::config(format!("address '{}' is missing a port", raw)))?;

    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    if host.is_empty() || port.is_empty() {
        return Err(crate::Error::config(format!(
            "address '{}' must be of the form host:port",
            raw
        )));
    }

    Ok((host.to_string(), port.to_string()))
}

/// Connection pool bounds
///
/// These protect the main store and the directory from connection
/// exhaustion under load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of open connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connections the pool keeps open even when idle
    ///
    /// A floor, not a cap: the pool has no upper bound on idle connections
    /// below `max_connections`. Idle connections above this floor are
    /// closed after `idle_timeout_secs`.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Close connections idle for longer than this (in seconds)
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Retire connections older than this (in seconds)
    #[serde(default = "default_max_lifetime_secs")]
    pub max_lifetime_secs: u64,

    /// Time to wait for a connection, including the startup probe (in seconds)
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

impl PoolConfig {
    /// Validate the pool bounds
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.max_connections == 0 {
            return Err(crate::Error::config("max_connections must be > 0"));
        }
        if self.min_connections > self.max_connections {
            return Err(crate::Error::config(format!(
                "min_connections ({}) cannot exceed max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        if self.acquire_timeout_secs == 0 {
            return Err(crate::Error::config("acquire_timeout_secs must be > 0"));
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            idle_timeout_secs: default_idle_timeout_secs(),
            max_lifetime_secs: default_max_lifetime_secs(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
        }
    }
}

fn default_max_connections() -> u32 {
    50
}

fn default_min_connections() -> u32 {
    0
}

fn default_idle_timeout_secs() -> u64 {
    10 * 60
}

fn default_max_lifetime_secs() -> u64 {
    12 * 60 * 60
}

fn default_acquire_timeout_secs() -> u64 {
    10
}

/// Trigger listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Capacity of the listener event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_event_channel_capacity() -> usize {
    1000
}

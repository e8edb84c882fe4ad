//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/carwatch/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/carwatch/` (~/.config/carwatch/)
//! - Data: `$XDG_DATA_HOME/carwatch/` (~/.local/share/carwatch/)
//! - State/Logs: `$XDG_STATE_HOME/carwatch/` (~/.local/state/carwatch/)
//!
//! A loaded [`Config`] is passed down explicitly; each component takes the
//! section it needs at construction time.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Which vehicle to follow
    #[serde(default)]
    pub vehicle: VehicleConfig,

    /// Telemetry API settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Where credentials are read from
    #[serde(default)]
    pub auth: AuthConfig,

    /// Durable snapshot store
    #[serde(default)]
    pub store: StoreConfig,

    /// Polling schedule
    #[serde(default)]
    pub gatherer: GathererConfig,

    /// Liveness window
    #[serde(default)]
    pub watchdog: WatchdogConfig,

    /// Fan-out channel tuning
    #[serde(default)]
    pub channel: ChannelConfig,

    /// MQTT republishing (optional)
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Target vehicle selection
#[derive(Debug, Deserialize, Default, Clone)]
pub struct VehicleConfig {
    /// Display name as shown in the owner's account
    #[serde(default)]
    pub name: String,
}

/// Telemetry API configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    /// Base URL of the owner API
    #[serde(default = "default_api_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_api_timeout")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            timeout_secs: default_api_timeout(),
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_api_base_url() -> String {
    "https://owner-api.teslamotors.com".to_string()
}

fn default_api_timeout() -> u64 {
    10
}

/// Credential store configuration
#[derive(Debug, Deserialize, Default, Clone)]
pub struct AuthConfig {
    /// Auth cache JSON file; defaults to `$XDG_CONFIG_HOME/carwatch/auth.json`
    pub cache_path: Option<PathBuf>,
}

impl AuthConfig {
    pub fn cache_path(&self) -> PathBuf {
        self.cache_path
            .clone()
            .unwrap_or_else(Config::default_auth_cache_path)
    }
}

/// Snapshot store configuration
#[derive(Debug, Deserialize, Default, Clone)]
pub struct StoreConfig {
    /// SQLite file; defaults to `$XDG_DATA_HOME/carwatch/carwatch.db`
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    pub fn path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(Config::database_path)
    }
}

/// Adaptive polling schedule
#[derive(Debug, Deserialize, Clone)]
pub struct GathererConfig {
    /// Sleep after a snapshot with someone in the car
    #[serde(default = "default_user_present_secs")]
    pub user_present_secs: u64,

    /// Sleep after a snapshot taken while charging
    #[serde(default = "default_charging_secs")]
    pub charging_secs: u64,

    /// Sleep after any other snapshot
    #[serde(default = "default_idle_secs")]
    pub idle_secs: u64,

    /// Sleep after a failed or timed out fetch
    #[serde(default = "default_gatherer_retry_secs")]
    pub retry_secs: u64,
}

impl Default for GathererConfig {
    fn default() -> Self {
        Self {
            user_present_secs: default_user_present_secs(),
            charging_secs: default_charging_secs(),
            idle_secs: default_idle_secs(),
            retry_secs: default_gatherer_retry_secs(),
        }
    }
}

fn default_user_present_secs() -> u64 {
    60
}

fn default_charging_secs() -> u64 {
    300
}

fn default_idle_secs() -> u64 {
    600
}

fn default_gatherer_retry_secs() -> u64 {
    60
}

/// Liveness watchdog configuration
#[derive(Debug, Deserialize, Clone)]
pub struct WatchdogConfig {
    /// Maximum silence before the process is declared stalled
    #[serde(default = "default_watchdog_window")]
    pub window_secs: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            window_secs: default_watchdog_window(),
        }
    }
}

impl WatchdogConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

fn default_watchdog_window() -> u64 {
    1800
}

/// Broadcast channel tuning
#[derive(Debug, Deserialize, Default, Clone)]
pub struct ChannelConfig {
    /// Per-subscriber backlog cap; oldest snapshots are dropped beyond it.
    /// Unset means unbounded.
    pub max_backlog: Option<usize>,
}

/// MQTT broker configuration
///
/// When enabled, every snapshot is republished to `topic` in addition to
/// being stored locally in SQLite.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerConfig {
    /// Enable/disable republishing
    #[serde(default)]
    pub enabled: bool,

    /// Broker hostname
    pub host: Option<String>,

    /// Broker port
    #[serde(default = "default_broker_port")]
    pub port: u16,

    /// Topic snapshots are published to (and read from in bridge mode)
    pub topic: Option<String>,

    /// MQTT client id; generated when unset
    pub client_id: Option<String>,

    /// Keep-alive interval in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    /// Seconds to wait for the broker's ConnAck
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Message expiry interval attached to each publish
    #[serde(default = "default_expiry")]
    pub expiry_secs: u32,

    /// Delay before reconnecting after a failure
    #[serde(default = "default_broker_retry")]
    pub retry_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: None,
            port: default_broker_port(),
            topic: None,
            client_id: None,
            keep_alive_secs: default_keep_alive(),
            connect_timeout_secs: default_connect_timeout(),
            expiry_secs: default_expiry(),
            retry_secs: default_broker_retry(),
        }
    }
}

impl BrokerConfig {
    /// Check if the broker is enabled and has everything needed to connect
    pub fn is_ready(&self) -> bool {
        self.enabled && self.host.is_some() && self.topic.is_some()
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        if self.host.as_deref().map_or(true, str::is_empty) {
            return Err(Error::Config(
                "broker.host is required when broker is enabled".to_string(),
            ));
        }
        if self.topic.as_deref().map_or(true, str::is_empty) {
            return Err(Error::Config(
                "broker.topic is required when broker is enabled".to_string(),
            ));
        }
        if self.retry_secs == 0 {
            return Err(Error::Config("broker.retry_secs must be positive".to_string()));
        }
        Ok(())
    }

    /// Configured client id, or a fresh `carwatch-<uuid>`
    pub fn client_id(&self) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| format!("carwatch-{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_secs)
    }
}

fn default_broker_port() -> u16 {
    1883
}

fn default_keep_alive() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_expiry() -> u32 {
    900
}

fn default_broker_retry() -> u64 {
    5
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Validate settings needed by the gather pipeline
    pub fn validate(&self) -> Result<()> {
        if self.vehicle.name.trim().is_empty() {
            return Err(Error::Config("vehicle.name is required".to_string()));
        }
        self.validate_common()
    }

    /// Validate settings needed by bridge mode, which has no vehicle of its own
    pub fn validate_bridge(&self) -> Result<()> {
        if !self.broker.is_ready() {
            return Err(Error::Config(
                "bridge mode needs broker.enabled, broker.host and broker.topic".to_string(),
            ));
        }
        self.validate_common()
    }

    fn validate_common(&self) -> Result<()> {
        if self.api.timeout_secs == 0 {
            return Err(Error::Config("api.timeout_secs must be positive".to_string()));
        }
        let g = &self.gatherer;
        if g.user_present_secs == 0 || g.charging_secs == 0 || g.idle_secs == 0 || g.retry_secs == 0
        {
            return Err(Error::Config(
                "gatherer intervals must all be positive".to_string(),
            ));
        }
        if self.watchdog.window_secs == 0 {
            return Err(Error::Config("watchdog.window_secs must be positive".to_string()));
        }
        if self.channel.max_backlog == Some(0) {
            return Err(Error::Config("channel.max_backlog must be positive".to_string()));
        }
        self.broker.validate()
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/carwatch/config.toml` (~/.config/carwatch/config.toml)
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// `$XDG_CONFIG_HOME/carwatch/`
    pub fn config_dir() -> PathBuf {
        xdg_config_home().join("carwatch")
    }

    /// Returns the data directory path (for SQLite database)
    ///
    /// `$XDG_DATA_HOME/carwatch/` (~/.local/share/carwatch/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("carwatch")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/carwatch/` (~/.local/state/carwatch/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("carwatch")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/carwatch/carwatch.db`
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("carwatch.db")
    }

    /// `$XDG_CONFIG_HOME/carwatch/auth.json`
    pub fn default_auth_cache_path() -> PathBuf {
        Self::config_dir().join("auth.json")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/carwatch/carwatch.log`
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("carwatch.log")
    }
}

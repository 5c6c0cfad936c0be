//! Counter Configuration - station identity, sensor link, thresholds and storage
//!
//! Every tunable the counting session reads is a field in this module.
//! Each struct implements `Default` with the values the line ran with before
//! configuration files existed, so an absent file changes nothing.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::defaults;
use crate::acquisition::Endpoint;
use crate::detection::Thresholds;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "SHEET_COUNTER_CONFIG";

/// Config file picked up from the working directory when nothing else is given.
pub const LOCAL_CONFIG_FILE: &str = "counter_config.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one counting station (one sensor, one pipeline).
///
/// Fixed for the lifetime of the process once loaded.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CounterConfig {
    /// Machine / production order identity stamped on every reading
    #[serde(default)]
    pub station: StationConfig,

    /// Sensor link (endpoint, serial parameters, timeouts)
    #[serde(default)]
    pub link: LinkConfig,

    /// Hysteresis thresholds
    #[serde(default)]
    pub detection: DetectionConfig,

    /// Reading store
    #[serde(default)]
    pub storage: StorageConfig,
}

impl CounterConfig {
    /// Load configuration using the standard search order:
    /// 1. `explicit` path (from `--config`), else `$SHEET_COUNTER_CONFIG`
    /// 2. `./counter_config.toml` in the current working directory
    /// 3. Built-in defaults
    ///
    /// A file that was asked for explicitly must load and validate; only the
    /// implicit local file is allowed to be absent.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let requested = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from));

        if let Some(path) = requested {
            let config = Self::load_from_file(&path)?;
            info!(path = %path.display(), machine = %config.station.machine_id, "Loaded counter config");
            return Ok(config);
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            let config = Self::load_from_file(&local)?;
            info!(machine = %config.station.machine_id, "Loaded counter config from ./{}", LOCAL_CONFIG_FILE);
            return Ok(config);
        }

        info!("No {} found, using built-in defaults", LOCAL_CONFIG_FILE);
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;

        for w in &super::validation::validate_unknown_keys(&contents) {
            warn!("{}", w);
        }

        let config: Self = toml::from_str(&contents)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Validate every section, collecting all problems before failing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        if self.station.machine_id.trim().is_empty() {
            errors.push("station.machine_id must not be empty".to_string());
        }
        if self.station.production_order_id.trim().is_empty() {
            errors.push("station.production_order_id must not be empty".to_string());
        }

        let l = &self.link;
        if let Err(e) = Endpoint::parse(&l.endpoint) {
            errors.push(format!("link.endpoint: {e}"));
        }
        if l.baud_rate == 0 {
            errors.push("link.baud_rate must be > 0".to_string());
        }
        if l.idle_timeout_ms == 0 {
            errors.push("link.idle_timeout_ms must be > 0".to_string());
        }
        if l.connect_timeout_ms == 0 {
            errors.push("link.connect_timeout_ms must be > 0".to_string());
        }
        if l.reconnect_initial_delay_ms > l.reconnect_max_delay_ms {
            errors.push(format!(
                "link.reconnect_initial_delay_ms ({}) must be <= reconnect_max_delay_ms ({})",
                l.reconnect_initial_delay_ms, l.reconnect_max_delay_ms
            ));
        }

        if let Err(e) = self.detection.thresholds() {
            errors.push(format!("detection: {e}"));
        }

        if self.storage.path.as_os_str().is_empty() {
            errors.push("storage.path must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

/// Anything that stops the configuration from being usable. Always fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {1}", .0.display())]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Config parse error ({}): {1}", .0.display())]
    Parse(PathBuf, #[source] toml::de::Error),

    #[error("Config serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config validation failed:\n  - {}", .0.join("\n  - "))]
    Validation(Vec<String>),
}

// ============================================================================
// Station
// ============================================================================

/// Identity written into every persisted reading. Opaque to the counter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StationConfig {
    #[serde(default = "default_machine_id")]
    pub machine_id: String,

    #[serde(default = "default_production_order_id")]
    pub production_order_id: String,
}

fn default_machine_id() -> String {
    defaults::DEFAULT_MACHINE_ID.to_string()
}
fn default_production_order_id() -> String {
    defaults::DEFAULT_PRODUCTION_ORDER_ID.to_string()
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            machine_id: default_machine_id(),
            production_order_id: default_production_order_id(),
        }
    }
}

// ============================================================================
// Link
// ============================================================================

/// Sensor link parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkConfig {
    /// `rfc2217://host:port`, `socket://host:port` or bare `host:port`
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Requested serial speed (RFC 2217 only)
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Max wait for one line before the fetch reports idle
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_reconnect_initial_delay_ms")]
    pub reconnect_initial_delay_ms: u64,

    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
}

fn default_endpoint() -> String {
    defaults::DEFAULT_ENDPOINT.to_string()
}
fn default_baud_rate() -> u32 {
    defaults::DEFAULT_BAUD_RATE
}
fn default_idle_timeout_ms() -> u64 {
    defaults::DEFAULT_IDLE_TIMEOUT_MS
}
fn default_connect_timeout_ms() -> u64 {
    defaults::DEFAULT_CONNECT_TIMEOUT_MS
}
fn default_reconnect_initial_delay_ms() -> u64 {
    defaults::DEFAULT_RECONNECT_INITIAL_DELAY_MS
}
fn default_reconnect_max_delay_ms() -> u64 {
    defaults::DEFAULT_RECONNECT_MAX_DELAY_MS
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            baud_rate: default_baud_rate(),
            idle_timeout_ms: default_idle_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            reconnect_initial_delay_ms: default_reconnect_initial_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
        }
    }
}

impl LinkConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_initial_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_delay_ms)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }
}

// ============================================================================
// Detection
// ============================================================================

/// Hysteresis band. `low_threshold_cm` must sit strictly below `high_threshold_cm`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct DetectionConfig {
    #[serde(default = "default_low_threshold")]
    pub low_threshold_cm: f64,

    #[serde(default = "default_high_threshold")]
    pub high_threshold_cm: f64,
}

fn default_low_threshold() -> f64 {
    defaults::DEFAULT_LOW_THRESHOLD_CM
}
fn default_high_threshold() -> f64 {
    defaults::DEFAULT_HIGH_THRESHOLD_CM
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            low_threshold_cm: default_low_threshold(),
            high_threshold_cm: default_high_threshold(),
        }
    }
}

impl DetectionConfig {
    /// Build validated detector thresholds from this section.
    pub fn thresholds(&self) -> Result<Thresholds, crate::detection::ThresholdError> {
        Thresholds::new(self.low_threshold_cm, self.high_threshold_cm)
    }
}

// ============================================================================
// Storage
// ============================================================================

/// What the session does when a reading cannot be written.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WriteFailurePolicy {
    /// Warn and keep counting (availability first)
    #[default]
    Skip,
    /// Stop the session (strict durability)
    Abort,
}

impl std::fmt::Display for WriteFailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteFailurePolicy::Skip => write!(f, "skip"),
            WriteFailurePolicy::Abort => write!(f, "abort"),
        }
    }
}

impl std::str::FromStr for WriteFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "skip" => Ok(WriteFailurePolicy::Skip),
            "abort" => Ok(WriteFailurePolicy::Abort),
            other => Err(format!(
                "unknown write failure policy '{other}' (expected skip or abort)"
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageConfig {
    /// sled database directory
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,

    #[serde(default)]
    pub write_failure_policy: WriteFailurePolicy,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from(defaults::DEFAULT_STORAGE_PATH)
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            write_failure_policy: WriteFailurePolicy::default(),
        }
    }
}

impl StorageConfig {
    /// Directory that holds the database and the process lock.
    pub fn data_dir(&self) -> PathBuf {
        self.path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
    }
}

// ============================================================================
// Tests
// ============================================================================

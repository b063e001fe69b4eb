//! Daemon configuration.
//!
//! Values are layered, later layers winning:
//! 1. built-in defaults
//! 2. TOML file (`--config`, or `<config_dir>/sensorhub/config.toml`)
//! 3. environment variables
//! 4. command-line flags (applied by the CLI)
//!
//! ```toml
//! port = 443
//!
//! [tls]
//! cert_path = "/etc/letsencrypt/live/example.org/fullchain.pem"
//! key_path = "/etc/letsencrypt/live/example.org/privkey.pem"
//!
//! [source]
//! kind = "serial"
//! device = "/dev/rfcomm0"
//!
//! [store]
//! kind = "file"
//! path = "/var/lib/sensorhub/readings.jsonl"
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// Port used when TLS is configured and no port is given.
pub const DEFAULT_TLS_PORT: u16 = 443;

/// Port used for plain HTTP when no port is given.
pub const DEFAULT_PLAIN_PORT: u16 = 5000;

/// Number of readings served by `GET /sensor-data`.
pub const DEFAULT_RECENT_LIMIT: usize = 10;

/// Full daemon configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub bind_address: IpAddr,
    /// Explicit port; `None` picks a default from the TLS setting.
    pub port: Option<u16>,
    pub tls: Option<TlsConfig>,
    pub source: SourceConfig,
    pub store: StoreConfig,
    pub hub: HubConfig,
    pub recent_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: None,
            tls: None,
            source: SourceConfig::default(),
            store: StoreConfig::default(),
            hub: HubConfig::default(),
            recent_limit: DEFAULT_RECENT_LIMIT,
        }
    }
}

/// PEM certificate chain and private key for the listener.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Synthetic,
    Serial,
}

impl FromStr for SourceKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "synthetic" | "dummy" => Ok(Self::Synthetic),
            "serial" | "bluetooth" => Ok(Self::Serial),
            other => Err(ConfigError::invalid("source.kind", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceConfig {
    pub kind: SourceKind,
    /// Device node of the live sensor link.
    pub device: Option<PathBuf>,
    /// Sampling period of the synthetic generator.
    pub period_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Synthetic,
            device: None,
            period_ms: 1_000,
        }
    }
}

impl SourceConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Memory,
    File,
}

impl FromStr for StoreKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "file" => Ok(Self::File),
            other => Err(ConfigError::invalid("store.kind", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub kind: StoreKind,
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Memory,
            path: PathBuf::from("sensor-data.jsonl"),
        }
    }
}

/// Fan-out tuning.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HubConfig {
    /// How long one delivery may wait on a full subscriber queue
    pub send_timeout_ms: u64,
    /// Frames buffered per subscriber
    pub connection_buffer: usize,
    /// Readings buffered for persistence
    pub persistence_queue: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: 250,
            connection_buffer: 32,
            persistence_queue: 256,
        }
    }
}

impl HubConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

impl Config {
    /// Loads configuration from `path`, or from the default location if it
    /// exists, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Reads a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Self::from_toml(&contents).map_err(|e| match e {
            ConfigError::Parse { error, .. } => ConfigError::Parse {
                path: Some(path.to_path_buf()),
                error,
            },
            other => other,
        })
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse {
            path: None,
            error: e.to_string(),
        })
    }

    /// Applies environment overrides using `lookup` to read variables.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup("SENSORHUB_BIND") {
            self.bind_address = bind
                .parse()
                .map_err(|_| ConfigError::invalid("SENSORHUB_BIND", &bind))?;
        }
        if let Some(port) = lookup("PORT") {
            self.port = Some(port.parse().map_err(|_| ConfigError::invalid("PORT", &port))?);
        }

        match (lookup("TLS_CERT_PATH"), lookup("TLS_KEY_PATH")) {
            (Some(cert), Some(key)) => {
                self.tls = Some(TlsConfig {
                    cert_path: cert.into(),
                    key_path: key.into(),
                })
            }
            (None, None) => {}
            _ => return Err(ConfigError::IncompleteTls),
        }

        if let Some(kind) = lookup("SENSOR_SOURCE") {
            self.source.kind = kind.parse()?;
        }
        if let Some(device) = lookup("SENSOR_DEVICE").or_else(|| lookup("BLUETOOTH_PORT")) {
            self.source.device = Some(device.into());
        }
        if let Some(kind) = lookup("SENSOR_STORE") {
            self.store.kind = kind.parse()?;
        }
        if let Some(path) = lookup("SENSOR_STORE_PATH") {
            self.store.path = path.into();
        }
        Ok(())
    }

    /// Port to listen on: the explicit one, else 443 with TLS, 5000 without.
    pub fn effective_port(&self) -> u16 {
        match (self.port, &self.tls) {
            (Some(port), _) => port,
            (None, Some(_)) => DEFAULT_TLS_PORT,
            (None, None) => DEFAULT_PLAIN_PORT,
        }
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.effective_port())
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.kind == SourceKind::Serial && self.source.device.is_none() {
            return Err(ConfigError::MissingDevice);
        }
        if self.source.period_ms == 0 {
            return Err(ConfigError::invalid("source.period_ms", "0"));
        }
        if self.hub.send_timeout_ms == 0 {
            return Err(ConfigError::invalid("hub.send_timeout_ms", "0"));
        }
        if self.hub.connection_buffer == 0 {
            return Err(ConfigError::invalid("hub.connection_buffer", "0"));
        }
        if self.hub.persistence_queue == 0 {
            return Err(ConfigError::invalid("hub.persistence_queue", "0"));
        }
        if self.recent_limit == 0 {
            return Err(ConfigError::invalid("recent_limit", "0"));
        }
        Ok(())
    }
}

/// Default location of the configuration file.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("sensorhub").join("config.toml"))
}

/// Errors raised while loading configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {error}", .path.display())]
    Read { path: PathBuf, error: String },

    #[error("failed to parse config{}: {error}", describe_path(.path))]
    Parse { path: Option<PathBuf>, error: String },

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: String, value: String },

    #[error("TLS requires both TLS_CERT_PATH and TLS_KEY_PATH")]
    IncompleteTls,

    #[error("serial source requires a device path (SENSOR_DEVICE)")]
    MissingDevice,
}

fn describe_path(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| format!(" file {}", p.display()))
        .unwrap_or_default()
}

impl ConfigError {
    fn invalid(key: &str, value: &str) -> Self {
        Self::Invalid {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

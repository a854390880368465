//! Client configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via PTPIP_CONFIG or --config)
//! 3. Environment variables

use crate::connection::{
    ConnectionConfig, Initiator, DEFAULT_DIAL_ATTEMPTS, DEFAULT_DIAL_DELAY, DEFAULT_FRIENDLY_NAME,
};
use crate::vendor::Vendor;
use ptpip_protocol::{DEFAULT_ADDRESS, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How this initiator introduces itself.
    pub initiator: InitiatorConfig,
    /// Where the responder lives and which vendor extension it speaks.
    pub responder: ResponderConfig,
    /// Dialing and timeouts.
    pub transport: TransportConfig,
    /// Local command socket of the daemon.
    pub server: ServerConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("PTPIP_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Applies environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from any key lookup, named as the environment
    /// variables are.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        self.initiator.apply_overrides(&lookup);
        self.responder.apply_overrides(&lookup);
        self.transport.apply_overrides(&lookup);
        self.server.apply_overrides(&lookup);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.responder.validate()?;
        self.transport.validate()
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }

    /// Resolves the responder host and builds the connection settings.
    pub async fn connection_config(&self) -> Result<ConnectionConfig, ConfigError> {
        self.validate()?;
        let host = self.responder.host.as_str();
        let ip = tokio::net::lookup_host((host, 0))
            .await
            .map_err(|e| {
                ConfigError::ValidationError(format!("cannot resolve host '{}': {}", host, e))
            })?
            .next()
            .map(|addr| addr.ip())
            .ok_or_else(|| {
                ConfigError::ValidationError(format!("host '{}' has no addresses", host))
            })?;

        let mut initiator = Initiator::new(self.initiator.friendly_name.clone());
        if let Some(guid) = self.initiator.guid {
            initiator = initiator.with_guid(guid);
        }

        let transport = &self.transport;
        Ok(ConnectionConfig::new(SocketAddr::new(ip, self.responder.command_data_port()))
            .with_event_addr(SocketAddr::new(ip, self.responder.event_port()))
            .with_streamer_addr(SocketAddr::new(ip, self.responder.streamer_port()))
            .with_vendor(Vendor::select(&self.responder.vendor))
            .with_initiator(initiator)
            .with_dial_attempts(transport.dial_attempts)
            .with_dial_delay(transport.dial_delay())
            .with_connect_timeout(Duration::from_secs(transport.connect_timeout_secs))
            .with_read_timeout(transport.read_timeout())
            .with_probe_timeout(Duration::from_secs(transport.probe_timeout_secs))
            .with_streaming(transport.streaming))
    }
}

fn parse_bool(value: &str) -> bool {
    value == "1" || value.to_lowercase() == "true"
}

/// Initiator identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InitiatorConfig {
    /// Friendly name shown on the responder.
    pub friendly_name: String,
    /// Fixed GUID. A random one is generated per connection when absent;
    /// responders that remember paired initiators need a fixed one.
    pub guid: Option<Uuid>,
}

impl Default for InitiatorConfig {
    fn default() -> Self {
        Self {
            friendly_name: DEFAULT_FRIENDLY_NAME.to_string(),
            guid: None,
        }
    }
}

impl InitiatorConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(name) = lookup("PTPIP_FRIENDLY_NAME") {
            self.friendly_name = name;
        }

        if let Some(guid) = lookup("PTPIP_GUID") {
            if let Ok(parsed) = Uuid::parse_str(&guid) {
                self.guid = Some(parsed);
            }
        }
    }
}

/// Responder address and vendor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponderConfig {
    /// Vendor extension name, e.g. `fuji`. Unknown names mean generic.
    pub vendor: String,
    pub host: String,
    /// Port shared by all sockets unless overridden per socket.
    pub port: u16,
    pub command_data_port: Option<u16>,
    pub event_port: Option<u16>,
    pub streamer_port: Option<u16>,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            vendor: "generic".to_string(),
            host: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            command_data_port: None,
            event_port: None,
            streamer_port: None,
        }
    }
}

impl ResponderConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(vendor) = lookup("PTPIP_VENDOR") {
            self.vendor = vendor;
        }

        if let Some(host) = lookup("PTPIP_HOST") {
            self.host = host;
        }

        if let Some(port) = lookup("PTPIP_PORT") {
            if let Ok(parsed) = port.parse() {
                self.port = parsed;
            }
        }

        for (key, slot) in [
            ("PTPIP_CMD_PORT", &mut self.command_data_port),
            ("PTPIP_EVENT_PORT", &mut self.event_port),
            ("PTPIP_STREAM_PORT", &mut self.streamer_port),
        ] {
            if let Some(port) = lookup(key) {
                if let Ok(parsed) = port.parse() {
                    *slot = Some(parsed);
                }
            }
        }
    }

    pub fn command_data_port(&self) -> u16 {
        self.command_data_port.unwrap_or(self.port)
    }

    pub fn event_port(&self) -> u16 {
        self.event_port.unwrap_or(self.port)
    }

    pub fn streamer_port(&self) -> u16 {
        self.streamer_port.unwrap_or(self.port)
    }

    fn has_split_ports(&self) -> bool {
        self.command_data_port.is_some() || self.event_port.is_some() || self.streamer_port.is_some()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "responder host not set".to_string(),
            ));
        }
        if self.port != DEFAULT_PORT && self.has_split_ports() {
            return Err(ConfigError::ValidationError(format!(
                "ambiguous port specification: port {} together with per-socket ports",
                self.port
            )));
        }
        Ok(())
    }
}

/// Dialing and deadlines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub dial_attempts: u32,
    pub dial_delay_ms: u64,
    pub connect_timeout_secs: u64,
    /// Deadline for each operation reply.
    pub read_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    /// Dial the streamer socket for live view.
    pub streaming: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            dial_attempts: DEFAULT_DIAL_ATTEMPTS,
            dial_delay_ms: DEFAULT_DIAL_DELAY.as_millis() as u64,
            connect_timeout_secs: 10,
            read_timeout_secs: 30,
            probe_timeout_secs: 10,
            streaming: false,
        }
    }
}

impl TransportConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(attempts) = lookup("PTPIP_DIAL_ATTEMPTS") {
            if let Ok(n) = attempts.parse() {
                self.dial_attempts = n;
            }
        }

        if let Some(timeout) = lookup("PTPIP_READ_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.read_timeout_secs = secs;
            }
        }

        if let Some(streaming) = lookup("PTPIP_STREAMING") {
            self.streaming = parse_bool(&streaming);
        }
    }

    pub fn dial_delay(&self) -> Duration {
        Duration::from_millis(self.dial_delay_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dial_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "dial_attempts must be at least 1".to_string(),
            ));
        }
        if self.read_timeout_secs == 0 || self.probe_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "timeouts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Daemon command socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
        }
    }
}

impl ServerConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(addr) = lookup("PTPIP_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Custom serde module for SocketAddr (to handle as string in YAML).
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

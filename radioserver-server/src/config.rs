//! Server configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via RADIOSERVER_CONFIG)
//! 3. Environment variables

use radioserver_core::{ChannelConfig, SimulatedConfig};
use radioserver_protocol::DEFAULT_PORT;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network configuration.
    pub network: NetworkConfig,
    /// Per-client sample pipeline configuration.
    pub channel: PipelineConfig,
    /// Front-end configuration.
    pub device: DeviceConfig,
    /// Metrics configuration.
    pub metrics: MetricsConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("RADIOSERVER_CONFIG") {
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

    fn apply_env_overrides(&mut self) {
        self.network.apply_env_overrides();
        self.channel.apply_env_overrides();
        self.device.apply_env_overrides();
        self.metrics.apply_env_overrides();
    }

    /// Checks values that would make the server unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.network.validate()?;
        self.channel.validate()?;
        self.device.validate()
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

fn env_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

fn env_parse<T: std::str::FromStr>(name: &str, target: &mut T) {
    if let Ok(value) = std::env::var(name) {
        if let Ok(parsed) = value.parse() {
            *target = parsed;
        }
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
    /// Socket read timeout in milliseconds. A timeout is not an error.
    pub read_timeout_ms: u64,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Messages buffered per client before sample frames are dropped.
    pub outbound_queue_capacity: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            read_timeout_ms: 1000,
            max_connections: 64,
            outbound_queue_capacity: 256,
        }
    }
}

impl NetworkConfig {
    fn apply_env_overrides(&mut self) {
        env_parse("RADIOSERVER_BIND", &mut self.bind_addr);
        env_parse("RADIOSERVER_READ_TIMEOUT_MS", &mut self.read_timeout_ms);
        env_parse("RADIOSERVER_MAX_CONNECTIONS", &mut self.max_connections);
        env_parse(
            "RADIOSERVER_OUTBOUND_QUEUE",
            &mut self.outbound_queue_capacity,
        );
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "network.max_connections must be at least 1".to_string(),
            ));
        }
        if self.outbound_queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "network.outbound_queue_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the read timeout as Duration.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Per-client sample pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Raw sample blocks queued per client before new blocks are dropped.
    pub queue_capacity: usize,
    /// Idle wake-up interval of the channel worker in milliseconds.
    pub wake_timeout_ms: u64,
    /// Upper bound on FFT frames sent per second.
    pub fft_frames_per_second: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 4096,
            wake_timeout_ms: 1000,
            fft_frames_per_second: 15,
        }
    }
}

impl PipelineConfig {
    fn apply_env_overrides(&mut self) {
        env_parse("RADIOSERVER_QUEUE_CAPACITY", &mut self.queue_capacity);
        env_parse("RADIOSERVER_WAKE_TIMEOUT_MS", &mut self.wake_timeout_ms);
        env_parse("RADIOSERVER_FFT_FPS", &mut self.fft_frames_per_second);
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "channel.queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.fft_frames_per_second == 0 {
            return Err(ConfigError::ValidationError(
                "channel.fft_frames_per_second must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Channel generator settings derived from this section.
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            queue_capacity: self.queue_capacity,
            wake_timeout: Duration::from_millis(self.wake_timeout_ms.max(1)),
            fft_frames_per_second: self.fft_frames_per_second,
        }
    }
}

/// Front-end backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// Tone generator, no hardware required.
    #[default]
    Simulated,
}

impl std::str::FromStr for DeviceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "simulated" | "sim" => Ok(DeviceKind::Simulated),
            other => Err(format!("unknown device kind '{}'", other)),
        }
    }
}

/// Front-end configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub kind: DeviceKind,
    /// Initial device center frequency in Hz.
    pub center_frequency: u32,
    /// Device sample rate in samples per second.
    pub sample_rate: u32,
    /// Initial gain index.
    pub gain: u8,
    /// Whether clients may change device settings (gain).
    pub can_control: bool,
    /// Samples per block handed to the clients.
    pub block_size: usize,
    /// Offset of the simulated tone from the center frequency.
    pub tone_offset_hz: i64,
    pub decimation_stages: u32,
    pub max_gain_index: u32,
    pub minimum_frequency: u32,
    pub maximum_frequency: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        let sim = SimulatedConfig::default();
        Self {
            kind: DeviceKind::Simulated,
            center_frequency: sim.center_frequency,
            sample_rate: sim.sample_rate,
            gain: sim.gain,
            can_control: true,
            block_size: sim.block_size,
            tone_offset_hz: sim.tone_offset_hz,
            decimation_stages: sim.decimation_stages,
            max_gain_index: sim.max_gain_index,
            minimum_frequency: sim.minimum_frequency,
            maximum_frequency: sim.maximum_frequency,
        }
    }
}

impl DeviceConfig {
    fn apply_env_overrides(&mut self) {
        env_parse("RADIOSERVER_DEVICE_KIND", &mut self.kind);
        env_parse("RADIOSERVER_CENTER_FREQUENCY", &mut self.center_frequency);
        env_parse("RADIOSERVER_SAMPLE_RATE", &mut self.sample_rate);
        env_parse("RADIOSERVER_GAIN", &mut self.gain);
        if let Ok(value) = std::env::var("RADIOSERVER_CAN_CONTROL") {
            self.can_control = env_flag(&value);
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::ValidationError(
                "device.sample_rate must be nonzero".to_string(),
            ));
        }
        if self.block_size == 0 {
            return Err(ConfigError::ValidationError(
                "device.block_size must be nonzero".to_string(),
            ));
        }
        if self.center_frequency < self.minimum_frequency
            || self.center_frequency > self.maximum_frequency
        {
            return Err(ConfigError::ValidationError(format!(
                "device.center_frequency {} outside [{}, {}]",
                self.center_frequency, self.minimum_frequency, self.maximum_frequency
            )));
        }
        if self.max_gain_index > u8::MAX as u32 {
            return Err(ConfigError::ValidationError(format!(
                "device.max_gain_index {} above {}",
                self.max_gain_index,
                u8::MAX
            )));
        }
        if self.gain as u32 > self.max_gain_index {
            return Err(ConfigError::ValidationError(format!(
                "device.gain {} above max_gain_index {}",
                self.gain, self.max_gain_index
            )));
        }
        Ok(())
    }

    /// Simulated front-end settings derived from this section.
    pub fn simulated_config(&self) -> SimulatedConfig {
        SimulatedConfig {
            center_frequency: self.center_frequency,
            sample_rate: self.sample_rate,
            gain: self.gain,
            block_size: self.block_size,
            tone_offset_hz: self.tone_offset_hz,
            decimation_stages: self.decimation_stages,
            max_gain_index: self.max_gain_index,
            minimum_frequency: self.minimum_frequency,
            maximum_frequency: self.maximum_frequency,
        }
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable metrics HTTP server.
    pub enabled: bool,
    /// Address to bind the metrics server to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 9090)),
        }
    }
}

impl MetricsConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(enabled) = std::env::var("RADIOSERVER_METRICS_ENABLED") {
            self.enabled = env_flag(&enabled);
        }
        env_parse("RADIOSERVER_METRICS_BIND", &mut self.bind_addr);
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.bind_addr.port(), 5555);
        assert_eq!(config.network.read_timeout(), Duration::from_secs(1));
        assert_eq!(config.channel.queue_capacity, 4096);
        assert_eq!(config.device.kind, DeviceKind::Simulated);
        assert_eq!(config.device.sample_rate, 2_400_000);
        assert!(!config.metrics.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "network:\n  bind_addr: \"127.0.0.1:6000\"\ndevice:\n  center_frequency: 433920000\n  can_control: false"
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.network.bind_addr.port(), 6000);
        assert_eq!(config.network.max_connections, 64);
        assert_eq!(config.device.center_frequency, 433_920_000);
        assert!(!config.device.can_control);
        assert_eq!(config.channel.fft_frames_per_second, 15);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("radioserver.yaml");

        let mut config = Config::default();
        config.channel.queue_capacity = 128;
        config.metrics.enabled = true;
        config.save(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.channel.queue_capacity, 128);
        assert!(loaded.metrics.enabled);
        assert_eq!(loaded.metrics.bind_addr, config.metrics.bind_addr);
    }

    #[test]
    fn test_file_errors() {
        let err = Config::from_file("/nonexistent/radioserver.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::IoError(..)));

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "network:\n  bind_addr: \"not an address\"").unwrap();
        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(..)));
        assert!(err.to_string().contains("failed to parse"));
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.channel.queue_capacity = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        let mut config = Config::default();
        config.device.sample_rate = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.device.center_frequency = 1_000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("center_frequency"));

        let mut config = Config::default();
        config.device.gain = 17;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.device.max_gain_index = 255;
        config.validate().unwrap();
        config.device.max_gain_index = 300;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_gain_index"));
    }

    #[test]
    fn test_derived_configs() {
        let config = Config::default();
        let channel = config.channel.channel_config();
        assert_eq!(channel.queue_capacity, 4096);
        assert_eq!(channel.wake_timeout, Duration::from_secs(1));

        let sim = config.device.simulated_config();
        assert_eq!(sim.center_frequency, 100_000_000);
        assert_eq!(sim.block_size, 16_384);
    }

    #[test]
    fn test_device_kind_parse() {
        assert_eq!("Simulated".parse::<DeviceKind>(), Ok(DeviceKind::Simulated));
        assert!("airspy".parse::<DeviceKind>().is_err());
    }
}

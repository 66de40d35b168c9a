pub mod capture;
pub mod error;
pub mod http;
pub mod preset;
pub mod serve;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::capture::{FrameSize, JpegQuality, SensorConfiguration};
use crate::error::ConfigError;
use crate::preset::PresetTable;
use crate::serve::{MultipartStreamer, Timing};

/// Config file read when no path is given on the command line.
pub const DEFAULT_CONFIG_FILE: &str = "iris.toml";

/// Prefix for environment overrides, e.g. `IRIS_SERVER__PORT=8080`.
pub const ENV_PREFIX: &str = "IRIS";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub sensor: SensorConfig,
    pub presets: PresetTable,
    pub timing: Timing,
    pub stream: StreamConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorBackend {
    /// Synthetic color bars, no hardware needed
    Pattern,
    /// V4L2 MJPEG device (requires the `v4l2` feature)
    V4l2,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub backend: SensorBackend,
    /// Device node; empty means auto-detect
    pub device: String,
    pub buffer_count: u32,
    /// Configuration the sensor starts in
    pub initial: SensorConfiguration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Largest single write of JPEG payload
    pub chunk_size: usize,
    /// Chunks buffered between the streamer and the socket
    pub channel_capacity: usize,
    /// Restore the pre-stream sensor configuration when a client disconnects
    pub restore_on_exit: bool,
    /// Keep retrying when capture fails mid-stream instead of ending it
    pub retry_on_capture_failure: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            backend: SensorBackend::Pattern,
            device: "/dev/video0".into(),
            buffer_count: 4,
            initial: SensorConfiguration::new(
                FrameSize::Vga,
                JpegQuality::new(12).unwrap_or(JpegQuality::BEST),
            ),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chunk_size: MultipartStreamer::DEFAULT_CHUNK_SIZE,
            channel_capacity: 8,
            restore_on_exit: false,
            retry_on_capture_failure: true,
        }
    }
}

impl Config {
    /// Layer defaults, the TOML file at `path` (or `iris.toml` if present),
    /// and `IRIS_*` environment variables, in that order.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let config: Config = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stream.chunk_size == 0 {
            return Err(ConfigError::Invalid("stream.chunk_size must be positive".into()));
        }
        if self.stream.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "stream.channel_capacity must be positive".into(),
            ));
        }
        if self.sensor.buffer_count == 0 {
            return Err(ConfigError::Invalid("sensor.buffer_count must be positive".into()));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

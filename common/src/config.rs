use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// `test-pattern` or `mjpeg`.
    #[serde(default = "default_source")]
    pub source: String,
    /// Upstream multipart stream, used when `source = "mjpeg"`.
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Longest wait for the next chunk of an upstream stream.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EncoderConfig {
    #[serde(default = "default_quality")]
    pub quality: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Skip re-emitting a frame a session has already sent.
    #[serde(default = "default_skip_repeats")]
    pub skip_repeats: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            url: String::new(),
            width: default_width(),
            height: default_height(),
            frame_interval_ms: default_frame_interval_ms(),
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            quality: default_quality(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            skip_repeats: default_skip_repeats(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl CaptureConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

impl StreamConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        let config = Self::from_toml(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.encoder.quality) {
            return Err(ConfigError::Invalid(format!(
                "encoder.quality must be within 1..=100, got {}",
                self.encoder.quality
            )));
        }
        if self.capture.frame_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "capture.frame_interval_ms must be greater than zero".into(),
            ));
        }
        if self.capture.read_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "capture.read_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.capture.source == "mjpeg" && self.capture.url.is_empty() {
            return Err(ConfigError::Invalid(
                "capture.url is required when capture.source = \"mjpeg\"".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_bind() -> String {
    "0.0.0.0:8000".into()
}
fn default_source() -> String {
    "test-pattern".into()
}
fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}
fn default_frame_interval_ms() -> u64 {
    34
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_read_timeout() -> u64 {
    5
}
fn default_quality() -> u8 {
    80
}
fn default_settle_delay_ms() -> u64 {
    100
}
fn default_skip_repeats() -> bool {
    true
}
fn default_log_level() -> String {
    "info".into()
}

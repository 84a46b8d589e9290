//! Channel configuration.
//!
//! Two inputs configure a channel:
//! - the externally owned input data descriptor (`inputdataconfig.json`),
//!   which says whether a channel is delivered over pipes at all;
//! - `ChannelOptions`, which select the record format, directories,
//!   benchmarking and the epoch wait policy.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use sluice_framing::RecordFormat;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name of the input data descriptor inside the config directory.
pub const INPUT_DATA_CONFIG_FILE: &str = "inputdataconfig.json";

pub const DEFAULT_PIPE_DIR: &str = "/opt/ml/input/data";
pub const DEFAULT_STATE_DIR: &str = "/opt/ml/pipe_state";
pub const DEFAULT_CONFIG_DIR: &str = "/opt/ml/input/config";
pub const DEFAULT_READ_SIZE: usize = 65_536;
pub const DEFAULT_READ_AHEAD_CAPACITY: usize = 64;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// How a channel's data is delivered to the training container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportMode {
    Pipe,
    File,
    FastFile,
    Other(String),
}

impl TransportMode {
    fn parse(mode: &str) -> Self {
        match mode.to_ascii_lowercase().as_str() {
            "pipe" => Self::Pipe,
            "file" => Self::File,
            "fastfile" => Self::FastFile,
            _ => Self::Other(mode.to_string()),
        }
    }
}

/// One entry of the input data descriptor. Fields other than the input mode
/// are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    #[serde(rename = "TrainingInputMode", default)]
    pub training_input_mode: String,
}

impl ChannelDescriptor {
    #[must_use]
    pub fn transport_mode(&self) -> TransportMode {
        TransportMode::parse(&self.training_input_mode)
    }
}

/// The input data descriptor: channel name to channel descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputDataConfig {
    channels: BTreeMap<String, ChannelDescriptor>,
}

impl InputDataConfig {
    /// Read `inputdataconfig.json` from `config_dir`.
    pub fn load(config_dir: &Path) -> Result<Self, ConfigError> {
        let path = config_dir.join(INPUT_DATA_CONFIG_FILE);
        let contents = std::fs::read_to_string(&path)
            .map_err(|source| ConfigError::MissingDescriptor { path: path.clone(), source })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::InvalidDescriptor { path, source })
    }

    pub fn channel(&self, name: &str) -> Option<&ChannelDescriptor> {
        self.channels.get(name)
    }

    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    /// Check that `name` is configured and delivered over pipes.
    pub fn require_pipe_channel(&self, name: &str) -> Result<&ChannelDescriptor, ConfigError> {
        let descriptor = self.channel(name).ok_or_else(|| ConfigError::ChannelNotFound(name.to_string()))?;
        if descriptor.transport_mode() != TransportMode::Pipe {
            return Err(ConfigError::NotPipeMode {
                channel: name.to_string(),
                mode: descriptor.training_input_mode.clone(),
            });
        }
        Ok(descriptor)
    }

    pub fn insert(&mut self, name: impl Into<String>, descriptor: ChannelDescriptor) {
        self.channels.insert(name.into(), descriptor);
    }
}

/// What a channel does when the next epoch's pipe has not appeared yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum EpochWait {
    /// Report end of channel right away; a later call probes again.
    #[default]
    Immediate,
    /// Poll until the pipe appears or the channel is cancelled.
    Poll {
        #[serde(default = "default_poll_interval_ms")]
        interval_ms: u64,
    },
    /// Poll until the pipe appears, then give up and report end of channel.
    PollFor {
        #[serde(default = "default_poll_interval_ms")]
        interval_ms: u64,
        timeout_ms: u64,
    },
}

impl EpochWait {
    #[must_use]
    pub fn poll(interval: Duration) -> Self {
        Self::Poll { interval_ms: duration_ms(interval) }
    }

    #[must_use]
    pub fn poll_for(interval: Duration, timeout: Duration) -> Self {
        Self::PollFor { interval_ms: duration_ms(interval), timeout_ms: duration_ms(timeout) }
    }

    #[must_use]
    pub fn interval(&self) -> Option<Duration> {
        match self {
            Self::Immediate => None,
            Self::Poll { interval_ms } | Self::PollFor { interval_ms, .. } => {
                Some(Duration::from_millis(*interval_ms))
            }
        }
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        match self {
            Self::PollFor { timeout_ms, .. } => Some(Duration::from_millis(*timeout_ms)),
            Self::Immediate | Self::Poll { .. } => None,
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_pipe_dir() -> PathBuf {
    PathBuf::from(DEFAULT_PIPE_DIR)
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_DIR)
}

fn default_config_dir() -> PathBuf {
    PathBuf::from(DEFAULT_CONFIG_DIR)
}

fn default_read_size() -> usize {
    DEFAULT_READ_SIZE
}

fn default_read_ahead_capacity() -> usize {
    DEFAULT_READ_AHEAD_CAPACITY
}

/// Options for opening a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelOptions {
    /// Record framing of every epoch in the channel.
    #[serde(default)]
    pub format: RecordFormat,
    /// Directory holding `<channel>_<epoch>` pipes.
    #[serde(default = "default_pipe_dir")]
    pub pipe_dir: PathBuf,
    /// Directory holding per-channel epoch state.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Directory holding `inputdataconfig.json`.
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,
    /// Emit a summary report when the channel is torn down.
    #[serde(default)]
    pub benchmark: bool,
    /// Emit a progress report every N records; 0 disables progress reports.
    #[serde(default)]
    pub benchmark_records_interval: u64,
    /// Preferred number of bytes per pipe read.
    #[serde(default = "default_read_size")]
    pub read_size: usize,
    #[serde(default)]
    pub epoch_wait: EpochWait,
    /// Last epoch the producer will ever write, when known in advance.
    #[serde(default)]
    pub final_epoch: Option<u64>,
    /// Queue bound for `ReadAheadChannel`.
    #[serde(default = "default_read_ahead_capacity")]
    pub read_ahead_capacity: usize,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            format: RecordFormat::default(),
            pipe_dir: default_pipe_dir(),
            state_dir: default_state_dir(),
            config_dir: default_config_dir(),
            benchmark: false,
            benchmark_records_interval: 0,
            read_size: DEFAULT_READ_SIZE,
            epoch_wait: EpochWait::default(),
            final_epoch: None,
            read_ahead_capacity: DEFAULT_READ_AHEAD_CAPACITY,
        }
    }
}

impl ChannelOptions {
    #[must_use]
    pub fn new(format: RecordFormat) -> Self {
        Self { format, ..Self::default() }
    }

    /// Use one directory for pipes, state and the input data descriptor.
    #[must_use]
    pub fn in_directory(mut self, dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        self.pipe_dir = dir.to_path_buf();
        self.state_dir = dir.to_path_buf();
        self.config_dir = dir.to_path_buf();
        self
    }

    #[must_use]
    pub fn with_pipe_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.pipe_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_benchmark(mut self, enabled: bool, records_interval: u64) -> Self {
        self.benchmark = enabled;
        self.benchmark_records_interval = records_interval;
        self
    }

    #[must_use]
    pub fn with_read_size(mut self, read_size: usize) -> Self {
        self.read_size = read_size;
        self
    }

    #[must_use]
    pub fn with_epoch_wait(mut self, wait: EpochWait) -> Self {
        self.epoch_wait = wait;
        self
    }

    #[must_use]
    pub fn with_final_epoch(mut self, epoch: u64) -> Self {
        self.final_epoch = Some(epoch);
        self
    }

    #[must_use]
    pub fn with_read_ahead_capacity(mut self, capacity: usize) -> Self {
        self.read_ahead_capacity = capacity;
        self
    }

    /// Parse options from TOML. Missing keys take their defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let options: Self = toml::from_str(contents)?;
        options.validate()?;
        Ok(options)
    }

    /// Load options from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::OptionsFile { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.read_size == 0 {
            return Err(ConfigError::InvalidOptions("read_size must be >= 1".to_string()));
        }
        if self.read_ahead_capacity == 0 {
            return Err(ConfigError::InvalidOptions("read_ahead_capacity must be >= 1".to_string()));
        }
        if self.epoch_wait.interval() == Some(Duration::ZERO) {
            return Err(ConfigError::InvalidOptions("epoch_wait.interval_ms must be >= 1".to_string()));
        }
        Ok(())
    }

    /// Whether a metrics collector should be attached.
    #[must_use]
    pub fn metrics_enabled(&self) -> bool {
        self.benchmark || self.benchmark_records_interval > 0
    }

    /// Path of the pipe carrying `epoch` of `channel`.
    #[must_use]
    pub fn pipe_path(&self, channel: &str, epoch: u64) -> PathBuf {
        self.pipe_dir.join(format!("{channel}_{epoch}"))
    }
}

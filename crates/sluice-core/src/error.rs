//! Error types for Sluice channels.

use sluice_framing::FramingError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Problems with the channel's configuration. Raised synchronously while a
/// channel is being constructed and never retried.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The input data descriptor could not be read.
    #[error("Input data config not readable at {path}: {source}")]
    MissingDescriptor {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The input data descriptor is not valid JSON of the expected shape.
    #[error("Invalid input data config at {path}: {source}")]
    InvalidDescriptor {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The channel is not listed in the input data descriptor.
    #[error("Channel {0} not found in input data config")]
    ChannelNotFound(String),

    /// The channel exists but is not configured for pipe transport.
    #[error("Channel {channel} is not a pipe mode channel (TrainingInputMode: {mode:?})")]
    NotPipeMode { channel: String, mode: String },

    /// Channel options failed validation.
    #[error("Invalid channel options: {0}")]
    InvalidOptions(String),

    /// A channel options file could not be read.
    #[error("Channel options not readable at {path}: {source}")]
    OptionsFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A channel options file is not valid TOML of the expected shape.
    #[error("Invalid channel options: {0}")]
    OptionsParse(#[from] toml::de::Error),
}

/// Failures of the durable epoch state.
#[derive(Error, Debug)]
pub enum StateError {
    /// Reading, writing or locking a state file failed.
    #[error("Epoch state I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A state file exists but cannot be interpreted.
    #[error("Corrupt epoch state at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// A commit would move the completed epoch backwards.
    #[error("Epoch {attempted} does not advance past last completed epoch {last}")]
    Regression { last: u64, attempted: u64 },
}

/// Errors surfaced to a channel's consumer.
///
/// `Io`, `Framing` and `State` are fatal: the channel abandons its current
/// stream and reports `Failed` on every later call.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Unexpected failure reading an epoch pipe (not a clean end of stream).
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Malformed or truncated record data.
    #[error("Malformed record in {path}: {source}")]
    Framing {
        path: PathBuf,
        #[source]
        source: FramingError,
    },

    #[error(transparent)]
    State(#[from] StateError),

    /// The channel was cancelled while a caller was waiting on it.
    #[error("Channel {0} was cancelled")]
    Cancelled(String),

    /// A fatal error was already reported for this channel.
    #[error("Channel {channel} failed: {reason}")]
    Failed { channel: String, reason: String },

    /// The channel was used after `close`.
    #[error("Channel {0} is closed")]
    Closed(String),

    /// The read-ahead worker thread could not be started.
    #[error("Failed to start read-ahead worker for channel {channel}: {source}")]
    Worker {
        channel: String,
        #[source]
        source: io::Error,
    },
}

impl ChannelError {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

/// Result type alias for channel operations.
pub type Result<T> = std::result::Result<T, ChannelError>;

/// Result type alias for epoch state operations.
pub type StateResult<T> = std::result::Result<T, StateError>;

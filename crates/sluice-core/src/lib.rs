//! Sluice Core
//!
//! Pipe-mode training channels:
//! - Reading `<channel>_<epoch>` pipes in order, one epoch at a time
//! - Persisting the last completed epoch so a restarted process resumes
//! - Throughput metrics delivered to a `ReportSink`
//! - A background read-ahead consumer with cancellation
//!
//! ```no_run
//! use sluice_core::{Channel, ChannelOptions, RecordFormat};
//!
//! # fn main() -> sluice_core::Result<()> {
//! let mut channel = Channel::open("train", ChannelOptions::new(RecordFormat::RecordIo))?;
//! while let Some(record) = channel.next_record()? {
//!     println!("{} bytes", record.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod metrics;
pub mod read_ahead;
pub mod reader;
pub mod state;

pub use channel::{Channel, ChannelState};
pub use config::{ChannelDescriptor, ChannelOptions, EpochWait, InputDataConfig, TransportMode};
pub use error::{ChannelError, ConfigError, Result, StateError, StateResult};
pub use metrics::{
    MemoryReportSink, MetricsCollector, Report, ReportSink, Snapshot, StdoutReportSink, TracingReportSink,
};
pub use read_ahead::ReadAheadChannel;
pub use reader::{EpochStreamReader, Fill, ReadError};
pub use sluice_framing::{FramingError, Record, RecordFormat};
pub use state::{EpochState, EpochStateStore};

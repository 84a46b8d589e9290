//! Channel manager: epoch rotation over `<channel>_<epoch>` pipes.
//!
//! A channel walks an explicit state machine:
//!
//! ```text
//! AwaitingEpoch(n) -> Reading(n) -> AwaitingEpoch(n + 1) -> Reading(n + 1) ...
//!                                \-> Exhausted (after committing final_epoch)
//! any -> Failed (fatal error surfaced) | Closed (close, drop or cancellation)
//! ```
//!
//! Each epoch is committed to the state store as soon as its stream ends,
//! before the next pipe is opened, so a restarted process resumes at the first
//! epoch it has not drained.

use crate::config::{ChannelOptions, InputDataConfig};
use crate::error::{ChannelError, Result};
use crate::metrics::{MetricsCollector, ReportSink, Snapshot, TracingReportSink};
use crate::reader::{EpochStreamReader, ReadError};
use crate::state::EpochStateStore;
use bytes::BytesMut;
use sluice_framing::{Record, RecordFormat};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    /// Epoch `n` is next; its pipe has not been opened yet.
    AwaitingEpoch(u64),
    /// Records are being read from epoch `n`.
    Reading(u64),
    /// The final epoch has been committed. Every call reports end of channel.
    Exhausted,
    /// A fatal error was surfaced. Holds its description.
    Failed(String),
    Closed,
}

impl ChannelState {
    /// The epoch being read or waited for, if any.
    #[must_use]
    pub fn epoch(&self) -> Option<u64> {
        match self {
            Self::AwaitingEpoch(epoch) | Self::Reading(epoch) => Some(*epoch),
            Self::Exhausted | Self::Failed(_) | Self::Closed => None,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Exhausted | Self::Failed(_) | Self::Closed)
    }
}

/// Outcome of one step of the state machine.
enum Transition {
    /// Move to the given state and keep stepping.
    Continue(ChannelState),
    /// Move to the given state and hand the result to the caller.
    Emit(ChannelState, Result<Option<Record>>),
}

/// A pull-based consumer of one pipe-mode channel.
pub struct Channel {
    name: String,
    options: ChannelOptions,
    store: EpochStateStore,
    state: ChannelState,
    reader: Option<EpochStreamReader>,
    buffer: BytesMut,
    metrics: Option<MetricsCollector>,
    cancel: CancellationToken,
}

impl Channel {
    /// Open `name`, reporting metrics through `tracing`.
    ///
    /// The channel must be listed as a pipe channel in the input data
    /// descriptor; that is checked before the state directory is touched.
    /// Reading resumes after the last epoch recorded as completed.
    pub fn open(name: impl Into<String>, options: ChannelOptions) -> Result<Self> {
        Self::open_with_sink(name, options, Arc::new(TracingReportSink))
    }

    /// Open `name`, delivering metrics reports to `sink`.
    pub fn open_with_sink(
        name: impl Into<String>,
        options: ChannelOptions,
        sink: Arc<dyn ReportSink>,
    ) -> Result<Self> {
        let name = name.into();
        options.validate()?;
        InputDataConfig::load(&options.config_dir)?.require_pipe_channel(&name)?;

        let store = EpochStateStore::open(&options.state_dir, &name)?;
        let next_epoch = store.load()?.next_epoch();
        let state = match options.final_epoch {
            Some(last) if next_epoch > last => ChannelState::Exhausted,
            _ => ChannelState::AwaitingEpoch(next_epoch),
        };

        let metrics = options.metrics_enabled().then(|| {
            MetricsCollector::new(name.as_str(), options.benchmark_records_interval, options.benchmark, sink)
        });

        info!(
            channel = %name,
            epoch = next_epoch,
            format = %options.format,
            pipe_dir = %options.pipe_dir.display(),
            exhausted = state == ChannelState::Exhausted,
            "Opened channel"
        );

        Ok(Self {
            name,
            options,
            store,
            state,
            reader: None,
            buffer: BytesMut::new(),
            metrics,
            cancel: CancellationToken::new(),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn format(&self) -> RecordFormat {
        self.options.format
    }

    #[must_use]
    pub fn options(&self) -> &ChannelOptions {
        &self.options
    }

    #[must_use]
    pub fn state(&self) -> &ChannelState {
        &self.state
    }

    /// The epoch being read or waited for.
    #[must_use]
    pub fn current_epoch(&self) -> Option<u64> {
        self.state.epoch()
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.state == ChannelState::Exhausted
    }

    /// Token that aborts an epoch wait from another thread. Cancelling it
    /// closes the channel at its next check.
    #[must_use]
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Current metrics totals, when metrics are enabled.
    #[must_use]
    pub fn metrics_snapshot(&self) -> Option<Snapshot> {
        self.metrics.as_ref().map(MetricsCollector::snapshot)
    }

    /// Pull the next record.
    ///
    /// `Ok(None)` means no epoch is available right now (or ever, once
    /// exhausted). Fatal errors move the channel to `Failed`; later calls
    /// return `ChannelError::Failed`.
    pub fn next_record(&mut self) -> Result<Option<Record>> {
        loop {
            let state = std::mem::replace(&mut self.state, ChannelState::Closed);
            match self.step(state) {
                Transition::Continue(next) => self.state = next,
                Transition::Emit(next, result) => {
                    self.state = next;
                    return result;
                }
            }
        }
    }

    fn step(&mut self, state: ChannelState) -> Transition {
        match state {
            ChannelState::Closed => Transition::Emit(ChannelState::Closed, Err(ChannelError::Closed(self.name.clone()))),
            ChannelState::Failed(reason) => {
                let err = ChannelError::Failed { channel: self.name.clone(), reason: reason.clone() };
                Transition::Emit(ChannelState::Failed(reason), Err(err))
            }
            ChannelState::Exhausted => Transition::Emit(ChannelState::Exhausted, Ok(None)),
            ChannelState::AwaitingEpoch(_) | ChannelState::Reading(_) if self.cancel.is_cancelled() => {
                self.cancelled()
            }
            ChannelState::AwaitingEpoch(epoch) => match self.open_epoch(epoch) {
                Ok(Some(reader)) => {
                    self.reader = Some(reader);
                    self.buffer.clear();
                    Transition::Continue(ChannelState::Reading(epoch))
                }
                Ok(None) => Transition::Emit(ChannelState::AwaitingEpoch(epoch), Ok(None)),
                Err(err) if err.is_cancelled() => self.cancelled(),
                Err(err) => self.fail(epoch, err),
            },
            ChannelState::Reading(epoch) => self.read(epoch),
        }
    }

    fn read(&mut self, epoch: u64) -> Transition {
        let Some(reader) = self.reader.as_mut() else {
            return Transition::Continue(ChannelState::AwaitingEpoch(epoch));
        };

        let started = Instant::now();
        let result = reader.next_record(&mut self.buffer, self.options.format);
        let read_time = started.elapsed();

        match result {
            Ok(Some(record)) => {
                if let Some(metrics) = self.metrics.as_mut() {
                    metrics.record_read(record.len(), read_time);
                }
                Transition::Emit(ChannelState::Reading(epoch), Ok(Some(record)))
            }
            Ok(None) => {
                if let Some(metrics) = self.metrics.as_mut() {
                    metrics.add_read_time(read_time);
                }
                self.complete_epoch(epoch)
            }
            Err(err) => {
                let path = self.options.pipe_path(&self.name, epoch);
                let err = match err {
                    ReadError::Io(source) => ChannelError::Io { path, source },
                    ReadError::Framing(source) => ChannelError::Framing { path, source },
                };
                self.fail(epoch, err)
            }
        }
    }

    fn complete_epoch(&mut self, epoch: u64) -> Transition {
        let bytes = self.reader.take().map_or(0, |reader| reader.bytes_read());
        if let Err(err) = self.store.commit(epoch) {
            return self.fail(epoch, err.into());
        }
        info!(channel = %self.name, epoch, bytes, "Completed epoch");

        if self.options.final_epoch.is_some_and(|last| epoch >= last) {
            info!(channel = %self.name, epoch, "Channel exhausted");
            self.finish_metrics();
            return Transition::Continue(ChannelState::Exhausted);
        }
        Transition::Continue(ChannelState::AwaitingEpoch(epoch + 1))
    }

    fn open_epoch(&self, epoch: u64) -> Result<Option<EpochStreamReader>> {
        let path = self.options.pipe_path(&self.name, epoch);
        if !self.wait_for_pipe(epoch, &path)? {
            return Ok(None);
        }

        let reader = EpochStreamReader::open(&path, self.options.read_size)
            .map_err(|source| ChannelError::Io { path: path.clone(), source })?;
        info!(channel = %self.name, epoch, path = %path.display(), "Opened epoch stream");
        Ok(Some(reader))
    }

    /// Wait for `path` according to the epoch wait policy. Returns whether the
    /// pipe exists.
    fn wait_for_pipe(&self, epoch: u64, path: &Path) -> Result<bool> {
        let wait = self.options.epoch_wait;
        let deadline = wait.timeout().map(|timeout| Instant::now() + timeout);

        loop {
            if pipe_exists(path)? {
                return Ok(true);
            }
            let Some(interval) = wait.interval() else {
                debug!(channel = %self.name, epoch, path = %path.display(), "Epoch stream not present");
                return Ok(false);
            };
            if self.cancel.is_cancelled() {
                return Err(ChannelError::Cancelled(self.name.clone()));
            }

            let mut pause = interval;
            if let Some(deadline) = deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    warn!(
                        channel = %self.name,
                        epoch,
                        path = %path.display(),
                        timeout_ms = wait.timeout().map_or(0, |t| t.as_millis() as u64),
                        "Timed out waiting for epoch stream"
                    );
                    return Ok(false);
                }
                pause = pause.min(remaining);
            }
            std::thread::sleep(pause.min(MAX_POLL_SLICE));
        }
    }

    fn fail(&mut self, epoch: u64, err: ChannelError) -> Transition {
        let path = self.options.pipe_path(&self.name, epoch);
        error!(channel = %self.name, epoch, path = %path.display(), error = %err, "Channel failed");
        self.release_reader();
        self.finish_metrics();
        Transition::Emit(ChannelState::Failed(err.to_string()), Err(err))
    }

    fn cancelled(&mut self) -> Transition {
        info!(channel = %self.name, "Channel cancelled");
        self.teardown();
        Transition::Emit(ChannelState::Closed, Err(ChannelError::Cancelled(self.name.clone())))
    }

    /// Release the pipe, emit the metrics summary and move to `Closed`.
    /// Calling it again does nothing.
    pub fn close(&mut self) {
        if self.state == ChannelState::Closed {
            return;
        }
        self.teardown();
        self.state = ChannelState::Closed;
        info!(channel = %self.name, "Closed channel");
    }

    fn teardown(&mut self) {
        self.release_reader();
        self.finish_metrics();
    }

    fn release_reader(&mut self) {
        if let Some(mut reader) = self.reader.take() {
            reader.close();
        }
        self.buffer.clear();
    }

    fn finish_metrics(&mut self) {
        if let Some(metrics) = self.metrics.as_mut() {
            metrics.finish();
        }
    }

    /// Path of the pipe for `epoch` of this channel.
    #[must_use]
    pub fn pipe_path(&self, epoch: u64) -> PathBuf {
        self.options.pipe_path(&self.name, epoch)
    }
}

/// Longest uninterrupted sleep while polling, so cancellation is noticed
/// promptly even with long poll intervals.
const MAX_POLL_SLICE: Duration = Duration::from_millis(50);

fn pipe_exists(path: &Path) -> Result<bool> {
    path.try_exists().map_err(|source| ChannelError::Io { path: path.to_path_buf(), source })
}

impl Iterator for Channel {
    type Item = Result<Record>;

    /// Yields records until end of channel, stopping after the first error.
    fn next(&mut self) -> Option<Self::Item> {
        if matches!(self.state, ChannelState::Failed(_) | ChannelState::Closed) {
            return None;
        }
        self.next_record().transpose()
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("format", &self.options.format)
            .field("state", &self.state)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_epoch() {
        assert_eq!(ChannelState::AwaitingEpoch(3).epoch(), Some(3));
        assert_eq!(ChannelState::Reading(4).epoch(), Some(4));
        assert_eq!(ChannelState::Exhausted.epoch(), None);
        assert_eq!(ChannelState::Failed("boom".to_string()).epoch(), None);
    }

    #[test]
    fn test_state_is_terminal() {
        assert!(!ChannelState::AwaitingEpoch(0).is_terminal());
        assert!(!ChannelState::Reading(0).is_terminal());
        assert!(ChannelState::Exhausted.is_terminal());
        assert!(ChannelState::Closed.is_terminal());
    }

    #[test]
    fn test_channel_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Channel>();
    }
}

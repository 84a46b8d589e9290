//! Background read-ahead over a `Channel`.
//!
//! A dedicated thread owns the channel and pushes decoded records into a
//! bounded queue. The thread blocks once the queue is full; consumers await
//! records with `next` and can be released at any time through the channel's
//! cancellation token.
//!
//! The worker stops after the first end of channel or error, so pair this with
//! a polling `EpochWait` when epochs are written while training runs.

use crate::channel::Channel;
use crate::error::{ChannelError, Result};
use sluice_framing::Record;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type Item = Result<Option<Record>>;

pub struct ReadAheadChannel {
    name: String,
    receiver: Option<mpsc::Receiver<Item>>,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
    ended: bool,
    failure: Option<String>,
}

impl ReadAheadChannel {
    /// Start reading `channel` on a background thread, buffering at most
    /// `capacity` records.
    pub fn spawn(channel: Channel, capacity: usize) -> Result<Self> {
        let name = channel.name().to_string();
        let cancel = channel.cancel_handle();
        let (sender, receiver) = mpsc::channel(capacity.max(1));

        let worker_cancel = cancel.clone();
        let worker = std::thread::Builder::new()
            .name(format!("sluice-{name}"))
            .spawn(move || pump(channel, &sender, &worker_cancel))
            .map_err(|source| ChannelError::Worker { channel: name.clone(), source })?;

        debug!(channel = %name, capacity, "Started read-ahead worker");
        Ok(Self { name, receiver: Some(receiver), cancel, worker: Some(worker), ended: false, failure: None })
    }

    /// Start with the queue bound from the channel's options.
    pub fn spawn_default(channel: Channel) -> Result<Self> {
        let capacity = channel.options().read_ahead_capacity;
        Self::spawn(channel, capacity)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the next record.
    ///
    /// Returns `Ok(None)` once the channel has ended and `ChannelError::Cancelled`
    /// as soon as the channel is cancelled, even while waiting.
    pub async fn next(&mut self) -> Result<Option<Record>> {
        if self.cancel.is_cancelled() {
            return Err(ChannelError::Cancelled(self.name.clone()));
        }
        if let Some(reason) = &self.failure {
            return Err(ChannelError::Failed { channel: self.name.clone(), reason: reason.clone() });
        }
        if self.ended {
            return Ok(None);
        }
        let Some(receiver) = self.receiver.as_mut() else {
            return Err(ChannelError::Cancelled(self.name.clone()));
        };

        let item = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(ChannelError::Cancelled(self.name.clone())),
            item = receiver.recv() => item,
        };

        match item {
            Some(Ok(Some(record))) => Ok(Some(record)),
            Some(Ok(None)) => {
                self.ended = true;
                Ok(None)
            }
            Some(Err(err)) => {
                if !err.is_cancelled() {
                    self.failure = Some(err.to_string());
                }
                Err(err)
            }
            None if self.cancel.is_cancelled() => Err(ChannelError::Cancelled(self.name.clone())),
            None => {
                let reason = "read-ahead worker exited".to_string();
                self.failure = Some(reason.clone());
                Err(ChannelError::Failed { channel: self.name.clone(), reason })
            }
        }
    }

    /// Blocking form of `next` for callers outside an async runtime.
    pub fn next_blocking(&mut self) -> Result<Option<Record>> {
        futures::executor::block_on(self.next())
    }

    /// Cancel the channel and stop receiving. The worker drops the channel
    /// once its current read returns.
    pub fn close(&mut self) {
        self.cancel.cancel();
        if self.receiver.take().is_some() {
            debug!(channel = %self.name, "Closed read-ahead channel");
        }
        if let Some(worker) = self.worker.take() {
            if worker.is_finished() {
                if worker.join().is_err() {
                    warn!(channel = %self.name, "Read-ahead worker panicked");
                }
            } else {
                debug!(channel = %self.name, "Detached read-ahead worker blocked in read");
            }
        }
    }
}

fn pump(mut channel: Channel, sender: &mpsc::Sender<Item>, cancel: &CancellationToken) {
    while !cancel.is_cancelled() {
        let item = channel.next_record();
        let last = !matches!(item, Ok(Some(_)));
        if sender.blocking_send(item).is_err() || last {
            break;
        }
    }
    debug!(channel = %channel.name(), "Read-ahead worker stopped");
}

impl Drop for ReadAheadChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ReadAheadChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadAheadChannel")
            .field("name", &self.name)
            .field("ended", &self.ended)
            .field("failure", &self.failure)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

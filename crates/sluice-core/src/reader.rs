//! Blocking, single-pass reader over one epoch pipe.

use bytes::BytesMut;
use sluice_framing::{Decoded, FramingError, Record, RecordFormat};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, trace};

/// Upper bound on buffer space reserved ahead of a frame's bytes arriving.
/// Length headers are untrusted, so larger frames grow as data is read.
pub const MAX_PREALLOC: usize = 1 << 20;

/// Result of one `fill` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    /// This many bytes were appended to the buffer.
    Read(usize),
    /// The writer closed its end and every byte has been read.
    EndOfStream,
}

#[derive(Debug, Error)]
pub enum ReadError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Framing(#[from] FramingError),
}

/// Owns the descriptor of one epoch pipe.
///
/// The reader knows nothing about epochs or state; it only moves bytes from
/// the pipe into a caller-owned buffer.
#[derive(Debug)]
pub struct EpochStreamReader {
    path: PathBuf,
    file: Option<File>,
    read_size: usize,
    bytes_read: u64,
    /// Bytes at the head of the buffer already examined by the decoder.
    scanned: usize,
    bytes_examined: u64,
}

impl EpochStreamReader {
    /// Open `path` for sequential reading. For a FIFO this blocks until a
    /// writer has opened the other end.
    pub fn open(path: impl Into<PathBuf>, read_size: usize) -> io::Result<Self> {
        let path = path.into();
        let file = File::open(&path)?;
        Ok(Self { path, file: Some(file), read_size: read_size.max(1), bytes_read: 0, scanned: 0, bytes_examined: 0 })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Total bytes handed to the decoder for the first time. Stays close to
    /// `bytes_read` however the stream is chunked.
    #[must_use]
    pub fn bytes_examined(&self) -> u64 {
        self.bytes_examined
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Append up to `read_size` bytes from the pipe to `buffer`.
    ///
    /// Pipes deliver data in whatever chunks the writer produced, so a short
    /// read is normal. A closed reader reports `EndOfStream`.
    pub fn fill(&mut self, buffer: &mut BytesMut) -> io::Result<Fill> {
        let Some(file) = self.file.as_mut() else {
            return Ok(Fill::EndOfStream);
        };

        let start = buffer.len();
        buffer.resize(start + self.read_size, 0);
        loop {
            match file.read(&mut buffer[start..]) {
                Ok(0) => {
                    buffer.truncate(start);
                    debug!(path = %self.path.display(), bytes = self.bytes_read, "End of epoch stream");
                    return Ok(Fill::EndOfStream);
                }
                Ok(n) => {
                    buffer.truncate(start + n);
                    self.bytes_read += n as u64;
                    trace!(path = %self.path.display(), bytes = n, "Read from epoch stream");
                    return Ok(Fill::Read(n));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    buffer.truncate(start);
                    return Err(e);
                }
            }
        }
    }

    /// Decode the next record, reading from the pipe as often as needed.
    ///
    /// Returns `None` once the stream has ended cleanly with an empty buffer.
    /// Bytes left over at end of stream that do not form a record are a
    /// framing error.
    pub fn next_record(&mut self, buffer: &mut BytesMut, format: RecordFormat) -> Result<Option<Record>, ReadError> {
        loop {
            self.bytes_examined += buffer.len().saturating_sub(self.scanned) as u64;
            match format.decode_from(buffer, self.scanned)? {
                Decoded::Record { payload, consumed } => {
                    self.scanned = 0;
                    let frame = buffer.split_to(consumed).freeze();
                    return Ok(Some(frame.slice(payload)));
                }
                Decoded::Incomplete { needed } => {
                    self.scanned = buffer.len();
                    if let Some(needed) = needed {
                        let ahead = self.read_size.max(MAX_PREALLOC);
                        buffer.reserve(needed.saturating_sub(buffer.len()).min(ahead));
                    }
                    if self.fill(buffer)? == Fill::EndOfStream {
                        format.end_of_stream(buffer)?;
                        self.close();
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Release the descriptor. Safe to call more than once.
    pub fn close(&mut self) {
        if self.file.take().is_some() {
            debug!(path = %self.path.display(), bytes = self.bytes_read, "Closed epoch stream");
        }
    }
}

impl Drop for EpochStreamReader {
    fn drop(&mut self) {
        self.close();
    }
}

use crate::format::RecordFormat;
use thiserror::Error;

pub type FramingResult<T> = std::result::Result<T, FramingError>;

/// Malformed or truncated record data.
///
/// Every variant is terminal for the stream it was raised on: no attempt is
/// made to resynchronise past corrupt bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("invalid RecordIO magic number: {found:#010x}")]
    BadMagic { found: u32 },

    #[error("multipart RecordIO records are not supported (flag {flag})")]
    UnsupportedMultipart { flag: u32 },

    #[error("invalid TFRecord length checksum: expected {expected:#010x}, found {found:#010x}")]
    LengthChecksum { expected: u32, found: u32 },

    #[error("invalid TFRecord payload checksum: expected {expected:#010x}, found {found:#010x}")]
    PayloadChecksum { expected: u32, found: u32 },

    #[error("record length {length} exceeds addressable memory")]
    LengthOverflow { length: u64 },

    #[error("incomplete final line: {len} bytes without a trailing newline")]
    IncompleteLine { len: usize },

    #[error("truncated {format} record: stream ended after {available} bytes, frame needs {needed}")]
    Truncated { format: RecordFormat, needed: usize, available: usize },

    #[error("payload of {len} bytes cannot be framed as {format}")]
    PayloadTooLarge { format: RecordFormat, len: usize },

    #[error("TextLine payload contains a newline at byte {position}")]
    EmbeddedNewline { position: usize },

    #[error("invalid record format: {0} (expected RecordIO, TFRecord or TextLine)")]
    UnknownFormat(String),
}

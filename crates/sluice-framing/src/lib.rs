//! Sluice Framing
//!
//! I/O-free record framing for pipe-mode training channels:
//! - `RecordIO`: magic number, length word, payload padded to 4 bytes
//! - `TFRecord`: length and payload, each guarded by a masked CRC32C
//! - `TextLine`: newline-terminated records
//!
//! Decoders operate on whatever bytes have arrived so far and report either a
//! complete record or how much more input they need. They never block and never
//! touch a file descriptor, so every framing rule can be exercised against plain
//! byte arrays.

pub mod error;
pub mod format;
pub mod recordio;
pub mod textline;
pub mod tfrecord;

pub use error::{FramingError, FramingResult};
pub use format::{Decoded, RecordFormat};

/// One decoded record. The engine imposes no structure on it.
pub type Record = bytes::Bytes;

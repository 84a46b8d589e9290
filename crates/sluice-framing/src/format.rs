use crate::error::{FramingError, FramingResult};
use crate::{recordio, textline, tfrecord};
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

/// The framing used by a channel. Chosen once at construction and fixed for the
/// channel's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RecordFormat {
    /// Magic number, length word, payload, zero padding to a 4-byte boundary.
    #[default]
    #[serde(rename = "RecordIO")]
    RecordIo,
    /// Length, masked CRC32C of the length, payload, masked CRC32C of the payload.
    #[serde(rename = "TFRecord")]
    TfRecord,
    /// Newline-terminated bytes; the terminator is stripped.
    #[serde(rename = "TextLine")]
    TextLine,
}

/// Outcome of one decode attempt against the head of a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete frame sits at the head of the buffer. `payload` locates the
    /// record inside it and `consumed` is the full frame length.
    Record { payload: Range<usize>, consumed: usize },
    /// More bytes are required. `needed` is the total frame length when the
    /// header has already revealed it.
    Incomplete { needed: Option<usize> },
}

impl RecordFormat {
    pub const ALL: [Self; 3] = [Self::RecordIo, Self::TfRecord, Self::TextLine];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::RecordIo => "RecordIO",
            Self::TfRecord => "TFRecord",
            Self::TextLine => "TextLine",
        }
    }

    /// Try to decode one record from the head of `buf`.
    pub fn decode(self, buf: &[u8]) -> FramingResult<Decoded> {
        match self {
            Self::RecordIo => recordio::decode(buf),
            Self::TfRecord => tfrecord::decode(buf),
            Self::TextLine => Ok(textline::decode(buf)),
        }
    }

    /// Resume decoding a buffer whose first `scanned` bytes were already
    /// examined by an attempt that returned `Incomplete`.
    ///
    /// Line framing only searches the new bytes, so a long line arriving in
    /// many small reads is scanned once. Length-prefixed framings re-read
    /// their fixed-size header.
    pub fn decode_from(self, buf: &[u8], scanned: usize) -> FramingResult<Decoded> {
        match self {
            Self::TextLine => Ok(textline::decode_from(buf, scanned)),
            Self::RecordIo | Self::TfRecord => self.decode(buf),
        }
    }

    /// Validate the bytes left over once the writer has closed the stream.
    ///
    /// Returns `Ok` when nothing is left, or when `leftover` still starts with a
    /// complete frame that the caller has yet to take.
    pub fn end_of_stream(self, leftover: &[u8]) -> FramingResult<()> {
        if leftover.is_empty() {
            return Ok(());
        }
        match self {
            Self::TextLine => match textline::decode(leftover) {
                Decoded::Record { .. } => Ok(()),
                Decoded::Incomplete { .. } => Err(FramingError::IncompleteLine { len: leftover.len() }),
            },
            Self::RecordIo | Self::TfRecord => match self.decode(leftover)? {
                Decoded::Record { .. } => Ok(()),
                Decoded::Incomplete { needed } => Err(FramingError::Truncated {
                    format: self,
                    needed: needed.unwrap_or_else(|| self.header_len()),
                    available: leftover.len(),
                }),
            },
        }
    }

    /// Append the framed form of `payload` to `out`.
    pub fn encode_into(self, payload: &[u8], out: &mut BytesMut) -> FramingResult<()> {
        match self {
            Self::RecordIo => recordio::encode_into(payload, out),
            Self::TfRecord => {
                tfrecord::encode_into(payload, out);
                Ok(())
            }
            Self::TextLine => textline::encode_into(payload, out),
        }
    }

    pub fn encode(self, payload: &[u8]) -> FramingResult<Bytes> {
        let mut out = BytesMut::with_capacity(payload.len() + self.header_len() + 4);
        self.encode_into(payload, &mut out)?;
        Ok(out.freeze())
    }

    const fn header_len(self) -> usize {
        match self {
            Self::RecordIo => recordio::HEADER_LEN,
            Self::TfRecord => tfrecord::HEADER_LEN,
            Self::TextLine => 1,
        }
    }
}

impl fmt::Display for RecordFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RecordFormat {
    type Err = FramingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|format| format.name() == s)
            .ok_or_else(|| FramingError::UnknownFormat(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_names() {
        assert_eq!("RecordIO".parse::<RecordFormat>().unwrap(), RecordFormat::RecordIo);
        assert_eq!("TFRecord".parse::<RecordFormat>().unwrap(), RecordFormat::TfRecord);
        assert_eq!("TextLine".parse::<RecordFormat>().unwrap(), RecordFormat::TextLine);
    }

    #[test]
    fn test_parse_rejects_unknown_name() {
        let err = "recordio".parse::<RecordFormat>().unwrap_err();
        assert_eq!(err, FramingError::UnknownFormat("recordio".to_string()));
    }

    #[test]
    fn test_serde_uses_display_names() {
        let json = serde_json::to_string(&RecordFormat::TfRecord).unwrap();
        assert_eq!(json, "\"TFRecord\"");
        let parsed: RecordFormat = serde_json::from_str("\"TextLine\"").unwrap();
        assert_eq!(parsed, RecordFormat::TextLine);
    }

    #[test]
    fn test_default_is_recordio() {
        assert_eq!(RecordFormat::default(), RecordFormat::RecordIo);
    }

    #[test]
    fn test_end_of_stream_accepts_empty_leftover() {
        for format in RecordFormat::ALL {
            assert!(format.end_of_stream(&[]).is_ok(), "{format}");
        }
    }

    #[test]
    fn test_end_of_stream_reports_truncated_frame() {
        let framed = RecordFormat::RecordIo.encode(b"caterpillar").unwrap();
        let err = RecordFormat::RecordIo.end_of_stream(&framed[..10]).unwrap_err();
        assert_eq!(
            err,
            FramingError::Truncated { format: RecordFormat::RecordIo, needed: framed.len(), available: 10 }
        );
    }

    #[test]
    fn test_end_of_stream_reports_short_header() {
        let err = RecordFormat::TfRecord.end_of_stream(&[1, 0, 0]).unwrap_err();
        assert_eq!(
            err,
            FramingError::Truncated { format: RecordFormat::TfRecord, needed: tfrecord::HEADER_LEN, available: 3 }
        );
    }

    #[test]
    fn test_end_of_stream_reports_partial_line() {
        let err = RecordFormat::TextLine.end_of_stream(b"piano").unwrap_err();
        assert_eq!(err, FramingError::IncompleteLine { len: 5 });
    }
}

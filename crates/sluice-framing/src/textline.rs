//! Newline-delimited records. The `\n` terminator is stripped; a `\r` before it
//! is part of the record.

use crate::error::{FramingError, FramingResult};
use crate::format::Decoded;
use bytes::{BufMut, BytesMut};

pub const DELIMITER: u8 = b'\n';

pub(crate) fn decode(buf: &[u8]) -> Decoded {
    decode_from(buf, 0)
}

/// Search for the delimiter starting at `scanned`; the bytes before it are
/// known not to contain one.
pub(crate) fn decode_from(buf: &[u8], scanned: usize) -> Decoded {
    let start = scanned.min(buf.len());
    match buf[start..].iter().position(|&b| b == DELIMITER) {
        Some(offset) => {
            let end = start + offset;
            Decoded::Record { payload: 0..end, consumed: end + 1 }
        }
        None => Decoded::Incomplete { needed: None },
    }
}

pub(crate) fn encode_into(payload: &[u8], out: &mut BytesMut) -> FramingResult<()> {
    if let Some(position) = payload.iter().position(|&b| b == DELIMITER) {
        return Err(FramingError::EmbeddedNewline { position });
    }
    out.reserve(payload.len() + 1);
    out.put_slice(payload);
    out.put_u8(DELIMITER);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_strips_terminator() {
        assert_eq!(decode(b"bear\nbunny"), Decoded::Record { payload: 0..4, consumed: 5 });
    }

    #[test]
    fn test_empty_line_is_empty_record() {
        assert_eq!(decode(b"\npiano\n"), Decoded::Record { payload: 0..0, consumed: 1 });
    }

    #[test]
    fn test_carriage_return_is_kept() {
        let buf = b"truck\r\n";
        let Decoded::Record { payload, .. } = decode(buf) else {
            panic!("expected a record");
        };
        assert_eq!(&buf[payload], b"truck\r");
    }

    #[test]
    fn test_partial_line_needs_more() {
        assert_eq!(decode(b"caterp"), Decoded::Incomplete { needed: None });
        assert_eq!(decode(b""), Decoded::Incomplete { needed: None });
    }

    #[test]
    fn test_decode_from_skips_scanned_prefix() {
        let buf = b"caterpillar\n";
        assert_eq!(decode_from(buf, 6), Decoded::Record { payload: 0..11, consumed: 12 });
        assert_eq!(decode_from(&buf[..6], 6), Decoded::Incomplete { needed: None });
        assert_eq!(decode_from(&buf[..6], 9), Decoded::Incomplete { needed: None });
    }

    #[test]
    fn test_encode_rejects_embedded_newline() {
        let mut out = BytesMut::new();
        let err = encode_into(b"two\nlines", &mut out).unwrap_err();
        assert_eq!(err, FramingError::EmbeddedNewline { position: 3 });
        assert!(out.is_empty());
    }
}

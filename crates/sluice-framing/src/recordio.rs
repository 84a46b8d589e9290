//! RecordIO framing.
//!
//! ```text
//! | magic: u32 LE | length word: u32 LE | payload | 0..=3 zero bytes |
//! ```
//!
//! The low 29 bits of the length word hold the payload size and the top 3 bits
//! a continuation flag. Only single-part records (flag 0) are accepted.

use crate::error::{FramingError, FramingResult};
use crate::format::{Decoded, RecordFormat};
use bytes::{Buf, BufMut, BytesMut};

pub const MAGIC: u32 = 0xced7_230a;
pub const HEADER_LEN: usize = 8;

const LENGTH_BITS: u32 = 29;
const LENGTH_MASK: u32 = (1 << LENGTH_BITS) - 1;
pub const MAX_PAYLOAD_LEN: usize = LENGTH_MASK as usize;

/// Payload length rounded up to the next 4-byte boundary.
#[must_use]
pub const fn padded_len(len: usize) -> usize {
    len + (4 - len % 4) % 4
}

pub(crate) fn decode(buf: &[u8]) -> FramingResult<Decoded> {
    // Check the magic as soon as it is visible so garbage fails fast.
    if buf.len() < 4 {
        return Ok(Decoded::Incomplete { needed: Some(HEADER_LEN) });
    }
    let magic = (&buf[..4]).get_u32_le();
    if magic != MAGIC {
        return Err(FramingError::BadMagic { found: magic });
    }
    if buf.len() < HEADER_LEN {
        return Ok(Decoded::Incomplete { needed: Some(HEADER_LEN) });
    }

    let word = (&buf[4..HEADER_LEN]).get_u32_le();
    let flag = word >> LENGTH_BITS;
    if flag != 0 {
        return Err(FramingError::UnsupportedMultipart { flag });
    }

    let len = (word & LENGTH_MASK) as usize;
    let frame_len = HEADER_LEN + padded_len(len);
    if buf.len() < frame_len {
        return Ok(Decoded::Incomplete { needed: Some(frame_len) });
    }

    Ok(Decoded::Record { payload: HEADER_LEN..HEADER_LEN + len, consumed: frame_len })
}

pub(crate) fn encode_into(payload: &[u8], out: &mut BytesMut) -> FramingResult<()> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(FramingError::PayloadTooLarge { format: RecordFormat::RecordIo, len: payload.len() });
    }
    let padding = padded_len(payload.len()) - payload.len();
    out.reserve(HEADER_LEN + payload.len() + padding);
    out.put_u32_le(MAGIC);
    out.put_u32_le(payload.len() as u32);
    out.put_slice(payload);
    out.put_bytes(0, padding);
    Ok(())
}

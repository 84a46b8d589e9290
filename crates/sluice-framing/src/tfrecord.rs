//! TFRecord framing.
//!
//! ```text
//! | length: u64 LE | masked crc32c(length): u32 LE | payload | masked crc32c(payload): u32 LE |
//! ```

use crate::error::{FramingError, FramingResult};
use crate::format::Decoded;
use bytes::{Buf, BufMut, BytesMut};

pub const HEADER_LEN: usize = 12;
pub const FOOTER_LEN: usize = 4;

const MASK_DELTA: u32 = 0xa282_ead8;

/// CRC32C rotated and offset so that checksums of data containing checksums
/// stay well distributed.
#[must_use]
pub fn masked_crc32c(data: &[u8]) -> u32 {
    crc32c::crc32c(data).rotate_right(15).wrapping_add(MASK_DELTA)
}

pub(crate) fn decode(buf: &[u8]) -> FramingResult<Decoded> {
    if buf.len() < HEADER_LEN {
        return Ok(Decoded::Incomplete { needed: Some(HEADER_LEN) });
    }

    let length_bytes = &buf[..8];
    let length = (&buf[..8]).get_u64_le();
    let found = (&buf[8..HEADER_LEN]).get_u32_le();
    let expected = masked_crc32c(length_bytes);
    if found != expected {
        return Err(FramingError::LengthChecksum { expected, found });
    }

    let frame_len = usize::try_from(length)
        .ok()
        .and_then(|len| len.checked_add(HEADER_LEN + FOOTER_LEN))
        .ok_or(FramingError::LengthOverflow { length })?;
    if buf.len() < frame_len {
        return Ok(Decoded::Incomplete { needed: Some(frame_len) });
    }

    let payload = HEADER_LEN..frame_len - FOOTER_LEN;
    let found = (&buf[payload.end..frame_len]).get_u32_le();
    let expected = masked_crc32c(&buf[payload.clone()]);
    if found != expected {
        return Err(FramingError::PayloadChecksum { expected, found });
    }

    Ok(Decoded::Record { payload, consumed: frame_len })
}

pub(crate) fn encode_into(payload: &[u8], out: &mut BytesMut) {
    let length = (payload.len() as u64).to_le_bytes();
    out.reserve(HEADER_LEN + payload.len() + FOOTER_LEN);
    out.put_slice(&length);
    out.put_u32_le(masked_crc32c(&length));
    out.put_slice(payload);
    out.put_u32_le(masked_crc32c(payload));
}

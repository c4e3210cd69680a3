//! Compact-u16 length encoding.
//!
//! Every count on the wire (signatures, account keys, instructions, account
//! indices, data length) is prefixed with this variable-length encoding:
//! 7 data bits per byte, least-significant group first, high bit set when
//! another byte follows.
//!
//! - Values 0..0x7f       -> 1 byte
//! - Values 0x80..0x3fff  -> 2 bytes
//! - Values 0x4000..      -> 3 bytes (u16 caps at 0xffff)

use crate::error::CodecError;

/// Maximum encoded length of a compact-u16.
pub const MAX_COMPACT_U16_LEN: usize = 3;

/// Encode a `u16` value in compact-u16 format.
pub fn encode_compact_u16(value: u16) -> Vec<u8> {
    let mut val = value as u32;
    let mut out = Vec::with_capacity(MAX_COMPACT_U16_LEN);

    loop {
        let mut byte = (val & 0x7f) as u8;
        val >>= 7;
        if val > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if val == 0 {
            break;
        }
    }

    out
}

/// Encode a collection length, failing if it does not fit in a `u16`.
pub fn encode_length(len: usize) -> Result<Vec<u8>, CodecError> {
    let value = u16::try_from(len).map_err(|_| CodecError::MessageTooLarge {
        size: len,
        max: u16::MAX as usize,
    })?;
    Ok(encode_compact_u16(value))
}

/// Decode a compact-u16 value from the front of `data`.
///
/// Returns `(value, bytes_consumed)`. Truncated input, values above
/// `u16::MAX` and non-minimal encodings (a trailing zero group) are errors,
/// so every value has exactly one accepted encoding.
pub fn decode_compact_u16(data: &[u8]) -> Result<(u16, usize), CodecError> {
    let mut value: u32 = 0;

    for (i, &byte) in data.iter().take(MAX_COMPACT_U16_LEN).enumerate() {
        let consumed = i + 1;
        value |= ((byte & 0x7f) as u32) << (7 * i);

        if byte & 0x80 != 0 {
            if consumed == MAX_COMPACT_U16_LEN {
                return Err(CodecError::Deserialization(
                    "compact-u16 longer than 3 bytes".into(),
                ));
            }
            continue;
        }

        if consumed > 1 && byte == 0 {
            return Err(CodecError::Deserialization(
                "non-minimal compact-u16 encoding".into(),
            ));
        }
        if value > u16::MAX as u32 {
            return Err(CodecError::Deserialization(
                "compact-u16 value overflow".into(),
            ));
        }
        return Ok((value as u16, consumed));
    }

    Err(CodecError::Deserialization(
        "unexpected end of data while decoding compact-u16".into(),
    ))
}

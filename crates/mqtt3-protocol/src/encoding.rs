//! Primitive wire encodings: length-prefixed UTF-8 strings, binary data and
//! the variable byte integer used by the remaining-length field.

use crate::error::{MqttError, Result};
use bytes::{Buf, BufMut};

/// Largest value a four byte variable integer can carry.
pub const MAX_VARIABLE_INT: u32 = 268_435_455;

pub fn encode_string<B: BufMut>(buf: &mut B, value: &str) -> Result<()> {
    encode_binary(buf, value.as_bytes())
}

pub fn decode_string<B: Buf>(buf: &mut B) -> Result<String> {
    let bytes = decode_binary(buf)?;
    let value = String::from_utf8(bytes)?;
    if value.contains('\0') {
        return Err(MqttError::MalformedPacket(
            "String contains a null character".to_string(),
        ));
    }
    Ok(value)
}

pub fn encode_binary<B: BufMut>(buf: &mut B, value: &[u8]) -> Result<()> {
    let len = u16::try_from(value.len()).map_err(|_| MqttError::StringTooLong(value.len()))?;
    buf.put_u16(len);
    buf.put_slice(value);
    Ok(())
}

pub fn decode_binary<B: Buf>(buf: &mut B) -> Result<Vec<u8>> {
    if buf.remaining() < 2 {
        return Err(MqttError::MalformedPacket(
            "Insufficient data for length prefix".to_string(),
        ));
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(MqttError::MalformedPacket(format!(
            "Length prefix {len} exceeds remaining {} bytes",
            buf.remaining()
        )));
    }
    let mut value = vec![0u8; len];
    buf.copy_to_slice(&mut value);
    Ok(value)
}

#[must_use]
pub fn variable_int_len(value: u32) -> usize {
    match value {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    }
}

pub fn encode_variable_int<B: BufMut>(buf: &mut B, mut value: u32) -> Result<()> {
    if value > MAX_VARIABLE_INT {
        return Err(MqttError::PacketTooLarge {
            size: value as usize,
            max: MAX_VARIABLE_INT as usize,
        });
    }
    loop {
        #[allow(clippy::cast_possible_truncation)]
        let mut byte = (value % 128) as u8;
        value /= 128;
        if value > 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if value == 0 {
            return Ok(());
        }
    }
}

/// Reads a variable byte integer from the front of `bytes` without consuming
/// anything.
///
/// Returns `Ok(None)` while the encoding is still incomplete, and the decoded
/// value together with the number of bytes it occupies once it is complete.
/// A fifth continuation byte is rejected even if the stream has not delivered
/// it yet.
pub fn peek_variable_int(bytes: &[u8]) -> Result<Option<(u32, usize)>> {
    let mut value: u32 = 0;
    let mut multiplier: u32 = 1;

    for (index, byte) in bytes.iter().enumerate() {
        if index >= 4 {
            return Err(MqttError::MalformedPacket(
                "Variable byte integer exceeds 4 bytes".to_string(),
            ));
        }
        value += u32::from(byte & 0x7F) * multiplier;
        if byte & 0x80 == 0 {
            return Ok(Some((value, index + 1)));
        }
        multiplier *= 128;
    }

    if bytes.len() >= 4 {
        return Err(MqttError::MalformedPacket(
            "Variable byte integer exceeds 4 bytes".to_string(),
        ));
    }
    Ok(None)
}

pub fn decode_variable_int<B: Buf>(buf: &mut B) -> Result<u32> {
    match peek_variable_int(buf.chunk())? {
        Some((value, len)) => {
            buf.advance(len);
            Ok(value)
        }
        None => Err(MqttError::MalformedPacket(
            "Truncated variable byte integer".to_string(),
        )),
    }
}

//! # MQTT Serialization Utilities
//!
//! Helpers for writing MQTT data types into byte buffers (variable-byte
//! integers, big-endian words, length-prefixed strings) and for reading the
//! variable-byte integer one byte at a time, which is what the incremental
//! parser needs.

use heapless::{String, Vec};

use crate::error::{MqttError, ProtocolError};

/// Largest value representable by a four byte variable-byte integer.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Accumulates a variable-byte integer fed one byte at a time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VarIntDecoder {
    value: usize,
    digits: u8,
}

impl VarIntDecoder {
    pub const fn new() -> Self {
        Self {
            value: 0,
            digits: 0,
        }
    }

    /// Feeds the next encoded byte.
    ///
    /// Returns `Ok(Some(value))` once the final byte (MSB clear) is seen and
    /// `Ok(None)` while a continuation byte is pending.
    pub fn push(&mut self, byte: u8) -> Result<Option<usize>, ProtocolError> {
        if self.digits >= 4 {
            return Err(ProtocolError::MalformedRemainingLength);
        }
        self.value += ((byte & 0x7F) as usize) << (7 * self.digits as usize);
        self.digits += 1;
        if byte & 0x80 == 0 {
            let value = self.value;
            *self = Self::new();
            return Ok(Some(value));
        }
        if self.digits == 4 {
            return Err(ProtocolError::MalformedRemainingLength);
        }
        Ok(None)
    }
}

/// Reads a variable-byte integer from the buffer, advancing the cursor.
///
/// Fails with `MalformedPacket` when the buffer ends before the last byte.
pub fn read_variable_byte_integer(cursor: &mut usize, buf: &[u8]) -> Result<usize, ProtocolError> {
    let mut decoder = VarIntDecoder::new();
    let mut i = 0;
    loop {
        let byte = *buf.get(*cursor + i).ok_or(ProtocolError::MalformedPacket)?;
        i += 1;
        if let Some(value) = decoder.push(byte)? {
            *cursor += i;
            return Ok(value);
        }
    }
}

/// Number of bytes `val` occupies once encoded.
pub fn variable_byte_integer_len(val: usize) -> Result<usize, MqttError> {
    match val {
        0..=127 => Ok(1),
        128..=16_383 => Ok(2),
        16_384..=2_097_151 => Ok(3),
        2_097_152..=MAX_REMAINING_LENGTH => Ok(4),
        _ => Err(MqttError::Protocol(ProtocolError::RemainingLengthTooLarge)),
    }
}

/// Writes a variable-byte integer to the buffer, advancing the cursor.
pub fn write_variable_byte_integer(
    cursor: &mut usize,
    buf: &mut [u8],
    val: usize,
) -> Result<(), MqttError> {
    let written = write_variable_byte_integer_len(buf.get_mut(*cursor..).unwrap_or_default(), val)?;
    *cursor += written;
    Ok(())
}

/// Writes a variable-byte integer at the start of `buf` and returns the byte count.
///
/// Always produces the minimal encoding.
pub fn write_variable_byte_integer_len(buf: &mut [u8], mut val: usize) -> Result<usize, MqttError> {
    if val > MAX_REMAINING_LENGTH {
        return Err(MqttError::Protocol(ProtocolError::RemainingLengthTooLarge));
    }
    let mut i = 0;
    loop {
        let mut encoded_byte = (val % 128) as u8;
        val /= 128;
        if val > 0 {
            encoded_byte |= 128;
        }
        *buf.get_mut(i).ok_or(MqttError::BufferTooSmall)? = encoded_byte;
        i += 1;
        if val == 0 {
            break;
        }
    }
    Ok(i)
}

pub fn write_u8(cursor: &mut usize, buf: &mut [u8], val: u8) -> Result<(), MqttError> {
    *buf.get_mut(*cursor).ok_or(MqttError::BufferTooSmall)? = val;
    *cursor += 1;
    Ok(())
}

pub fn write_u16(cursor: &mut usize, buf: &mut [u8], val: u16) -> Result<(), MqttError> {
    write_bytes(cursor, buf, &val.to_be_bytes())
}

/// Copies raw bytes without a length prefix.
pub fn write_bytes(cursor: &mut usize, buf: &mut [u8], bytes: &[u8]) -> Result<(), MqttError> {
    let end = *cursor + bytes.len();
    buf.get_mut(*cursor..end)
        .ok_or(MqttError::BufferTooSmall)?
        .copy_from_slice(bytes);
    *cursor = end;
    Ok(())
}

/// Writes bytes prefixed with their 2-byte big-endian length.
pub fn write_binary(cursor: &mut usize, buf: &mut [u8], bytes: &[u8]) -> Result<(), MqttError> {
    let len = u16::try_from(bytes.len())
        .map_err(|_| MqttError::Protocol(ProtocolError::PayloadTooLarge))?;
    write_u16(cursor, buf, len)?;
    write_bytes(cursor, buf, bytes)
}

/// Writes a UTF-8 encoded string (prefixed with a 2-byte length) to the buffer.
pub fn write_utf8_string(cursor: &mut usize, buf: &mut [u8], s: &str) -> Result<(), MqttError> {
    write_binary(cursor, buf, s.as_bytes())
}

/// Copies a borrowed string into fixed-capacity storage.
pub fn copy_str<const N: usize>(s: &str) -> Result<String<N>, ProtocolError> {
    let mut out = String::new();
    out.push_str(s).map_err(|_| ProtocolError::FieldTooLong)?;
    Ok(out)
}

/// Copies borrowed bytes into fixed-capacity storage.
pub fn copy_bytes<const N: usize>(bytes: &[u8]) -> Result<Vec<u8, N>, ProtocolError> {
    Vec::from_slice(bytes).map_err(|_| ProtocolError::PayloadTooLarge)
}

/// Validates raw bytes as UTF-8 and copies them into a fixed-capacity string.
pub fn utf8_from_bytes<const N: usize>(bytes: &[u8]) -> Result<String<N>, ProtocolError> {
    let s = core::str::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8String)?;
    copy_str(s)
}

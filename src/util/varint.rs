//! Variable-length integer encoding utilities.
//!
//! 7 bits per byte with a continuation bit (LEB128), as used by the binary
//! merge artifacts.

use crate::error::{Result, SegmergeError};

/// Encode a u64 value using variable-length encoding.
pub fn encode_u64(value: u64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(10);
    let mut val = value;

    loop {
        let mut byte = (val & 0x7F) as u8;
        val >>= 7;

        if val != 0 {
            byte |= 0x80;
        }

        bytes.push(byte);

        if val == 0 {
            break;
        }
    }

    bytes
}

/// Decode a u64 value, returning it with the number of bytes consumed.
pub fn decode_u64(bytes: &[u8]) -> Result<(u64, usize)> {
    let mut result = 0u64;
    let mut shift = 0;

    for (i, &byte) in bytes.iter().enumerate() {
        if shift >= 64 {
            return Err(SegmergeError::other("VarInt overflow"));
        }

        result |= ((byte & 0x7F) as u64) << shift;

        if (byte & 0x80) == 0 {
            return Ok((result, i + 1));
        }

        shift += 7;
    }

    Err(SegmergeError::other("Incomplete VarInt"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_values_use_one_byte() {
        assert_eq!(encode_u64(0), vec![0]);
        assert_eq!(encode_u64(127), vec![127]);
        assert_eq!(encode_u64(128), vec![0x80, 0x01]);
    }

    #[test]
    fn test_decode_reports_consumed_bytes() {
        let mut bytes = encode_u64(300);
        bytes.push(0xAA);
        assert_eq!(decode_u64(&bytes).unwrap(), (300, 2));
        assert_eq!(decode_u64(&encode_u64(u64::MAX)).unwrap().0, u64::MAX);
    }

    #[test]
    fn test_incomplete_varint() {
        assert!(decode_u64(&[0x80, 0x80]).is_err());
        assert!(decode_u64(&[0xFF; 11]).is_err());
    }
}

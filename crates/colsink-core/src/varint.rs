//! Variable-length Integer Encoding (Varint)
//!
//! LEB128 varints for unsigned values and ZigZag varints for signed values. Each byte carries
//! 7 bits of payload and a continuation flag, so small numbers take a single byte.
//!
//! Sinks use these to encode page lists: column ids, element counts and page sizes are small
//! and dense, and locator positions are delta-encoded against the previous page.
//!
//! Decoding never panics. Truncated input or a value longer than 10 bytes is reported as
//! `Error::Decode`.
//!
//! ## Usage
//! ```ignore
//! let mut buf = BytesMut::new();
//! encode_varint(&mut buf, -42);
//! let value = decode_varint(&mut buf.as_ref())?;  // -42
//! ```

use bytes::{Buf, BufMut};

use crate::{Error, Result};

/// Maximum encoded length of a 64-bit varint
pub const MAX_VARINT_LEN: usize = 10;

/// Encode a signed integer as a varint (ZigZag encoding)
pub fn encode_varint(buf: &mut impl BufMut, value: i64) {
    // 0 => 0, -1 => 1, 1 => 2, -2 => 3, ...
    let unsigned = ((value << 1) ^ (value >> 63)) as u64;

    encode_varint_u64(buf, unsigned);
}

/// Encode an unsigned integer as a varint
pub fn encode_varint_u64(buf: &mut impl BufMut, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;

        if value != 0 {
            byte |= 0x80;
        }

        buf.put_u8(byte);

        if value == 0 {
            break;
        }
    }
}

/// Decode a varint to a signed integer
pub fn decode_varint(buf: &mut impl Buf) -> Result<i64> {
    let unsigned = decode_varint_u64(buf)?;

    let value = (unsigned >> 1) as i64;
    if (unsigned & 1) != 0 {
        Ok(!value)
    } else {
        Ok(value)
    }
}

/// Decode a varint to an unsigned integer
pub fn decode_varint_u64(buf: &mut impl Buf) -> Result<u64> {
    let mut value: u64 = 0;
    let mut shift = 0;

    loop {
        if !buf.has_remaining() {
            return Err(Error::Decode("truncated varint".to_string()));
        }
        let byte = buf.get_u8();
        value |= ((byte & 0x7F) as u64) << shift;

        if (byte & 0x80) == 0 {
            break;
        }

        shift += 7;

        if shift >= 64 {
            return Err(Error::Decode(format!(
                "varint longer than {} bytes",
                MAX_VARINT_LEN
            )));
        }
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_varint_small_values() {
        for value in [-5i64, 0, 5] {
            let mut buf = BytesMut::new();
            encode_varint(&mut buf, value);

            let mut cursor = buf.as_ref();
            assert_eq!(decode_varint(&mut cursor).unwrap(), value);
        }
    }

    #[test]
    fn test_varint_compact_encoding() {
        let mut buf = BytesMut::new();
        encode_varint(&mut buf, 63);
        assert_eq!(buf.len(), 1);

        let mut buf = BytesMut::new();
        encode_varint(&mut buf, 64);
        assert_eq!(buf.len(), 2);

        let mut buf = BytesMut::new();
        encode_varint_u64(&mut buf, 127);
        assert_eq!(buf.len(), 1);

        let mut buf = BytesMut::new();
        encode_varint_u64(&mut buf, 128);
        assert_eq!(buf.as_ref(), &[0x80, 0x01]);
    }

    // ---------------------------------------------------------------
    // Boundaries
    // ---------------------------------------------------------------

    #[test]
    fn test_varint_i64_extremes() {
        for value in [i64::MIN, i64::MIN + 1, -1, 1, i64::MAX - 1, i64::MAX] {
            let mut buf = BytesMut::new();
            encode_varint(&mut buf, value);
            let mut cursor = buf.as_ref();
            assert_eq!(decode_varint(&mut cursor).unwrap(), value);
        }
    }

    #[test]
    fn test_varint_u64_max_byte_count() {
        let mut buf = BytesMut::new();
        encode_varint_u64(&mut buf, u64::MAX);
        assert_eq!(buf.len(), MAX_VARINT_LEN);

        let mut cursor = buf.as_ref();
        assert_eq!(decode_varint_u64(&mut cursor).unwrap(), u64::MAX);
    }

    #[test]
    fn test_multiple_varints_sequential() {
        let values = [0u64, 1, 300, 70_000, 1 << 40];
        let mut buf = BytesMut::new();
        for &v in &values {
            encode_varint_u64(&mut buf, v);
        }

        let mut cursor = buf.as_ref();
        for &expected in &values {
            assert_eq!(decode_varint_u64(&mut cursor).unwrap(), expected);
        }
        assert!(cursor.is_empty());
    }

    // ---------------------------------------------------------------
    // Malformed input
    // ---------------------------------------------------------------

    #[test]
    fn test_decode_empty_input_fails() {
        let mut cursor: &[u8] = &[];
        assert!(matches!(
            decode_varint_u64(&mut cursor),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn test_decode_truncated_input_fails() {
        // Continuation bit set on the last byte
        let mut cursor: &[u8] = &[0x80, 0x80];
        assert!(decode_varint_u64(&mut cursor).is_err());
    }

    #[test]
    fn test_decode_overlong_input_fails() {
        let bytes = [0xFFu8; 11];
        let mut cursor: &[u8] = &bytes;
        assert!(matches!(
            decode_varint_u64(&mut cursor),
            Err(Error::Decode(_))
        ));
    }
}

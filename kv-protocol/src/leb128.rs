//! Unsigned LEB128 encode/decode for the collection-ID prefix MCBP places
//! in front of keys once the COLLECTIONS feature is negotiated.
//!
//! Ported from the encode/decode shape of
//! `core/utils/unsigned_leb128.hxx` in the C++ client: the encoder emits the
//! minimal number of bytes (no trailing zero groups), the decoder rejects a
//! buffer that runs out before a stop byte is seen.

/// Encodes `value` as unsigned LEB128, returning the minimal-length byte
/// sequence (at most 5 bytes for a `u32`).
pub fn encode_uleb128(mut value: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(5);
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
            out.push(byte);
        } else {
            out.push(byte);
            break;
        }
    }
    out
}

/// Decodes an unsigned LEB128 value from the front of `buf`, returning the
/// value and the number of bytes consumed. Returns `None` if `buf` is empty
/// or runs out before a stop byte (MSB clear) is found.
pub fn decode_uleb128(buf: &[u8]) -> Option<(u32, usize)> {
    if buf.is_empty() {
        return None;
    }
    let mut value: u32 = (buf[0] & 0x7f) as u32;
    if buf[0] & 0x80 == 0 {
        return Some((value, 1));
    }
    let mut shift = 7u32;
    for (i, &byte) in buf.iter().enumerate().skip(1) {
        value |= ((byte & 0x7f) as u32) << shift;
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
        shift += 7;
        if shift >= 35 {
            // A u32 cannot need more than 5 groups; anything longer is malformed.
            return None;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn minimal_length_small_values() {
        assert_eq!(encode_uleb128(0), vec![0x00]);
        assert_eq!(encode_uleb128(0x7f), vec![0x7f]);
        assert_eq!(encode_uleb128(0x80), vec![0x80, 0x01]);
    }

    #[test]
    fn decode_rejects_truncated_buffer() {
        // 0x80 alone claims a continuation byte that never arrives.
        assert_eq!(decode_uleb128(&[0x80]), None);
        assert_eq!(decode_uleb128(&[]), None);
    }

    proptest! {
        #[test]
        fn round_trip(n: u32) {
            let encoded = encode_uleb128(n);
            let (decoded, consumed) = decode_uleb128(&encoded).expect("valid encoding decodes");
            prop_assert_eq!(decoded, n);
            prop_assert_eq!(consumed, encoded.len());
        }

        #[test]
        fn round_trip_with_trailing_garbage(n: u32, extra in proptest::collection::vec(any::<u8>(), 0..8)) {
            let mut buf = encode_uleb128(n);
            let consumed_expected = buf.len();
            buf.extend_from_slice(&extra);
            let (decoded, consumed) = decode_uleb128(&buf).expect("valid encoding decodes");
            prop_assert_eq!(decoded, n);
            prop_assert_eq!(consumed, consumed_expected);
        }
    }
}

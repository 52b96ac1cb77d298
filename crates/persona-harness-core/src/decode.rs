//! Plain-text recovery from serialized rich-text message bodies.
//!
//! Messages without a plain-text column carry their content inside a
//! length-prefixed, marker-delimited container. The text follows the
//! `NSString` class marker:
//!
//! ```text
//! ... NSString 01 94 84 01 '+' <len> <utf-8 payload> 86 84 ...
//!                          └── separator, searched within 10 bytes of the marker
//! ```
//!
//! `<len>` is a single byte, or `0x80 | n` followed by a little-endian `u16`
//! for longer strings. A zero length is a valid empty string.

use thiserror::Error;

/// Class marker preceding the embedded string.
pub const STRING_CLASS_MARKER: &[u8] = b"NSString";

/// Byte that separates the class header from the length prefix.
pub const SEPARATOR: u8 = b'+';

/// How far past the marker the separator may appear.
pub const SEPARATOR_WINDOW: usize = 10;

const LONG_LENGTH_FLAG: u8 = 0x80;

/// Outcome of [`decode_body`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// Text recovered (possibly empty, possibly with replacement characters).
    Text(String),
    /// The container layout was not found. The body is not in this format.
    NoMarker,
    /// The layout matched but the buffer ends before the declared data.
    Malformed(MalformedBody),
}

impl Decoded {
    pub fn into_text(self) -> Option<String> {
        match self {
            Decoded::Text(text) => Some(text),
            Decoded::NoMarker | Decoded::Malformed(_) => None,
        }
    }
}

/// Why a body that matched the container layout could not be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MalformedBody {
    #[error("length prefix missing after separator")]
    MissingLength,
    #[error("two-byte length prefix truncated")]
    TruncatedLength,
    #[error("payload truncated: declared {declared} bytes, {available} available")]
    TruncatedPayload { declared: usize, available: usize },
}

/// Recover the UTF-8 text embedded in a serialized rich-text body.
///
/// Invalid UTF-8 is decoded lossily; once a length has been read the
/// function always yields text unless the payload runs past the buffer.
///
/// # Example
///
/// ```rust
/// use persona_harness_core::decode::{decode_body, Decoded};
///
/// let body = b"\x84\x84\x08NSString\x01\x94\x84\x01+\x05hello\x86\x84";
/// assert_eq!(decode_body(body), Decoded::Text("hello".to_string()));
/// assert_eq!(decode_body(b"plain bytes"), Decoded::NoMarker);
/// ```
pub fn decode_body(body: &[u8]) -> Decoded {
    let Some(marker_at) = find(body, STRING_CLASS_MARKER) else {
        return Decoded::NoMarker;
    };

    let header_start = marker_at + STRING_CLASS_MARKER.len();
    let window_end = (header_start + SEPARATOR_WINDOW).min(body.len());
    let Some(offset) = body[header_start..window_end]
        .iter()
        .position(|&b| b == SEPARATOR)
    else {
        return Decoded::NoMarker;
    };

    let mut pos = header_start + offset + 1;
    let Some(&length_byte) = body.get(pos) else {
        return Decoded::Malformed(MalformedBody::MissingLength);
    };
    pos += 1;

    if length_byte == 0 {
        return Decoded::Text(String::new());
    }

    let len = if length_byte & LONG_LENGTH_FLAG != 0 {
        let Some(prefix) = body.get(pos..pos + 2) else {
            return Decoded::Malformed(MalformedBody::TruncatedLength);
        };
        pos += 2;
        u16::from_le_bytes([prefix[0], prefix[1]]) as usize
    } else {
        length_byte as usize
    };

    match body.get(pos..pos + len) {
        Some(payload) => Decoded::Text(String::from_utf8_lossy(payload).into_owned()),
        None => Decoded::Malformed(MalformedBody::TruncatedPayload {
            declared: len,
            available: body.len() - pos,
        }),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Wraps a length prefix and payload in a realistic container header/trailer.
    fn container(length_prefix: &[u8], payload: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(b"\x04\x0bstreamtyped\x81\xe8\x03\x84\x01@\x84\x84\x84");
        body.extend_from_slice(b"\x12NSAttributedString\x00\x84\x84\x08NSObject\x00\x85\x92");
        body.extend_from_slice(b"\x84\x84\x84\x08NSString\x01\x94\x84\x01+");
        body.extend_from_slice(length_prefix);
        body.extend_from_slice(payload);
        body.extend_from_slice(b"\x86\x84\x02iI\x01\x05\x92\x84\x84\x84\x0cNSDictionary");
        body
    }

    #[test]
    fn test_short_text() {
        let body = container(&[5], b"hello");
        assert_eq!(decode_body(&body), Decoded::Text("hello".to_string()));
    }

    #[test]
    fn test_no_marker() {
        assert_eq!(decode_body(b""), Decoded::NoMarker);
        assert_eq!(decode_body(b"just some bytes + 5 hello"), Decoded::NoMarker);
        assert_eq!(decode_body(b"NSStrin"), Decoded::NoMarker);
    }

    #[test]
    fn test_marker_at_end_of_buffer() {
        assert_eq!(decode_body(b"\x84\x84NSString"), Decoded::NoMarker);
    }

    #[test]
    fn test_separator_outside_window() {
        // 10 filler bytes push the separator past the search window.
        let body = b"NSString0123456789+\x02hi";
        assert_eq!(decode_body(body), Decoded::NoMarker);

        let body = b"NSString012345678+\x02hi";
        assert_eq!(decode_body(body), Decoded::Text("hi".to_string()));
    }

    #[test]
    fn test_zero_length_is_empty_text() {
        let body = container(&[0], b"");
        assert_eq!(decode_body(&body), Decoded::Text(String::new()));
    }

    #[test]
    fn test_long_length_reads_little_endian_u16() {
        let payload = "a".repeat(300);
        // 300 = 0x012c
        let body = container(&[0x81, 0x2c, 0x01], payload.as_bytes());
        match decode_body(&body) {
            Decoded::Text(text) => {
                assert_eq!(text.len(), 300);
                assert!(text.chars().all(|c| c == 'a'));
            }
            other => panic!("expected text, got {:?}", other),
        }
    }

    #[test]
    fn test_long_length_consumes_exact_payload() {
        // Declared length 3 via the two-byte form; trailing bytes must not leak in.
        let body = b"NSString\x01\x94\x84\x01+\x81\x03\x00abcdef";
        assert_eq!(decode_body(body), Decoded::Text("abc".to_string()));
    }

    #[test]
    fn test_multibyte_utf8() {
        let text = "see you at 7 ❤️";
        let body = container(&[text.len() as u8], text.as_bytes());
        assert_eq!(decode_body(&body), Decoded::Text(text.to_string()));
    }

    #[test]
    fn test_invalid_utf8_is_lossy() {
        let body = container(&[3], b"a\xffb");
        assert_eq!(decode_body(&body), Decoded::Text("a\u{fffd}b".to_string()));
    }

    #[test]
    fn test_truncated_payload_is_malformed() {
        let body = b"NSString\x01\x94\x84\x01+\x0ahello";
        assert_eq!(
            decode_body(body),
            Decoded::Malformed(MalformedBody::TruncatedPayload {
                declared: 10,
                available: 5
            })
        );
    }

    #[test]
    fn test_missing_length_is_malformed() {
        let body = b"NSString\x01\x94\x84\x01+";
        assert_eq!(
            decode_body(body),
            Decoded::Malformed(MalformedBody::MissingLength)
        );
    }

    #[test]
    fn test_truncated_long_length_is_malformed() {
        let body = b"NSString\x01\x94\x84\x01+\x81\x2c";
        assert_eq!(
            decode_body(body),
            Decoded::Malformed(MalformedBody::TruncatedLength)
        );
    }

    #[test]
    fn test_first_marker_wins() {
        let mut body = container(&[3], b"one");
        body.extend_from_slice(b"NSString\x01+\x03two");
        assert_eq!(decode_body(&body).into_text(), Some("one".to_string()));
    }
}

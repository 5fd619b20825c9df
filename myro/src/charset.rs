//! Character set handling for wire strings.
//!
//! Only the charsets the driver itself can transcode are modeled. Text in
//! any utf8 collation passes through untouched, latin1 is widened per byte,
//! and binary columns skip string conversion entirely.
use bytes::Bytes;

use crate::types::Value;

/// A connection or column character set.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Charset {
    Utf8,
    Latin1,
    Binary,
}

impl Charset {
    /// Map a server charset/collation id.
    ///
    /// Unknown ids are treated as utf8, which matches every collation
    /// modern servers default to.
    pub fn from_id(id: u16) -> Charset {
        match id {
            5 | 8 | 48 => Self::Latin1,
            63 => Self::Binary,
            _ => Self::Utf8,
        }
    }

    /// Map a charset name as used in configuration and `SET NAMES`.
    pub fn from_name(name: &str) -> Option<Charset> {
        Some(match name {
            "utf8" | "utf8mb3" | "utf8mb4" => Self::Utf8,
            "latin1" => Self::Latin1,
            "binary" => Self::Binary,
            _ => return None,
        })
    }

    /// The collation id sent in the authentication packet.
    pub fn id(self) -> u8 {
        match self {
            Self::Utf8 => 33,
            Self::Latin1 => 8,
            Self::Binary => 63,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Utf8 => "utf8",
            Self::Latin1 => "latin1",
            Self::Binary => "binary",
        }
    }

    /// Convert column bytes into a string or binary [`Value`].
    pub fn decode(self, bytes: Bytes) -> Value {
        match self {
            Self::Utf8 => Value::Text(decode_utf8(&bytes)),
            Self::Latin1 => Value::Text(decode_latin1(&bytes)),
            Self::Binary => Value::Bytes(bytes),
        }
    }

    /// Convert a string into column bytes.
    pub fn encode(self, text: &str) -> Bytes {
        match self {
            Self::Utf8 | Self::Binary => Bytes::copy_from_slice(text.as_bytes()),
            Self::Latin1 => encode_latin1(text),
        }
    }
}

/// Decode utf8 bytes, tolerating a truncated multibyte sequence.
///
/// A sequence cut off at the end of the buffer is discarded. Invalid
/// sequences in the middle are replaced.
pub fn decode_utf8(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_owned(),
        Err(e) if e.error_len().is_none() => {
            // only the tail is incomplete, everything before it is valid
            std::str::from_utf8(&bytes[..e.valid_up_to()])
                .unwrap_or_default()
                .to_owned()
        }
        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn encode_latin1(text: &str) -> Bytes {
    text.chars()
        .map(|c| if (c as u32) < 256 { c as u8 } else { b'?' })
        .collect::<Vec<u8>>()
        .into()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn utf8_passthrough() {
        assert_eq!(decode_utf8("héllo".as_bytes()), "héllo");
    }

    #[test]
    fn utf8_truncated_tail_dropped() {
        // 0xC3 opens a two-byte sequence that never completes
        assert_eq!(decode_utf8(b"abc\xC3"), "abc");
        assert_eq!(decode_utf8(b"\xE2\x82"), "");
    }

    #[test]
    fn utf8_interior_garbage_replaced() {
        assert_eq!(decode_utf8(b"a\xFFb"), "a\u{FFFD}b");
    }

    #[test]
    fn latin1_widening() {
        assert_eq!(decode_latin1(&[b'a', 0xE9]), "aé");
        assert_eq!(&encode_latin1("aé")[..], &[b'a', 0xE9]);
        assert_eq!(&encode_latin1("a✓")[..], b"a?");
    }

    #[test]
    fn binary_keeps_bytes() {
        let v = Charset::Binary.decode(Bytes::from_static(b"\x00\xFF"));
        assert_eq!(v, Value::Bytes(Bytes::from_static(b"\x00\xFF")));
    }

    #[test]
    fn name_round_trip() {
        for cs in [Charset::Utf8, Charset::Latin1, Charset::Binary] {
            assert_eq!(Charset::from_name(cs.name()), Some(cs));
        }
        assert_eq!(Charset::from_name("klingon"), None);
    }

    #[test]
    fn id_mapping() {
        assert_eq!(Charset::from_id(8), Charset::Latin1);
        assert_eq!(Charset::from_id(63), Charset::Binary);
        assert_eq!(Charset::from_id(33), Charset::Utf8);
        assert_eq!(Charset::from_id(224), Charset::Utf8);
    }
}

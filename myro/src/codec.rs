//! Binary pack/unpack routines.
//!
//! A format string drives encoding and decoding of fixed binary segments,
//! one directive per field:
//!
//! | code | meaning                         |
//! |------|---------------------------------|
//! | `C`  | unsigned 8-bit                  |
//! | `c`  | signed 8-bit                    |
//! | `v`  | unsigned 16-bit little-endian   |
//! | `V`  | unsigned 32-bit little-endian   |
//! | `a`  | bytes, NUL padded               |
//! | `A`  | bytes, space padded             |
//! | `B`  | bit string, most significant first |
//! | `e`  | 32-bit IEEE-754 little-endian   |
//! | `E`  | 64-bit IEEE-754 little-endian   |
//!
//! A directive may be followed by a decimal repeat count, or `*` to consume
//! everything that remains. Whitespace between directives is ignored.
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

/// A value passing through [`pack`]/[`unpack`].
#[derive(Debug, Clone, PartialEq)]
pub enum PackValue {
    Int(i64),
    Uint(u64),
    Float(f64),
    Bytes(Bytes),
}

/// Error from [`pack`], [`unpack`] or value encoding.
#[derive(Debug)]
pub enum CodecError {
    /// Format string contains an unrecognized directive.
    UnknownFormat(char),
    /// Format string requires more arguments than provided.
    MissingArgument,
    /// Argument type does not fit the directive.
    ArgumentMismatch,
    /// Numeric argument does not fit the directive width.
    OutOfRange,
    /// Input data ended before the format was satisfied.
    ShortData,
    /// Column text does not parse as the column's type.
    Conversion(&'static str),
    /// Statement executed with the wrong number of parameters.
    ParamCount { expected: usize, got: usize },
}

impl std::error::Error for CodecError { }

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownFormat(c) => write!(f, "unknown format code {c:?}"),
            Self::MissingArgument => f.write_str("missing pack argument"),
            Self::ArgumentMismatch => f.write_str("pack argument type mismatch"),
            Self::OutOfRange => f.write_str("numeric value out of range"),
            Self::ShortData => f.write_str("unexpected end of data"),
            Self::Conversion(what) => write!(f, "malformed {what} value"),
            Self::ParamCount { expected, got } => {
                write!(f, "statement takes {expected} parameters, got {got}")
            }
        }
    }
}

#[derive(Clone, Copy)]
enum Count {
    N(usize),
    All,
}

struct Directive {
    code: char,
    count: Count,
}

fn directives(fmt: &str) -> impl Iterator<Item = Directive> + '_ {
    let mut chars = fmt.chars().peekable();
    std::iter::from_fn(move || {
        let code = loop {
            match chars.next()? {
                c if c.is_whitespace() => continue,
                c => break c,
            }
        };
        let count = match chars.peek() {
            Some('*') => {
                chars.next();
                Count::All
            }
            Some(c) if c.is_ascii_digit() => {
                let mut n = 0usize;
                while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
                    n = n * 10 + d as usize;
                    chars.next();
                }
                Count::N(n)
            }
            _ => Count::N(1),
        };
        Some(Directive { code, count })
    })
}

impl PackValue {
    fn as_i64(&self) -> Result<i64, CodecError> {
        match *self {
            Self::Int(i) => Ok(i),
            Self::Uint(u) => i64::try_from(u).map_err(|_| CodecError::OutOfRange),
            Self::Float(_) | Self::Bytes(_) => Err(CodecError::ArgumentMismatch),
        }
    }

    fn as_u64(&self) -> Result<u64, CodecError> {
        match *self {
            Self::Int(i) => u64::try_from(i).map_err(|_| CodecError::OutOfRange),
            Self::Uint(u) => Ok(u),
            Self::Float(_) | Self::Bytes(_) => Err(CodecError::ArgumentMismatch),
        }
    }

    fn as_f64(&self) -> Result<f64, CodecError> {
        match *self {
            Self::Float(f) => Ok(f),
            Self::Int(i) => Ok(i as f64),
            Self::Uint(u) => Ok(u as f64),
            Self::Bytes(_) => Err(CodecError::ArgumentMismatch),
        }
    }

    fn as_bytes(&self) -> Result<&Bytes, CodecError> {
        match self {
            Self::Bytes(b) => Ok(b),
            _ => Err(CodecError::ArgumentMismatch),
        }
    }
}

/// Encode `args` into a binary buffer following `fmt`.
///
/// Extra arguments are ignored, missing arguments are an error.
pub fn pack(fmt: &str, args: &[PackValue]) -> Result<Bytes, CodecError> {
    let mut out = BytesMut::new();
    let mut next = 0usize;

    let mut take = |next: &mut usize| -> Result<&PackValue, CodecError> {
        let arg = args.get(*next).ok_or(CodecError::MissingArgument)?;
        *next += 1;
        Ok(arg)
    };

    for Directive { code, count } in directives(fmt) {
        match code {
            'C' | 'c' | 'v' | 'V' | 'e' | 'E' => {
                let n = match count {
                    Count::N(n) => n,
                    Count::All => args.len().saturating_sub(next),
                };
                for _ in 0..n {
                    let arg = take(&mut next)?;
                    match code {
                        'C' => {
                            let v = arg.as_u64()?;
                            out.put_u8(u8::try_from(v).map_err(|_| CodecError::OutOfRange)?);
                        }
                        'c' => {
                            let v = arg.as_i64()?;
                            out.put_i8(i8::try_from(v).map_err(|_| CodecError::OutOfRange)?);
                        }
                        'v' => {
                            let v = arg.as_u64()?;
                            out.put_u16_le(u16::try_from(v).map_err(|_| CodecError::OutOfRange)?);
                        }
                        'V' => {
                            let v = arg.as_u64()?;
                            out.put_u32_le(u32::try_from(v).map_err(|_| CodecError::OutOfRange)?);
                        }
                        'e' => out.put_f32_le(arg.as_f64()? as f32),
                        _ => out.put_f64_le(arg.as_f64()?),
                    }
                }
            }
            'a' | 'A' => {
                let bytes = take(&mut next)?.as_bytes()?;
                match count {
                    Count::All => out.put_slice(bytes),
                    Count::N(n) => {
                        let fill = if code == 'a' { 0 } else { b' ' };
                        let len = bytes.len().min(n);
                        out.put_slice(&bytes[..len]);
                        out.put_bytes(fill, n - len);
                    }
                }
            }
            'B' => {
                let bits = take(&mut next)?.as_bytes()?;
                let n = match count {
                    Count::N(n) => n,
                    Count::All => bits.len(),
                };
                let mut byte = 0u8;
                for i in 0..n {
                    let set = bits.get(i).is_some_and(|&b| b == b'1');
                    byte = (byte << 1) | set as u8;
                    if i % 8 == 7 {
                        out.put_u8(byte);
                        byte = 0;
                    }
                }
                if n % 8 != 0 {
                    out.put_u8(byte << (8 - n % 8));
                }
            }
            c => return Err(CodecError::UnknownFormat(c)),
        }
    }

    Ok(out.freeze())
}

/// Decode a binary buffer into values following `fmt`.
///
/// Data past the end of the format is ignored.
pub fn unpack(fmt: &str, data: &[u8]) -> Result<Vec<PackValue>, CodecError> {
    let mut buf = data;
    let mut out = Vec::new();

    fn need(buf: &[u8], n: usize) -> Result<(), CodecError> {
        if buf.remaining() < n { Err(CodecError::ShortData) } else { Ok(()) }
    }

    for Directive { code, count } in directives(fmt) {
        match code {
            'C' | 'c' | 'v' | 'V' | 'e' | 'E' => {
                let size = match code {
                    'C' | 'c' => 1,
                    'v' => 2,
                    'V' | 'e' => 4,
                    _ => 8,
                };
                let n = match count {
                    Count::N(n) => n,
                    Count::All => buf.remaining() / size,
                };
                for _ in 0..n {
                    need(buf, size)?;
                    out.push(match code {
                        'C' => PackValue::Uint(buf.get_u8().into()),
                        'c' => PackValue::Int(buf.get_i8().into()),
                        'v' => PackValue::Uint(buf.get_u16_le().into()),
                        'V' => PackValue::Uint(buf.get_u32_le().into()),
                        'e' => PackValue::Float(buf.get_f32_le().into()),
                        _ => PackValue::Float(buf.get_f64_le()),
                    });
                }
            }
            'a' | 'A' => {
                let n = match count {
                    Count::N(n) => n,
                    Count::All => buf.remaining(),
                };
                need(buf, n)?;
                let mut taken = &buf[..n];
                buf.advance(n);
                let pad = if code == 'a' { 0 } else { b' ' };
                while taken.last() == Some(&pad) {
                    taken = &taken[..taken.len() - 1];
                }
                out.push(PackValue::Bytes(Bytes::copy_from_slice(taken)));
            }
            'B' => {
                let n = match count {
                    Count::N(n) => n,
                    Count::All => buf.remaining() * 8,
                };
                need(buf, n.div_ceil(8))?;
                let mut bits = BytesMut::with_capacity(n);
                for i in 0..n {
                    let byte = buf[i / 8];
                    let set = byte >> (7 - i % 8) & 1;
                    bits.put_u8(b'0' + set);
                }
                buf.advance(n.div_ceil(8));
                out.push(PackValue::Bytes(bits.freeze()));
            }
            c => return Err(CodecError::UnknownFormat(c)),
        }
    }

    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pack_numeric_widths() {
        let out = pack(
            "CcvV",
            &[
                PackValue::Uint(0xFE),
                PackValue::Int(-2),
                PackValue::Uint(0x0102),
                PackValue::Uint(0x01020304),
            ],
        )
        .unwrap();
        assert_eq!(&out[..], &[0xFE, 0xFE, 0x02, 0x01, 0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn pack_out_of_range() {
        assert!(matches!(
            pack("C", &[PackValue::Uint(300)]),
            Err(CodecError::OutOfRange)
        ));
        assert!(matches!(
            pack("c", &[PackValue::Int(-200)]),
            Err(CodecError::OutOfRange)
        ));
    }

    #[test]
    fn pack_unknown_format() {
        assert!(matches!(
            pack("q", &[PackValue::Uint(1)]),
            Err(CodecError::UnknownFormat('q'))
        ));
        assert!(matches!(unpack("Z4", b"abcd"), Err(CodecError::UnknownFormat('Z'))));
    }

    #[test]
    fn pack_padded_bytes() {
        let out = pack("a6", &[PackValue::Bytes(Bytes::from_static(b"ab"))]).unwrap();
        assert_eq!(&out[..], b"ab\0\0\0\0");

        let out = pack("A4", &[PackValue::Bytes(Bytes::from_static(b"ab"))]).unwrap();
        assert_eq!(&out[..], b"ab  ");

        // over-long input is truncated to the directive width
        let out = pack("a2", &[PackValue::Bytes(Bytes::from_static(b"abcd"))]).unwrap();
        assert_eq!(&out[..], b"ab");
    }

    #[test]
    fn unpack_strips_padding() {
        let got = unpack("a6", b"ab\0\0\0\0").unwrap();
        assert_eq!(got, [PackValue::Bytes(Bytes::from_static(b"ab"))]);

        let got = unpack("A4", b"ab  ").unwrap();
        assert_eq!(got, [PackValue::Bytes(Bytes::from_static(b"ab"))]);
    }

    #[test]
    fn repeat_and_star_counts() {
        let got = unpack("C3", &[1, 2, 3]).unwrap();
        assert_eq!(
            got,
            [PackValue::Uint(1), PackValue::Uint(2), PackValue::Uint(3)]
        );

        let got = unpack("v*", &[1, 0, 2, 0, 3, 0]).unwrap();
        assert_eq!(
            got,
            [PackValue::Uint(1), PackValue::Uint(2), PackValue::Uint(3)]
        );
    }

    #[test]
    fn unpack_short_data() {
        assert!(matches!(unpack("V", &[1, 2, 3]), Err(CodecError::ShortData)));
        assert!(matches!(unpack("a8", b"abc"), Err(CodecError::ShortData)));
    }

    #[test]
    fn bit_strings() {
        let out = pack("B8", &[PackValue::Bytes(Bytes::from_static(b"10000001"))]).unwrap();
        assert_eq!(&out[..], &[0b1000_0001]);

        // partial byte is left-aligned
        let out = pack("B3", &[PackValue::Bytes(Bytes::from_static(b"101"))]).unwrap();
        assert_eq!(&out[..], &[0b1010_0000]);

        let got = unpack("B8", &[0b1000_0001]).unwrap();
        assert_eq!(got, [PackValue::Bytes(Bytes::from_static(b"10000001"))]);
    }

    #[test]
    fn float_widths() {
        let out = pack("e", &[PackValue::Float(0.5)]).unwrap();
        assert_eq!(&out[..], &0.5f32.to_le_bytes());

        let got = unpack("E", &1.25f64.to_le_bytes()).unwrap();
        assert_eq!(got, [PackValue::Float(1.25)]);

        let out = pack("E", &[PackValue::Float(f64::INFINITY)]).unwrap();
        let got = unpack("E", &out).unwrap();
        assert_eq!(got, [PackValue::Float(f64::INFINITY)]);
    }

    #[test]
    fn float_special_values() {
        // zero sign and infinities must survive bit-exactly in both widths
        for v in [0.0f64, -0.0, f64::INFINITY, f64::NEG_INFINITY] {
            for fmt in ["e", "E"] {
                let out = pack(fmt, &[PackValue::Float(v)]).unwrap();
                match unpack(fmt, &out).unwrap().as_slice() {
                    [PackValue::Float(got)] => assert_eq!(
                        got.to_bits(),
                        v.to_bits(),
                        "{fmt} {v:?}"
                    ),
                    other => panic!("{other:?}"),
                }
            }
        }

        for fmt in ["e", "E"] {
            let out = pack(fmt, &[PackValue::Float(f64::NAN)]).unwrap();
            match unpack(fmt, &out).unwrap().as_slice() {
                [PackValue::Float(got)] => assert!(got.is_nan()),
                other => panic!("{other:?}"),
            }
        }
    }

    #[test]
    fn missing_argument() {
        assert!(matches!(
            pack("CC", &[PackValue::Uint(1)]),
            Err(CodecError::MissingArgument)
        ));
    }
}

//! Column values and their text/binary codecs.
use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{
    Error,
    charset::{Charset, decode_utf8},
    codec::{self, CodecError, PackValue},
    mysql::{FieldType, field_flags},
    packet::{BufMutExt, BytesExt, ProtocolError},
};

/// A single column value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Int(i64),
    UInt(u64),
    Double(f64),
    Text(String),
    Bytes(Bytes),
    DateTime(DateTime),
    Time(Time),
    Set(Vec<String>),
}

/// Calendar date and time of day, no timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub micros: u32,
}

/// Elapsed time, possibly negative or beyond 24 hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Time {
    pub negative: bool,
    pub hours: u32,
    pub minutes: u8,
    pub seconds: u8,
    pub micros: u32,
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )?;
        if self.micros != 0 {
            write!(f, ".{:06}", self.micros)?;
        }
        Ok(())
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            f.write_str("-")?;
        }
        write!(f, "{:02}:{:02}:{:02}", self.hours, self.minutes, self.seconds)?;
        if self.micros != 0 {
            write!(f, ".{:06}", self.micros)?;
        }
        Ok(())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl<V: Into<Value>> From<Option<V>> for Value {
    fn from(v: Option<V>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Self::Null,
        }
    }
}

fn is_unsigned(flags: u16) -> bool {
    flags & field_flags::UNSIGNED != 0
}

fn is_binary(flags: u16) -> bool {
    flags & field_flags::BINARY != 0
}

/// Decode one column of a text protocol row.
pub(crate) fn decode_text(
    raw: Bytes,
    field_type: FieldType,
    flags: u16,
    charset: Charset,
) -> Result<Value, Error> {
    use FieldType::*;

    Ok(match field_type {
        Null => Value::Null,
        Tiny | Short | Long | LongLong | Int24 | Year => {
            let text = decode_utf8(&raw);
            if is_unsigned(flags) {
                Value::UInt(text.parse().map_err(|_| CodecError::Conversion("integer"))?)
            } else {
                Value::Int(text.parse().map_err(|_| CodecError::Conversion("integer"))?)
            }
        }
        Float | Double => {
            let text = decode_utf8(&raw);
            Value::Double(text.parse().map_err(|_| CodecError::Conversion("float"))?)
        }
        Date | DateTime | Timestamp | NewDate => {
            let text = decode_utf8(&raw);
            Value::DateTime(parse_datetime(&text).ok_or(CodecError::Conversion("datetime"))?)
        }
        Time => {
            let text = decode_utf8(&raw);
            Value::Time(parse_time(&text).ok_or(CodecError::Conversion("time"))?)
        }
        Set => Value::Set(split_set(&decode_utf8(&raw))),
        Bit | Geometry => Value::Bytes(raw),
        // DECIMAL travels as text in both protocols
        Decimal | NewDecimal => Value::Text(decode_utf8(&raw)),
        Varchar | VarString | String | Enum | Json | Blob | TinyBlob | MediumBlob | LongBlob => {
            if is_binary(flags) {
                Value::Bytes(raw)
            } else {
                charset.decode(raw)
            }
        }
    })
}

/// Decode one column of a binary protocol row, advancing `buf`.
pub(crate) fn decode_binary(
    buf: &mut Bytes,
    field_type: FieldType,
    flags: u16,
    charset: Charset,
) -> Result<Value, Error> {
    use FieldType::*;

    let unsigned = is_unsigned(flags);

    Ok(match field_type {
        Null => Value::Null,
        Tiny => {
            let v = buf.try_get_u8()?;
            if unsigned { Value::UInt(v.into()) } else { Value::Int(v as i8 as i64) }
        }
        Short | Year => {
            let v = buf.try_get_u16_le()?;
            if unsigned { Value::UInt(v.into()) } else { Value::Int(v as i16 as i64) }
        }
        // INT24 is sent with four bytes
        Long | Int24 => {
            let v = buf.try_get_u32_le()?;
            if unsigned { Value::UInt(v.into()) } else { Value::Int(v as i32 as i64) }
        }
        LongLong => {
            let v = buf.try_get_u64_le()?;
            if unsigned { Value::UInt(v) } else { Value::Int(v as i64) }
        }
        Float => {
            let raw = buf.try_take(4)?;
            match codec::unpack("e", &raw)?.as_slice() {
                [PackValue::Float(v)] => Value::Double(*v),
                _ => return Err(CodecError::ShortData.into()),
            }
        }
        Double => {
            let raw = buf.try_take(8)?;
            match codec::unpack("E", &raw)?.as_slice() {
                [PackValue::Float(v)] => Value::Double(*v),
                _ => return Err(CodecError::ShortData.into()),
            }
        }
        Date | DateTime | Timestamp | NewDate => Value::DateTime(decode_binary_datetime(buf)?),
        Time => Value::Time(decode_binary_time(buf)?),
        Set => match buf.get_lcs()? {
            Some(raw) => Value::Set(split_set(&decode_utf8(&raw))),
            None => Value::Null,
        },
        Bit | Geometry => match buf.get_lcs()? {
            Some(raw) => Value::Bytes(raw),
            None => Value::Null,
        },
        Decimal | NewDecimal => match buf.get_lcs()? {
            Some(raw) => Value::Text(decode_utf8(&raw)),
            None => Value::Null,
        },
        Varchar | VarString | String | Enum | Json | Blob | TinyBlob | MediumBlob | LongBlob => {
            match buf.get_lcs()? {
                Some(raw) if is_binary(flags) => Value::Bytes(raw),
                Some(raw) => charset.decode(raw),
                None => Value::Null,
            }
        }
    })
}

/// A parameter value encoded for `COM_STMT_EXECUTE`.
pub(crate) struct Encoded {
    pub field_type: FieldType,
    pub unsigned: bool,
    pub bytes: Bytes,
}

/// Encode a parameter value in the binary protocol, choosing the
/// narrowest integer width that holds the value.
pub(crate) fn encode(value: &Value, charset: Charset) -> Result<Encoded, CodecError> {
    use FieldType::*;

    let mut buf = BytesMut::new();
    let (field_type, unsigned) = match value {
        Value::Null => (Null, false),
        Value::Int(v) => {
            let v = *v;
            if let Ok(v) = i8::try_from(v) {
                buf.put_slice(&v.to_le_bytes());
                (Tiny, false)
            } else if let Ok(v) = i16::try_from(v) {
                buf.put_slice(&v.to_le_bytes());
                (Short, false)
            } else if let Ok(v) = i32::try_from(v) {
                buf.put_slice(&v.to_le_bytes());
                (Long, false)
            } else {
                buf.put_slice(&v.to_le_bytes());
                (LongLong, false)
            }
        }
        Value::UInt(v) => {
            let v = *v;
            if let Ok(v) = u8::try_from(v) {
                buf.put_slice(&v.to_le_bytes());
                (Tiny, true)
            } else if let Ok(v) = u16::try_from(v) {
                buf.put_slice(&v.to_le_bytes());
                (Short, true)
            } else if let Ok(v) = u32::try_from(v) {
                buf.put_slice(&v.to_le_bytes());
                (Long, true)
            } else {
                buf.put_slice(&v.to_le_bytes());
                (LongLong, true)
            }
        }
        Value::Double(v) => {
            buf.put_slice(&codec::pack("E", &[PackValue::Float(*v)])?);
            (Double, false)
        }
        Value::Text(s) => {
            buf.put_lcs(&charset.encode(s));
            (VarString, false)
        }
        Value::Bytes(b) => {
            buf.put_lcs(b);
            (Blob, false)
        }
        Value::DateTime(dt) => {
            encode_datetime(&mut buf, dt);
            (DateTime, false)
        }
        Value::Time(t) => {
            encode_time(&mut buf, t);
            (Time, false)
        }
        Value::Set(items) => {
            buf.put_lcs(&charset.encode(&items.join(",")));
            (VarString, false)
        }
    };

    Ok(Encoded { field_type, unsigned, bytes: buf.freeze() })
}

fn decode_binary_datetime(buf: &mut Bytes) -> Result<DateTime, Error> {
    let len = buf.try_get_u8()?;
    let mut out = DateTime::default();
    if !matches!(len, 0 | 4 | 7 | 11) {
        return Err(ProtocolError::ShortPacket("datetime").into());
    }
    if len >= 4 {
        out.year = buf.try_get_u16_le()?;
        out.month = buf.try_get_u8()?;
        out.day = buf.try_get_u8()?;
    }
    if len >= 7 {
        out.hour = buf.try_get_u8()?;
        out.minute = buf.try_get_u8()?;
        out.second = buf.try_get_u8()?;
    }
    if len >= 11 {
        out.micros = buf.try_get_u32_le()?;
    }
    Ok(out)
}

fn decode_binary_time(buf: &mut Bytes) -> Result<Time, Error> {
    let len = buf.try_get_u8()?;
    let mut out = Time::default();
    if !matches!(len, 0 | 8 | 12) {
        return Err(ProtocolError::ShortPacket("time").into());
    }
    if len >= 8 {
        out.negative = buf.try_get_u8()? != 0;
        let days = buf.try_get_u32_le()?;
        let hour = u32::from(buf.try_get_u8()?);
        // the day count comes off the wire, folding must not overflow
        out.hours = days.saturating_mul(24).saturating_add(hour);
        out.minutes = buf.try_get_u8()?;
        out.seconds = buf.try_get_u8()?;
    }
    if len >= 12 {
        out.micros = buf.try_get_u32_le()?;
    }
    Ok(out)
}

/// Write a datetime in its shortest binary form.
fn encode_datetime(buf: &mut BytesMut, dt: &DateTime) {
    let len: u8 = if dt.micros != 0 {
        11
    } else if (dt.hour, dt.minute, dt.second) != (0, 0, 0) {
        7
    } else if (dt.year, dt.month, dt.day) != (0, 0, 0) {
        4
    } else {
        0
    };

    buf.put_u8(len);
    if len >= 4 {
        buf.put_u16_le(dt.year);
        buf.put_u8(dt.month);
        buf.put_u8(dt.day);
    }
    if len >= 7 {
        buf.put_u8(dt.hour);
        buf.put_u8(dt.minute);
        buf.put_u8(dt.second);
    }
    if len >= 11 {
        buf.put_u32_le(dt.micros);
    }
}

fn encode_time(buf: &mut BytesMut, t: &Time) {
    let len: u8 = if t.micros != 0 {
        12
    } else if *t != Time::default() {
        8
    } else {
        0
    };

    buf.put_u8(len);
    if len >= 8 {
        buf.put_u8(t.negative.into());
        buf.put_u32_le(t.hours / 24);
        buf.put_u8((t.hours % 24) as u8);
        buf.put_u8(t.minutes);
        buf.put_u8(t.seconds);
    }
    if len >= 12 {
        buf.put_u32_le(t.micros);
    }
}

fn split_set(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    text.split(',').map(str::to_owned).collect()
}

fn parse_datetime(text: &str) -> Option<DateTime> {
    let (date, time) = match text.split_once(' ') {
        Some((date, time)) => (date, Some(time)),
        None => (text, None),
    };

    let mut parts = date.splitn(3, '-');
    let year = parts.next()?.parse().ok()?;
    let month = parts.next()?.parse().ok()?;
    let day = parts.next()?.parse().ok()?;

    let mut out = DateTime { year, month, day, ..Default::default() };

    if let Some(time) = time {
        let (hms, micros) = split_fraction(time)?;
        let mut parts = hms.splitn(3, ':');
        out.hour = parts.next()?.parse().ok()?;
        out.minute = parts.next()?.parse().ok()?;
        out.second = parts.next()?.parse().ok()?;
        out.micros = micros;
    }

    Some(out)
}

fn parse_time(text: &str) -> Option<Time> {
    let (text, negative) = match text.strip_prefix('-') {
        Some(rest) => (rest, true),
        None => (text, false),
    };

    let (hms, micros) = split_fraction(text)?;
    let mut parts = hms.splitn(3, ':');
    Some(Time {
        negative,
        hours: parts.next()?.parse().ok()?,
        minutes: parts.next()?.parse().ok()?,
        seconds: parts.next()?.parse().ok()?,
        micros,
    })
}

/// Split a `.ffffff` suffix and scale it to microseconds.
fn split_fraction(text: &str) -> Option<(&str, u32)> {
    match text.split_once('.') {
        None => Some((text, 0)),
        Some((head, frac)) => {
            if frac.is_empty() || frac.len() > 6 || !frac.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let micros: u32 = frac.parse().ok()?;
            Some((head, micros * 10u32.pow(6 - frac.len() as u32)))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn text(raw: &'static [u8], ty: FieldType, flags: u16) -> Value {
        decode_text(Bytes::from_static(raw), ty, flags, Charset::Utf8).unwrap()
    }

    #[test]
    fn text_integers() {
        assert_eq!(text(b"1", FieldType::Long, 0), Value::Int(1));
        assert_eq!(text(b"-1", FieldType::Tiny, 0), Value::Int(-1));
        assert_eq!(
            text(b"255", FieldType::Tiny, field_flags::UNSIGNED),
            Value::UInt(255)
        );
        assert!(decode_text(Bytes::from_static(b"abc"), FieldType::Long, 0, Charset::Utf8).is_err());
    }

    #[test]
    fn text_floats_and_decimal() {
        assert_eq!(text(b"1.5", FieldType::Double, 0), Value::Double(1.5));
        assert_eq!(text(b"1.5", FieldType::Float, 0), Value::Double(1.5));
        // DECIMAL keeps its exact text form
        assert_eq!(
            text(b"123.450", FieldType::NewDecimal, 0),
            Value::Text("123.450".into())
        );
    }

    #[test]
    fn text_datetime() {
        assert_eq!(
            text(b"2024-01-15 10:30:00.5", FieldType::DateTime, 0),
            Value::DateTime(DateTime {
                year: 2024,
                month: 1,
                day: 15,
                hour: 10,
                minute: 30,
                second: 0,
                micros: 500_000,
            })
        );
        assert_eq!(
            text(b"2024-01-15", FieldType::Date, 0),
            Value::DateTime(DateTime { year: 2024, month: 1, day: 15, ..Default::default() })
        );
    }

    #[test]
    fn text_time_beyond_a_day() {
        assert_eq!(
            text(b"-838:59:59", FieldType::Time, 0),
            Value::Time(Time {
                negative: true,
                hours: 838,
                minutes: 59,
                seconds: 59,
                micros: 0,
            })
        );
    }

    #[test]
    fn text_set_splits() {
        assert_eq!(
            text(b"a,b,c", FieldType::Set, 0),
            Value::Set(vec!["a".into(), "b".into(), "c".into()])
        );
        assert_eq!(text(b"", FieldType::Set, 0), Value::Set(vec![]));
    }

    #[test]
    fn text_binary_flag_keeps_bytes() {
        assert_eq!(
            text(b"\x00\xFF", FieldType::Blob, field_flags::BINARY),
            Value::Bytes(Bytes::from_static(b"\x00\xFF"))
        );
        assert_eq!(text(b"hi", FieldType::VarString, 0), Value::Text("hi".into()));
    }

    fn binary(raw: &'static [u8], ty: FieldType, flags: u16) -> Value {
        let mut buf = Bytes::from_static(raw);
        let v = decode_binary(&mut buf, ty, flags, Charset::Utf8).unwrap();
        assert!(buf.is_empty(), "column decode left {} bytes", buf.len());
        v
    }

    #[test]
    fn binary_integer_signedness() {
        assert_eq!(binary(&[0xFF], FieldType::Tiny, field_flags::UNSIGNED), Value::UInt(255));
        assert_eq!(binary(&[0xFF], FieldType::Tiny, 0), Value::Int(-1));
        assert_eq!(binary(&[0x2A, 0, 0, 0], FieldType::Long, 0), Value::Int(42));
        assert_eq!(
            binary(&[0xFF; 8], FieldType::LongLong, field_flags::UNSIGNED),
            Value::UInt(u64::MAX)
        );
    }

    #[test]
    fn binary_floats() {
        let raw = 0.5f32.to_le_bytes();
        let mut buf = Bytes::copy_from_slice(&raw);
        assert_eq!(
            decode_binary(&mut buf, FieldType::Float, 0, Charset::Utf8).unwrap(),
            Value::Double(0.5)
        );

        let raw = 1.25f64.to_le_bytes();
        let mut buf = Bytes::copy_from_slice(&raw);
        assert_eq!(
            decode_binary(&mut buf, FieldType::Double, 0, Charset::Utf8).unwrap(),
            Value::Double(1.25)
        );
    }

    #[test]
    fn binary_datetime_lengths() {
        assert_eq!(
            binary(&[0], FieldType::DateTime, 0),
            Value::DateTime(DateTime::default())
        );
        assert_eq!(
            binary(&[4, 0xE8, 0x07, 1, 15], FieldType::Date, 0),
            Value::DateTime(DateTime { year: 2024, month: 1, day: 15, ..Default::default() })
        );
        assert_eq!(
            binary(&[7, 0xE8, 0x07, 1, 15, 10, 30, 5], FieldType::Timestamp, 0),
            Value::DateTime(DateTime {
                year: 2024,
                month: 1,
                day: 15,
                hour: 10,
                minute: 30,
                second: 5,
                micros: 0,
            })
        );
    }

    #[test]
    fn binary_time_folds_days() {
        // 2 days, 3:04:05
        assert_eq!(
            binary(&[8, 0, 2, 0, 0, 0, 3, 4, 5], FieldType::Time, 0),
            Value::Time(Time { negative: false, hours: 51, minutes: 4, seconds: 5, micros: 0 })
        );
    }

    #[test]
    fn binary_time_huge_day_count_saturates() {
        let v = binary(&[8, 0, 0xFF, 0xFF, 0xFF, 0xFF, 23, 59, 59], FieldType::Time, 0);
        assert_eq!(
            v,
            Value::Time(Time {
                negative: false,
                hours: u32::MAX,
                minutes: 59,
                seconds: 59,
                micros: 0,
            })
        );
    }

    #[test]
    fn encode_narrowest_integer() {
        let e = encode(&Value::Int(7), Charset::Utf8).unwrap();
        assert_eq!(e.field_type, FieldType::Tiny);
        assert_eq!(&e.bytes[..], &[7]);
        assert!(!e.unsigned);

        let e = encode(&Value::Int(300), Charset::Utf8).unwrap();
        assert_eq!(e.field_type, FieldType::Short);
        assert_eq!(&e.bytes[..], &300i16.to_le_bytes());

        let e = encode(&Value::Int(-1), Charset::Utf8).unwrap();
        assert_eq!(e.field_type, FieldType::Tiny);
        assert_eq!(&e.bytes[..], &[0xFF]);

        let e = encode(&Value::UInt(u64::MAX), Charset::Utf8).unwrap();
        assert_eq!(e.field_type, FieldType::LongLong);
        assert!(e.unsigned);
    }

    #[test]
    fn encode_text_and_null() {
        let e = encode(&Value::Text("hi".into()), Charset::Utf8).unwrap();
        assert_eq!(e.field_type, FieldType::VarString);
        assert_eq!(&e.bytes[..], &[2, b'h', b'i']);

        let e = encode(&Value::Null, Charset::Utf8).unwrap();
        assert_eq!(e.field_type, FieldType::Null);
        assert!(e.bytes.is_empty());
    }

    #[test]
    fn encode_datetime_round_trip() {
        let dt = DateTime { year: 2024, month: 1, day: 15, hour: 10, minute: 30, second: 5, micros: 0 };
        let e = encode(&Value::DateTime(dt), Charset::Utf8).unwrap();
        let mut buf = e.bytes.clone();
        assert_eq!(decode_binary_datetime(&mut buf).unwrap(), dt);

        let t = Time { negative: true, hours: 51, minutes: 4, seconds: 5, micros: 7 };
        let e = encode(&Value::Time(t), Charset::Utf8).unwrap();
        let mut buf = e.bytes.clone();
        assert_eq!(decode_binary_time(&mut buf).unwrap(), t);
    }
}

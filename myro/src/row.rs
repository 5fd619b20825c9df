//! Result set building blocks.
use bytes::{Buf, Bytes};

use crate::{
    Error,
    charset::Charset,
    common::ByteStr,
    mysql::FieldType,
    packet::{BytesExt, OkPacket, ProtocolError},
    types::{self, Value},
};

/// A column descriptor from a result set header.
#[derive(Debug, Clone)]
pub struct Field {
    pub catalog: ByteStr,
    pub db: ByteStr,
    pub table: ByteStr,
    pub org_table: ByteStr,
    pub name: ByteStr,
    pub org_name: ByteStr,
    pub charset_id: u16,
    pub length: u32,
    pub field_type: FieldType,
    pub flags: u16,
    pub decimals: u8,
    pub default: Option<Bytes>,
}

fn lcs_str(payload: &mut Bytes) -> Result<ByteStr, Error> {
    Ok(ByteStr::from_utf8_lossy(payload.get_lcs()?.unwrap_or_default()))
}

impl Field {
    pub(crate) fn parse(mut payload: Bytes) -> Result<Field, Error> {
        let catalog = lcs_str(&mut payload)?;
        let db = lcs_str(&mut payload)?;
        let table = lcs_str(&mut payload)?;
        let org_table = lcs_str(&mut payload)?;
        let name = lcs_str(&mut payload)?;
        let org_name = lcs_str(&mut payload)?;

        let _fixed_len = payload.try_get_u8()?;
        let charset_id = payload.try_get_u16_le()?;
        let length = payload.try_get_u32_le()?;
        let type_byte = payload.try_get_u8()?;
        let field_type = FieldType::from_u8(type_byte)
            .ok_or(ProtocolError::UnknownFieldType(type_byte))?;
        let flags = payload.try_get_u16_le()?;
        let decimals = payload.try_get_u8()?;
        if payload.remaining() >= 2 {
            payload.advance(2); // filler
        }
        let default = match payload.has_remaining() {
            true => payload.get_lcs()?,
            false => None,
        };

        Ok(Field {
            catalog,
            db,
            table,
            org_table,
            name,
            org_name,
            charset_id,
            length,
            field_type,
            flags,
            decimals,
            default,
        })
    }

    pub fn charset(&self) -> Charset {
        Charset::from_id(self.charset_id)
    }
}

/// One row of a result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    /// Parse a text protocol row, one length coded string per column.
    pub(crate) fn parse_text(mut payload: Bytes, fields: &[Field]) -> Result<Row, Error> {
        let mut values = Vec::with_capacity(fields.len());
        for field in fields {
            values.push(match payload.get_lcs()? {
                Some(raw) => types::decode_text(raw, field.field_type, field.flags, field.charset())?,
                None => Value::Null,
            });
        }
        Ok(Row { values })
    }

    /// Parse a binary protocol row.
    ///
    /// The NULL bitmap is offset by two reserved bits, so it spans
    /// `(columns + 7 + 2) / 8` bytes.
    pub(crate) fn parse_binary(mut payload: Bytes, fields: &[Field]) -> Result<Row, Error> {
        let _status = payload.try_get_u8()?;
        let bitmap = payload.try_take((fields.len() + 7 + 2) / 8)?;

        let mut values = Vec::with_capacity(fields.len());
        for (i, field) in fields.iter().enumerate() {
            let bit = i + 2;
            if bitmap[bit / 8] & (1 << (bit % 8)) != 0 {
                values.push(Value::Null);
                continue;
            }
            values.push(types::decode_binary(
                &mut payload,
                field.field_type,
                field.flags,
                field.charset(),
            )?);
        }
        Ok(Row { values })
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl std::ops::Index<usize> for Row {
    type Output = Value;

    fn index(&self, index: usize) -> &Value {
        &self.values[index]
    }
}

/// A fully buffered result set.
#[derive(Debug)]
pub struct ResultSet {
    pub fields: Vec<Field>,
    pub rows: Vec<Row>,
}

/// Outcome of a single command.
#[derive(Debug)]
pub enum QueryResult {
    /// The command produced rows.
    ResultSet(ResultSet),
    /// The command produced a success report.
    Ok(OkPacket),
}

impl QueryResult {
    /// Rows of the result set, empty for plain success reports.
    pub fn rows(&self) -> &[Row] {
        match self {
            Self::ResultSet(rs) => &rs.rows,
            Self::Ok(_) => &[],
        }
    }

    pub fn result_set(&self) -> Option<&ResultSet> {
        match self {
            Self::ResultSet(rs) => Some(rs),
            Self::Ok(_) => None,
        }
    }

    pub fn ok(&self) -> Option<&OkPacket> {
        match self {
            Self::Ok(ok) => Some(ok),
            Self::ResultSet(_) => None,
        }
    }

    pub fn affected_rows(&self) -> u64 {
        match self {
            Self::Ok(ok) => ok.affected_rows,
            Self::ResultSet(_) => 0,
        }
    }

    pub fn insert_id(&self) -> u64 {
        match self {
            Self::Ok(ok) => ok.insert_id,
            Self::ResultSet(_) => 0,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{mysql::field_flags, packet::BufMutExt};
    use bytes::{BufMut, BytesMut};

    pub(crate) fn field_payload(name: &str, field_type: FieldType, flags: u16) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_lcs(b"def");
        buf.put_lcs(b"db");
        buf.put_lcs(b"tbl");
        buf.put_lcs(b"tbl");
        buf.put_lcs(name.as_bytes());
        buf.put_lcs(name.as_bytes());
        buf.put_u8(0x0C);
        buf.put_u16_le(33);
        buf.put_u32_le(11);
        buf.put_u8(field_type as u8);
        buf.put_u16_le(flags);
        buf.put_u8(0);
        buf.put_slice(&[0, 0]);
        buf.freeze()
    }

    fn make_field(name: &str, field_type: FieldType, flags: u16) -> Field {
        Field::parse(field_payload(name, field_type, flags)).unwrap()
    }

    #[test]
    fn field_parse() {
        let field = make_field("id", FieldType::Long, field_flags::NOT_NULL);
        assert_eq!(field.name, "id");
        assert_eq!(field.db, "db");
        assert_eq!(field.field_type, FieldType::Long);
        assert_eq!(field.flags, field_flags::NOT_NULL);
        assert_eq!(field.charset_id, 33);
        assert!(field.default.is_none());
    }

    #[test]
    fn field_unknown_type_rejected() {
        let mut buf = BytesMut::new();
        for _ in 0..6 {
            buf.put_lcs(b"x");
        }
        buf.put_u8(0x0C);
        buf.put_u16_le(33);
        buf.put_u32_le(11);
        buf.put_u8(0x77); // not a known type
        buf.put_u16_le(0);
        buf.put_u8(0);
        buf.put_slice(&[0, 0]);
        assert!(Field::parse(buf.freeze()).is_err());
    }

    #[test]
    fn text_row_with_null() {
        let fields = [
            make_field("a", FieldType::Long, 0),
            make_field("b", FieldType::VarString, 0),
        ];
        let mut buf = BytesMut::new();
        buf.put_lcs(b"7");
        buf.put_u8(0xFB); // NULL

        let row = Row::parse_text(buf.freeze(), &fields).unwrap();
        assert_eq!(row.values(), &[Value::Int(7), Value::Null]);
        assert_eq!(row[0], Value::Int(7));
    }

    #[test]
    fn binary_row_bitmap_offset() {
        // five columns, columns 1 and 3 NULL: bits 3 and 5 of the bitmap
        let fields: Vec<Field> =
            (0..5).map(|i| make_field(&format!("c{i}"), FieldType::Tiny, 0)).collect();

        let mut buf = BytesMut::new();
        buf.put_u8(0); // status
        buf.put_u8(0b0010_1000);
        buf.put_u8(10);
        buf.put_u8(30);
        buf.put_u8(50);

        let row = Row::parse_binary(buf.freeze(), &fields).unwrap();
        assert_eq!(
            row.values(),
            &[
                Value::Int(10),
                Value::Null,
                Value::Int(30),
                Value::Null,
                Value::Int(50),
            ]
        );
    }

    #[test]
    fn binary_row_bitmap_spans_bytes() {
        // seven columns need (7 + 9) / 8 = 2 bitmap bytes
        let fields: Vec<Field> =
            (0..7).map(|i| make_field(&format!("c{i}"), FieldType::Tiny, 0)).collect();

        let mut buf = BytesMut::new();
        buf.put_u8(0);
        // column 6 is bit 8, the first bit of the second byte
        buf.put_slice(&[0x00, 0x01]);
        for v in 0..6 {
            buf.put_u8(v);
        }

        let row = Row::parse_binary(buf.freeze(), &fields).unwrap();
        assert_eq!(row[6], Value::Null);
        assert_eq!(row[5], Value::Int(5));
    }
}

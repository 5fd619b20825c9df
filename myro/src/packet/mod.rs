//! MySQL packet shapes.
//!
//! Each type covers one payload layout from the client/server protocol.
//! Framing, sequence numbers and error packet surfacing live in
//! [`stream`][crate::stream], this module only deals with payload bytes.
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{
    charset::Charset,
    codec::{self, CodecError, PackValue},
    common::ByteStr,
    mysql::Command,
    types::{self, Value},
};

mod error;
mod ext;

pub use error::{ProtocolError, ServerError};
pub use ext::{BufMutExt, BytesExt};

/// The server greeting, protocol version 10.
#[derive(Debug)]
pub struct Handshake {
    pub protocol_version: u8,
    pub server_version: ByteStr,
    pub thread_id: u32,
    pub scramble: Bytes,
    pub capabilities: u16,
    pub charset_id: u8,
    pub status: u16,
}

impl Handshake {
    pub fn parse(mut payload: Bytes) -> Result<Handshake, crate::Error> {
        let protocol_version = payload.try_get_u8()?;
        // the layout below is specific to version 10
        if protocol_version != 10 {
            return Err(ProtocolError::Version(protocol_version).into());
        }
        let server_version = payload.get_nul_bytestr()?;

        // fixed segment: thread id, scramble head, filler, capabilities,
        // charset, status, then the nul padded scramble tail
        let parts = codec::unpack("Va8CvCva13", &payload)?;
        let [
            PackValue::Uint(thread_id),
            PackValue::Bytes(head),
            _filler,
            PackValue::Uint(capabilities),
            PackValue::Uint(charset_id),
            PackValue::Uint(status),
            PackValue::Bytes(tail),
        ] = parts.as_slice() else {
            return Err(ProtocolError::ShortPacket("handshake").into());
        };

        let mut scramble = BytesMut::with_capacity(head.len() + tail.len());
        scramble.put_slice(head);
        scramble.put_slice(tail);

        Ok(Handshake {
            protocol_version,
            server_version,
            thread_id: *thread_id as u32,
            scramble: scramble.freeze(),
            capabilities: *capabilities as u16,
            charset_id: *charset_id as u8,
            status: *status as u16,
        })
    }
}

/// The client authentication response.
#[derive(Debug)]
pub struct Auth<'a> {
    pub capabilities: u32,
    pub max_packet: u32,
    pub charset_id: u8,
    pub user: &'a str,
    pub token: &'a [u8],
    pub database: Option<&'a str>,
}

impl Auth<'_> {
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        let head = codec::pack(
            "VVCa23",
            &[
                PackValue::Uint(self.capabilities.into()),
                PackValue::Uint(self.max_packet.into()),
                PackValue::Uint(self.charset_id.into()),
                PackValue::Bytes(Bytes::new()),
            ],
        )?;
        buf.put_slice(&head);
        buf.put_nul_string(self.user);
        buf.put_lcs(self.token);
        if let Some(db) = self.database {
            buf.put_nul_string(db);
        }
        Ok(())
    }
}

/// Success report for a command without a result set.
#[derive(Debug, Default, Clone)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub insert_id: u64,
    pub status: u16,
    pub warnings: u16,
    pub message: ByteStr,
}

impl OkPacket {
    pub fn parse(mut payload: Bytes) -> Result<OkPacket, ProtocolError> {
        let _marker = payload.try_get_u8()?;
        let affected_rows = payload.get_lcb()?.unwrap_or(0);
        let insert_id = payload.get_lcb()?.unwrap_or(0);
        // pre-4.1 reports end here
        let status = if payload.remaining() >= 2 { payload.get_u16_le() } else { 0 };
        let warnings = if payload.remaining() >= 2 { payload.get_u16_le() } else { 0 };
        let message = ByteStr::from_utf8_lossy(payload);
        Ok(OkPacket { affected_rows, insert_id, status, warnings, message })
    }
}

/// End marker for a field list or a row stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct Eof {
    pub warnings: u16,
    pub status: u16,
}

impl Eof {
    /// `0xFE` also opens 8-byte length numbers, only a 5-byte payload
    /// is an end marker.
    pub fn is(payload: &[u8]) -> bool {
        payload.len() == 5 && payload[0] == 0xFE
    }

    pub fn parse(mut payload: Bytes) -> Result<Eof, ProtocolError> {
        let _marker = payload.try_get_u8()?;
        let warnings = payload.try_get_u16_le()?;
        let status = payload.try_get_u16_le()?;
        Ok(Eof { warnings, status })
    }
}

/// First response packet of a command, classified.
#[derive(Debug)]
pub enum ResultHeader {
    Ok(OkPacket),
    Eof(Eof),
    /// A result set follows with this many columns.
    Fields(u64),
    /// Server asks for the named local file.
    LocalInfile(ByteStr),
}

impl ResultHeader {
    pub fn parse(mut payload: Bytes) -> Result<ResultHeader, ProtocolError> {
        match payload.first() {
            None => Err(ProtocolError::ShortPacket("result")),
            Some(0x00) => Ok(Self::Ok(OkPacket::parse(payload)?)),
            Some(0xFE) if Eof::is(&payload) => Ok(Self::Eof(Eof::parse(payload)?)),
            Some(0xFB) => {
                payload.advance(1);
                Ok(Self::LocalInfile(ByteStr::from_utf8_lossy(payload)))
            }
            Some(_) => match payload.get_lcb()? {
                Some(count) => Ok(Self::Fields(count)),
                None => Err(ProtocolError::UnexpectedPacket { expected: "result", got: 0xFB }),
            },
        }
    }
}

/// Success report for `COM_STMT_PREPARE`.
#[derive(Debug)]
pub struct PrepareOk {
    pub statement_id: u32,
    pub field_count: u16,
    pub param_count: u16,
    pub warnings: u16,
}

impl PrepareOk {
    pub fn parse(mut payload: Bytes) -> Result<PrepareOk, ProtocolError> {
        let marker = payload.try_get_u8()?;
        if marker != 0 {
            return Err(ProtocolError::UnexpectedPacket { expected: "prepare result", got: marker });
        }
        let statement_id = payload.try_get_u32_le()?;
        let field_count = payload.try_get_u16_le()?;
        let param_count = payload.try_get_u16_le()?;
        let warnings = match payload.remaining() {
            3.. => {
                payload.advance(1); // filler
                payload.try_get_u16_le()?
            }
            _ => 0,
        };
        Ok(PrepareOk { statement_id, field_count, param_count, warnings })
    }
}

/// `COM_STMT_EXECUTE` request.
#[derive(Debug)]
pub struct Execute<'a> {
    pub statement_id: u32,
    pub params: &'a [Value],
    pub charset: Charset,
}

impl Execute<'_> {
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u8(Command::StmtExecute as u8);
        buf.put_u32_le(self.statement_id);
        buf.put_u8(0); // no cursor
        buf.put_u32_le(1); // iteration count

        if self.params.is_empty() {
            return Ok(());
        }

        let mut bitmap = vec![0u8; self.params.len().div_ceil(8)];
        for (i, param) in self.params.iter().enumerate() {
            if matches!(param, Value::Null) {
                bitmap[i / 8] |= 1 << (i % 8);
            }
        }
        buf.put_slice(&bitmap);
        buf.put_u8(1); // new params bound

        let mut values = BytesMut::new();
        for param in self.params {
            let enc = types::encode(param, self.charset)?;
            buf.put_u8(enc.field_type as u8);
            buf.put_u8(if enc.unsigned { 0x80 } else { 0 });
            values.put_slice(&enc.bytes);
        }
        buf.put_slice(&values);
        Ok(())
    }
}

impl ServerError {
    pub(crate) fn parse(mut payload: Bytes) -> Result<ServerError, ProtocolError> {
        let _marker = payload.try_get_u8()?;
        let code = payload.try_get_u16_le()?;
        // 4.1 reports mark the sqlstate with '#', 4.0 goes straight to
        // the message
        let sql_state = match payload.first() {
            Some(&b'#') => {
                payload.advance(1);
                Some(ByteStr::from_utf8_lossy(payload.try_take(5)?))
            }
            _ => None,
        };
        let message = ByteStr::from_utf8_lossy(payload);
        Ok(ServerError { code, sql_state, message })
    }
}

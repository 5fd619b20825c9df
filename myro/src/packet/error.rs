use std::fmt;

use crate::common::ByteStr;

/// The byte stream violated the packet protocol.
#[derive(Debug)]
pub enum ProtocolError {
    /// Packet arrived with an unexpected sequence number.
    Sequence { expected: u8, got: u8 },
    /// Server speaks an unsupported handshake version.
    Version(u8),
    /// A packet of a different kind was expected here.
    UnexpectedPacket { expected: &'static str, got: u8 },
    /// Packet ended before its fixed fields.
    ShortPacket(&'static str),
    /// Field descriptor carries a type byte we do not know.
    UnknownFieldType(u8),
    /// Server requested an authentication method other than
    /// `mysql_native_password`.
    UnsupportedAuth,
    /// Operation is not valid in the current protocol state.
    OutOfSync { operation: &'static str, state: &'static str },
}

impl From<bytes::TryGetError> for ProtocolError {
    fn from(_: bytes::TryGetError) -> Self {
        Self::ShortPacket("payload")
    }
}

impl std::error::Error for ProtocolError { }

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequence { expected, got } => {
                write!(f, "packets out of order, expected sequence {expected}, got {got}")
            }
            Self::Version(v) => write!(f, "unsupported protocol version {v}"),
            Self::UnexpectedPacket { expected, got } => {
                write!(f, "expected {expected} packet, got first byte {got:#04x}")
            }
            Self::ShortPacket(what) => write!(f, "truncated {what} packet"),
            Self::UnknownFieldType(t) => write!(f, "unknown field type {t:#04x}"),
            Self::UnsupportedAuth => f.write_str("server requested an unsupported auth method"),
            Self::OutOfSync { operation, state } => {
                write!(f, "cannot {operation} while connection is {state}")
            }
        }
    }
}

/// An error report from the server, decoded from an error packet.
#[derive(Debug)]
pub struct ServerError {
    pub code: u16,
    pub sql_state: Option<ByteStr>,
    pub message: ByteStr,
}

impl std::error::Error for ServerError { }

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sql_state {
            Some(state) => write!(f, "server error {} ({state}): {}", self.code, self.message),
            None => write!(f, "server error {}: {}", self.code, self.message),
        }
    }
}

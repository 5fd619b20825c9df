//! `myro` error types.
use std::{backtrace::Backtrace, fmt, io, str::Utf8Error};

use crate::{
    codec::CodecError,
    connection::ParseError,
    packet::{ProtocolError, ServerError},
};

/// A specialized [`Result`] type for `myro` operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible error from `myro` library.
pub struct Error {
    context: String,
    backtrace: Backtrace,
    kind: ErrorKind,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// Returns the server error report, if the server rejected a command.
    pub fn as_server(&self) -> Option<&ServerError> {
        match &self.kind {
            ErrorKind::Server(e) => Some(e),
            _ => None,
        }
    }
}

/// All possible error kind from `myro` library.
pub enum ErrorKind {
    Config(ParseError),
    Protocol(ProtocolError),
    Server(ServerError),
    Codec(CodecError),
    Io(io::Error),
    Utf8(Utf8Error),
    Timeout(TimeoutError),
    Closed(ConnectionClosed),
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Error {
            fn from($pat: $ty) -> Self {
                let backtrace = std::backtrace::Backtrace::capture();
                Self { context: String::new(), backtrace, kind: $body }
            }
        }
    };
}

from!(<ErrorKind>e => e);
from!(<ParseError>e => ErrorKind::Config(e));
from!(<ProtocolError>e => ErrorKind::Protocol(e));
from!(<bytes::TryGetError>e => ErrorKind::Protocol(e.into()));
from!(<ServerError>e => ErrorKind::Server(e));
from!(<CodecError>e => ErrorKind::Codec(e));
from!(<io::Error>e => ErrorKind::Io(e));
from!(<Utf8Error>e => ErrorKind::Utf8(e));
from!(<TimeoutError>e => ErrorKind::Timeout(e));
from!(<ConnectionClosed>e => ErrorKind::Closed(e));

impl std::error::Error for Error { }

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            write!(f, "{}: ", self.context)?;
        }

        fmt::Display::fmt(&self.kind, f)?;

        if let std::backtrace::BacktraceStatus::Captured = self.backtrace.status() {
            let mut backtrace = self.backtrace.to_string();
            write!(f, "\n\n")?;
            writeln!(f, "Stack backtrace:")?;
            backtrace.truncate(backtrace.trim_end().len());
            write!(f, "{}", backtrace)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl std::error::Error for ErrorKind { }

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => e.fmt(f),
            Self::Protocol(e) => e.fmt(f),
            Self::Server(e) => e.fmt(f),
            Self::Codec(e) => e.fmt(f),
            Self::Io(e) => e.fmt(f),
            Self::Utf8(e) => e.fmt(f),
            Self::Timeout(e) => e.fmt(f),
            Self::Closed(e) => e.fmt(f),
        }
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// A read did not complete within the configured timeout.
#[derive(Debug)]
pub struct TimeoutError;

impl std::error::Error for TimeoutError { }

impl fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("read timed out")
    }
}

/// The connection is closed, or closed before a result arrived.
#[derive(Debug)]
pub struct ConnectionClosed;

impl std::error::Error for ConnectionClosed { }

impl fmt::Display for ConnectionClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("connection closed")
    }
}

use std::io;

use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

/// A malformed frame on the wire.
///
/// Protocol errors are recoverable: the connection driver reports them to the
/// peer and keeps serving the connection. Everything else closes it.
#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Protocol error: invalid multibulk length")]
    InvalidMultiBulkLength,
    #[error("Protocol error: invalid bulk length")]
    InvalidBulkLength,
    #[error("Protocol error: expected '{expected}', got '{got}'")]
    UnexpectedByte { expected: char, got: char },
}

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("{0}")]
    Protocol(#[from] ProtocolError),
    /// Transport failure, including end of stream. Fatal to the connection.
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("not an int")]
    NotAnInt,
    #[error("not a status")]
    NotAStatus,
    #[error("not an error")]
    NotAnError,
    #[error("not a nil")]
    NotANil,
}

impl Error {
    /// Classification by variant, never by message: protocol errors keep the
    /// connection open, everything else closes it.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Error::Protocol(_))
    }

    /// True when the peer closed the stream mid-frame or between frames.
    pub fn is_eof(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}

pub(crate) fn unexpected_eof() -> Error {
    Error::Io(io::ErrorKind::UnexpectedEof.into())
}

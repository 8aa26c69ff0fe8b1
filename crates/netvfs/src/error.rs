//! Error types of the client.
//!
//! Errors fall into three groups:
//! - transport errors ([`Error::Io`]) which the session retries and which are
//!   otherwise fatal to the connection,
//! - protocol errors ([`Error::Unexpected`], [`Error::Framing`]) which are
//!   fatal and never retried,
//! - errors reported by the server (`ERROR code=...` responses) mapped to
//!   typed variants with their details already unescaped.

use std::io;

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum Error {
    /// `code="eof"`
    #[error("end of stream")]
    EndOfStream,

    /// `code="filenotfound"`, carrying the unescaped uri.
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// `code="directorynotfound"`, carrying the unescaped uri.
    #[error("directory not found: {0}")]
    DirectoryNotFound(String),

    /// `code="unauthorised"`, carrying the unescaped details.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Any other error code. Carries the unescaped tuple text of the response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A line that is not a valid response where one was expected.
    #[error("unexpected response: {0:?}")]
    Unexpected(String),

    /// The transport was used in the wrong framing mode, or a line overran
    /// the lookahead buffer.
    #[error("framing error: {0}")]
    Framing(&'static str),

    #[error("session is not connected")]
    NotConnected,

    /// The session is dedicated to an open random-access stream.
    #[error("session is busy with a random-access stream")]
    Busy,

    #[error("stream is closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Transport failures are the only errors worth retrying over a fresh connection.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Io(_))
    }

    /// Errors the server reported through an `ERROR` response.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            Error::EndOfStream
                | Error::FileNotFound(_)
                | Error::DirectoryNotFound(_)
                | Error::PermissionDenied(_)
                | Error::Protocol(_)
        )
    }
}

impl From<tokio_util::codec::LinesCodecError> for Error {
    fn from(err: tokio_util::codec::LinesCodecError) -> Self {
        use tokio_util::codec::LinesCodecError::*;

        match err {
            MaxLineLengthExceeded => Error::Framing("line exceeds the lookahead buffer"),
            Io(e) => Error::Io(e),
        }
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Io(io::Error::new(io::ErrorKind::TimedOut, "socket timed out"))
    }
}

#[test]
fn only_io_is_transport() {
    assert!(Error::Io(io::Error::from(io::ErrorKind::BrokenPipe)).is_transport());
    assert!(!Error::Unexpected("HELLO".to_owned()).is_transport());
    assert!(!Error::FileNotFound("/a".to_owned()).is_transport());
    assert!(Error::FileNotFound("/a".to_owned()).is_remote());
    assert!(!Error::NotConnected.is_remote());
}

#[test]
fn overlong_line_is_a_framing_error() {
    let err = Error::from(tokio_util::codec::LinesCodecError::MaxLineLengthExceeded);
    assert!(matches!(err, Error::Framing(_)));
}

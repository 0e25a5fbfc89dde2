//! Error handling.

mod capacity_error;
mod handshake_error;
mod protocol_error;
#[cfg(feature = "tls")]
mod tls_error;
mod url_error;

pub use self::{
    capacity_error::CapacityError, handshake_error::HandshakeError,
    protocol_error::ProtocolError, url_error::UrlError,
};
#[cfg(feature = "tls")]
pub use self::tls_error::TlsError;

use std::{fmt, io, result, str, string};

/// Result type of all WebSocket library functions.
pub type Result<T, E = Error> = result::Result<T, E>;

/// Possible WebSocket errors.
#[derive(Debug)]
pub enum Error {
    /// WebSocket connection closed normally. This informs you of the shutdown
    /// of the connection after the closing handshake is finished. It is not an
    /// error as such, and it is safe to drop the underlying connection when
    /// this is returned.
    ConnectionClosed,
    /// Trying to read or write after the connection was reported closed. This
    /// indicates a program error on your part.
    AlreadyClosed,
    /// Input-output error. Apart from `WouldBlock`, these are generally fatal:
    /// the connection is dead and close code 1006 applies.
    Io(io::Error),
    /// TLS error.
    #[cfg(feature = "tls")]
    Tls(TlsError),
    /// A configured size limit was exceeded.
    Capacity(CapacityError),
    /// The peer violated the WebSocket protocol.
    Protocol(ProtocolError),
    /// The HTTP upgrade handshake failed; no connection was established.
    Handshake(HandshakeError),
    /// UTF-8 encoding error.
    Utf8,
    /// Invalid URL passed to a client entry point.
    Url(UrlError),
    /// The server answered the upgrade request with a status other than 101.
    /// The response is passed through unchanged for the caller to inspect.
    Http(http::Response<()>),
    /// Failed to build or serialize an HTTP message.
    HttpFormat(http::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::ConnectionClosed => write!(f, "Connection closed normally"),
            Error::AlreadyClosed => write!(f, "Trying to work with closed connection"),
            Error::Io(ref err) => write!(f, "IO error: {err}"),
            #[cfg(feature = "tls")]
            Error::Tls(ref err) => write!(f, "TLS error: {err}"),
            Error::Capacity(ref err) => write!(f, "Space limit exceeded: {err}"),
            Error::Protocol(ref err) => write!(f, "WebSocket protocol error: {err}"),
            Error::Handshake(ref err) => write!(f, "WebSocket handshake error: {err}"),
            Error::Utf8 => write!(f, "UTF-8 encoding error"),
            Error::Url(ref err) => write!(f, "URL error: {err}"),
            Error::Http(ref resp) => write!(f, "HTTP error: {}", resp.status()),
            Error::HttpFormat(ref err) => write!(f, "HTTP format error: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            Error::Io(ref err) => Some(err),
            #[cfg(feature = "tls")]
            Error::Tls(ref err) => Some(err),
            Error::Capacity(ref err) => Some(err),
            Error::Protocol(ref err) => Some(err),
            Error::Handshake(ref err) => Some(err),
            Error::Url(ref err) => Some(err),
            Error::HttpFormat(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

#[cfg(feature = "tls")]
impl From<native_tls::Error> for Error {
    fn from(err: native_tls::Error) -> Self {
        Error::Tls(TlsError::Native(err))
    }
}

impl From<str::Utf8Error> for Error {
    fn from(_: str::Utf8Error) -> Self {
        Error::Utf8
    }
}

impl From<string::FromUtf8Error> for Error {
    fn from(_: string::FromUtf8Error) -> Self {
        Error::Utf8
    }
}

impl From<http::header::ToStrError> for Error {
    fn from(_: http::header::ToStrError) -> Self {
        Error::Utf8
    }
}

impl From<http::Error> for Error {
    fn from(err: http::Error) -> Self {
        Error::HttpFormat(err)
    }
}

impl From<http::header::InvalidHeaderValue> for Error {
    fn from(err: http::header::InvalidHeaderValue) -> Self {
        Error::HttpFormat(err.into())
    }
}

impl From<http::uri::InvalidUri> for Error {
    fn from(err: http::uri::InvalidUri) -> Self {
        Error::HttpFormat(err.into())
    }
}

impl From<httparse::Error> for Error {
    fn from(err: httparse::Error) -> Self {
        match err {
            httparse::Error::TooManyHeaders => {
                Error::Capacity(CapacityError::HandshakeHeadTooLarge)
            }
            e => Error::Handshake(HandshakeError::Httparse(e)),
        }
    }
}

impl From<CapacityError> for Error {
    fn from(err: CapacityError) -> Self {
        Error::Capacity(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<HandshakeError> for Error {
    fn from(err: HandshakeError) -> Self {
        Error::Handshake(err)
    }
}

impl From<UrlError> for Error {
    fn from(err: UrlError) -> Self {
        Error::Url(err)
    }
}

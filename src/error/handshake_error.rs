use std::fmt;

/// Indicates the specific type/cause of an upgrade handshake failure.
#[derive(PartialEq, Eq, Clone)]
pub enum HandshakeError {
    /// Use of the wrong HTTP method (the WebSocket protocol requires GET).
    WrongHttpMethod,
    /// Wrong HTTP version used (the WebSocket protocol requires 1.1 or higher).
    WrongHttpVersion,
    /// Missing `Connection: upgrade` HTTP header.
    MissingConnectionUpgradeHeader,
    /// Missing `Upgrade: websocket` HTTP header.
    MissingUpgradeWebSocketHeader,
    /// Missing `Sec-WebSocket-Version` HTTP header.
    MissingSecWebSocketVersionHeader,
    /// The `Sec-WebSocket-Version` header carries a version other than 13.
    UnsupportedSecWebSocketVersion,
    /// Missing `Sec-WebSocket-Key` HTTP header.
    MissingSecWebSocketKey,
    /// The `Sec-WebSocket-Key` header is not base64 of 16 bytes.
    InvalidSecWebSocketKey,
    /// The `Sec-WebSocket-Accept` header is either not present or does not
    /// specify the correct key value.
    SecWebSocketAcceptKeyMismatch,
    /// The client requested a subprotocol the server does not support.
    UnsupportedSubProtocol(String),
    /// The server chose a subprotocol the client never requested.
    UnsolicitedSubProtocol(String),
    /// Garbage data encountered after the client request.
    JunkAfterRequest,
    /// Custom rejection responses must not carry a success status.
    CustomResponseSuccessful,
    /// The peer went away while the handshake was still in progress.
    HandshakeIncomplete,
    /// Wrapper around a [`httparse::Error`] value.
    Httparse(httparse::Error),
}

impl fmt::Debug for HandshakeError {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::WrongHttpMethod => {
                write!(f, "Unsupported HTTP method used - only GET is allowed")
            }
            Self::WrongHttpVersion => write!(f, "HTTP version must be 1.1 or higher"),
            Self::MissingConnectionUpgradeHeader => write!(f, "No \"Connection: upgrade\" header"),
            Self::MissingUpgradeWebSocketHeader => write!(f, "No \"Upgrade: websocket\" header"),
            Self::MissingSecWebSocketVersionHeader => {
                write!(f, "No \"Sec-WebSocket-Version\" header")
            }
            Self::UnsupportedSecWebSocketVersion => {
                write!(f, "Unsupported WebSocket version (only 13 is supported)")
            }
            Self::MissingSecWebSocketKey => write!(f, "No \"Sec-WebSocket-Key\" header"),
            Self::InvalidSecWebSocketKey => {
                write!(f, "\"Sec-WebSocket-Key\" is not base64 of 16 bytes")
            }
            Self::SecWebSocketAcceptKeyMismatch => {
                write!(f, "Key mismatch in \"Sec-WebSocket-Accept\" header")
            }
            Self::UnsupportedSubProtocol(ref elem) => {
                write!(f, "Unsupported subprotocol: {elem}")
            }
            Self::UnsolicitedSubProtocol(ref elem) => {
                write!(f, "Server chose unrequested subprotocol: {elem}")
            }
            Self::JunkAfterRequest => write!(f, "Junk after client request"),
            Self::CustomResponseSuccessful => write!(f, "Custom response must not be successful"),
            Self::HandshakeIncomplete => write!(f, "Handshake not finished"),
            Self::Httparse(elem) => write!(f, "httparse error: {elem}"),
        }
    }
}

impl fmt::Display for HandshakeError {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl std::error::Error for HandshakeError {}

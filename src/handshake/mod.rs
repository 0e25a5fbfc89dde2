//! WebSocket handshake control.

pub mod client;
pub mod server;

use crate::error::{CapacityError, Error, HandshakeError, Result};
use http::{header, header::AsHeaderName, HeaderMap, HeaderName, HeaderValue};
use sha1::{Digest, Sha1};
use std::{io::Read, result::Result as StdResult};

/// Limit the number of header lines.
pub(crate) const MAX_HEADERS: usize = 124;

/// Limit on the total size of the HTTP head accepted during a handshake.
/// Protects against a peer that feeds us headers forever.
const MAX_HEAD_BYTES: usize = 64 * 1024;

/// Turns a Sec-WebSocket-Key into a Sec-WebSocket-Accept.
pub fn derive_accept_key(request_key: &[u8]) -> String {
    // ... field is constructed by concatenating /key/ ...
    // ... with the string "258EAFA5-E914-47DA-95CA-C5AB0DC85B11" (RFC 6455)
    const WS_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
    let mut sha1 = Sha1::new();
    sha1.update(request_key);
    sha1.update(WS_GUID);
    base64::encode(sha1.finalize().as_slice())
}

/// The parseable object.
pub(crate) trait TryParse: Sized {
    /// Return Ok(None) if incomplete, Err on syntax error.
    fn try_parse(data: &[u8]) -> Result<Option<(usize, Self)>>;
}

/// Trait to convert raw objects into HTTP parseables.
pub(crate) trait FromHttparse<T>: Sized {
    fn from_httparse(raw: T) -> Result<Self>;
}

impl<'b: 'h, 'h> FromHttparse<&'b [httparse::Header<'h>]> for HeaderMap {
    fn from_httparse(raw: &'b [httparse::Header<'h>]) -> Result<Self> {
        let mut headers = HeaderMap::new();
        for header in raw {
            headers.append(
                HeaderName::from_bytes(header.name.as_bytes()).map_err(http::Error::from)?,
                HeaderValue::from_bytes(header.value).map_err(http::Error::from)?,
            );
        }
        Ok(headers)
    }
}

/// Read from the stream until an object parses, handing back the parsed
/// object together with any bytes that were read beyond it.
///
/// The head accumulates in one growing buffer and is re-parsed after every
/// read; heads are small, so the simplicity wins over incremental parsing.
pub(crate) fn read_parseable<T: TryParse, S: Read>(stream: &mut S) -> Result<(T, Vec<u8>)> {
    let mut head = Vec::with_capacity(512);
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Err(Error::Handshake(HandshakeError::HandshakeIncomplete));
        }
        head.extend_from_slice(&chunk[..n]);
        if head.len() > MAX_HEAD_BYTES {
            return Err(Error::Capacity(CapacityError::HandshakeHeadTooLarge));
        }
        if let Some((size, obj)) = T::try_parse(&head)? {
            let tail = head.split_off(size);
            return Ok((obj, tail));
        }
    }
}

/// Check that a header contains a given token in its comma-separated value,
/// ASCII case-insensitively. `Connection: keep-alive, Upgrade` contains the
/// `upgrade` token.
pub(crate) fn header_contains_token<K: AsHeaderName>(
    headers: &HeaderMap,
    name: K,
    token: &str,
) -> bool {
    headers.get_all(name).iter().any(|value| {
        value
            .to_str()
            .map(|value| value.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)))
            .unwrap_or(false)
    })
}

/// Check that a header equals the given value, ASCII case-insensitively.
pub(crate) fn header_eq_ignore_case<K: AsHeaderName>(
    headers: &HeaderMap,
    name: K,
    value: &str,
) -> bool {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case(value))
        .unwrap_or(false)
}

/// Verify the `Upgrade`/`Connection` header pair of an upgrade request or
/// response.
pub(crate) fn check_upgrade_headers(headers: &HeaderMap) -> StdResult<(), HandshakeError> {
    // If the response lacks an |Upgrade| header field or the |Upgrade|
    // header field contains a value that is not an ASCII case-insensitive
    // match for the value "websocket", the client MUST _Fail the WebSocket
    // Connection_. (RFC 6455)
    if !header_eq_ignore_case(headers, header::UPGRADE, "websocket") {
        return Err(HandshakeError::MissingUpgradeWebSocketHeader);
    }
    // If the response lacks a |Connection| header field or the |Connection|
    // header field doesn't contain a token that is an ASCII case-insensitive
    // match for the value "Upgrade", the client MUST _Fail the WebSocket
    // Connection_. (RFC 6455)
    if !header_contains_token(headers, header::CONNECTION, "upgrade") {
        return Err(HandshakeError::MissingConnectionUpgradeHeader);
    }
    Ok(())
}

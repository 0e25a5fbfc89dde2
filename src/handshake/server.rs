//! Server handshake.

use super::{
    check_upgrade_headers, derive_accept_key, header_contains_token, header_eq_ignore_case,
    read_parseable, FromHttparse, TryParse, MAX_HEADERS,
};
use crate::{
    error::{Error, HandshakeError, Result},
    protocol::{Role, WebSocket, WebSocketConfig},
};
use http::{header, HeaderMap, HeaderValue, Method, Response, StatusCode, Version};
use httparse::Status;
use log::*;
use std::{
    io::{Read, Write},
    result::Result as StdResult,
};

/// Server request type.
pub type Request = http::Request<()>;

/// The error response the [`Callback`] may reject a connection with,
/// optionally carrying a body.
pub type ErrorResponse = Response<Option<String>>;

/// The callback trait.
///
/// The callback is called when the server receives an incoming WebSocket
/// handshake request from the client. Specifying a callback allows you to
/// analyze incoming headers and add additional headers to the response that
/// the server sends to the client and/or reject the connection based on the
/// incoming headers.
pub trait Callback: Sized {
    /// Called whenever the server read the request from the client and is
    /// ready to reply to it. May amend the prepared `101` response.
    /// Returning an error results in rejecting the incoming connection.
    fn on_request(
        self,
        request: &Request,
        response: Response<()>,
    ) -> StdResult<Response<()>, ErrorResponse>;
}

impl<F> Callback for F
where
    F: FnOnce(&Request, Response<()>) -> StdResult<Response<()>, ErrorResponse>,
{
    fn on_request(
        self,
        request: &Request,
        response: Response<()>,
    ) -> StdResult<Response<()>, ErrorResponse> {
        self(request, response)
    }
}

/// Stub for callback that does nothing.
#[derive(Clone, Copy, Debug)]
pub struct NoCallback;

impl Callback for NoCallback {
    fn on_request(
        self,
        _request: &Request,
        response: Response<()>,
    ) -> StdResult<Response<()>, ErrorResponse> {
        Ok(response)
    }
}

impl TryParse for Request {
    fn try_parse(buf: &[u8]) -> Result<Option<(usize, Self)>> {
        let mut hbuffer = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut hbuffer);
        Ok(match req.parse(buf)? {
            Status::Partial => None,
            Status::Complete(size) => Some((size, Request::from_httparse(req)?)),
        })
    }
}

impl<'h, 'b: 'h> FromHttparse<httparse::Request<'h, 'b>> for Request {
    fn from_httparse(raw: httparse::Request<'h, 'b>) -> Result<Self> {
        if raw.version.expect("Bug: no HTTP version") < /*1.*/1 {
            return Err(Error::Handshake(HandshakeError::WrongHttpVersion));
        }

        // Non-GET requests parse fine: whether they may upgrade is the
        // business of `check_upgrade`, and a server loop may still want to
        // delegate them to a plain HTTP handler.
        let method = raw
            .method
            .expect("Bug: no method in header")
            .parse::<Method>()
            .map_err(|_| Error::Handshake(HandshakeError::WrongHttpMethod))?;
        let headers = HeaderMap::from_httparse(raw.headers)?;

        let mut request = Request::new(());
        *request.method_mut() = method;
        *request.headers_mut() = headers;
        *request.uri_mut() = raw.path.expect("Bug: no path in header").parse()?;
        // httparse only supports HTTP 0.9/1.0/1.1, and the version was
        // checked above.
        *request.version_mut() = Version::HTTP_11;

        Ok(request)
    }
}

/// Check whether a request asks for a WebSocket upgrade: a GET whose
/// `Connection` header contains the `upgrade` token (not merely
/// `keep-alive`) and whose `Upgrade` header is `websocket`, ASCII
/// case-insensitively.
pub fn is_upgrade_request(request: &Request) -> bool {
    request.method() == Method::GET
        && header_contains_token(request.headers(), header::CONNECTION, "upgrade")
        && header_eq_ignore_case(request.headers(), header::UPGRADE, "websocket")
}

/// Verify that the request is a well-formed WebSocket upgrade: a GET with
/// `Upgrade: websocket` and a `Connection` header containing the `upgrade`
/// token (the `keep-alive, upgrade` form some browsers send is accepted).
pub fn check_upgrade(request: &Request) -> StdResult<(), HandshakeError> {
    if request.method() != Method::GET {
        return Err(HandshakeError::WrongHttpMethod);
    }
    check_upgrade_headers(request.headers())
}

/// A rejected upgrade: the 400 response written to the peer together with
/// the error surfaced to the caller.
struct Rejection {
    response: Response<()>,
    error: HandshakeError,
}

impl Rejection {
    fn new(error: HandshakeError) -> Self {
        let response = Response::builder()
            .status(StatusCode::BAD_REQUEST)
            .body(())
            .expect("Bug: failed to build rejection response");
        Rejection { response, error }
    }

    fn with_header(mut self, name: header::HeaderName, value: HeaderValue) -> Self {
        self.response.headers_mut().insert(name, value);
        self
    }
}

/// Create the `101 Switching Protocols` response for an upgrade request,
/// negotiating the subprotocol against the ones in `protocols`.
///
/// This is useful when integrating with an existing HTTP server; the plain
/// entry points are [`accept`](crate::server::accept) and
/// [`accept_hdr`](crate::server::accept_hdr).
pub fn create_response(request: &Request, protocols: &[&str]) -> Result<Response<()>> {
    negotiate(request, protocols).map_err(|rejection| Error::Handshake(rejection.error))
}

fn negotiate(request: &Request, protocols: &[&str]) -> StdResult<Response<()>, Rejection> {
    if let Err(error) = check_upgrade(request) {
        return Err(Rejection::new(error));
    }

    let headers = request.headers();

    // Only version 13 is spoken here; the rejection carries the version we
    // do support so the client can retry.
    let version_13 = HeaderValue::from_static("13");
    match headers.get(header::SEC_WEBSOCKET_VERSION) {
        Some(version) if version == "13" => {}
        Some(_) => {
            return Err(Rejection::new(HandshakeError::UnsupportedSecWebSocketVersion)
                .with_header(header::SEC_WEBSOCKET_VERSION, version_13));
        }
        None => {
            return Err(Rejection::new(HandshakeError::MissingSecWebSocketVersionHeader)
                .with_header(header::SEC_WEBSOCKET_VERSION, version_13));
        }
    }

    // Subprotocol negotiation: first requested protocol we support wins. An
    // unsupported request is answered 400 with the request echoed.
    let chosen = match headers.get(header::SEC_WEBSOCKET_PROTOCOL) {
        Some(requested) => {
            let list = requested.to_str().unwrap_or("");
            match list.split(',').map(str::trim).find(|t| protocols.contains(t)) {
                Some(token) => {
                    Some(HeaderValue::from_str(token).expect("Bug: invalid subprotocol token"))
                }
                None => {
                    return Err(Rejection::new(HandshakeError::UnsupportedSubProtocol(
                        list.to_owned(),
                    ))
                    .with_header(header::SEC_WEBSOCKET_PROTOCOL, requested.clone()));
                }
            }
        }
        None => None,
    };

    // The key must be base64 of exactly 16 bytes.
    let key = match headers.get(header::SEC_WEBSOCKET_KEY) {
        Some(key) => key,
        None => return Err(Rejection::new(HandshakeError::MissingSecWebSocketKey)),
    };
    match base64::decode(key.as_bytes()) {
        Ok(decoded) if decoded.len() == 16 => {}
        _ => return Err(Rejection::new(HandshakeError::InvalidSecWebSocketKey)),
    }

    let mut builder = Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .version(Version::HTTP_11)
        .header(header::CONNECTION, "Upgrade")
        .header(header::UPGRADE, "websocket")
        .header(header::SEC_WEBSOCKET_ACCEPT, derive_accept_key(key.as_bytes()));
    if let Some(protocol) = chosen {
        builder = builder.header(header::SEC_WEBSOCKET_PROTOCOL, protocol);
    }
    Ok(builder.body(()).expect("Bug: failed to build handshake response"))
}

/// Serialize an HTTP response head onto the wire.
fn write_response<T>(stream: &mut impl Write, response: &Response<T>) -> Result<()> {
    let mut head = Vec::new();
    write!(head, "{:?} {}\r\n", response.version(), response.status())?;
    for (name, value) in response.headers() {
        head.extend_from_slice(name.as_str().as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }
    head.extend_from_slice(b"\r\n");
    stream.write_all(&head)?;
    stream.flush()?;
    Ok(())
}

/// Read the request head off the stream, returning the parsed request and
/// any bytes that followed it.
pub(crate) fn read_request<S: Read>(stream: &mut S) -> Result<(Request, Vec<u8>)> {
    read_parseable(stream)
}

/// Perform the server side of the upgrade handshake: read the request off
/// the stream, then accept it.
pub(crate) fn perform_handshake<S, C>(
    mut stream: S,
    callback: C,
    protocols: &[&str],
    config: Option<WebSocketConfig>,
) -> Result<WebSocket<S>>
where
    S: Read + Write,
    C: Callback,
{
    trace!("Server handshake initiated");
    let (request, tail) = read_request(&mut stream)?;
    // The client may not send frames until our 101 went out.
    if !tail.is_empty() {
        return Err(Error::Handshake(HandshakeError::JunkAfterRequest));
    }
    accept_parsed(&request, stream, callback, protocols, config)
}

/// Accept an already-parsed upgrade request: write the negotiated `101` (or
/// a `400` rejection) and produce the server-role socket.
pub(crate) fn accept_parsed<S, C>(
    request: &Request,
    mut stream: S,
    callback: C,
    protocols: &[&str],
    config: Option<WebSocketConfig>,
) -> Result<WebSocket<S>>
where
    S: Read + Write,
    C: Callback,
{
    match negotiate(request, protocols) {
        Ok(response) => match callback.on_request(request, response) {
            Ok(response) => {
                write_response(&mut stream, &response)?;
                debug!("Server handshake done");
                Ok(WebSocket::from_raw_socket(stream, Role::Server, config))
            }
            Err(resp) => {
                if resp.status().is_success() {
                    return Err(Error::Handshake(HandshakeError::CustomResponseSuccessful));
                }
                write_response(&mut stream, &resp)?;
                if let Some(body) = resp.body() {
                    stream.write_all(body.as_bytes())?;
                    stream.flush()?;
                }
                debug!("Server handshake failed");
                let (parts, _) = resp.into_parts();
                Err(Error::Http(Response::from_parts(parts, ())))
            }
        },
        Err(rejection) => {
            write_response(&mut stream, &rejection.response)?;
            debug!("Server handshake failed");
            Err(Error::Handshake(rejection.error))
        }
    }
}

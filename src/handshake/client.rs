//! Client handshake.

use super::{
    check_upgrade_headers, derive_accept_key, read_parseable, FromHttparse, TryParse, MAX_HEADERS,
};
use crate::error::{Error, HandshakeError, Result, UrlError};
use http::{header, HeaderMap, Response, StatusCode, Version};
use httparse::Status;
use log::*;
use std::io::{Read, Write};

/// Client request type.
pub type Request = http::Request<()>;

/// Generate a random key for the `Sec-WebSocket-Key` header.
pub fn generate_key() -> String {
    // a base64-encoded (see Section 4 of [RFC4648]) value that,
    // when decoded, is 16 bytes in length (RFC 6455)
    let r: [u8; 16] = rand::random();
    base64::encode(r)
}

/// Perform the client side of the upgrade handshake over the given stream.
///
/// On success returns the server's `101` response and any bytes that arrived
/// after it (the beginning of the frame stream). A response with any other
/// status is handed back unchanged as [`Error::Http`] for the caller to
/// inspect; that is not a protocol failure.
pub(crate) fn perform_handshake<S: Read + Write>(
    stream: &mut S,
    request: &Request,
    protocols: &[&str],
) -> Result<(Response<()>, Vec<u8>)> {
    let key = generate_key();
    let req = generate_request(request, &key)?;
    stream.write_all(&req)?;
    stream.flush()?;
    debug!("Client request sent");

    let (response, tail) = read_parseable::<Response<()>, _>(stream)?;

    // 1. If the status code received from the server is not 101, the
    // client handles the response per HTTP [RFC2616] procedures. (RFC 6455)
    if response.status() != StatusCode::SWITCHING_PROTOCOLS {
        return Err(Error::Http(response));
    }

    verify_response(&response, &key, protocols)?;
    debug!("Client handshake done");
    Ok((response, tail))
}

/// Serialize a GET upgrade request onto the wire.
fn generate_request(request: &Request, key: &str) -> Result<Vec<u8>> {
    let mut req = Vec::new();
    let uri = request.uri();
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    let host = if let Some(host) = request.headers().get(header::HOST) {
        host.to_str()?.to_owned()
    } else {
        let host = uri.host().ok_or(Error::Url(UrlError::NoHostName))?;
        match uri.port_u16() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_owned(),
        }
    };

    write!(
        req,
        "GET {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Connection: Upgrade\r\n\
         Upgrade: websocket\r\n\
         Sec-WebSocket-Version: 13\r\n\
         Sec-WebSocket-Key: {key}\r\n"
    )?;

    // Additional request headers, e.g. the requested subprotocols or cookies.
    for (name, value) in request.headers() {
        let standard = [
            header::HOST,
            header::CONNECTION,
            header::UPGRADE,
            header::SEC_WEBSOCKET_VERSION,
            header::SEC_WEBSOCKET_KEY,
        ];
        if standard.iter().any(|h| h == name) {
            continue;
        }
        req.extend_from_slice(name.as_str().as_bytes());
        req.extend_from_slice(b": ");
        req.extend_from_slice(value.as_bytes());
        req.extend_from_slice(b"\r\n");
    }
    req.extend_from_slice(b"\r\n");
    Ok(req)
}

/// Verify a `101 Switching Protocols` response against the request we sent.
fn verify_response(response: &Response<()>, key: &str, protocols: &[&str]) -> Result<()> {
    let headers = response.headers();

    // 2. + 3. `Upgrade: websocket` and a `Connection` upgrade token are
    // both mandatory in the reply.
    check_upgrade_headers(headers)?;

    // 4. If the response lacks a |Sec-WebSocket-Accept| header field or
    // the |Sec-WebSocket-Accept| contains a value other than the
    // base64-encoded SHA-1 of ... the client MUST _Fail the WebSocket
    // Connection_. (RFC 6455)
    let accept = derive_accept_key(key.as_bytes());
    if !headers
        .get(header::SEC_WEBSOCKET_ACCEPT)
        .map(|v| v.as_bytes() == accept.as_bytes())
        .unwrap_or(false)
    {
        return Err(Error::Handshake(HandshakeError::SecWebSocketAcceptKeyMismatch));
    }

    // 6. If the response includes a |Sec-WebSocket-Protocol| header field
    // and this header field indicates the use of a subprotocol that was
    // not present in the client's handshake ... the client MUST _Fail
    // the WebSocket Connection_. (RFC 6455)
    if let Some(protocol) = headers.get(header::SEC_WEBSOCKET_PROTOCOL) {
        let protocol = protocol.to_str()?;
        if !protocols.iter().any(|p| *p == protocol) {
            return Err(Error::Handshake(HandshakeError::UnsolicitedSubProtocol(
                protocol.to_owned(),
            )));
        }
    }

    Ok(())
}

impl TryParse for Response<()> {
    fn try_parse(buf: &[u8]) -> Result<Option<(usize, Self)>> {
        let mut hbuffer = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut res = httparse::Response::new(&mut hbuffer);
        Ok(match res.parse(buf)? {
            Status::Partial => None,
            Status::Complete(size) => Some((size, Response::from_httparse(res)?)),
        })
    }
}

impl<'h, 'b: 'h> FromHttparse<httparse::Response<'h, 'b>> for Response<()> {
    fn from_httparse(raw: httparse::Response<'h, 'b>) -> Result<Self> {
        if raw.version.expect("Bug: no HTTP version") < /*1.*/1 {
            return Err(Error::Handshake(HandshakeError::WrongHttpVersion));
        }

        let status = StatusCode::from_u16(raw.code.expect("Bug: no HTTP response code"))
            .map_err(http::Error::from)?;
        let headers = HeaderMap::from_httparse(raw.headers)?;

        let mut response = Response::new(());
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        // httparse only supports HTTP 0.9/1.0/1.1, and the version was
        // checked above.
        *response.version_mut() = Version::HTTP_11;

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn random_keys() {
        let k1 = generate_key();
        let k2 = generate_key();
        assert_ne!(k1, k2);
        assert_eq!(k1.len(), k2.len());
        assert_eq!(k1.len(), 24);
        assert!(k1.ends_with("=="));
        assert!(k2.ends_with("=="));
        assert!(k1[..22].find('=').is_none());
        assert!(k2[..22].find('=').is_none());
    }

    #[test]
    fn response_parsing() {
        const DATA: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n";
        let (_, resp) = Response::<()>::try_parse(DATA).unwrap().unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get("Content-Type").unwrap(), &b"text/html"[..]);
    }

    #[test]
    fn request_formatting() {
        let request =
            Request::builder().method("GET").uri("ws://localhost/getCaseCount").body(()).unwrap();
        let key = "A70tsIbeMZUbJHh5BWFw6Q==";
        let req = generate_request(&request, key).unwrap();
        let req = String::from_utf8(req).unwrap();
        assert!(req.starts_with("GET /getCaseCount HTTP/1.1\r\n"));
        assert!(req.contains("Host: localhost\r\n"));
        assert!(req.contains("Sec-WebSocket-Key: A70tsIbeMZUbJHh5BWFw6Q==\r\n"));
        assert!(req.ends_with("\r\n\r\n"));
    }

    #[test]
    fn request_formatting_with_port_and_protocol() {
        let request = Request::builder()
            .method("GET")
            .uri("ws://localhost:9001/echo")
            .header(header::SEC_WEBSOCKET_PROTOCOL, "chat")
            .body(())
            .unwrap();
        let req = generate_request(&request, "A70tsIbeMZUbJHh5BWFw6Q==").unwrap();
        let req = String::from_utf8(req).unwrap();
        assert!(req.starts_with("GET /echo HTTP/1.1\r\n"));
        assert!(req.contains("Host: localhost:9001\r\n"));
        assert!(req.contains("sec-websocket-protocol: chat\r\n"));
    }

    fn sample_response(accept: &str) -> Response<()> {
        Response::builder()
            .status(StatusCode::SWITCHING_PROTOCOLS)
            .header(header::UPGRADE, "websocket")
            .header(header::CONNECTION, "Upgrade")
            .header(header::SEC_WEBSOCKET_ACCEPT, accept)
            .body(())
            .unwrap()
    }

    #[test]
    fn verification() {
        // The RFC 6455 example key pair.
        let key = "dGhlIHNhbXBsZSBub25jZQ==";
        let response = sample_response("s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        verify_response(&response, key, &[]).unwrap();

        let response = sample_response("differentaccept");
        assert!(matches!(
            verify_response(&response, key, &[]),
            Err(Error::Handshake(HandshakeError::SecWebSocketAcceptKeyMismatch))
        ));
    }

    #[test]
    fn unsolicited_subprotocol_is_rejected() {
        let key = "dGhlIHNhbXBsZSBub25jZQ==";
        let mut response = sample_response("s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        response
            .headers_mut()
            .insert(header::SEC_WEBSOCKET_PROTOCOL, "chat".parse().unwrap());

        assert!(matches!(
            verify_response(&response, key, &[]),
            Err(Error::Handshake(HandshakeError::UnsolicitedSubProtocol(_)))
        ));
        verify_response(&response, key, &["chat"]).unwrap();
    }

    #[test]
    fn non_101_response_is_passed_through() {
        let raw = b"HTTP/1.1 404 Not Found\r\n\r\n".to_vec();
        let mut stream = DuplexMoc { input: Cursor::new(raw), output: Vec::new() };
        let request = Request::builder().method("GET").uri("ws://localhost/").body(()).unwrap();
        match perform_handshake(&mut stream, &request, &[]) {
            Err(Error::Http(response)) => assert_eq!(response.status(), StatusCode::NOT_FOUND),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    struct DuplexMoc {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Read for DuplexMoc {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for DuplexMoc {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.output.write(buf)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}

//! Methods to connect to a WebSocket as a client.

use crate::{
    error::{Error, Result, UrlError},
    protocol::{Role, WebSocket, WebSocketConfig},
    stream::{MaybeTlsStream, Mode},
};
use http::{header, Request, Response};
use log::*;
use std::{
    io::{Read, Write},
    net::{SocketAddr, TcpStream, ToSocketAddrs},
};
use url::Url;

/// Connect to the given WebSocket in blocking mode.
///
/// The URL may be either `ws://` or `wss://`; for the latter, the `tls`
/// feature must be turned on. Returns the open socket together with the
/// server's `101` response (useful for inspecting handshake headers).
///
/// This function "just works" for those who want a simple blocking solution
/// similar to `std::net::TcpStream`. If you want to use another TLS library
/// or a custom stream, call [`client`] instead.
pub fn connect(url: Url) -> Result<(WebSocket<MaybeTlsStream<TcpStream>>, Response<()>)> {
    connect_with(url, &[], None)
}

/// Connect to the given WebSocket, requesting the given subprotocols and
/// using a custom configuration.
///
/// If the server picks one of `protocols`, it shows up in the returned
/// response's `Sec-WebSocket-Protocol` header.
pub fn connect_with(
    url: Url,
    protocols: &[&str],
    config: Option<WebSocketConfig>,
) -> Result<(WebSocket<MaybeTlsStream<TcpStream>>, Response<()>)> {
    let mode = url_mode(&url)?;
    let host = url.host_str().ok_or(Error::Url(UrlError::NoHostName))?;
    if host.is_empty() {
        return Err(Error::Url(UrlError::EmptyHostName));
    }
    let port = url
        .port_or_known_default()
        .unwrap_or(match mode {
            Mode::Plain => 80,
            Mode::Tls => 443,
        });
    let addrs = (host, port).to_socket_addrs()?;
    let stream = connect_to_some(addrs, &url)?;
    let stream = wrap_stream(stream, host, mode)?;
    client_with(url, stream, protocols, config)
}

/// Connect to the given WebSocket and run `handler` with the open socket.
///
/// Whichever way the handler exits, the closing handshake is initiated and
/// driven to completion before this returns, so the peer never observes an
/// abrupt disconnect for a handler that merely returned.
pub fn open<H>(url: Url, handler: H) -> Result<()>
where
    H: FnOnce(&mut WebSocket<MaybeTlsStream<TcpStream>>) -> Result<()>,
{
    open_with(url, &[], None, handler)
}

/// Like [`open`], requesting subprotocols and using a custom configuration.
pub fn open_with<H>(
    url: Url,
    protocols: &[&str],
    config: Option<WebSocketConfig>,
    handler: H,
) -> Result<()>
where
    H: FnOnce(&mut WebSocket<MaybeTlsStream<TcpStream>>) -> Result<()>,
{
    let (mut socket, _response) = connect_with(url, protocols, config)?;
    let result = handler(&mut socket);
    let close_result = socket.close_and_drain();
    result.and(close_result)
}

fn connect_to_some(addrs: impl Iterator<Item = SocketAddr>, url: &Url) -> Result<TcpStream> {
    for addr in addrs {
        debug!("Trying to contact {url} at {addr}...");
        if let Ok(stream) = TcpStream::connect(addr) {
            return Ok(stream);
        }
    }
    Err(Error::Url(UrlError::UnableToConnect(url.to_string())))
}

#[cfg(feature = "tls")]
fn wrap_stream(stream: TcpStream, domain: &str, mode: Mode) -> Result<MaybeTlsStream<TcpStream>> {
    match mode {
        Mode::Plain => Ok(MaybeTlsStream::Plain(stream)),
        Mode::Tls => {
            let connector = native_tls::TlsConnector::new()?;
            connector.connect(domain, stream).map(MaybeTlsStream::NativeTls).map_err(|err| {
                match err {
                    native_tls::HandshakeError::Failure(f) => f.into(),
                    native_tls::HandshakeError::WouldBlock(_) => {
                        panic!("Bug: TLS handshake not blocked")
                    }
                }
            })
        }
    }
}

#[cfg(not(feature = "tls"))]
fn wrap_stream(stream: TcpStream, _domain: &str, mode: Mode) -> Result<MaybeTlsStream<TcpStream>> {
    match mode {
        Mode::Plain => Ok(MaybeTlsStream::Plain(stream)),
        Mode::Tls => Err(Error::Url(UrlError::TlsFeatureNotEnabled)),
    }
}

/// Get the mode of the given URL.
///
/// Besides the scheme this also vets the URL shape: a fragment would never
/// reach the server, so a raw `#` is rejected rather than silently dropped.
pub fn url_mode(url: &Url) -> Result<Mode> {
    if url.fragment().is_some() {
        return Err(Error::Url(UrlError::FragmentInUrl));
    }
    match url.scheme() {
        "ws" => Ok(Mode::Plain),
        "wss" => Ok(Mode::Tls),
        _ => Err(Error::Url(UrlError::UnsupportedUrlScheme)),
    }
}

/// Do the client handshake over the given stream.
///
/// Use this function if you want to use a custom stream, e.g. a TLS stream
/// from another library. Any stream supporting `Read + Write` will do.
pub fn client<Stream: Read + Write>(
    url: Url,
    stream: Stream,
) -> Result<(WebSocket<Stream>, Response<()>)> {
    client_with(url, stream, &[], None)
}

/// Do the client handshake over the given stream, requesting subprotocols
/// and using a custom configuration.
pub fn client_with<Stream: Read + Write>(
    url: Url,
    mut stream: Stream,
    protocols: &[&str],
    config: Option<WebSocketConfig>,
) -> Result<(WebSocket<Stream>, Response<()>)> {
    let request = build_request(&url, protocols)?;
    let (response, tail) =
        crate::handshake::client::perform_handshake(&mut stream, &request, protocols)?;
    Ok((WebSocket::from_partially_read(stream, tail, Role::Client, config), response))
}

/// Build the upgrade request for a URL.
fn build_request(url: &Url, protocols: &[&str]) -> Result<Request<()>> {
    // Vet the URL even when the caller dialed the stream themselves.
    let _ = url_mode(url)?;
    let host = url.host_str().ok_or(Error::Url(UrlError::NoHostName))?;
    if host.is_empty() {
        return Err(Error::Url(UrlError::EmptyHostName));
    }
    let host = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    };

    let mut builder = Request::builder().method("GET").uri(url.as_str()).header(header::HOST, host);
    if !protocols.is_empty() {
        builder = builder.header(header::SEC_WEBSOCKET_PROTOCOL, protocols.join(", "));
    }
    Ok(builder.body(())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_modes() {
        assert_eq!(url_mode(&Url::parse("ws://example.com/").unwrap()).unwrap(), Mode::Plain);
        assert_eq!(url_mode(&Url::parse("wss://example.com/").unwrap()).unwrap(), Mode::Tls);
        assert!(matches!(
            url_mode(&Url::parse("http://example.com/").unwrap()),
            Err(Error::Url(UrlError::UnsupportedUrlScheme))
        ));
    }

    #[test]
    fn fragments_are_rejected() {
        let url = Url::parse("ws://example.com/path#frag").unwrap();
        assert!(matches!(url_mode(&url), Err(Error::Url(UrlError::FragmentInUrl))));
        assert!(matches!(
            build_request(&url, &[]),
            Err(Error::Url(UrlError::FragmentInUrl))
        ));
    }

    #[test]
    fn request_carries_subprotocols() {
        let url = Url::parse("ws://example.com:3013/chat").unwrap();
        let request = build_request(&url, &["chat", "superchat"]).unwrap();
        assert_eq!(request.headers().get(header::HOST).unwrap(), "example.com:3013");
        assert_eq!(
            request.headers().get(header::SEC_WEBSOCKET_PROTOCOL).unwrap(),
            "chat, superchat"
        );
    }
}

//! Methods to accept an incoming WebSocket connection on a server.

pub use crate::handshake::server::{create_response, is_upgrade_request, Callback, NoCallback};

use crate::{
    error::{Error, HandshakeError, Result},
    handshake::server::{accept_parsed, perform_handshake, read_request, Request},
    protocol::{WebSocket, WebSocketConfig},
};
use log::*;
use std::{
    io::{Read, Write},
    net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{sync_channel, Receiver, SyncSender},
        Arc,
    },
    thread,
    time::Duration,
};

/// How many handler errors the diagnostics channel buffers before dropping.
const DIAGNOSTICS_BOUND: usize = 32;

/// Accept the given Stream as a WebSocket.
///
/// This function starts a server WebSocket handshake over the given stream.
/// If you want TLS support, wrap the stream in a TLS stream before passing
/// it here. Any `Read + Write` stream is supported.
pub fn accept<S: Read + Write>(stream: S) -> Result<WebSocket<S>> {
    accept_hdr(stream, NoCallback)
}

/// Accept the given Stream as a WebSocket, with a custom configuration.
pub fn accept_with_config<S: Read + Write>(
    stream: S,
    config: Option<WebSocketConfig>,
) -> Result<WebSocket<S>> {
    accept_hdr_with_config(stream, NoCallback, &[], config)
}

/// Accept the given Stream as a WebSocket.
///
/// This function does the same as [`accept`] but accepts an extra callback
/// for header processing. The callback receives the parsed upgrade request,
/// which permits origin or cookie based gatekeeping, and may amend or reject
/// the response.
pub fn accept_hdr<S: Read + Write, C: Callback>(stream: S, callback: C) -> Result<WebSocket<S>> {
    accept_hdr_with_config(stream, callback, &[], None)
}

/// Like [`accept_hdr`], additionally negotiating a subprotocol out of
/// `protocols` and applying a custom configuration.
pub fn accept_hdr_with_config<S: Read + Write, C: Callback>(
    stream: S,
    callback: C,
    protocols: &[&str],
    config: Option<WebSocketConfig>,
) -> Result<WebSocket<S>> {
    perform_handshake(stream, callback, protocols, config)
}

/// Configuration for a [`Server`].
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ServerConfig {
    /// Read timeout applied to every accepted connection. This bounds idle
    /// reads as well as the half-closed wait of the closing handshake (a
    /// timed-out connection surfaces close code 1006). Defaults to 180
    /// seconds; `None` waits forever.
    pub read_timeout: Option<Duration>,
    /// Subprotocols this server is willing to speak. A client request for
    /// any other subprotocol is answered with 400.
    pub protocols: Vec<String>,
    /// Per-connection WebSocket configuration: buffer sizes, size limits and
    /// the outbound fragmentation hint.
    pub websocket: WebSocketConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            read_timeout: Some(Duration::from_secs(180)),
            protocols: Vec::new(),
            websocket: WebSocketConfig::default(),
        }
    }
}

/// Handler for requests that are not WebSocket upgrades. Receives the parsed
/// request and the raw stream. Any request body bytes that were buffered
/// while reading the head are not replayed; this is meant for body-less
/// requests such as health checks and redirects.
pub type HttpFallback = Arc<dyn Fn(Request, TcpStream) + Send + Sync>;

/// A blocking WebSocket server.
///
/// Owns the accept socket; [`Server::serve`] runs the accept loop, spawning
/// one thread per connection. Handler errors are published on the
/// diagnostics channel and never tear the loop down; the loop exits when a
/// [`StopHandle`] fires.
pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
    fallback: Option<HttpFallback>,
    running: Arc<AtomicBool>,
    diagnostics_tx: SyncSender<Error>,
    diagnostics_rx: Option<Receiver<Error>>,
}

impl Server {
    /// Bind a server to the given address with the default configuration.
    pub fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        Self::bind_with_config(addr, ServerConfig::default())
    }

    /// Bind a server to the given address.
    pub fn bind_with_config(addr: impl ToSocketAddrs, config: ServerConfig) -> Result<Self> {
        config.websocket.assert_valid();
        let listener = TcpListener::bind(addr)?;
        let (diagnostics_tx, diagnostics_rx) = sync_channel(DIAGNOSTICS_BOUND);
        Ok(Server {
            listener,
            config,
            fallback: None,
            running: Arc::new(AtomicBool::new(true)),
            diagnostics_tx,
            diagnostics_rx: Some(diagnostics_rx),
        })
    }

    /// The address the server is listening on.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Delegate requests that are not WebSocket upgrades (per
    /// [`is_upgrade_request`]) to a plain HTTP handler instead of rejecting
    /// them with 400.
    pub fn set_fallback(&mut self, fallback: impl Fn(Request, TcpStream) + Send + Sync + 'static) {
        self.fallback = Some(Arc::new(fallback));
    }

    /// Take the receiving end of the diagnostics channel.
    ///
    /// Errors from connection handlers are duplicated here for observation;
    /// whether to log, count or ignore them is the caller's policy. When
    /// nobody listens or the channel is full they are only logged.
    pub fn diagnostics(&mut self) -> Option<Receiver<Error>> {
        self.diagnostics_rx.take()
    }

    /// A handle that stops the running server from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle { running: self.running.clone(), addr: self.listener.local_addr().ok() }
    }

    /// Run the accept loop, upgrading every connection and invoking
    /// `handler` with the open socket. When the handler exits, by any path,
    /// the closing handshake is initiated and driven before the connection
    /// is dropped.
    ///
    /// Blocks until [`StopHandle::stop`] is called.
    pub fn serve<H>(self, handler: H) -> Result<()>
    where
        H: Fn(&mut WebSocket<TcpStream>) -> Result<()> + Send + Sync + 'static,
    {
        self.serve_hdr(move |_request: &Request, ws: &mut WebSocket<TcpStream>| handler(ws))
    }

    /// Like [`Self::serve`], additionally passing the upgrade request to the
    /// handler, which permits origin or cookie based gatekeeping inside the
    /// message handler itself.
    pub fn serve_hdr<H>(self, handler: H) -> Result<()>
    where
        H: Fn(&Request, &mut WebSocket<TcpStream>) -> Result<()> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        info!("Listening on {:?}", self.listener.local_addr());
        for stream in self.listener.incoming() {
            if !self.running.load(Ordering::SeqCst) {
                debug!("Server stop requested");
                break;
            }
            let stream = match stream {
                Ok(stream) => stream,
                Err(err) => {
                    warn!("Error accepting stream: {err}");
                    continue;
                }
            };
            let handler = handler.clone();
            let config = self.config.clone();
            let fallback = self.fallback.clone();
            let diagnostics = self.diagnostics_tx.clone();
            thread::spawn(move || {
                match handle_connection(stream, &config, fallback, &*handler) {
                    // A connection running to its normal end is not a fault.
                    Ok(()) | Err(Error::ConnectionClosed) => {}
                    Err(err) => report(&diagnostics, err),
                }
            });
        }
        Ok(())
    }
}

/// Stops a running [`Server`].
///
/// Flips the stop flag and wakes the blocked accept with a loopback
/// connection, the blocking-I/O equivalent of closing the accept socket on
/// a control-channel signal.
#[derive(Debug, Clone)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
    addr: Option<SocketAddr>,
}

impl StopHandle {
    /// Stop the server. The accept loop exits on its next wakeup.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(addr) = self.addr {
            let _ = TcpStream::connect(addr);
        }
    }
}

fn handle_connection<H>(
    mut stream: TcpStream,
    config: &ServerConfig,
    fallback: Option<HttpFallback>,
    handler: &H,
) -> Result<()>
where
    H: Fn(&Request, &mut WebSocket<TcpStream>) -> Result<()>,
{
    stream.set_read_timeout(config.read_timeout)?;

    let (request, tail) = read_request(&mut stream)?;

    if let Some(fallback) = fallback {
        if !is_upgrade_request(&request) {
            debug!("Delegating non-upgrade request to the HTTP handler");
            fallback(request, stream);
            return Ok(());
        }
    }

    if !tail.is_empty() {
        // The client may not send frames before our 101 went out.
        return Err(Error::Handshake(HandshakeError::JunkAfterRequest));
    }

    let protocols: Vec<&str> = config.protocols.iter().map(String::as_str).collect();
    let mut websocket =
        accept_parsed(&request, stream, NoCallback, &protocols, Some(config.websocket))?;
    let result = handler(&request, &mut websocket);
    let close_result = websocket.close_and_drain();
    result.and(close_result)
}

fn report(diagnostics: &SyncSender<Error>, err: Error) {
    warn!("Error in connection handler: {err}");
    if let Err(err) = diagnostics.try_send(err) {
        debug!("Diagnostics channel unavailable: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.read_timeout, Some(Duration::from_secs(180)));
        assert!(config.protocols.is_empty());
        assert!(config.websocket.fragment_size.is_none());
    }

    #[test]
    fn stop_handle_unblocks_accept() {
        let server = Server::bind("127.0.0.1:0").unwrap();
        let stop = server.stop_handle();
        let join =
            std::thread::spawn(move || server.serve(|_ws: &mut WebSocket<TcpStream>| Ok(())));
        stop.stop();
        join.join().unwrap().unwrap();
    }
}

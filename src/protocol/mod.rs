//! The per-connection protocol engine.
//!
//! The engine is split in two: [`Connection`] is the pure state machine —
//! it consumes decoded frames and produces frames to send, but never touches
//! the transport — and [`WebSocket`] is the blocking shell that pairs one
//! machine with one stream. The [`Session`](crate::session::Session) handle
//! drives the same machine from behind locks instead.

pub mod frame;

mod message;

pub use self::{frame::CloseFrame, message::Message};

use self::{
    frame::{
        coding::{CloseCode, Control, Data, OpCode},
        write_frame, Frame, FrameReader, Utf8Bytes,
    },
    message::Assembler,
};
use crate::error::{Error, ProtocolError, Result};
use bytes::{Bytes, BytesMut};
use log::*;
use std::{
    collections::VecDeque,
    io::{Read, Write},
};

/// Indicates a Client or Server role of the websocket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// This socket is a server
    Server,
    /// This socket is a client
    Client,
}

/// The configuration for WebSocket connection.
///
/// # Example
/// ```
/// # use wscore::protocol::WebSocketConfig;
/// let conf = WebSocketConfig::default()
///     .read_buffer_size(256 * 1024)
///     .max_message_size(Some(1 << 20));
/// ```
#[derive(Debug, Clone, Copy)]
#[non_exhaustive]
pub struct WebSocketConfig {
    /// Initial capacity of the inbound frame buffer. The buffer grows as
    /// larger frames demand it; a bigger starting size trades memory for
    /// fewer reallocations under read load. The default value is 128 KiB.
    pub read_buffer_size: usize,
    /// The maximum size of an incoming message. `None` means no size limit.
    /// The default value is 64 MiB.
    pub max_message_size: Option<usize>,
    /// The maximum size of a single incoming message frame. `None` means no
    /// size limit. The limit is for frame payload NOT including the frame
    /// header. The default value is 16 MiB.
    pub max_frame_size: Option<usize>,
    /// Outgoing data messages larger than this are split into a fragmented
    /// message of frames carrying at most this many payload bytes each.
    /// `None` (the default) sends every message as a single frame.
    pub fragment_size: Option<usize>,
    /// When set to `true`, the server will accept and handle unmasked frames
    /// from the client. According to the RFC 6455, the server must close the
    /// connection to the client in such cases, however it seems like there
    /// are some popular libraries that are sending unmasked frames, ignoring
    /// the RFC. By default this option is set to `false`, i.e. according to
    /// RFC 6455.
    pub accept_unmasked_frames: bool,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 128 * 1024,
            max_message_size: Some(64 << 20),
            max_frame_size: Some(16 << 20),
            fragment_size: None,
            accept_unmasked_frames: false,
        }
    }
}

impl WebSocketConfig {
    /// Set [`Self::read_buffer_size`].
    pub fn read_buffer_size(mut self, read_buffer_size: usize) -> Self {
        self.read_buffer_size = read_buffer_size;
        self
    }

    /// Set [`Self::max_message_size`].
    pub fn max_message_size(mut self, max_message_size: Option<usize>) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    /// Set [`Self::max_frame_size`].
    pub fn max_frame_size(mut self, max_frame_size: Option<usize>) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Set [`Self::fragment_size`].
    pub fn fragment_size(mut self, fragment_size: Option<usize>) -> Self {
        self.fragment_size = fragment_size;
        self
    }

    /// Set [`Self::accept_unmasked_frames`].
    pub fn accept_unmasked_frames(mut self, accept_unmasked_frames: bool) -> Self {
        self.accept_unmasked_frames = accept_unmasked_frames;
        self
    }

    /// Panic if values are invalid.
    pub(crate) fn assert_valid(&self) {
        if let Some(fragment_size) = self.fragment_size {
            assert!(fragment_size > 0, "WebSocketConfig::fragment_size must be non-zero");
        }
    }
}

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnState {
    /// Data flows in both directions.
    Open,
    /// We sent the first CLOSE and keep reading until the peer answers.
    ClosingSent,
    /// The peer sent the first CLOSE; our echo is queued or already out.
    ClosingReceived,
    /// Both CLOSE frames are accounted for; waiting for transport teardown.
    Finished,
    /// Torn down and reported; any further call is a caller error.
    Closed,
}

impl ConnState {
    /// New application data may go out only while fully open.
    pub(crate) fn may_send_data(self) -> bool {
        matches!(self, ConnState::Open)
    }

    /// Frames are expected from the peer until it has sent its CLOSE: that
    /// covers the open state and the tail of data racing our own CLOSE.
    pub(crate) fn may_recv(self) -> bool {
        matches!(self, ConnState::Open | ConnState::ClosingSent)
    }
}

/// What the machine wants the caller to do with one inbound frame.
#[derive(Debug)]
pub(crate) enum Inbound {
    /// Frame fully consumed, e.g. a buffered fragment; read on.
    Nothing,
    /// A message to surface (data, or a ping/pong notification).
    Message(Message),
    /// The peer's CLOSE; the closing handshake advanced.
    Close(Option<CloseFrame>),
}

/// The connection state machine.
///
/// Pure with respect to I/O: inbound frames go into [`Self::on_frame`],
/// outbound frames come back out of [`Self::outbound`], [`Self::start_close`]
/// and the reply queue. Whoever drives the machine owns the transport and is
/// responsible for draining [`Self::take_reply`] before surfacing anything
/// to the application, which is what gives PONG replies priority over data.
#[derive(Debug)]
pub(crate) struct Connection {
    role: Role,
    state: ConnState,
    assembler: Assembler,
    /// Control frames owed to the peer (pong replies, the close echo).
    replies: VecDeque<Frame>,
    close_code: Option<CloseCode>,
    close_reason: Option<Utf8Bytes>,
    config: WebSocketConfig,
}

impl Connection {
    /// A machine for a freshly opened connection.
    ///
    /// # Panics
    /// Panics if the config is invalid, e.g. a zero `fragment_size`.
    pub(crate) fn new(role: Role, config: Option<WebSocketConfig>) -> Self {
        let config = config.unwrap_or_default();
        config.assert_valid();
        Connection {
            role,
            state: ConnState::Open,
            assembler: Assembler::default(),
            replies: VecDeque::new(),
            close_code: None,
            close_reason: None,
            config,
        }
    }

    pub(crate) fn role(&self) -> Role {
        self.role
    }

    pub(crate) fn config(&self) -> &WebSocketConfig {
        &self.config
    }

    pub(crate) fn update_config(&mut self, set_func: impl FnOnce(&mut WebSocketConfig)) {
        set_func(&mut self.config);
        self.config.assert_valid();
    }

    pub(crate) fn may_send_data(&self) -> bool {
        self.state.may_send_data()
    }

    pub(crate) fn may_recv(&self) -> bool {
        self.state.may_recv()
    }

    /// The close code recorded once the connection started closing.
    pub(crate) fn close_code(&self) -> Option<CloseCode> {
        self.close_code
    }

    /// The close reason recorded once the connection started closing.
    pub(crate) fn close_reason(&self) -> Option<Utf8Bytes> {
        self.close_reason.clone()
    }

    /// The next queued control reply, if any. Drain these onto the wire
    /// before surfacing messages or reading further frames.
    pub(crate) fn take_reply(&mut self) -> Option<Frame> {
        self.replies.pop_front()
    }

    /// Gate for the reading side. An error here means reading is over:
    /// either the connection closed in an orderly manner (reported exactly
    /// once) or the caller keeps using a dead handle.
    pub(crate) fn check_readable(&mut self) -> Result<()> {
        match self.state {
            ConnState::Closed => Err(Error::AlreadyClosed),
            ConnState::ClosingReceived | ConnState::Finished if self.role == Role::Server => {
                // The server side drops the TCP connection first, so it is
                // the server that carries the TIME_WAIT state, not the
                // client. (RFC 6455)
                self.state = ConnState::Closed;
                Err(Error::ConnectionClosed)
            }
            // The client keeps reading until the server actually hangs up.
            _ => Ok(()),
        }
    }

    /// Feed one decoded inbound frame through the machine.
    pub(crate) fn on_frame(&mut self, frame: Frame) -> Result<Inbound> {
        if !self.state.may_recv() {
            return Err(Error::Protocol(ProtocolError::ReceivedAfterClosing));
        }

        let (is_final, opcode) = {
            let header = frame.header();
            // Nonzero RSV bits require a negotiated extension, and none are.
            if header.rsv1 || header.rsv2 || header.rsv3 {
                return Err(Error::Protocol(ProtocolError::NonZeroReservedBits));
            }
            (header.is_final, header.opcode)
        };

        // Masking runs in one direction only: client to server.
        match self.role {
            Role::Server if !frame.is_masked() && !self.config.accept_unmasked_frames => {
                return Err(Error::Protocol(ProtocolError::UnmaskedFrameFromClient));
            }
            Role::Client if frame.is_masked() => {
                return Err(Error::Protocol(ProtocolError::MaskedFrameFromServer));
            }
            _ => {}
        }

        match opcode {
            OpCode::Control(op) => self.on_control(op, is_final, frame),
            OpCode::Data(op) => {
                let message = self.assembler.push(
                    op,
                    is_final,
                    frame.into_payload(),
                    self.config.max_message_size,
                )?;
                Ok(message.map(Inbound::Message).unwrap_or(Inbound::Nothing))
            }
        }
    }

    fn on_control(&mut self, op: Control, is_final: bool, frame: Frame) -> Result<Inbound> {
        // Control frames squeeze between the fragments of a message but
        // never fragment themselves, and never carry more than 125 bytes.
        if !is_final {
            return Err(Error::Protocol(ProtocolError::FragmentedControlFrame));
        }
        if frame.payload().len() > 125 {
            return Err(Error::Protocol(ProtocolError::ControlFrameTooBig));
        }

        match op {
            Control::Ping => {
                let data = frame.into_payload();
                // The reply outruns any later data frame: drivers drain the
                // reply queue before surfacing the next message. Pings keep
                // being answered while our own CLOSE waits for its reply.
                self.replies.push_back(Frame::pong(data.clone()));
                Ok(Inbound::Message(Message::Ping(data)))
            }
            Control::Pong => Ok(Inbound::Message(Message::Pong(frame.into_payload()))),
            Control::Close => self.on_close(frame.into_close()?),
            Control::Reserved(code) => {
                Err(Error::Protocol(ProtocolError::UnknownControlFrameType(code)))
            }
        }
    }

    fn on_close(&mut self, close: Option<CloseFrame>) -> Result<Inbound> {
        debug!("Close received in state {:?}: {close:?}", self.state);
        match self.state {
            ConnState::Open => {
                // The peer spoke first. An out-of-range code is answered
                // with a protocol-error close instead of an echo.
                let close = close.map(|frame| {
                    if frame.code.is_allowed() {
                        frame
                    } else {
                        CloseFrame {
                            code: CloseCode::Protocol,
                            reason: Utf8Bytes::from_static("Protocol violation"),
                        }
                    }
                });
                self.record_close(close.as_ref());
                self.replies.push_back(Frame::close(close.clone()));
                self.state = ConnState::ClosingReceived;
                Ok(Inbound::Close(close))
            }
            ConnState::ClosingSent => {
                // The reply to our CLOSE; the handshake is complete.
                self.record_close(close.as_ref());
                self.state = ConnState::Finished;
                Ok(Inbound::Close(close))
            }
            // `may_recv` keeps close frames out of the remaining states.
            state => unreachable!("close dispatched in state {state:?}"),
        }
    }

    /// Begin the closing handshake. Returns the CLOSE frame to send on the
    /// first call and `None` on every later one, which makes closing
    /// idempotent for the caller.
    pub(crate) fn start_close(&mut self, close: Option<CloseFrame>) -> Option<Frame> {
        if self.state != ConnState::Open {
            return None;
        }
        // 1005, 1006 and 1015 exist only as synthetic local codes and must
        // never be sent; offering one of them means a normal closure.
        let close = close.map(|mut frame| {
            if matches!(frame.code, CloseCode::Status | CloseCode::Abnormal | CloseCode::Tls) {
                frame.code = CloseCode::Normal;
            }
            frame
        });
        self.record_close(close.as_ref());
        self.state = ConnState::ClosingSent;
        Some(Frame::close(close))
    }

    /// Turn an outgoing message into the frames that represent it, applying
    /// the fragmentation hint and the post-close and control-size rules.
    /// Close messages do not come through here; they go via
    /// [`Self::start_close`].
    pub(crate) fn outbound(&mut self, message: Message) -> Result<Vec<Frame>> {
        if self.state == ConnState::Closed {
            return Err(Error::AlreadyClosed);
        }
        if !self.state.may_send_data() {
            return Err(Error::Protocol(ProtocolError::SendAfterClosing));
        }

        match message {
            Message::Text(data) => Ok(self.fragment(data.into(), Data::Text)),
            Message::Binary(data) => Ok(self.fragment(data, Data::Binary)),
            Message::Ping(data) => {
                check_control_size(&data)?;
                Ok(vec![Frame::ping(data)])
            }
            Message::Pong(data) => {
                check_control_size(&data)?;
                Ok(vec![Frame::pong(data)])
            }
            Message::Frame(frame) => Ok(vec![frame]),
            Message::Close(_) => unreachable!("close messages go through start_close"),
        }
    }

    /// Split a payload at the fragmentation hint: the data opcode leads,
    /// continuations follow, FIN rides on the last frame only.
    fn fragment(&self, data: Bytes, kind: Data) -> Vec<Frame> {
        let chunk = match self.config.fragment_size {
            Some(chunk) if data.len() > chunk => chunk,
            _ => return vec![Frame::message(data, OpCode::Data(kind), true)],
        };

        let mut frames = Vec::with_capacity((data.len() + chunk - 1) / chunk);
        let mut offset = 0;
        while offset < data.len() {
            let end = data.len().min(offset + chunk);
            let opcode =
                if offset == 0 { OpCode::Data(kind) } else { OpCode::Data(Data::Continue) };
            frames.push(Frame::message(data.slice(offset..end), opcode, end == data.len()));
            offset = end;
        }
        frames
    }

    /// The stream ended. Tells the caller what that means in the current
    /// state and leaves the machine closed.
    pub(crate) fn on_eof(&mut self) -> Error {
        let state = self.state;
        self.state = ConnState::Closed;
        match state {
            // Expected: the transport goes away after the close handshake.
            ConnState::ClosingReceived | ConnState::Finished => Error::ConnectionClosed,
            _ => {
                self.close_code.get_or_insert(CloseCode::Abnormal);
                Error::Protocol(ProtocolError::ResetWithoutClosingHandshake)
            }
        }
    }

    /// A local failure: poison the machine and, if the handshake never
    /// started, hand back the closing frame announcing `code`.
    pub(crate) fn abort(&mut self, code: CloseCode) -> Option<Frame> {
        let announce = self.state.may_send_data();
        self.state = ConnState::Closed;
        self.close_code.get_or_insert(code);
        announce.then(|| Frame::close(Some(CloseFrame { code, reason: <_>::default() })))
    }

    /// The transport died under us; record the synthetic abnormal-closure
    /// code.
    pub(crate) fn fault(&mut self) {
        self.state = ConnState::Closed;
        self.close_code.get_or_insert(CloseCode::Abnormal);
    }

    fn record_close(&mut self, close: Option<&CloseFrame>) {
        match close {
            Some(frame) => {
                self.close_code = Some(frame.code);
                self.close_reason = Some(frame.reason.clone());
            }
            // An empty close payload carries no status code. (1005)
            None => {
                self.close_code.get_or_insert(CloseCode::Status);
            }
        }
    }
}

fn check_control_size(data: &Bytes) -> Result<()> {
    if data.len() > 125 {
        return Err(Error::Protocol(ProtocolError::ControlFrameTooBig));
    }
    Ok(())
}

/// WebSocket input-output stream.
///
/// This is THE structure you want to create to be able to speak the
/// WebSocket protocol. It may be created by calling `connect`, `accept` or
/// `from_raw_socket` functions.
///
/// Use [`WebSocket::read`], [`WebSocket::send`] to receive and send messages.
#[derive(Debug)]
pub struct WebSocket<Stream> {
    /// The underlying socket.
    stream: Stream,
    /// Decoder for the inbound byte stream.
    frames: FrameReader,
    /// The connection state machine.
    conn: Connection,
}

impl<Stream> WebSocket<Stream> {
    /// Convert a raw socket into a WebSocket without performing a handshake.
    ///
    /// Call this function if you're using this crate as a part of a web
    /// framework or together with an existing one. If you need an initial
    /// handshake, use `connect()` or `accept()` functions of the crate to
    /// construct a websocket.
    ///
    /// # Panics
    /// Panics if the config is invalid, e.g. a zero `fragment_size`.
    pub fn from_raw_socket(stream: Stream, role: Role, config: Option<WebSocketConfig>) -> Self {
        let conn = Connection::new(role, config);
        let frames = FrameReader::new(conn.config().read_buffer_size);
        WebSocket { stream, frames, conn }
    }

    /// Convert a raw socket into a WebSocket without performing a handshake,
    /// with bytes that were already read off the stream.
    ///
    /// # Panics
    /// Panics if the config is invalid, e.g. a zero `fragment_size`.
    pub fn from_partially_read(
        stream: Stream,
        part: Vec<u8>,
        role: Role,
        config: Option<WebSocketConfig>,
    ) -> Self {
        let conn = Connection::new(role, config);
        let frames = FrameReader::resume(part, conn.config().read_buffer_size);
        WebSocket { stream, frames, conn }
    }

    /// Returns a shared reference to the inner stream.
    pub fn get_ref(&self) -> &Stream {
        &self.stream
    }
    /// Returns a mutable reference to the inner stream.
    pub fn get_mut(&mut self) -> &mut Stream {
        &mut self.stream
    }

    /// Change the configuration.
    ///
    /// # Panics
    /// Panics if the config is invalid, e.g. a zero `fragment_size`.
    pub fn set_config(&mut self, set_func: impl FnOnce(&mut WebSocketConfig)) {
        self.conn.update_config(set_func);
    }

    /// Read the configuration.
    pub fn get_config(&self) -> &WebSocketConfig {
        self.conn.config()
    }

    /// The role this endpoint plays.
    pub fn role(&self) -> Role {
        self.conn.role()
    }

    /// Check if it is possible to read messages.
    ///
    /// Reading is impossible after receiving `Message::Close`. It is still
    /// possible after sending close frame since the peer still may send some
    /// data before confirming close.
    pub fn can_read(&self) -> bool {
        self.conn.may_recv()
    }

    /// Check if it is possible to write messages.
    ///
    /// Writing gets impossible immediately after sending or receiving
    /// `Message::Close`.
    pub fn can_write(&self) -> bool {
        self.conn.may_send_data()
    }

    /// Decompose into the stream, role, configuration and any input bytes
    /// read off the stream but not parsed yet.
    pub(crate) fn into_parts(self) -> (Stream, Role, WebSocketConfig, BytesMut) {
        let WebSocket { stream, frames, conn } = self;
        (stream, conn.role(), *conn.config(), frames.into_leftover())
    }
}

impl<Stream: Read + Write> WebSocket<Stream> {
    /// Read a message from the stream, if possible.
    ///
    /// Pong replies to pings, and the echo answering the peer's close, are
    /// written out by this call before the triggering message is returned.
    ///
    /// # Closing the connection
    /// When the remote endpoint decides to close the connection this will
    /// return the close message with an optional close frame. Keep calling
    /// [`read`](Self::read) to drive the closing handshake until
    /// [`Error::ConnectionClosed`] is returned; then it is safe to drop the
    /// underlying connection.
    pub fn read(&mut self) -> Result<Message> {
        match self.read_inner() {
            Err(err) => Err(self.local_failure(err)),
            ok => ok,
        }
    }

    fn read_inner(&mut self) -> Result<Message> {
        loop {
            self.conn.check_readable()?;

            let max_frame_size = self.conn.config().max_frame_size;
            let Some(frame) = self.frames.next_frame(&mut self.stream, max_frame_size)? else {
                return Err(self.conn.on_eof());
            };

            let inbound = self.conn.on_frame(frame)?;
            match inbound {
                Inbound::Nothing => continue,
                Inbound::Message(message) => {
                    self.flush_replies()?;
                    trace!("Received message {message}");
                    return Ok(message);
                }
                Inbound::Close(close) => {
                    self.flush_replies()?;
                    return Ok(Message::Close(close));
                }
            }
        }
    }

    /// Writes and immediately flushes a message.
    /// Equivalent to calling [`write`](Self::write) then [`flush`](Self::flush).
    pub fn send(&mut self, message: Message) -> Result<()> {
        self.write(message)?;
        self.flush()
    }

    /// Write a message to the stream.
    ///
    /// All frames of the message are written through before this returns;
    /// call [`flush`](Self::flush) (or use [`send`](Self::send)) to push
    /// them past any transport buffering. Fails with
    /// [`ProtocolError::SendAfterClosing`] once the connection left the open
    /// state.
    pub fn write(&mut self, message: Message) -> Result<()> {
        let message = match message {
            Message::Close(close) => return self.close(close),
            message => message,
        };

        // Keep pending pongs timely even on a write-only connection.
        self.flush_replies()?;

        for frame in self.conn.outbound(message)? {
            write_frame(&mut self.stream, frame, self.conn.role())?;
        }
        Ok(())
    }

    /// Flush writes.
    ///
    /// Drains queued control replies and flushes the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        self.flush_replies()?;
        Ok(self.stream.flush()?)
    }

    /// Close the connection.
    ///
    /// Only the first call emits a CLOSE frame; closing is idempotent.
    /// Afterwards, keep calling [`read`](Self::read) to drive the handshake
    /// until [`Error::ConnectionClosed`] is returned.
    pub fn close(&mut self, close: Option<CloseFrame>) -> Result<()> {
        self.flush_replies()?;
        if let Some(frame) = self.conn.start_close(close) {
            write_frame(&mut self.stream, frame, self.conn.role())?;
        }
        Ok(self.stream.flush()?)
    }

    /// Initiate the closing handshake (when still open) and drive it to
    /// completion, discarding any late messages from the peer.
    ///
    /// Returns once the connection is fully closed. Used by the handler
    /// entry points so that a handler exiting by any path still leaves the
    /// connection with a proper closing handshake behind it.
    pub fn close_and_drain(&mut self) -> Result<()> {
        self.close(None)?;
        loop {
            match self.read() {
                Ok(_) => continue,
                Err(Error::ConnectionClosed) | Err(Error::AlreadyClosed) => return Ok(()),
                Err(err) => return Err(err),
            }
        }
    }

    /// Write out whatever control replies the machine owes the peer.
    fn flush_replies(&mut self) -> Result<()> {
        while let Some(frame) = self.conn.take_reply() {
            write_frame(&mut self.stream, frame, self.conn.role())?;
        }
        Ok(())
    }

    /// Answer an inbound violation with the close frame the error calls for
    /// (1002 protocol, 1007 bad UTF-8, 1009 too big), best effort.
    fn local_failure(&mut self, err: Error) -> Error {
        let code = match &err {
            Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => None,
            Error::Protocol(_) => Some(CloseCode::Protocol),
            Error::Utf8 => Some(CloseCode::Invalid),
            Error::Capacity(_) => Some(CloseCode::Size),
            Error::Io(_) => {
                self.conn.fault();
                None
            }
            _ => None,
        };
        if let Some(code) = code {
            if let Some(frame) = self.conn.abort(code) {
                if let Err(write_err) = write_frame(&mut self.stream, frame, self.conn.role()) {
                    debug!("Could not send the failure close frame: {write_err}");
                }
            }
        }
        err
    }
}

#[cfg(test)]
mod tests {
    use super::{
        frame::{
            coding::{CloseCode, Data, OpCode},
            Frame, FrameReader,
        },
        Message, Role, WebSocket, WebSocketConfig,
    };
    use crate::error::{CapacityError, Error, ProtocolError};

    use std::{io, io::Cursor};

    struct WriteMoc<Stream>(Stream);

    impl<Stream> io::Write for WriteMoc<Stream> {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<Stream: io::Read> io::Read for WriteMoc<Stream> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.0.read(buf)
        }
    }

    /// Read and write halves for capturing everything the socket sends.
    struct CaptureMoc {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl CaptureMoc {
        fn new(input: Vec<u8>) -> Self {
            Self { input: Cursor::new(input), output: Vec::new() }
        }
    }

    impl io::Read for CaptureMoc {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl io::Write for CaptureMoc {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.write(buf)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn decode_frames(raw: Vec<u8>) -> Vec<Frame> {
        let mut reader = FrameReader::new(4096);
        let mut cursor = Cursor::new(raw);
        let mut frames = Vec::new();
        while let Some(frame) = reader.next_frame(&mut cursor, None).unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn receive_messages() {
        let incoming = Cursor::new(vec![
            0x89, 0x02, 0x01, 0x02, 0x8a, 0x01, 0x03, 0x01, 0x07, 0x48, 0x65, 0x6c, 0x6c, 0x6f,
            0x2c, 0x20, 0x80, 0x06, 0x57, 0x6f, 0x72, 0x6c, 0x64, 0x21, 0x82, 0x03, 0x01, 0x02,
            0x03,
        ]);
        let mut socket = WebSocket::from_raw_socket(WriteMoc(incoming), Role::Client, None);
        assert_eq!(socket.read().unwrap(), Message::Ping(vec![1, 2].into()));
        assert_eq!(socket.read().unwrap(), Message::Pong(vec![3].into()));
        assert_eq!(socket.read().unwrap(), Message::Text("Hello, World!".into()));
        assert_eq!(socket.read().unwrap(), Message::Binary(vec![0x01, 0x02, 0x03].into()));
    }

    #[test]
    fn receive_ping_amid_fragmented_message() {
        // TEXT(fin=0) "Hel", PING "p", CONTINUATION(fin=1) "lo".
        let incoming = Cursor::new(vec![
            0x01, 0x03, 0x48, 0x65, 0x6c, 0x89, 0x01, 0x70, 0x80, 0x02, 0x6c, 0x6f,
        ]);
        let mut socket = WebSocket::from_raw_socket(WriteMoc(incoming), Role::Client, None);
        // The ping surfaces first; reassembly is not disturbed by it.
        assert_eq!(socket.read().unwrap(), Message::Ping(vec![0x70].into()));
        assert_eq!(socket.read().unwrap(), Message::Text("Hello".into()));
    }

    #[test]
    fn size_limiting_text_fragmented() {
        let incoming = Cursor::new(vec![
            0x01, 0x07, 0x48, 0x65, 0x6c, 0x6c, 0x6f, 0x2c, 0x20, 0x80, 0x06, 0x57, 0x6f, 0x72,
            0x6c, 0x64, 0x21,
        ]);
        let limit = WebSocketConfig { max_message_size: Some(10), ..WebSocketConfig::default() };
        let mut socket = WebSocket::from_raw_socket(WriteMoc(incoming), Role::Client, Some(limit));

        assert!(matches!(
            socket.read(),
            Err(Error::Capacity(CapacityError::MessageTooLong { size: 13, max_size: 10 }))
        ));
    }

    #[test]
    fn size_limiting_binary() {
        let incoming = Cursor::new(vec![0x82, 0x03, 0x01, 0x02, 0x03]);
        let limit = WebSocketConfig { max_message_size: Some(2), ..WebSocketConfig::default() };
        let mut socket = WebSocket::from_raw_socket(WriteMoc(incoming), Role::Client, Some(limit));

        assert!(matches!(
            socket.read(),
            Err(Error::Capacity(CapacityError::MessageTooLong { size: 3, max_size: 2 }))
        ));
    }

    #[test]
    fn nonzero_reserved_bits() {
        let incoming = Cursor::new(vec![0xc1, 0x01, 0x61]);
        let mut socket = WebSocket::from_raw_socket(WriteMoc(incoming), Role::Client, None);
        assert!(matches!(
            socket.read(),
            Err(Error::Protocol(ProtocolError::NonZeroReservedBits))
        ));
    }

    #[test]
    fn unmasked_frame_from_client_is_rejected() {
        let incoming = Cursor::new(vec![0x81, 0x02, 0x68, 0x69]);
        let mut socket = WebSocket::from_raw_socket(WriteMoc(incoming), Role::Server, None);
        assert!(matches!(
            socket.read(),
            Err(Error::Protocol(ProtocolError::UnmaskedFrameFromClient))
        ));
    }

    #[test]
    fn unmasked_frames_accepted_when_configured() {
        let incoming = Cursor::new(vec![0x81, 0x02, 0x68, 0x69]);
        let config = WebSocketConfig::default().accept_unmasked_frames(true);
        let mut socket =
            WebSocket::from_raw_socket(WriteMoc(incoming), Role::Server, Some(config));
        assert_eq!(socket.read().unwrap(), Message::text("hi"));
    }

    #[test]
    fn masked_frame_from_server_is_rejected() {
        let incoming = Cursor::new(vec![
            0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58,
        ]);
        let mut socket = WebSocket::from_raw_socket(WriteMoc(incoming), Role::Client, None);
        assert!(matches!(
            socket.read(),
            Err(Error::Protocol(ProtocolError::MaskedFrameFromServer))
        ));
    }

    #[test]
    fn continue_frame_without_start() {
        let incoming = Cursor::new(vec![0x80, 0x02, 0x68, 0x69]);
        let mut socket = WebSocket::from_raw_socket(WriteMoc(incoming), Role::Client, None);
        assert!(matches!(
            socket.read(),
            Err(Error::Protocol(ProtocolError::UnexpectedContinueFrame))
        ));
    }

    #[test]
    fn data_frame_amid_fragmented_message() {
        let incoming = Cursor::new(vec![0x01, 0x02, 0x68, 0x69, 0x82, 0x01, 0x00]);
        let mut socket = WebSocket::from_raw_socket(WriteMoc(incoming), Role::Client, None);
        assert!(matches!(
            socket.read(),
            Err(Error::Protocol(ProtocolError::ExpectedFragment(Data::Binary)))
        ));
    }

    #[test]
    fn fragmented_control_frame() {
        // PING with the FIN bit clear.
        let incoming = Cursor::new(vec![0x09, 0x00]);
        let mut socket = WebSocket::from_raw_socket(WriteMoc(incoming), Role::Client, None);
        assert!(matches!(
            socket.read(),
            Err(Error::Protocol(ProtocolError::FragmentedControlFrame))
        ));
    }

    #[test]
    fn oversized_control_frame() {
        let mut raw = vec![0x89, 0x7e, 0x00, 0x7e];
        raw.extend(std::iter::repeat(0).take(126));
        let mut socket = WebSocket::from_raw_socket(WriteMoc(Cursor::new(raw)), Role::Client, None);
        assert!(matches!(
            socket.read(),
            Err(Error::Protocol(ProtocolError::ControlFrameTooBig))
        ));
    }

    #[test]
    fn reserved_opcode() {
        let incoming = Cursor::new(vec![0x83, 0x00]);
        let mut socket = WebSocket::from_raw_socket(WriteMoc(incoming), Role::Client, None);
        assert!(matches!(
            socket.read(),
            Err(Error::Protocol(ProtocolError::UnknownDataFrameType(3)))
        ));
    }

    #[test]
    fn abrupt_eof_is_not_a_close() {
        let incoming = Cursor::new(vec![]);
        let mut socket = WebSocket::from_raw_socket(WriteMoc(incoming), Role::Client, None);
        assert!(matches!(
            socket.read(),
            Err(Error::Protocol(ProtocolError::ResetWithoutClosingHandshake))
        ));
    }

    #[test]
    fn server_close_handshake() {
        // CLOSE with code 1000 and reason "bye", masked by the client.
        let incoming = vec![0x88, 0x85, 0x00, 0x00, 0x00, 0x00, 0x03, 0xe8, b'b', b'y', b'e'];
        let mut socket =
            WebSocket::from_raw_socket(CaptureMoc::new(incoming), Role::Server, None);

        let message = socket.read().unwrap();
        match message {
            Message::Close(Some(frame)) => {
                assert_eq!(frame.code, CloseCode::Normal);
                assert_eq!(frame.reason, "bye");
            }
            other => panic!("unexpected message: {other:?}"),
        }

        // The echo went out with the close, and the server side is the one
        // that tears the connection down.
        assert!(matches!(socket.read(), Err(Error::ConnectionClosed)));
        assert!(matches!(socket.read(), Err(Error::AlreadyClosed)));

        let frames = decode_frames(socket.get_mut().output.clone());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), &[0x03, 0xe8, b'b', b'y', b'e'][..]);
    }

    #[test]
    fn no_sending_after_closing() {
        let mut socket =
            WebSocket::from_raw_socket(CaptureMoc::new(Vec::new()), Role::Client, None);
        socket.close(None).unwrap();
        assert!(matches!(
            socket.send(Message::text("too late")),
            Err(Error::Protocol(ProtocolError::SendAfterClosing))
        ));
        // Close is idempotent though.
        socket.close(None).unwrap();

        let frames = decode_frames(socket.get_mut().output.clone());
        assert_eq!(frames.len(), 1, "only a single close frame may be sent");
    }

    #[test]
    fn disallowed_close_codes_are_substituted() {
        let mut socket =
            WebSocket::from_raw_socket(CaptureMoc::new(Vec::new()), Role::Server, None);
        socket
            .close(Some(crate::protocol::CloseFrame {
                code: CloseCode::Abnormal,
                reason: "".into(),
            }))
            .unwrap();

        let frames = decode_frames(socket.get_mut().output.clone());
        assert_eq!(frames[0].payload()[..2], [0x03, 0xe8]);
    }

    #[test]
    fn pings_still_answered_while_closing() {
        let incoming = vec![0x89, 0x01, 0x78]; // PING "x"
        let mut socket =
            WebSocket::from_raw_socket(CaptureMoc::new(incoming), Role::Client, None);
        socket.close(None).unwrap();

        // Our close is out, the peer has not answered yet; its pings still
        // get their pongs.
        assert_eq!(socket.read().unwrap(), Message::Ping(vec![0x78].into()));

        let frames = decode_frames(socket.get_mut().output.clone());
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].header().opcode, OpCode::Control(super::Control::Close));
        assert_eq!(frames[1].header().opcode, OpCode::Control(super::Control::Pong));
        assert_eq!(frames[1].payload(), &[0x78]);
    }

    #[test]
    fn close_sent_on_invalid_utf8() {
        // TEXT with a dangling lead byte.
        let mut socket =
            WebSocket::from_raw_socket(CaptureMoc::new(vec![0x81, 0x01, 0xc0]), Role::Server, None);
        // Unmasked frames are rejected first, so allow them for this test.
        socket.set_config(|config| config.accept_unmasked_frames = true);

        assert!(matches!(socket.read(), Err(Error::Utf8)));

        let frames = decode_frames(socket.get_mut().output.clone());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload()[..2], [0x03, 0xef]); // 1007
    }

    #[test]
    fn client_frames_are_masked() {
        let mut socket =
            WebSocket::from_raw_socket(CaptureMoc::new(Vec::new()), Role::Client, None);
        socket.send(Message::text("with mask")).unwrap();

        let raw = socket.get_mut().output.clone();
        assert_eq!(raw[1] & 0x80, 0x80, "mask bit must be set");
        // Decoding unmasks; the payload round-trips.
        let frames = decode_frames(raw);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), b"with mask");
    }

    #[test]
    fn server_frames_are_not_masked() {
        let mut socket =
            WebSocket::from_raw_socket(CaptureMoc::new(Vec::new()), Role::Server, None);
        socket.send(Message::text("no mask")).unwrap();

        let raw = socket.get_mut().output.clone();
        assert_eq!(raw[1] & 0x80, 0, "mask bit must not be set");
    }

    #[test]
    fn fragments_outgoing_messages() {
        let config = WebSocketConfig::default().fragment_size(Some(3));
        let mut socket =
            WebSocket::from_raw_socket(CaptureMoc::new(Vec::new()), Role::Server, Some(config));
        socket.send(Message::binary(&b"abcdefgh"[..])).unwrap();

        let frames = decode_frames(socket.get_mut().output.clone());
        // ceil(8 / 3) frames: BINARY(fin=0), CONTINUATION(fin=0), CONTINUATION(fin=1).
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].header().opcode, OpCode::Data(Data::Binary));
        assert!(!frames[0].header().is_final);
        assert_eq!(frames[1].header().opcode, OpCode::Data(Data::Continue));
        assert!(!frames[1].header().is_final);
        assert_eq!(frames[2].header().opcode, OpCode::Data(Data::Continue));
        assert!(frames[2].header().is_final);

        let mut reassembled = Vec::new();
        for frame in frames {
            reassembled.extend_from_slice(frame.payload());
        }
        assert_eq!(reassembled, b"abcdefgh");
    }

    #[test]
    fn short_messages_are_not_fragmented() {
        let config = WebSocketConfig::default().fragment_size(Some(1024));
        let mut socket =
            WebSocket::from_raw_socket(CaptureMoc::new(Vec::new()), Role::Server, Some(config));
        socket.send(Message::text("short")).unwrap();

        let frames = decode_frames(socket.get_mut().output.clone());
        assert_eq!(frames.len(), 1);
        assert!(frames[0].header().is_final);
    }
}

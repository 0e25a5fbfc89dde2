//! The shared per-connection session handle.
//!
//! A [`WebSocket`](crate::WebSocket) is a single-owner value: reading and
//! writing both take `&mut self`. A [`Session`] drives the same
//! [`Connection`] state machine from behind locks instead, so one reading
//! task and one writing task can work on the same connection concurrently:
//! the reader lock serializes `read_message`, the writer lock serializes
//! everything going out, and the machine itself sits in a mutex that is only
//! ever held for pure state transitions.
//!
//! Lock order is reader, then machine, then writer, everywhere in this
//! module; writer-side operations never take the reader lock.

use crate::{
    error::{Error, ProtocolError, Result},
    protocol::{
        frame::{coding::CloseCode, write_frame, CloseFrame, Frame, FrameReader, Utf8Bytes},
        Connection, Inbound, Message, Role, WebSocket, WebSocketConfig,
    },
    stream::MaybeTlsStream,
};
use bytes::Bytes;
use log::*;
use std::{
    io::{self, Read, Write},
    net::{Shutdown, TcpStream},
    sync::{Mutex, MutexGuard},
    time::Duration,
};

/// Re-split a duplex stream into independently owned read and write halves.
pub trait Split {
    /// The read half.
    type Reader: Read;
    /// The write half.
    type Writer: Write;
    /// Split the stream.
    fn split(self) -> io::Result<(Self::Reader, Self::Writer)>;
}

impl Split for TcpStream {
    type Reader = TcpStream;
    type Writer = TcpStream;

    fn split(self) -> io::Result<(TcpStream, TcpStream)> {
        let reader = self.try_clone()?;
        Ok((reader, self))
    }
}

/// Only the plain variant can be split; a TLS record layer cannot be driven
/// from two sides independently.
impl Split for MaybeTlsStream<TcpStream> {
    type Reader = TcpStream;
    type Writer = TcpStream;

    fn split(self) -> io::Result<(TcpStream, TcpStream)> {
        match self {
            MaybeTlsStream::Plain(stream) => stream.split(),
            #[cfg(feature = "tls")]
            MaybeTlsStream::NativeTls(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "TLS streams cannot be split",
            )),
        }
    }
}

/// The read half of a [`Session`] transport.
///
/// The provided defaults are no-ops for transports without deadline or
/// teardown support, e.g. in-memory pipes in tests.
pub trait SessionRead: Read {
    /// Bound the time the next blocking reads may take, where the transport
    /// supports it.
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        let _ = timeout;
        Ok(())
    }

    /// Tear the transport down; the peer observes a reset.
    fn force_close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SessionRead for TcpStream {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    fn force_close(&mut self) -> io::Result<()> {
        match TcpStream::shutdown(self, Shutdown::Both) {
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

/// A WebSocket connection usable from one reading and one writing task
/// concurrently.
#[derive(Debug)]
pub struct Session<R, W> {
    reader: Mutex<SessionReader<R>>,
    writer: Mutex<W>,
    conn: Mutex<Connection>,
}

/// State owned by the reading side: the stream half and its frame decoder.
#[derive(Debug)]
struct SessionReader<R> {
    stream: R,
    frames: FrameReader,
    max_frame_size: Option<usize>,
}

impl<S> WebSocket<S>
where
    S: Split,
    S::Reader: SessionRead,
    S::Writer: Write,
{
    /// Split a freshly opened socket into a [`Session`] usable from a
    /// reading and a writing task concurrently.
    pub fn into_session(self) -> Result<Session<S::Reader, S::Writer>> {
        let (stream, role, config, leftover) = self.into_parts();
        let (reader, writer) = stream.split()?;
        Ok(Session::with_leftover(reader, leftover.to_vec(), writer, role, config))
    }
}

impl<R: SessionRead, W: Write> Session<R, W> {
    /// Create a session from separately owned halves of one connection that
    /// has already completed its handshake.
    pub fn from_halves(reader: R, writer: W, role: Role, config: Option<WebSocketConfig>) -> Self {
        Self::with_leftover(reader, Vec::new(), writer, role, config.unwrap_or_default())
    }

    fn with_leftover(
        reader: R,
        leftover: Vec<u8>,
        writer: W,
        role: Role,
        config: WebSocketConfig,
    ) -> Self {
        let conn = Connection::new(role, Some(config));
        Session {
            reader: Mutex::new(SessionReader {
                stream: reader,
                frames: FrameReader::resume(leftover, config.read_buffer_size),
                max_frame_size: config.max_frame_size,
            }),
            writer: Mutex::new(writer),
            conn: Mutex::new(conn),
        }
    }

    /// Whether the session is still fully open.
    pub fn is_open(&self) -> bool {
        self.conn().may_send_data()
    }

    /// The close code recorded once the connection started closing, if any.
    pub fn close_code(&self) -> Option<CloseCode> {
        self.conn().close_code()
    }

    /// The close reason recorded once the connection started closing, if any.
    pub fn close_reason(&self) -> Option<Utf8Bytes> {
        self.conn().close_reason()
    }

    /// Read the next application message.
    ///
    /// Control frames are handled internally: a PING is answered with a PONG
    /// through the writer half before anything later is surfaced, so the
    /// peer observes liveness regardless of how fast messages are consumed;
    /// a PONG is accepted silently. A CLOSE completes the closing handshake
    /// and surfaces as [`Message::Close`] carrying the negotiated code and
    /// reason; after that, reads fail with [`Error::ConnectionClosed`].
    ///
    /// Messages are yielded in the order their final frame arrived on the
    /// wire. Inbound violations close the connection with code 1002 (1007
    /// for invalid UTF-8, 1009 for an oversized message) before the error is
    /// returned.
    pub fn read_message(&self) -> Result<Message> {
        let mut reader = self.reader.lock().expect("Bug: reader lock poisoned");
        loop {
            match self.read_step(&mut reader) {
                Ok(Some(message)) => return Ok(message),
                Ok(None) => continue,
                Err(err) => return Err(self.local_failure(err)),
            }
        }
    }

    /// Pull one frame, run it through the machine, send whatever replies it
    /// queued, and decide what (if anything) to surface.
    fn read_step(&self, reader: &mut SessionReader<R>) -> Result<Option<Message>> {
        self.conn().check_readable()?;

        let Some(frame) = reader.frames.next_frame(&mut reader.stream, reader.max_frame_size)?
        else {
            return Err(self.conn().on_eof());
        };

        // The machine transition is a short critical section: no I/O happens
        // while the connection state is locked.
        let mut conn = self.conn();
        let inbound = conn.on_frame(frame)?;
        let role = conn.role();
        let mut replies = Vec::new();
        while let Some(reply) = conn.take_reply() {
            replies.push(reply);
        }
        drop(conn);

        if !replies.is_empty() {
            let mut writer = self.writer.lock().expect("Bug: writer lock poisoned");
            for reply in replies {
                write_frame(&mut *writer, reply, role)?;
            }
            writer.flush()?;
        }

        Ok(match inbound {
            Inbound::Nothing => None,
            // The session hides the control chatter; only data and the
            // close surface to the application.
            Inbound::Message(Message::Ping(_)) => {
                trace!("Ping answered");
                None
            }
            Inbound::Message(Message::Pong(_)) => {
                trace!("Pong received");
                None
            }
            Inbound::Message(message) => Some(message),
            Inbound::Close(close) => Some(Message::Close(close)),
        })
    }

    /// Write a complete message.
    ///
    /// Calls are serialized by the writer lock: the frames of one message
    /// are never interleaved with frames written by another task, and
    /// messages appear on the wire in call order. Fails with
    /// [`ProtocolError::SendAfterClosing`] once the session left the open
    /// state.
    pub fn write_message(&self, message: Message) -> Result<()> {
        let message = match message {
            Message::Close(close) => return self.close(close),
            message => message,
        };

        let mut conn = self.conn();
        let frames = conn.outbound(message)?;
        let role = conn.role();
        // Take the writer before releasing the machine so no close frame
        // can slip in ahead of a just-validated message.
        let mut writer = self.writer.lock().expect("Bug: writer lock poisoned");
        drop(conn);

        let result = send_all(&mut *writer, frames, role);
        drop(writer);
        if let Err(Error::Io(_)) = &result {
            self.conn().fault();
        }
        result
    }

    /// Send a ping control frame. The payload must be at most 125 bytes.
    pub fn ping(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.write_message(Message::Ping(payload.into()))
    }

    /// Send a pong control frame, e.g. as a unidirectional heartbeat.
    /// The payload must be at most 125 bytes.
    pub fn pong(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.write_message(Message::Pong(payload.into()))
    }

    /// Initiate the closing handshake.
    ///
    /// Idempotent: only the first call emits a CLOSE frame. Codes that may
    /// not appear on the wire (1005, 1006, 1015) are substituted with a
    /// normal closure. The inbound side keeps running until the peer's CLOSE
    /// arrives; use [`Self::close_and_wait`] when there is no reading task
    /// to drive it.
    pub fn close(&self, close: Option<CloseFrame>) -> Result<()> {
        let mut conn = self.conn();
        let Some(frame) = conn.start_close(close) else {
            return Ok(());
        };
        let role = conn.role();
        let mut writer = self.writer.lock().expect("Bug: writer lock poisoned");
        drop(conn);

        let result = send_all(&mut *writer, vec![frame], role);
        drop(writer);
        if let Err(Error::Io(_)) = &result {
            self.conn().fault();
        }
        result
    }

    /// Close and then drain inbound frames until the peer's CLOSE arrives or
    /// `timeout` elapses. A peer that stops reading cannot stall us forever:
    /// on timeout the transport is torn down (the peer observes a reset) and
    /// close code 1006 is recorded.
    pub fn close_and_wait(
        &self,
        close: Option<CloseFrame>,
        timeout: Option<Duration>,
    ) -> Result<()> {
        self.close(close)?;

        let mut reader = self.reader.lock().expect("Bug: reader lock poisoned");
        reader.stream.set_read_timeout(timeout)?;
        loop {
            match self.read_step(&mut reader) {
                Ok(Some(Message::Close(_))) => return Ok(()),
                // Data the peer sent before seeing our close; discard.
                Ok(_) => continue,
                Err(Error::ConnectionClosed) | Err(Error::AlreadyClosed) => return Ok(()),
                Err(Error::Io(err))
                    if matches!(
                        err.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    warn!("Close handshake timed out, resetting the transport");
                    self.conn().fault();
                    reader.stream.force_close()?;
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Answer an inbound violation with the close frame the error calls for
    /// and poison the session; transport faults record the synthetic 1006.
    fn local_failure(&self, err: Error) -> Error {
        let code = match &err {
            Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => None,
            Error::Protocol(_) => Some(CloseCode::Protocol),
            Error::Utf8 => Some(CloseCode::Invalid),
            Error::Capacity(_) => Some(CloseCode::Size),
            Error::Io(_) => {
                self.conn().fault();
                None
            }
            _ => None,
        };
        if let Some(code) = code {
            let (frame, role) = {
                let mut conn = self.conn();
                (conn.abort(code), conn.role())
            };
            if let Some(frame) = frame {
                let mut writer = self.writer.lock().expect("Bug: writer lock poisoned");
                if let Err(write_err) = send_all(&mut *writer, vec![frame], role) {
                    debug!("Could not send the failure close frame: {write_err}");
                }
            }
        }
        err
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("Bug: connection state lock poisoned")
    }
}

/// Write a batch of frames and flush; used under the writer lock.
fn send_all<W: Write>(writer: &mut W, frames: Vec<Frame>, role: Role) -> Result<()> {
    for frame in frames {
        write_frame(writer, frame, role)?;
    }
    Ok(writer.flush()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        io::Cursor,
        sync::{Arc, Mutex},
    };

    impl SessionRead for Cursor<Vec<u8>> {}

    /// Write half that appends into a shared buffer so the test can inspect
    /// everything the session sent.
    #[derive(Clone, Default)]
    struct SharedVec(Arc<Mutex<Vec<u8>>>);

    impl SharedVec {
        fn contents(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Write for SharedVec {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn client_session(incoming: Vec<u8>) -> (Session<Cursor<Vec<u8>>, SharedVec>, SharedVec) {
        let out = SharedVec::default();
        let session =
            Session::from_halves(Cursor::new(incoming), out.clone(), Role::Client, None);
        (session, out)
    }

    fn sent_frames(out: &SharedVec) -> Vec<Frame> {
        let mut reader = FrameReader::new(4096);
        let mut cursor = Cursor::new(out.contents());
        let mut frames = Vec::new();
        while let Some(frame) = reader.next_frame(&mut cursor, None).unwrap() {
            frames.push(frame);
        }
        frames
    }

    use crate::protocol::frame::coding::{Control, OpCode};

    #[test]
    fn reads_data_messages() {
        let (session, _) = client_session(vec![
            0x81, 0x02, 0x68, 0x69, // TEXT "hi"
            0x82, 0x03, 0x01, 0x02, 0x03, // BINARY
        ]);
        assert_eq!(session.read_message().unwrap(), Message::text("hi"));
        assert_eq!(session.read_message().unwrap(), Message::binary(vec![1, 2, 3]));
    }

    #[test]
    fn ping_is_answered_before_data_is_surfaced() {
        let (session, out) = client_session(vec![
            0x89, 0x01, 0x61, // PING "a"
            0x81, 0x02, 0x68, 0x69, // TEXT "hi"
        ]);

        // The ping never surfaces, the text does; by the time it does, the
        // pong has already been written out.
        assert_eq!(session.read_message().unwrap(), Message::text("hi"));
        let frames = sent_frames(&out);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header().opcode, OpCode::Control(Control::Pong));
        assert_eq!(frames[0].payload(), b"a");
    }

    #[test]
    fn ping_amid_fragments_does_not_disturb_reassembly() {
        let (session, out) = client_session(vec![
            0x01, 0x02, 0x48, 0x65, // TEXT(fin=0) "He"
            0x89, 0x01, 0x78, // PING "x"
            0x80, 0x03, 0x6c, 0x6c, 0x6f, // CONTINUATION(fin=1) "llo"
        ]);

        assert_eq!(session.read_message().unwrap(), Message::text("Hello"));
        let frames = sent_frames(&out);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header().opcode, OpCode::Control(Control::Pong));
    }

    #[test]
    fn peer_close_is_echoed_and_recorded() {
        let (session, out) = client_session(vec![
            0x88, 0x05, 0x03, 0xe8, b'b', b'y', b'e', // CLOSE 1000 "bye"
        ]);

        match session.read_message().unwrap() {
            Message::Close(Some(frame)) => {
                assert_eq!(frame.code, CloseCode::Normal);
                assert_eq!(frame.reason, "bye");
            }
            other => panic!("unexpected message: {other:?}"),
        }
        assert_eq!(session.close_code(), Some(CloseCode::Normal));
        assert_eq!(session.close_reason().unwrap(), "bye");
        assert!(!session.is_open());

        // We echoed the close.
        let frames = sent_frames(&out);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header().opcode, OpCode::Control(Control::Close));

        // The handshake is complete; further reads report the closure.
        assert!(matches!(session.read_message(), Err(Error::ConnectionClosed)));
        assert!(matches!(session.read_message(), Err(Error::AlreadyClosed)));
    }

    #[test]
    fn no_writes_after_close() {
        let (session, out) = client_session(Vec::new());
        session.close(None).unwrap();
        session.close(None).unwrap(); // idempotent

        assert!(matches!(
            session.write_message(Message::text("late")),
            Err(Error::Protocol(ProtocolError::SendAfterClosing))
        ));
        assert!(matches!(
            session.ping(&b"hb"[..]),
            Err(Error::Protocol(ProtocolError::SendAfterClosing))
        ));

        let frames = sent_frames(&out);
        assert_eq!(frames.len(), 1, "only one close frame goes out");
    }

    #[test]
    fn oversized_control_payload_is_rejected() {
        let (session, _) = client_session(Vec::new());
        let payload = vec![0u8; 126];
        assert!(matches!(
            session.ping(payload),
            Err(Error::Protocol(ProtocolError::ControlFrameTooBig))
        ));
    }

    #[test]
    fn invalid_utf8_fails_with_1007() {
        // TEXT with a dangling lead byte.
        let (session, out) = client_session(vec![0x81, 0x01, 0xc0]);

        assert!(matches!(session.read_message(), Err(Error::Utf8)));
        assert_eq!(session.close_code(), Some(CloseCode::Invalid));

        let frames = sent_frames(&out);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload()[..2], [0x03, 0xef]); // 1007
    }

    #[test]
    fn fragments_outgoing_writes() {
        let config = WebSocketConfig::default().fragment_size(Some(64));
        let out = SharedVec::default();
        let session = Session::from_halves(
            Cursor::new(Vec::new()),
            out.clone(),
            Role::Server,
            Some(config),
        );
        session.write_message(Message::binary(vec![7u8; 200])).unwrap();

        let frames = sent_frames(&out);
        assert_eq!(frames.len(), 4); // ceil(200 / 64)
        assert!(frames[..3].iter().all(|f| !f.header().is_final));
        assert!(frames[3].header().is_final);
        assert_eq!(frames.iter().map(|f| f.payload().len()).sum::<usize>(), 200);
    }

    #[test]
    fn close_and_wait_consumes_the_ack() {
        // The peer acknowledges our close right away.
        let (session, out) = client_session(vec![0x88, 0x02, 0x03, 0xe8]);
        session.close_and_wait(None, Some(Duration::from_millis(100))).unwrap();
        assert_eq!(session.close_code(), Some(CloseCode::Normal));

        let frames = sent_frames(&out);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header().opcode, OpCode::Control(Control::Close));
    }
}

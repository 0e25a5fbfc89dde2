//! Utilities to work with raw WebSocket frames.

pub mod coding;

#[allow(clippy::module_inception)]
mod frame;
mod mask;
mod utf8;

pub use self::{
    frame::{CloseFrame, Frame, FrameHeader},
    utf8::Utf8Bytes,
};
pub(crate) use self::mask::apply_mask;

use crate::{
    error::{CapacityError, Error, Result},
    protocol::Role,
};
use bytes::{Buf, BytesMut};
use log::*;
use std::io::{Cursor, Read, Write};

/// How much to pull off the stream at most per read while waiting for a
/// frame to complete.
const FILL_CHUNK: usize = 16 * 1024;

/// Incremental decoder for the inbound half of one connection.
///
/// Stream bytes accumulate in an internal buffer until a whole frame is
/// available. A masked payload is unmasked on extraction; the key stays in
/// the returned header so role checks can still see that the frame arrived
/// masked.
#[derive(Debug)]
pub(crate) struct FrameReader {
    buf: BytesMut,
    pending: Option<Pending>,
}

/// A parsed header whose payload has not fully arrived yet.
#[derive(Debug)]
struct Pending {
    header: FrameHeader,
    length: usize,
}

impl FrameReader {
    pub(crate) fn new(capacity: usize) -> Self {
        Self { buf: BytesMut::with_capacity(capacity), pending: None }
    }

    /// Resume decoding with bytes that were already pulled off the stream,
    /// e.g. whatever the handshake read past the end of the HTTP head.
    pub(crate) fn resume(leftover: Vec<u8>, capacity: usize) -> Self {
        let mut reader = Self::new(capacity.max(leftover.len()));
        reader.buf.extend_from_slice(&leftover);
        reader
    }

    /// Give back the bytes that were read off the stream but not decoded.
    pub(crate) fn into_leftover(self) -> BytesMut {
        self.buf
    }

    /// Block until a whole frame is available, or until the stream ends
    /// (`None`).
    ///
    /// `max_frame_size` bounds the payload of a single frame; a length field
    /// crossing it fails before any of the payload is buffered.
    pub(crate) fn next_frame(
        &mut self,
        stream: &mut impl Read,
        max_frame_size: Option<usize>,
    ) -> Result<Option<Frame>> {
        loop {
            if let Some(frame) = self.extract(max_frame_size)? {
                trace!("received frame {frame}");
                return Ok(Some(frame));
            }

            let mut chunk = [0u8; FILL_CHUNK];
            let n = stream.read(&mut chunk)?;
            if n == 0 {
                trace!("stream ended");
                return Ok(None);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Try to cut one frame out of the buffer without touching the stream.
    fn extract(&mut self, max_frame_size: Option<usize>) -> Result<Option<Frame>> {
        if self.pending.is_none() {
            let mut cursor = Cursor::new(&self.buf);
            let Some((header, length)) = FrameHeader::parse(&mut cursor)? else {
                return Ok(None);
            };
            let consumed = cursor.position() as usize;

            // Compare in u64 space so a hostile length cannot wrap on
            // 32-bit targets.
            let limit = max_frame_size.unwrap_or(usize::MAX);
            if length > limit as u64 {
                return Err(Error::Capacity(CapacityError::MessageTooLong {
                    size: length.min(usize::MAX as u64) as usize,
                    max_size: limit,
                }));
            }

            Buf::advance(&mut self.buf, consumed);
            self.pending = Some(Pending { header, length: length as usize });
        }

        let arrived = match &self.pending {
            Some(pending) => pending.length <= self.buf.len(),
            None => false,
        };
        if !arrived {
            return Ok(None);
        }

        let Pending { header, length } = self.pending.take().expect("Bug: pending frame vanished");
        let mut payload = self.buf.split_to(length);
        if let Some(key) = header.mask {
            apply_mask(&mut payload, key);
        }
        Ok(Some(Frame::from_payload(header, payload.freeze())))
    }
}

/// Mask (when the sender is a client), serialize and write out one frame.
///
/// Writing is write-through: the frame hits the stream before this returns,
/// though the stream itself may still buffer until flushed.
pub(crate) fn write_frame<S: Write>(stream: &mut S, mut frame: Frame, role: Role) -> Result<()> {
    if role == Role::Client {
        // The client masks everything it sends with a fresh key. (RFC 6455)
        frame.set_random_mask();
    }
    trace!("sending frame {frame}");
    let mut wire = Vec::with_capacity(frame.len());
    frame.format_into_buf(&mut wire)?;
    stream.write_all(&wire)?;
    Ok(())
}

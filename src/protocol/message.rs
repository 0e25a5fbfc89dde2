use super::frame::{
    coding::Data, CloseFrame, Frame,
};
use crate::{
    error::{CapacityError, Error, ProtocolError, Result},
    protocol::frame::Utf8Bytes,
};
use bytes::{Bytes, BytesMut};
use std::{fmt, result::Result as StdResult, str};

/// Reassembles fragmented data frames into application messages.
///
/// A message is one TEXT/BINARY frame with FIN clear, any number of
/// CONTINUATION frames, and a final CONTINUATION with FIN set; control
/// frames pass around this buffer without touching it. Text is validated as
/// UTF-8 once, at the final fragment boundary.
#[derive(Debug, Default)]
pub(crate) struct Assembler {
    partial: Option<IncompleteMessage>,
}

impl Assembler {
    /// Feed one data frame. Yields the finished message on its FIN frame.
    pub(crate) fn push(
        &mut self,
        opcode: Data,
        fin: bool,
        payload: Bytes,
        size_limit: Option<usize>,
    ) -> Result<Option<Message>> {
        match opcode {
            Data::Continue => {
                let Some(partial) = self.partial.as_mut() else {
                    return Err(Error::Protocol(ProtocolError::UnexpectedContinueFrame));
                };
                partial.extend(payload, size_limit)?;
                if fin {
                    let partial = self.partial.take().expect("Bug: partial message vanished");
                    partial.complete().map(Some)
                } else {
                    Ok(None)
                }
            }
            _ if self.partial.is_some() => {
                Err(Error::Protocol(ProtocolError::ExpectedFragment(opcode)))
            }
            Data::Text | Data::Binary => {
                let kind = match opcode {
                    Data::Text => IncompleteMessageType::Text,
                    _ => IncompleteMessageType::Binary,
                };
                let mut partial = IncompleteMessage::new(kind);
                partial.extend(payload, size_limit)?;
                if fin {
                    partial.complete().map(Some)
                } else {
                    self.partial = Some(partial);
                    Ok(None)
                }
            }
            Data::Reserved(code) => {
                Err(Error::Protocol(ProtocolError::UnknownDataFrameType(code)))
            }
        }
    }
}

/// A message in the process of being reassembled from fragments.
///
/// Note: Text messages are utf8 validated on calling [`Self::complete`],
/// which is the final fragment boundary.
#[derive(Debug)]
pub(crate) struct IncompleteMessage {
    kind: IncompleteMessageType,
    buf: BytesMut,
}

/// The type of an incomplete message.
#[derive(Debug, Clone, Copy)]
pub(crate) enum IncompleteMessageType {
    Text,
    Binary,
}

impl IncompleteMessage {
    pub(crate) fn new(kind: IncompleteMessageType) -> Self {
        Self { kind, buf: BytesMut::new() }
    }

    /// Add more data to an existing message.
    pub(crate) fn extend(&mut self, tail: Bytes, size_limit: Option<usize>) -> Result<()> {
        // Always have a max size. This ensures an error in case of
        // concatenating two buffers of more than `usize::MAX` bytes in total.
        let max_size = size_limit.unwrap_or(usize::MAX);
        let my_size = self.buf.len();
        let portion_size = tail.len();
        // Be careful about integer overflows here.
        if my_size > max_size || portion_size > max_size - my_size {
            return Err(Error::Capacity(CapacityError::MessageTooLong {
                size: my_size.saturating_add(portion_size),
                max_size,
            }));
        }

        self.buf.extend_from_slice(&tail);
        Ok(())
    }

    /// Convert an incomplete message into a complete one.
    pub(crate) fn complete(self) -> Result<Message> {
        Ok(match self.kind {
            IncompleteMessageType::Binary => Message::Binary(self.buf.freeze()),
            IncompleteMessageType::Text => Message::Text(self.buf.try_into()?),
        })
    }
}

/// An enum representing the various forms of a WebSocket message.
#[derive(Debug, Eq, PartialEq, Clone)]
pub enum Message {
    /// A text WebSocket message.
    Text(Utf8Bytes),
    /// A binary WebSocket message.
    Binary(Bytes),
    /// A ping message with the specified payload.
    ///
    /// The payload here must have a length less than 125 bytes.
    Ping(Bytes),
    /// A pong message with the specified payload.
    ///
    /// The payload here must have a length less than 125 bytes.
    Pong(Bytes),
    /// A close message with the optional close frame.
    Close(Option<CloseFrame>),
    /// Raw frame. Note, that you're not going to get this value while reading
    /// the message.
    Frame(Frame),
}

impl Message {
    /// Create a new text WebSocket message from a stringable.
    pub fn text<S>(string: S) -> Message
    where
        S: Into<Utf8Bytes>,
    {
        Message::Text(string.into())
    }

    /// Create a new binary WebSocket message by converting to `Bytes`.
    pub fn binary<B>(bin: B) -> Message
    where
        B: Into<Bytes>,
    {
        Message::Binary(bin.into())
    }

    /// Indicates whether a message is a text message.
    pub fn is_text(&self) -> bool {
        matches!(*self, Message::Text(_))
    }

    /// Indicates whether a message is a binary message.
    pub fn is_binary(&self) -> bool {
        matches!(*self, Message::Binary(_))
    }

    /// Indicates whether a message is a ping message.
    pub fn is_ping(&self) -> bool {
        matches!(*self, Message::Ping(_))
    }

    /// Indicates whether a message is a pong message.
    pub fn is_pong(&self) -> bool {
        matches!(*self, Message::Pong(_))
    }

    /// Indicates whether a message is a close message.
    pub fn is_close(&self) -> bool {
        matches!(*self, Message::Close(_))
    }

    /// Get the length of the WebSocket message.
    pub fn len(&self) -> usize {
        match *self {
            Message::Text(ref string) => string.len(),
            Message::Binary(ref data) | Message::Ping(ref data) | Message::Pong(ref data) => {
                data.len()
            }
            Message::Close(ref data) => data.as_ref().map(|d| d.reason.len()).unwrap_or(0),
            Message::Frame(ref frame) => frame.len(),
        }
    }

    /// Returns true if the WebSocket message has no content.
    /// For example, if the other side of the connection sent an empty string.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consume the WebSocket and return it as binary data.
    pub fn into_data(self) -> Bytes {
        match self {
            Message::Text(utf8) => utf8.into(),
            Message::Binary(data) | Message::Ping(data) | Message::Pong(data) => data,
            Message::Close(None) => <_>::default(),
            Message::Close(Some(frame)) => frame.reason.into(),
            Message::Frame(frame) => frame.into_payload(),
        }
    }

    /// Attempt to consume the WebSocket message and convert it to a string.
    pub fn into_text(self) -> Result<Utf8Bytes> {
        match self {
            Message::Text(txt) => Ok(txt),
            Message::Binary(data) | Message::Ping(data) | Message::Pong(data) => {
                Ok(data.try_into()?)
            }
            Message::Close(None) => Ok(<_>::default()),
            Message::Close(Some(frame)) => Ok(frame.reason),
            Message::Frame(frame) => frame.into_text(),
        }
    }

    /// Attempt to get a &str from the WebSocket message,
    /// this will try to convert binary data to utf8.
    pub fn to_text(&self) -> Result<&str> {
        match *self {
            Message::Text(ref string) => Ok(string.as_str()),
            Message::Binary(ref data) | Message::Ping(ref data) | Message::Pong(ref data) => {
                Ok(str::from_utf8(data)?)
            }
            Message::Close(None) => Ok(""),
            Message::Close(Some(ref frame)) => Ok(&frame.reason),
            Message::Frame(ref frame) => Ok(str::from_utf8(frame.payload())?),
        }
    }
}

impl From<String> for Message {
    #[inline]
    fn from(string: String) -> Self {
        Message::text(string)
    }
}

impl<'s> From<&'s str> for Message {
    #[inline]
    fn from(string: &'s str) -> Self {
        Message::text(string)
    }
}

impl<'b> From<&'b [u8]> for Message {
    #[inline]
    fn from(data: &'b [u8]) -> Self {
        Message::binary(Bytes::copy_from_slice(data))
    }
}

impl From<Bytes> for Message {
    fn from(data: Bytes) -> Self {
        Message::binary(data)
    }
}

impl From<Vec<u8>> for Message {
    #[inline]
    fn from(data: Vec<u8>) -> Self {
        Message::binary(data)
    }
}

impl From<Message> for Bytes {
    #[inline]
    fn from(message: Message) -> Self {
        message.into_data()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> StdResult<(), fmt::Error> {
        if let Ok(string) = self.to_text() {
            write!(f, "{string}")
        } else {
            write!(f, "Binary Data<length={}>", self.len())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        let t = Message::text("test".to_owned());
        assert_eq!(t.to_string(), "test".to_owned());

        let bin = Message::binary(vec![0, 1, 3, 4, 241]);
        assert_eq!(bin.to_string(), "Binary Data<length=5>".to_owned());
    }

    #[test]
    fn binary_convert() {
        let bin = [6u8, 7, 8, 9, 10, 241];
        let msg = Message::from(&bin[..]);
        assert!(msg.is_binary());
        assert!(msg.into_text().is_err());
    }

    #[test]
    fn text_convert() {
        let s = "kiwotsukete";
        let msg = Message::from(s);
        assert!(msg.is_text());
    }

    #[test]
    fn assembler_caps_message_size() {
        let mut assembler = Assembler::default();
        assembler.push(Data::Binary, false, Bytes::from_static(&[0; 8]), Some(10)).unwrap();
        let err = assembler
            .push(Data::Continue, true, Bytes::from_static(&[0; 8]), Some(10))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Capacity(CapacityError::MessageTooLong { size: 16, max_size: 10 })
        ));
    }

    #[test]
    fn assembler_validates_text_on_completion() {
        // A code point split across fragments is fine...
        let mut assembler = Assembler::default();
        assert!(assembler
            .push(Data::Text, false, Bytes::from_static(&[0xE2, 0x82]), None)
            .unwrap()
            .is_none());
        let message =
            assembler.push(Data::Continue, true, Bytes::from_static(&[0xAC]), None).unwrap();
        assert_eq!(message, Some(Message::text("€")));

        // ...but a dangling lead byte is not.
        let mut assembler = Assembler::default();
        assert!(matches!(
            assembler.push(Data::Text, true, Bytes::from_static(&[0xC0]), None),
            Err(Error::Utf8)
        ));
    }

    #[test]
    fn assembler_enforces_interleaving_rules() {
        // A continuation with nothing to continue.
        let mut assembler = Assembler::default();
        assert!(matches!(
            assembler.push(Data::Continue, true, Bytes::from_static(b"hi"), None),
            Err(Error::Protocol(crate::error::ProtocolError::UnexpectedContinueFrame))
        ));

        // A fresh data frame while a message is in flight.
        let mut assembler = Assembler::default();
        assembler.push(Data::Text, false, Bytes::from_static(b"hi"), None).unwrap();
        assert!(matches!(
            assembler.push(Data::Binary, true, Bytes::from_static(&[0]), None),
            Err(Error::Protocol(crate::error::ProtocolError::ExpectedFragment(Data::Binary)))
        ));
    }
}

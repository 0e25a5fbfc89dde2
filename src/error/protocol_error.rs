use crate::protocol::frame::coding::Data;
use std::fmt;

/// Indicates the specific type/cause of a protocol error.
#[derive(PartialEq, Eq, Clone, Copy)]
pub enum ProtocolError {
    /// Not allowed to send data frames after having sent a closing frame.
    SendAfterClosing,
    /// Remote sent data after sending a closing frame.
    ReceivedAfterClosing,
    /// Reserved bits in the frame header are non-zero while no extension was
    /// negotiated.
    NonZeroReservedBits,
    /// The server must close the connection when an unmasked frame is received.
    UnmaskedFrameFromClient,
    /// The client must close the connection when a masked frame is received.
    MaskedFrameFromServer,
    /// Control frames must not be fragmented.
    FragmentedControlFrame,
    /// Control frames must have a payload of 125 bytes or less.
    ControlFrameTooBig,
    /// Type of control frame not recognised.
    UnknownControlFrameType(u8),
    /// Type of data frame not recognised.
    UnknownDataFrameType(u8),
    /// Received a continuation frame despite there being nothing to continue.
    UnexpectedContinueFrame,
    /// Received a new data frame while waiting for more fragments.
    ExpectedFragment(Data),
    /// Connection closed without performing the closing handshake.
    ResetWithoutClosingHandshake,
    /// The payload of a closing frame is a single byte (must be 0 or >= 2).
    InvalidCloseSequence,
    /// The 64-bit payload length has its most significant bit set.
    InvalidPayloadLength,
}

impl fmt::Debug for ProtocolError {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::SendAfterClosing => write!(f, "Sending after closing is not allowed"),
            Self::ReceivedAfterClosing => write!(f, "Remote sent after having closed"),
            Self::NonZeroReservedBits => write!(f, "Reserved bits are non-zero"),
            Self::UnmaskedFrameFromClient => write!(f, "Received an unmasked frame from client"),
            Self::MaskedFrameFromServer => write!(f, "Received a masked frame from server"),
            Self::FragmentedControlFrame => write!(f, "Fragmented control frame"),
            Self::ControlFrameTooBig => {
                write!(f, "Control frame too big (payload must be 125 bytes or less)")
            }
            Self::UnknownControlFrameType(elem) => {
                write!(f, "Unknown control frame type: {elem}")
            }
            Self::UnknownDataFrameType(elem) => write!(f, "Unknown data frame type: {elem}"),
            Self::UnexpectedContinueFrame => write!(f, "Continue frame but nothing to continue"),
            Self::ExpectedFragment(elem) => {
                write!(f, "While waiting for more fragments received: {elem}")
            }
            Self::ResetWithoutClosingHandshake => {
                write!(f, "Connection reset without closing handshake")
            }
            Self::InvalidCloseSequence => write!(f, "Invalid close sequence"),
            Self::InvalidPayloadLength => write!(f, "Payload length longer than 2^63 - 1"),
        }
    }
}

impl fmt::Display for ProtocolError {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl std::error::Error for ProtocolError {}

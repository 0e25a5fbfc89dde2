use std::fmt;

/// A configured or protocol size limit was exceeded.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum CapacityError {
    /// The HTTP head of a handshake grew past what this crate accepts,
    /// either in total bytes or in header-line count.
    HandshakeHeadTooLarge,
    /// A message (or a single frame) is bigger than the permitted size.
    MessageTooLong {
        /// The size of the message.
        size: usize,
        /// The maximum allowed message size.
        max_size: usize,
    },
}

impl fmt::Display for CapacityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::HandshakeHeadTooLarge => write!(f, "HTTP head exceeds the size limit"),
            Self::MessageTooLong { size, max_size } => {
                write!(f, "Message too long: {size} > {max_size}")
            }
        }
    }
}

impl std::error::Error for CapacityError {}

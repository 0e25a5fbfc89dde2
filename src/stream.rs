//! Convenience wrapper for streams to switch between plain TCP and TLS at
//! runtime.
//!
//! There is no dependency on actual TLS implementations. Everything like
//! `native_tls` or `openssl` will work as long as there is a TLS stream
//! supporting standard `Read + Write` traits.

use std::{
    fmt::{self, Debug},
    io::{Read, Result as IoResult, Write},
};

/// A stream that might be protected with TLS.
#[non_exhaustive]
pub enum MaybeTlsStream<S> {
    /// Unencrypted socket stream.
    Plain(S),
    /// Encrypted socket stream using `native-tls`.
    #[cfg(feature = "tls")]
    NativeTls(native_tls::TlsStream<S>),
}

impl<S> MaybeTlsStream<S> {
    /// Returns a shared reference to the inner stream.
    pub fn get_ref(&self) -> &S {
        match self {
            MaybeTlsStream::Plain(s) => s,
            #[cfg(feature = "tls")]
            MaybeTlsStream::NativeTls(s) => s.get_ref(),
        }
    }

    /// Returns a mutable reference to the inner stream.
    pub fn get_mut(&mut self) -> &mut S {
        match self {
            MaybeTlsStream::Plain(s) => s,
            #[cfg(feature = "tls")]
            MaybeTlsStream::NativeTls(s) => s.get_mut(),
        }
    }
}

impl<S: Debug> Debug for MaybeTlsStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaybeTlsStream::Plain(s) => f.debug_tuple("MaybeTlsStream::Plain").field(s).finish(),
            #[cfg(feature = "tls")]
            MaybeTlsStream::NativeTls(s) => {
                f.debug_tuple("MaybeTlsStream::NativeTls").field(s).finish()
            }
        }
    }
}

impl<S: Read + Write> Read for MaybeTlsStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        match self {
            MaybeTlsStream::Plain(ref mut s) => s.read(buf),
            #[cfg(feature = "tls")]
            MaybeTlsStream::NativeTls(ref mut s) => s.read(buf),
        }
    }
}

impl<S: Read + Write> Write for MaybeTlsStream<S> {
    fn write(&mut self, buf: &[u8]) -> IoResult<usize> {
        match self {
            MaybeTlsStream::Plain(ref mut s) => s.write(buf),
            #[cfg(feature = "tls")]
            MaybeTlsStream::NativeTls(ref mut s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> IoResult<()> {
        match self {
            MaybeTlsStream::Plain(ref mut s) => s.flush(),
            #[cfg(feature = "tls")]
            MaybeTlsStream::NativeTls(ref mut s) => s.flush(),
        }
    }
}

/// A stream mode, either plain TCP or TLS.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Plain mode (`ws://` URLs).
    Plain,
    /// TLS mode (`wss://` URLs).
    Tls,
}

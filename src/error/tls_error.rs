use std::fmt;

/// TLS errors.
#[derive(Debug)]
#[non_exhaustive]
pub enum TlsError {
    /// Native TLS error.
    Native(native_tls::Error),
}

impl fmt::Display for TlsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Native(ref err) => write!(f, "native-tls error: {err}"),
        }
    }
}

impl std::error::Error for TlsError {}

use std::fmt;
use std::io;

/// Errors surfaced by the storage engine.
///
/// `NotFound` is deliberately absent: a missing key is a normal `query`
/// outcome (`Ok(None)`), not an error.
#[derive(Debug)]
pub enum Error {
    /// An underlying file operation failed.
    Io(io::Error),
    /// An index pointed at a range beyond the end of its segment file.
    ShortRead {
        offset: u64,
        size: u64,
        file_len: u64,
    },
    /// A blob read from a valid `(offset, size)` location failed to decode.
    Decode(String),
    /// The engine has been (or is being) shut down.
    Shutdown,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "io error: {e}"),
            Error::ShortRead {
                offset,
                size,
                file_len,
            } => write!(
                f,
                "short read: offset {offset} + size {size} exceeds file length {file_len}"
            ),
            Error::Decode(msg) => write!(f, "decode error: {msg}"),
            Error::Shutdown => write!(f, "engine is shut down"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

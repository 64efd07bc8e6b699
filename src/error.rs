//! Error type and result aliases used throughout this crate.

use std::borrow::Cow;
use std::fmt;
use std::io::ErrorKind;

/// A result that may contain a vbf error.
pub type Result<T> = std::result::Result<T, Error>;

/// A result that, if successful, contains nothing.
pub type UnitResult = Result<()>;

pub use std::io::Error as IoError;
pub use std::io::Result as IoResult;

/// All failures this library can produce. The set is closed:
/// every internal failure is mapped onto one of these variants.
#[derive(Debug)]
pub enum Error {
    /// The underlying byte stream could not be read or written.
    Io(IoError),

    /// The file does not start with the vbf magic signature.
    BadMagic,

    /// The file declares a format version this implementation does not know.
    UnsupportedVersion(u8),

    /// The fixed header or the image descriptor inside it is invalid.
    CorruptHeader(Cow<'static, str>),

    /// The block offset index is cut short by the end of the file.
    TruncatedIndex,

    /// The block offset index is not strictly increasing.
    IndexNotMonotonic,

    /// A block could not be compressed.
    CompressionFailed,

    /// A compressed block payload could not be decompressed,
    /// or decompressed to an unexpected number of bytes.
    DecompressionFailed,

    /// The caller-provided pixel buffer does not match the required size.
    BufferTooSmall {
        /// Number of bytes the operation requires.
        expected: usize,

        /// Number of bytes the caller provided.
        actual: usize,
    },

    /// The requested region of interest is empty or outside the image.
    InvalidRoi(Cow<'static, str>),

    /// The pipeline was halted because another worker failed first.
    Cancelled,
}

impl Error {
    pub(crate) fn corrupt(message: impl Into<Cow<'static, str>>) -> Self {
        Error::CorruptHeader(message.into())
    }

    pub(crate) fn invalid_roi(message: impl Into<Cow<'static, str>>) -> Self {
        Error::InvalidRoi(message.into())
    }
}

/// Enable using the `?` operator on `io::Result`.
impl From<IoError> for Error {
    fn from(error: IoError) -> Self {
        if error.kind() == ErrorKind::UnexpectedEof {
            Error::corrupt("unexpected end of file")
        } else {
            Error::Io(error)
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(error) => write!(formatter, "i/o error: {error}"),
            Error::BadMagic => write!(formatter, "not a vbf file (magic signature mismatch)"),
            Error::UnsupportedVersion(version) => {
                write!(formatter, "unsupported vbf format version {version}")
            }
            Error::CorruptHeader(message) => write!(formatter, "corrupt header: {message}"),
            Error::TruncatedIndex => write!(formatter, "block offset index is truncated"),
            Error::IndexNotMonotonic => {
                write!(formatter, "block offset index is not strictly increasing")
            }
            Error::CompressionFailed => write!(formatter, "block compression failed"),
            Error::DecompressionFailed => write!(formatter, "block decompression failed"),
            Error::BufferTooSmall { expected, actual } => write!(
                formatter,
                "pixel buffer size mismatch: expected {expected} bytes, got {actual} bytes"
            ),
            Error::InvalidRoi(message) => write!(formatter, "invalid region of interest: {message}"),
            Error::Cancelled => write!(formatter, "operation cancelled after an earlier failure"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(error) => Some(error),
            _ => None,
        }
    }
}

#[inline]
pub(crate) fn u64_to_usize(value: u64, context: &'static str) -> Result<usize> {
    usize::try_from(value).map_err(|_| Error::corrupt(context))
}

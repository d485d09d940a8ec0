//! Library error types.

use std::fmt;
use std::io;

/// Crate-wide Result, normally returning an [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Any failure that can occur while encoding, decoding, or mapping messages.
#[derive(Debug)]
pub enum Error {
    /// Wire or text data ended before a complete item could be read.
    LengthTooShort {
        /// What was being decoded when the data ran out.
        step: &'static str,
        /// Bytes the decoder needed.
        expected: usize,
        /// Bytes actually available.
        actual: usize,
    },
    /// Structurally invalid data: a bad prefix, a size escaping its frame,
    /// invalid UTF-8, or any other malformed encoding.
    BadEncode(String),
    /// A frame's declared size did not match the bytes actually consumed or
    /// produced.
    SizeMismatch {
        /// The size the frame declared.
        declared: usize,
        /// The byte count observed.
        actual: usize,
    },
    /// A fixed-width type id that is not in the dictionary and has no
    /// registered recovery size. Variable-width unknowns are not errors;
    /// they round-trip as opaque bytes.
    UnknownFixedType(u8),
    /// Sub-message nesting exceeded [`MAX_DEPTH`](crate::MAX_DEPTH).
    DepthLimit,
    /// JSON text failed to parse.
    Parse {
        /// 1-based line of the offending input.
        line: usize,
        /// 1-based column of the offending input.
        col: usize,
        /// What went wrong.
        msg: String,
    },
    /// A runtime type had no registration in the type map. Carries the
    /// candidate type names that were tried, or the native type name.
    UnregisteredType(String),
    /// A relative object reference pointed forward or outside the stream.
    BadReference {
        /// Reference id the delta was applied to.
        from: usize,
        /// The offending delta.
        delta: i64,
    },
    /// Two objects were registered for the same reference id.
    DuplicateRegistration(usize),
    /// Any other object-mapping failure: a surrogate followed a reference
    /// before registering its instance, a type mismatch during downcast, or
    /// a user hook failure wrapped with the field in flight.
    Mapping(String),
    /// Underlying I/O failure, wrapped with the decode/encode step and the
    /// stream offset at which it happened.
    Io {
        /// What was in progress when the I/O failed.
        step: &'static str,
        /// Byte offset into the stream.
        offset: u64,
        /// The underlying error.
        source: io::Error,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::LengthTooShort {
                step,
                expected,
                actual,
            } => write!(
                f,
                "Expected {} more bytes, but got {} on step [{}]",
                expected, actual, step
            ),
            Error::BadEncode(ref err) => write!(f, "Bad encoding: {}", err),
            Error::SizeMismatch { declared, actual } => write!(
                f,
                "Declared size {} does not match actual byte count {}",
                declared, actual
            ),
            Error::UnknownFixedType(id) => write!(
                f,
                "Unknown fixed-width type id {} with no recovery size",
                id
            ),
            Error::DepthLimit => write!(f, "Sub-message nesting limit exceeded"),
            Error::Parse {
                line,
                col,
                ref msg,
            } => write!(f, "Parse error at line {}, column {}: {}", line, col, msg),
            Error::UnregisteredType(ref name) => {
                write!(f, "No type registered for \"{}\"", name)
            }
            Error::BadReference { from, delta } => write!(
                f,
                "Relative reference {} from id {} is out of range",
                delta, from
            ),
            Error::DuplicateRegistration(refid) => {
                write!(f, "Second object registered for reference id {}", refid)
            }
            Error::Mapping(ref err) => write!(f, "Object mapping failure: {}", err),
            Error::Io {
                step,
                offset,
                ref source,
            } => write!(
                f,
                "I/O failure at offset {} on step [{}]: {}",
                offset, step, source
            ),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            Error::Io { ref source, .. } => Some(source),
            _ => None,
        }
    }
}

impl Error {
    /// Wrap an I/O error with the step and stream offset it occurred at.
    /// `UnexpectedEof` becomes [`Error::LengthTooShort`] so truncation is
    /// reported uniformly regardless of the byte source.
    pub(crate) fn io_at(step: &'static str, offset: u64, expected: usize, e: io::Error) -> Error {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Error::LengthTooShort {
                step,
                expected,
                actual: 0,
            }
        } else {
            Error::Io {
                step,
                offset,
                source: e,
            }
        }
    }
}

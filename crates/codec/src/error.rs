//! Codec Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};
use tinyimage_format::ImageFormat;

/// A codec error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for codec operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The input bytes are not a decodable image.
    #[display("image cannot be decoded")]
    Unparseable,
    /// The decoded image cannot be written in the requested format.
    #[display("cannot encode as {}", _0.label())]
    Unsupported(#[error(not(source))] ImageFormat),
    /// The encoder failed part way through.
    #[display("encoding as {} failed", _0.label())]
    Encode(#[error(not(source))] ImageFormat),
    /// The blocking worker running the codec panicked or was cancelled.
    #[display("codec worker did not complete")]
    Worker,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Worker)
    }
}

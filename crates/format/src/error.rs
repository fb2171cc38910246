//! Format Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};

/// A format error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for format operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The requested format name is not one of jpeg, png, webp or avif.
    #[display("unsupported format: {_0}")]
    UnsupportedFormat(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_display() {
        assert_eq!(ErrorKind::UnsupportedFormat("gif".to_string()).to_string(), "unsupported format: gif");
        assert!(!ErrorKind::UnsupportedFormat("gif".to_string()).is_retryable());
    }
}

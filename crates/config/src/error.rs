//! Config Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A configuration error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The layered application configuration could not be extracted.
    #[display("invalid application configuration")]
    Figment,
    /// An explicitly requested configuration file does not exist.
    #[display("configuration file not found: {}", _0.display())]
    ConfigFileMissing(#[error(not(source))] PathBuf),
    /// No home directory could be determined for the platform config dir.
    #[display("could not determine a configuration directory")]
    NoProjectDirectory,
    /// The settings store file exists but could not be read or written.
    #[display("settings store unavailable: {}", _0.display())]
    StoreIo(#[error(not(source))] PathBuf),
    /// The settings store file is not a JSON object of strings.
    #[display("settings store is corrupt: {}", _0.display())]
    StoreCorrupt(#[error(not(source))] PathBuf),
    /// Settings could not be encoded for storage.
    #[display("settings could not be serialized")]
    Serialize,
    /// A setting value given as text is not recognised.
    #[display("invalid value for {_0}: {_1}")]
    InvalidValue(&'static str, #[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreIo(_))
    }
}

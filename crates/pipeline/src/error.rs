//! Stage Error Types
//!
//! The compute and write stages report failures with one shared taxonomy.
//! The [`Display`](std::fmt::Display) of every kind is the stable message
//! shown to users and stored on the task, so it never includes internal
//! detail; the `exn` error tree underneath keeps the cause for logging.

use derive_more::{Display, Error};
use std::path::{Path, PathBuf};
use tinyimage_codec::error::ErrorKind as CodecErrorKind;
use tinyimage_storage::error::ErrorKind as StorageErrorKind;

/// A stage error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for stage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a single item failed to compute or write.
///
/// ### Compute and write
/// - [`ErrorKind::MissingExtension`]
/// - [`ErrorKind::UnsupportedFormat`]
/// - [`ErrorKind::NotAFile`]
/// - [`ErrorKind::FileMissing`]
/// - [`ErrorKind::PermissionDenied`]
/// - [`ErrorKind::ImageUnparseable`]
/// - [`ErrorKind::Unknown`]
///
/// ### Write only
/// - [`ErrorKind::NotWritable`]
/// - [`ErrorKind::PathExhausted`]
/// - [`ErrorKind::PartialSuccess`]
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("Missing file extension; cannot identify image format")]
    MissingExtension,
    /// Carries the lower-cased, dot-prefixed extension.
    #[display("Unsupported format: {_0}")]
    UnsupportedFormat(#[error(not(source))] String),
    #[display("Not a file; cannot compress")]
    NotAFile,
    #[display("File does not exist or was moved")]
    FileMissing,
    #[display("No write permission")]
    PermissionDenied,
    #[display("Image cannot be parsed or format is unsupported")]
    ImageUnparseable,
    /// The task has no computed output to write, or is already being written.
    #[display("This image is not precomputed yet and cannot be written")]
    NotWritable,
    /// Every collision-avoiding candidate name is taken.
    #[display("Unable to generate an available output file name")]
    PathExhausted,
    /// The output was committed but the source it replaces could not be
    /// deleted. Carries the committed output path.
    #[display("New file was written, but deleting the original file failed")]
    PartialSuccess(#[error(not(source))] PathBuf),
    #[display("{_0}")]
    Unknown(#[error(not(source))] String),
}

impl ErrorKind {
    /// Classify a filesystem failure.
    pub fn from_storage(kind: &StorageErrorKind) -> Self {
        match kind {
            StorageErrorKind::NotFound(_) => Self::FileMissing,
            StorageErrorKind::PermissionDenied(_) => Self::PermissionDenied,
            StorageErrorKind::IsADirectory(_) => Self::NotAFile,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Classify a codec failure.
    pub fn from_codec(kind: &CodecErrorKind) -> Self {
        match kind {
            CodecErrorKind::Unparseable | CodecErrorKind::Unsupported(_) => Self::ImageUnparseable,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// The already committed output of a partially successful write.
    pub fn partial_output(&self) -> Option<&Path> {
        match self {
            Self::PartialSuccess(path) => Some(path),
            _ => None,
        }
    }

    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PartialSuccess(_) | Self::Unknown(_) | Self::PermissionDenied)
    }
}

/// Re-raise a dependency error under its classified stage kind.
pub(crate) fn classify<T, K>(
    result: std::result::Result<T, exn::Exn<K>>,
    kind: impl FnOnce(&K) -> ErrorKind,
) -> Result<T>
where
    K: std::error::Error + Send + Sync + 'static,
{
    use exn::ResultExt;
    match result {
        Ok(value) => Ok(value),
        Err(err) => {
            let classified = kind(&err);
            Err(err).or_raise(|| classified)
        },
    }
}

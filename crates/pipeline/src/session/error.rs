//! Session Error Types
//!
//! Refusals of session-level operations. Per-item failures are not errors at
//! this level; they are recorded on the task and tallied in reports.

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("Select images first")]
    EmptySelection,
    #[display("No supported images found (supports jpg, jpeg, png, webp, avif)")]
    NoSupportedImages,
    /// A batch write needs every compute to have finished.
    #[display("Precompute is still running")]
    ComputeInProgress,
    /// Settings cannot change and a batch cannot start while a write runs.
    #[display("A write is in progress")]
    WriteInProgress,
    #[display("A batch write is in progress")]
    BatchInProgress,
    #[display("No writable images")]
    NothingToWrite,
    /// The user did not confirm a destructive overwrite.
    #[display("Overwrite was not confirmed")]
    Declined,
    #[display("Unknown task: {_0}")]
    UnknownTask(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if the same request may succeed later without any
    /// change on the caller's side.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ComputeInProgress | Self::WriteInProgress | Self::BatchInProgress)
    }
}

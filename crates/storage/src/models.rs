//! Storage models.

use std::path::PathBuf;

/// What kind of filesystem entry a path resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// A regular file.
    File,
    Directory,
    /// Sockets, devices, FIFOs... anything we refuse to read as an image.
    Other,
}

/// File metadata returned by [`Filesystem::stat`](crate::Filesystem::stat).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Absolute, normalized path
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    pub kind: FileKind,
}
impl FileInfo {
    pub fn new(path: impl Into<PathBuf>, size: u64, kind: FileKind) -> Self {
        Self {
            path: path.into(),
            size,
            kind,
        }
    }

    #[inline]
    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }
}
